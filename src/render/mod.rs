//! Render orchestration
//!
//! `RenderEngine` accepts requests from the controlling thread and runs them
//! on a pool of blocking worker threads. Each request gets a cancellation
//! token; the most recently submitted one is tracked so `cancel_active()`
//! can stop it when the parameters change again. Results come back through
//! a `RenderHandle`.
//!
//! Request states: Queued -> Running -> Completed | Cancelled | Failed.

pub mod cancel;
pub mod config;
pub mod handle;

use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cpu::CpuRenderer;
use crate::error::{RenderError, RenderStop};
use crate::gpu::context::{lock, ContextRegistry, GpuInfo};
use crate::gpu::pipeline;
use crate::state::data::PixelBuffer;
use crate::state::request::{Backend, RenderIntent, RenderRequest, RenderResult, RequestId};

pub use cancel::CancellationToken;
pub use config::EngineConfig;
pub use handle::RenderHandle;

/// Idle workers stay alive (and keep their GPU context) this long
const WORKER_KEEP_ALIVE: Duration = Duration::from_secs(300);

type ActiveSlot = Arc<Mutex<Option<(RequestId, CancellationToken)>>>;

pub struct RenderEngine {
    config: EngineConfig,
    runtime: Option<Runtime>,
    registry: Arc<ContextRegistry>,
    cpu: Arc<CpuRenderer>,
    /// Thread that created the engine
    owner: ThreadId,
    gpu: OnceLock<Result<GpuInfo, RenderError>>,
    active: ActiveSlot,
    next_id: AtomicU64,
}

impl RenderEngine {
    /// Build the worker pool and CPU fallback. The GPU is not touched until
    /// `initialize_gpu`.
    pub fn new(config: EngineConfig) -> Result<Self, RenderError> {
        let registry = Arc::new(ContextRegistry::new());

        let stopping = Arc::clone(&registry);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_keep_alive(WORKER_KEEP_ALIVE)
            .thread_name("raw-render-worker")
            .on_thread_stop(move || stopping.release_thread(thread::current().id()))
            .build()
            .map_err(|e| RenderError::Initialization(format!("worker pool: {}", e)))?;

        let cpu = CpuRenderer::new(config.cpu_threads)?;
        info!(
            "Render engine ready: {} workers, {} CPU threads",
            config.worker_threads.max(1),
            cpu.threads()
        );

        Ok(Self {
            config,
            runtime: Some(runtime),
            registry,
            cpu: Arc::new(cpu),
            owner: thread::current().id(),
            gpu: OnceLock::new(),
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create the primary GPU context. Runs once; later calls return the
    /// first outcome without retrying.
    pub fn initialize_gpu(&self) -> Result<GpuInfo, RenderError> {
        if thread::current().id() != self.owner {
            return Err(RenderError::WrongThread);
        }
        let outcome = self.gpu.get_or_init(|| {
            let outcome = self.registry.initialize_primary_context();
            if let Err(err) = &outcome {
                warn!("GPU unavailable: {}", err);
            }
            outcome
        });
        outcome.clone()
    }

    pub fn is_gpu_available(&self) -> bool {
        matches!(self.gpu.get(), Some(Ok(_)))
    }

    /// Adapter in use, if the GPU initialized
    pub fn gpu_info(&self) -> Option<&GpuInfo> {
        self.gpu.get().and_then(|outcome| outcome.as_ref().ok())
    }

    /// Monotonic request ids for callers that don't bring their own
    pub fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Submit a request with a fresh token. Never blocks.
    pub fn render(&self, request: RenderRequest) -> RenderHandle {
        self.render_with_token(request, CancellationToken::new())
    }

    /// Submit a request with a caller-owned token
    pub fn render_with_token(
        &self,
        request: RenderRequest,
        token: CancellationToken,
    ) -> RenderHandle {
        let id = request.id;
        let submitted = Instant::now();
        let reject = |err: RenderError| {
            debug!("Request {} rejected: {}", id, err);
            RenderHandle::resolved(
                id,
                token.clone(),
                RenderResult::failed(id, err, None, submitted.elapsed()),
            )
        };

        if let Err(err) = self.validate(&request.image) {
            return reject(err);
        }
        let backend = if self.is_gpu_available() {
            Backend::Gpu
        } else if self.config.cpu_fallback {
            Backend::Cpu
        } else {
            return reject(RenderError::GpuUnavailable);
        };
        let Some(runtime) = &self.runtime else {
            return reject(RenderError::WorkerLost);
        };

        *lock(&self.active) = Some((id, token.clone()));

        let job = Job {
            preview_edge: self.config.preview_edge(request.display_scale),
            request,
            token: token.clone(),
            backend,
            submitted,
            registry: Arc::clone(&self.registry),
            cpu: Arc::clone(&self.cpu),
            active: Arc::clone(&self.active),
            #[cfg(test)]
            fault: false,
        };
        let (sender, receiver) = oneshot::channel();
        runtime.spawn_blocking(move || {
            let result = job.run();
            let _ = sender.send(result);
        });

        RenderHandle::new(id, token, receiver)
    }

    /// Cancel the most recently submitted request if it is still running.
    /// Returns false when nothing is active.
    pub fn cancel_active(&self) -> bool {
        match lock(&self.active).take() {
            Some((id, token)) => {
                debug!("Cancelling request {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the active request, wait up to `shutdown_timeout_ms` for the
    /// workers, then release every GPU context.
    ///
    /// Requests still queued resolve as `WorkerLost`. Called from inside an
    /// async runtime it cannot block, so it stops the workers without waiting.
    pub fn shutdown(mut self) {
        self.cancel_active();
        if let Some(runtime) = self.runtime.take() {
            if tokio::runtime::Handle::try_current().is_ok() {
                debug!("Shutdown called from async context, not waiting for workers");
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(Duration::from_millis(self.config.shutdown_timeout_ms));
            }
        }
        self.registry.teardown();
        info!("Render engine shut down");
    }

    fn validate(&self, image: &PixelBuffer) -> Result<(), RenderError> {
        if image.is_empty() {
            return Err(RenderError::InputRejected("image is empty".to_string()));
        }
        let (width, height) = image.dimensions();
        let max = self.config.max_dimension;
        if width > max || height > max {
            return Err(RenderError::InputRejected(format!(
                "{}x{} exceeds the maximum dimension of {}",
                width, height, max
            )));
        }
        Ok(())
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.cancel_active();
        // Safe from async contexts, unlike shutdown_timeout
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        self.registry.teardown();
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("config", &self.config)
            .field("gpu", &self.gpu.get())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Everything a worker needs to run one request
struct Job {
    request: RenderRequest,
    token: CancellationToken,
    backend: Backend,
    submitted: Instant,
    /// Longest preview edge at the request's display scale
    preview_edge: u32,
    registry: Arc<ContextRegistry>,
    cpu: Arc<CpuRenderer>,
    active: ActiveSlot,
    /// Panic on start instead of rendering
    #[cfg(test)]
    fault: bool,
}

impl Job {
    fn run(self) -> RenderResult {
        let id = self.request.id;
        let backend = self.backend;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or_else(|_| {
                Err(RenderError::Dispatch("render worker panicked".to_string()).into())
            });

        // Stop tracking this request unless a newer one replaced it. Ids may
        // repeat across requests, tokens may not.
        {
            let mut active = lock(&self.active);
            if matches!(&*active, Some((_, token)) if token.same_as(&self.token)) {
                *active = None;
            }
        }

        let elapsed = self.submitted.elapsed();
        match outcome {
            Ok(image) => {
                debug!("Request {} completed on {:?} in {:?}", id, backend, elapsed);
                RenderResult::completed(id, image, backend, elapsed)
            }
            Err(RenderStop::Cancelled) => {
                debug!("Request {} cancelled after {:?}", id, elapsed);
                RenderResult::cancelled(id, Some(backend), elapsed)
            }
            Err(RenderStop::Failed(err)) => {
                warn!("Request {} failed: {}", id, err);
                RenderResult::failed(id, err, Some(backend), elapsed)
            }
        }
    }

    fn execute(&self) -> Result<PixelBuffer, RenderStop> {
        if self.token.is_cancelled() {
            return Err(RenderStop::Cancelled);
        }
        debug!("Request {} running on {:?}", self.request.id, self.backend);
        #[cfg(test)]
        if self.fault {
            panic!("fault injected into request {}", self.request.id);
        }

        let source = self.source()?;
        match self.backend {
            Backend::Gpu => {
                let context = self.registry.context_for_current_thread()?;
                let mut context = lock(&context);
                pipeline::run(&mut context, &source, &self.request.params, &self.token)
            }
            Backend::Cpu => self.cpu.render(&source, &self.request.params, &self.token),
        }
    }

    /// Source pixels for this intent: previews are downsized to the display
    fn source(&self) -> Result<Cow<'_, PixelBuffer>, RenderError> {
        let image = &self.request.image;
        if self.request.intent == RenderIntent::Full {
            return Ok(Cow::Borrowed(image));
        }
        match preview_size(image.dimensions(), self.preview_edge) {
            Some((width, height)) => Ok(Cow::Owned(image.resized(width, height)?)),
            None => Ok(Cow::Borrowed(image)),
        }
    }
}

/// Downsized dimensions when the longest edge exceeds `max_edge`
fn preview_size((width, height): (u32, u32), max_edge: u32) -> Option<(u32, u32)> {
    let edge = max_edge.max(1) as u64;
    let longest = width.max(height) as u64;
    if longest <= edge {
        return None;
    }
    let scale = |v: u32| ((v as u64 * edge + longest / 2) / longest).max(1) as u32;
    Some((scale(width), scale(height)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::edit::AdjustmentParameters;
    use crate::state::request::RenderStatus;
    use approx::assert_abs_diff_eq;

    fn cpu_engine() -> RenderEngine {
        let config = EngineConfig {
            worker_threads: 2,
            cpu_threads: 2,
            ..EngineConfig::default()
        };
        RenderEngine::new(config).unwrap()
    }

    fn gray(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::solid(width, height, [0.5, 0.5, 0.5, 1.0])
    }

    /// Slow enough on the CPU that a cancel always lands mid-render
    fn heavy_params() -> AdjustmentParameters {
        let mut params = AdjustmentParameters::default();
        params.apply_clarity = true;
        params.clarity = 50.0;
        params.apply_noise_reduction = true;
        params.noise_reduction = 50.0;
        params
    }

    #[test]
    fn test_one_result_per_request() {
        let engine = cpu_engine();
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let id = engine.next_request_id();
                let params = AdjustmentParameters::default();
                engine.render(RenderRequest::full(id, gray(24, 24), params))
            })
            .collect();

        for handle in handles {
            let id = handle.id();
            let result = handle.wait();
            assert_eq!(result.id, id);
            assert_eq!(result.status(), RenderStatus::Completed);
            assert_eq!(result.backend, Some(Backend::Cpu));
        }
    }

    #[test]
    fn test_neutral_gray_scenario() {
        let engine = cpu_engine();
        let request = RenderRequest::full(1, gray(512, 512), AdjustmentParameters::default());
        let handle = engine.render(request);
        let result = handle.wait();
        assert_eq!(result.status(), RenderStatus::Completed);

        let image = result.image.unwrap();
        assert_eq!(image.dimensions(), (512, 512));
        for px in image.as_slice().chunks_exact(4) {
            assert_abs_diff_eq!(px[0], 0.5, epsilon = 1e-4);
            assert_abs_diff_eq!(px[1], 0.5, epsilon = 1e-4);
            assert_abs_diff_eq!(px[2], 0.5, epsilon = 1e-4);
            assert_eq!(px[3], 1.0);
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let engine = cpu_engine();
        let token = CancellationToken::new();
        token.cancel();

        let request = RenderRequest::full(7, gray(32, 32), AdjustmentParameters::default());
        let result = engine.render_with_token(request, token).wait();
        assert_eq!(result.id, 7);
        assert_eq!(result.status(), RenderStatus::Cancelled);
        assert!(result.image.is_none());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_cancel_active_when_idle() {
        let engine = cpu_engine();
        assert!(!engine.cancel_active());

        let result = engine
            .render(RenderRequest::full(1, gray(8, 8), AdjustmentParameters::default()))
            .wait();
        assert_eq!(result.status(), RenderStatus::Completed);
        // Finished requests are no longer tracked
        assert!(!engine.cancel_active());
    }

    #[test]
    fn test_cancel_then_resubmit() {
        let engine = cpu_engine();
        let first = engine.render(RenderRequest::full(1, gray(2048, 2048), heavy_params()));
        assert!(engine.cancel_active());

        let mut brighter = AdjustmentParameters::default();
        brighter.exposure = 1.0;
        let second = engine.render(RenderRequest::full(2, gray(64, 64), brighter));

        let first = first.wait();
        assert_eq!(first.id, 1);
        match first.status() {
            RenderStatus::Cancelled => assert!(first.image.is_none()),
            RenderStatus::Completed => {
                assert_eq!(first.image.map(|i| i.dimensions()), Some((2048, 2048)))
            }
            RenderStatus::Failed => panic!("request 1 failed: {:?}", first.error),
        }

        let second = second.wait();
        assert_eq!(second.id, 2);
        assert_eq!(second.status(), RenderStatus::Completed);
        let image = second.image.unwrap();
        assert_eq!(image.dimensions(), (64, 64));
        assert!(image.mean_luma() > 0.6);
    }

    #[test]
    fn test_repeated_id_keeps_newer_request_tracked() {
        let engine = cpu_engine();
        let first = engine.render(RenderRequest::full(1, gray(400, 400), heavy_params()));
        let second = engine.render(RenderRequest::full(1, gray(3000, 3000), heavy_params()));

        assert_eq!(first.wait().status(), RenderStatus::Completed);
        // The first request finishing must not untrack the second
        assert!(engine.cancel_active());
        assert!(second.token().is_cancelled());

        let second = second.wait();
        assert_eq!(second.id, 1);
        assert_eq!(second.status(), RenderStatus::Cancelled);
    }

    fn cpu_job(engine: &RenderEngine, request: RenderRequest, fault: bool) -> Job {
        Job {
            preview_edge: engine.config.preview_edge(request.display_scale),
            request,
            token: CancellationToken::new(),
            backend: Backend::Cpu,
            submitted: Instant::now(),
            registry: Arc::clone(&engine.registry),
            cpu: Arc::clone(&engine.cpu),
            active: Arc::clone(&engine.active),
            fault,
        }
    }

    #[test]
    fn test_panicking_request_is_isolated() {
        let engine = cpu_engine();
        let request = RenderRequest::full(1, gray(256, 256), heavy_params());
        let healthy = cpu_job(&engine, request, false);
        let request = RenderRequest::full(2, gray(16, 16), AdjustmentParameters::default());
        let faulty = cpu_job(&engine, request, true);

        let runtime = engine.runtime.as_ref().unwrap();
        let healthy = runtime.spawn_blocking(move || healthy.run());
        let faulty = runtime.spawn_blocking(move || faulty.run());
        let faulty = runtime.block_on(faulty).unwrap();
        let healthy = runtime.block_on(healthy).unwrap();

        assert_eq!(faulty.id, 2);
        assert_eq!(faulty.status(), RenderStatus::Failed);
        assert!(matches!(faulty.error, Some(RenderError::Dispatch(_))));
        assert!(faulty.image.is_none());

        assert_eq!(healthy.id, 1);
        assert_eq!(healthy.status(), RenderStatus::Completed);
        assert_eq!(healthy.image.map(|i| i.dimensions()), Some((256, 256)));

        // The pool keeps serving after a worker panic
        let next = engine
            .render(RenderRequest::full(3, gray(8, 8), AdjustmentParameters::default()))
            .wait();
        assert_eq!(next.status(), RenderStatus::Completed);
    }

    #[test]
    fn test_rejects_oversize_without_gpu_init() {
        let engine = cpu_engine();
        let wide = PixelBuffer::solid(16385, 1, [0.0, 0.0, 0.0, 1.0]);
        let result = engine
            .render(RenderRequest::full(3, wide, AdjustmentParameters::default()))
            .wait();
        assert_eq!(result.status(), RenderStatus::Failed);
        assert!(matches!(result.error, Some(RenderError::InputRejected(_))));
        assert!(!engine.is_gpu_available());
        assert!(engine.gpu_info().is_none());

        let empty = engine
            .render(RenderRequest::full(4, gray(0, 0), AdjustmentParameters::default()))
            .wait();
        assert!(matches!(empty.error, Some(RenderError::InputRejected(_))));
    }

    #[test]
    fn test_no_fallback_without_gpu() {
        let config = EngineConfig {
            cpu_fallback: false,
            ..EngineConfig::default()
        };
        let engine = RenderEngine::new(config).unwrap();
        let result = engine
            .render(RenderRequest::full(1, gray(4, 4), AdjustmentParameters::default()))
            .wait();
        assert_eq!(result.error, Some(RenderError::GpuUnavailable));
    }

    #[test]
    fn test_preview_is_downsized() {
        let config = EngineConfig {
            preview_max_edge: 64,
            ..EngineConfig::default()
        };
        let engine = RenderEngine::new(config).unwrap();

        let preview = engine
            .render(RenderRequest::preview(1, gray(256, 128), AdjustmentParameters::default(), 1.0))
            .wait();
        assert_eq!(preview.image.map(|i| i.dimensions()), Some((64, 32)));

        let hidpi = engine
            .render(RenderRequest::preview(2, gray(256, 128), AdjustmentParameters::default(), 2.0))
            .wait();
        assert_eq!(hidpi.image.map(|i| i.dimensions()), Some((128, 64)));

        let full = engine
            .render(RenderRequest::full(3, gray(256, 128), AdjustmentParameters::default()))
            .wait();
        assert_eq!(full.image.map(|i| i.dimensions()), Some((256, 128)));
    }

    #[test]
    fn test_preview_size() {
        assert_eq!(preview_size((100, 50), 2560), None);
        assert_eq!(preview_size((5120, 2560), 2560), Some((2560, 1280)));
        assert_eq!(preview_size((4000, 1), 100), Some((100, 1)));
    }

    #[test]
    fn test_handle_is_a_future() {
        let engine = cpu_engine();
        let request = RenderRequest::full(11, gray(16, 16), AdjustmentParameters::default());
        let handle = engine.render(request);
        let result = pollster::block_on(handle);
        assert_eq!(result.id, 11);
        assert_eq!(result.status(), RenderStatus::Completed);
    }

    #[test]
    fn test_request_ids_increase() {
        let engine = cpu_engine();
        let a = engine.next_request_id();
        let b = engine.next_request_id();
        assert!(b > a);
    }

    #[test]
    fn test_initialize_gpu_from_other_thread() {
        let engine = cpu_engine();
        let outcome = thread::scope(|s| s.spawn(|| engine.initialize_gpu()).join().unwrap());
        assert_eq!(outcome.unwrap_err(), RenderError::WrongThread);
        assert!(!engine.is_gpu_available());
    }

    #[test]
    fn test_shutdown_resolves_in_flight_requests() {
        let engine = cpu_engine();
        let handle = engine.render(RenderRequest::full(5, gray(2048, 2048), heavy_params()));
        engine.shutdown();

        let result = handle.wait();
        assert_eq!(result.id, 5);
        assert_ne!(result.status(), RenderStatus::Completed);
    }

    #[test]
    fn test_shutdown_inside_async_context() {
        let engine = cpu_engine();
        let handle = engine.render(RenderRequest::full(6, gray(2048, 2048), heavy_params()));

        let outer = Builder::new_current_thread().build().unwrap();
        outer.block_on(async move { engine.shutdown() });

        let result = handle.wait();
        assert_eq!(result.id, 6);
        assert_ne!(result.status(), RenderStatus::Completed);
    }

    #[test]
    fn test_gpu_neutral_gray() {
        let engine = cpu_engine();
        if engine.initialize_gpu().is_err() {
            return; // no GPU on this machine
        }
        assert!(engine.is_gpu_available());
        // Second call returns the cached outcome
        assert!(engine.initialize_gpu().is_ok());

        let result = engine
            .render(RenderRequest::full(1, gray(512, 512), AdjustmentParameters::default()))
            .wait();
        assert_eq!(result.backend, Some(Backend::Gpu));
        let image = result.image.unwrap();
        for px in image.as_slice().chunks_exact(4) {
            assert_abs_diff_eq!(px[0], 0.5, epsilon = 1e-3);
        }

        let token = CancellationToken::new();
        token.cancel();
        let request = RenderRequest::full(2, gray(64, 64), AdjustmentParameters::default());
        let cancelled = engine.render_with_token(request, token).wait();
        assert_eq!(cancelled.status(), RenderStatus::Cancelled);
        engine.shutdown();
    }
}
