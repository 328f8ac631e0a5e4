//! GPU context registry
//!
//! One primary device per engine, created on the controlling thread by walking
//! a list of capability profiles newest first. Every thread that renders gets
//! its own `ThreadContext`: it shares the primary device, queue and compiled
//! program, and owns its offscreen target and uniform buffer.
//!
//! Teardown order: worker contexts (reverse creation), program, primary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, error, info, warn};

use super::pipeline::OffscreenTarget;
use super::shaders::{self, ENTRY_POINT};
use super::uniforms::AdjustUniforms;
use crate::error::RenderError;

/// Storage format of the input and output textures
pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Which limits a profile requests from the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitsTier {
    /// Everything the adapter reports
    Adapter,
    Default,
    Downlevel,
}

/// A backend/limits combination tried during initialization
#[derive(Debug, Clone, Copy)]
pub struct CapabilityProfile {
    pub name: &'static str,
    pub backends: wgpu::Backends,
    pub limits: LimitsTier,
}

/// Newest first
pub const PROFILES: [CapabilityProfile; 3] = [
    CapabilityProfile {
        name: "native-full",
        backends: wgpu::Backends::PRIMARY,
        limits: LimitsTier::Adapter,
    },
    CapabilityProfile {
        name: "native-default",
        backends: wgpu::Backends::PRIMARY,
        limits: LimitsTier::Default,
    },
    CapabilityProfile {
        name: "gl-downlevel",
        backends: wgpu::Backends::GL,
        limits: LimitsTier::Downlevel,
    },
];

/// Adapter chosen by `initialize_primary_context`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub adapter: String,
    pub backend: wgpu::Backend,
    pub profile: &'static str,
    pub max_texture_dimension: u32,
}

/// Compiled adjustment kernel, shared read-only by every thread context
#[derive(Debug)]
pub struct ComputeProgram {
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub pipeline: wgpu::ComputePipeline,
}

impl ComputeProgram {
    /// Compile the kernel inside a validation error scope
    pub fn compile(device: &wgpu::Device) -> Result<Self, RenderError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Adjust Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::get_shader().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Adjust Bind Group Layout"),
            entries: &[
                // Source image, read with textureLoad
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Rendered output
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: TEXTURE_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                // AdjustUniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Adjust Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Adjust Pipeline"),
            layout: Some(&layout),
            module: &module,
            entry_point: Some(ENTRY_POINT),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::Initialization(format!(
                "compute program failed to compile: {}",
                err
            )));
        }

        Ok(Self { bind_group_layout, pipeline })
    }
}

/// Who owns a thread context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    /// The controlling thread that initialized the registry
    Primary,
    Worker,
}

/// Per-thread GPU state. Only ever used by the thread it was created for.
pub struct ThreadContext {
    pub(crate) role: ContextRole,
    pub(crate) thread: ThreadId,
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    pub(crate) program: Arc<ComputeProgram>,
    pub(crate) uniform_buffer: wgpu::Buffer,
    pub(crate) target: Option<OffscreenTarget>,
    pub(crate) max_texture_dimension: u32,
    /// Error scopes live on the shared device; one request at a time may
    /// hold scopes open
    pub(crate) scope_lock: Arc<Mutex<()>>,
}

impl ThreadContext {
    fn new(role: ContextRole, primary: &PrimaryContext, program: Arc<ComputeProgram>) -> Self {
        let uniform_buffer = primary.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Adjust Uniform Buffer"),
            size: std::mem::size_of::<AdjustUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            role,
            thread: thread::current().id(),
            device: Arc::clone(&primary.device),
            queue: Arc::clone(&primary.queue),
            program,
            uniform_buffer,
            target: None,
            max_texture_dimension: primary.info.max_texture_dimension,
            scope_lock: Arc::clone(&primary.scope_lock),
        }
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Current offscreen target size, if one has been allocated
    pub fn target_size(&self) -> Option<(u32, u32)> {
        self.target.as_ref().map(|t| (t.width, t.height))
    }

    /// Make sure the offscreen target matches the given size, reusing the
    /// existing one when it does
    pub(crate) fn ensure_target(&mut self, width: u32, height: u32) {
        if self.target.as_ref().is_some_and(|t| t.matches(width, height)) {
            return;
        }
        // Free the old target before allocating the new one
        self.target = None;
        debug!("Allocating {}x{} offscreen target for {:?}", width, height, self.thread);
        self.target = Some(OffscreenTarget::new(&self.device, width, height));
    }
}

impl std::fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadContext")
            .field("role", &self.role)
            .field("thread", &self.thread)
            .field("target", &self.target_size())
            .finish()
    }
}

struct PrimaryContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuInfo,
    scope_lock: Arc<Mutex<()>>,
}

#[derive(Default)]
struct RegistryInner {
    primary: Option<PrimaryContext>,
    program: Option<Arc<ComputeProgram>>,
    contexts: HashMap<ThreadId, Arc<Mutex<ThreadContext>>>,
    /// Creation order, for reverse teardown
    order: Vec<ThreadId>,
    torn_down: bool,
}

/// Per-thread GPU contexts sharing one device and one compiled program
#[derive(Default)]
pub struct ContextRegistry {
    inner: Mutex<RegistryInner>,
    compile_count: AtomicUsize,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the primary device on the calling thread and compile the
    /// shared program. Returns the chosen adapter; calling again after
    /// success returns the same adapter without touching the GPU.
    pub fn initialize_primary_context(&self) -> Result<GpuInfo, RenderError> {
        let mut inner = lock(&self.inner);
        if inner.torn_down {
            return Err(RenderError::Initialization("registry has been torn down".to_string()));
        }
        if let Some(primary) = &inner.primary {
            return Ok(primary.info.clone());
        }

        let mut failures = Vec::new();
        for profile in PROFILES {
            match open_device(&profile) {
                Ok((device, queue, info)) => {
                    let program = ComputeProgram::compile(&device)?;
                    self.compile_count.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "GPU ready: {} ({:?}) via profile {}",
                        info.adapter, info.backend, info.profile
                    );

                    let primary = PrimaryContext {
                        device: Arc::new(device),
                        queue: Arc::new(queue),
                        info: info.clone(),
                        scope_lock: Arc::new(Mutex::new(())),
                    };
                    let program = Arc::new(program);
                    let context =
                        ThreadContext::new(ContextRole::Primary, &primary, Arc::clone(&program));
                    let thread = context.thread;

                    inner.contexts.insert(thread, Arc::new(Mutex::new(context)));
                    inner.order.push(thread);
                    inner.program = Some(program);
                    inner.primary = Some(primary);
                    return Ok(info);
                }
                Err(reason) => {
                    debug!("GPU profile {} rejected: {}", profile.name, reason);
                    failures.push(format!("{}: {}", profile.name, reason));
                }
            }
        }

        warn!("No GPU profile accepted");
        Err(RenderError::Initialization(failures.join("; ")))
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.inner).primary.is_some()
    }

    pub fn info(&self) -> Option<GpuInfo> {
        lock(&self.inner).primary.as_ref().map(|p| p.info.clone())
    }

    /// The calling thread's context, created on first use
    pub fn context_for_current_thread(&self) -> Result<Arc<Mutex<ThreadContext>>, RenderError> {
        let thread = thread::current().id();
        let mut inner = lock(&self.inner);
        if inner.torn_down {
            return Err(RenderError::GpuUnavailable);
        }
        if let Some(context) = inner.contexts.get(&thread) {
            return Ok(Arc::clone(context));
        }

        let (Some(primary), Some(program)) = (&inner.primary, &inner.program) else {
            return Err(RenderError::GpuUnavailable);
        };
        let context = Arc::new(Mutex::new(ThreadContext::new(
            ContextRole::Worker,
            primary,
            Arc::clone(program),
        )));
        debug!("Created GPU context for {:?}", thread);

        inner.contexts.insert(thread, Arc::clone(&context));
        inner.order.push(thread);
        Ok(context)
    }

    /// Drop the context of a thread that is going away
    pub fn release_thread(&self, thread: ThreadId) {
        let mut inner = lock(&self.inner);
        if inner.contexts.remove(&thread).is_some() {
            inner.order.retain(|t| *t != thread);
            debug!("Released GPU context for {:?}", thread);
        }
    }

    /// Destroy every context, then the program, then the primary device.
    /// Later lookups fail with `GpuUnavailable`.
    pub fn teardown(&self) {
        let mut inner = lock(&self.inner);
        if inner.torn_down {
            return;
        }
        inner.torn_down = true;

        while let Some(thread) = inner.order.pop() {
            if inner.contexts.remove(&thread).is_some() {
                debug!("Tearing down GPU context for {:?}", thread);
            }
        }
        inner.contexts.clear();
        inner.program = None;
        if let Some(primary) = inner.primary.take() {
            let _ = primary.device.poll(wgpu::Maintain::Wait);
            info!("GPU context for {} released", primary.info.adapter);
        }
    }

    /// Number of live thread contexts, primary included
    pub fn context_count(&self) -> usize {
        lock(&self.inner).contexts.len()
    }

    /// How many times the compute program has been compiled (0 or 1)
    pub fn compile_count(&self) -> usize {
        self.compile_count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("ContextRegistry")
            .field("gpu", &inner.primary.as_ref().map(|p| &p.info))
            .field("contexts", &inner.contexts.len())
            .field("torn_down", &inner.torn_down)
            .finish()
    }
}

/// Try one profile: adapter, capability checks, device
fn open_device(
    profile: &CapabilityProfile,
) -> Result<(wgpu::Device, wgpu::Queue, GpuInfo), String> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: profile.backends,
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| "no adapter".to_string())?;
    let adapter_info = adapter.get_info();

    let downlevel = adapter.get_downlevel_capabilities();
    if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
        return Err(format!("{} lacks compute shaders", adapter_info.name));
    }
    let format_features = adapter.get_texture_format_features(TEXTURE_FORMAT);
    if !format_features
        .allowed_usages
        .contains(wgpu::TextureUsages::STORAGE_BINDING)
    {
        return Err(format!(
            "{} cannot write {:?} storage textures",
            adapter_info.name, TEXTURE_FORMAT
        ));
    }

    let required_limits = match profile.limits {
        LimitsTier::Adapter => adapter.limits(),
        LimitsTier::Default => wgpu::Limits::default(),
        LimitsTier::Downlevel => wgpu::Limits::downlevel_defaults(),
    };
    let max_texture_dimension = required_limits.max_texture_dimension_2d;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("raw-render device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: wgpu::MemoryHints::Performance,
        },
        None,
    ))
    .map_err(|e| format!("device request failed: {}", e))?;

    device.on_uncaptured_error(Box::new(|err| {
        error!("Uncaptured GPU error: {}", err);
    }));

    Ok((
        device,
        queue,
        GpuInfo {
            adapter: adapter_info.name,
            backend: adapter_info.backend,
            profile: profile.name,
            max_texture_dimension,
        },
    ))
}
