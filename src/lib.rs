//! Non-destructive photo adjustment renderer
//!
//! Takes a decoded image and a set of adjustment parameters and renders it
//! on the GPU (wgpu compute) or, when no GPU is available, on the CPU.
//! Renders run asynchronously on worker threads and can be cancelled when
//! the parameters change faster than renders complete.
//!
//! ```no_run
//! use raw_render::{AdjustmentParameters, EngineConfig, PixelBuffer, RenderEngine, RenderRequest};
//!
//! let engine = RenderEngine::new(EngineConfig::default())?;
//! let _ = engine.initialize_gpu();
//!
//! let image = PixelBuffer::solid(640, 480, [0.5, 0.5, 0.5, 1.0]);
//! let mut params = AdjustmentParameters::default();
//! params.exposure = 0.5;
//!
//! let handle = engine.render(RenderRequest::full(engine.next_request_id(), image, params));
//! let result = handle.wait();
//! # Ok::<(), raw_render::RenderError>(())
//! ```

pub mod color;
pub mod cpu;
pub mod error;
pub mod gpu;
pub mod render;
pub mod state;

pub use error::RenderError;
pub use render::{CancellationToken, EngineConfig, RenderEngine, RenderHandle};
pub use state::data::PixelBuffer;
pub use state::edit::AdjustmentParameters;
pub use state::request::{
    Backend, RenderIntent, RenderRequest, RenderResult, RenderStatus, RequestId,
};
