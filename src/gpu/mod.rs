//! GPU rendering backend
//!
//! - `shaders.rs` - WGSL compute kernel
//! - `uniforms.rs` - uniform block shared with the CPU fallback
//! - `context.rs` - per-thread context registry and the compiled program
//! - `pipeline.rs` - upload, dispatch and readback for one request

pub mod context;
pub mod pipeline;
pub mod shaders;
pub mod uniforms;

pub use context::{ComputeProgram, ContextRegistry, GpuInfo, ThreadContext};
