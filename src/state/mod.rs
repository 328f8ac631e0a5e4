//! Value types that flow between the caller and the engine
//!
//! - Adjustment parameters and their persistence (edit.rs)
//! - Pixel buffers (data.rs)
//! - Render requests and results (request.rs)

pub mod data;
pub mod edit;
pub mod request;
