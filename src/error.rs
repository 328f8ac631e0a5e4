//! Error types for the render engine
//!
//! Failures are always local to one request: they travel inside that
//! request's `RenderResult` and never take down the engine or other renders.
//! A cancelled render is not an error, it is reported through
//! `RenderResult::cancelled`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// No compatible GPU profile, device creation failed, or the compute
    /// program did not compile. Reported once by `initialize_gpu`.
    #[error("GPU initialization failed: {0}")]
    Initialization(String),

    /// Runtime GPU error while rendering one request
    #[error("GPU dispatch failed: {0}")]
    Dispatch(String),

    /// Empty image, mismatched buffer size, or dimensions above the limit
    #[error("input rejected: {0}")]
    InputRejected(String),

    /// GPU init never ran or failed, and the CPU fallback is disabled
    #[error("GPU is unavailable")]
    GpuUnavailable,

    /// The worker went away without producing a result
    #[error("render worker exited without producing a result")]
    WorkerLost,

    /// A controlling-thread-only call was made from another thread
    #[error("must be called from the thread that created the engine")]
    WrongThread,
}

impl RenderError {
    pub(crate) fn dispatch(context: &str, err: impl std::fmt::Display) -> Self {
        RenderError::Dispatch(format!("{}: {}", context, err))
    }
}

/// Why a render stopped without producing pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStop {
    /// The request's token was cancelled at a checkpoint
    Cancelled,
    Failed(RenderError),
}

impl From<RenderError> for RenderStop {
    fn from(err: RenderError) -> Self {
        RenderStop::Failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            RenderError::dispatch("readback", "device lost").to_string(),
            "GPU dispatch failed: readback: device lost"
        );
        assert_eq!(RenderError::GpuUnavailable.to_string(), "GPU is unavailable");
    }

    #[test]
    fn test_stop_from_error() {
        let stop: RenderStop = RenderError::WorkerLost.into();
        assert_eq!(stop, RenderStop::Failed(RenderError::WorkerLost));
    }
}
