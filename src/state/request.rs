//! Render requests and their results

use std::time::Duration;

use crate::error::RenderError;
use crate::state::data::PixelBuffer;
use crate::state::edit::AdjustmentParameters;

/// Identifies a request; results carry it back so callers can key them
pub type RequestId = u64;

/// What the caller intends to do with the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderIntent {
    /// Fast interactive render, downsized to the display
    Preview,
    /// Source-resolution render (export)
    Full,
}

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Gpu,
    Cpu,
}

/// Terminal state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Completed,
    Cancelled,
    Failed,
}

/// One render job. Consumed by the engine exactly once.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub id: RequestId,
    pub image: PixelBuffer,
    pub params: AdjustmentParameters,
    pub intent: RenderIntent,
    /// Display scale factor; only used to size preview output
    pub display_scale: f32,
}

impl RenderRequest {
    /// Full-resolution request
    pub fn full(id: RequestId, image: PixelBuffer, params: AdjustmentParameters) -> Self {
        Self {
            id,
            image,
            params,
            intent: RenderIntent::Full,
            display_scale: 1.0,
        }
    }

    /// Preview request for a display with the given scale factor
    pub fn preview(
        id: RequestId,
        image: PixelBuffer,
        params: AdjustmentParameters,
        display_scale: f32,
    ) -> Self {
        Self {
            id,
            image,
            params,
            intent: RenderIntent::Preview,
            display_scale,
        }
    }
}

/// The answer to exactly one `RenderRequest`
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub id: RequestId,
    /// Rendered pixels; `None` when cancelled or failed
    pub image: Option<PixelBuffer>,
    pub cancelled: bool,
    /// Time from submission to result
    pub elapsed: Duration,
    pub error: Option<RenderError>,
    pub backend: Option<Backend>,
}

impl RenderResult {
    pub(crate) fn completed(
        id: RequestId,
        image: PixelBuffer,
        backend: Backend,
        elapsed: Duration,
    ) -> Self {
        Self {
            id,
            image: Some(image),
            cancelled: false,
            elapsed,
            error: None,
            backend: Some(backend),
        }
    }

    pub(crate) fn cancelled(id: RequestId, backend: Option<Backend>, elapsed: Duration) -> Self {
        Self {
            id,
            image: None,
            cancelled: true,
            elapsed,
            error: None,
            backend,
        }
    }

    pub(crate) fn failed(
        id: RequestId,
        error: RenderError,
        backend: Option<Backend>,
        elapsed: Duration,
    ) -> Self {
        Self {
            id,
            image: None,
            cancelled: false,
            elapsed,
            error: Some(error),
            backend,
        }
    }

    pub fn status(&self) -> RenderStatus {
        if self.cancelled {
            RenderStatus::Cancelled
        } else if self.error.is_some() || self.image.is_none() {
            RenderStatus::Failed
        } else {
            RenderStatus::Completed
        }
    }

    /// Error text for diagnostics
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_outcome() {
        let image = PixelBuffer::solid(1, 1, [0.0, 0.0, 0.0, 1.0]);
        let done = RenderResult::completed(3, image, Backend::Cpu, Duration::ZERO);
        assert_eq!(done.status(), RenderStatus::Completed);

        let cancelled = RenderResult::cancelled(4, None, Duration::ZERO);
        assert_eq!(cancelled.status(), RenderStatus::Cancelled);
        assert!(cancelled.image.is_none());

        let failed = RenderResult::failed(5, RenderError::GpuUnavailable, None, Duration::ZERO);
        assert_eq!(failed.status(), RenderStatus::Failed);
        assert_eq!(failed.error_message().as_deref(), Some("GPU is unavailable"));
    }
}
