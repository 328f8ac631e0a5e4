//! Caller-side view of one submitted render

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use super::cancel::CancellationToken;
use crate::error::RenderError;
use crate::state::request::{RequestId, RenderResult};

/// Resolves to the request's `RenderResult`, exactly once.
///
/// Await it from async code, or call `wait()` from a plain thread.
#[derive(Debug)]
pub struct RenderHandle {
    id: RequestId,
    token: CancellationToken,
    receiver: oneshot::Receiver<RenderResult>,
}

impl RenderHandle {
    pub(crate) fn new(
        id: RequestId,
        token: CancellationToken,
        receiver: oneshot::Receiver<RenderResult>,
    ) -> Self {
        Self { id, token, receiver }
    }

    /// A handle whose result is already known
    pub(crate) fn resolved(id: RequestId, token: CancellationToken, result: RenderResult) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self::new(id, token, receiver)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Cancel this request only
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Block the calling thread until the result arrives.
    ///
    /// Must not be called from inside an async runtime; await the handle there.
    pub fn wait(self) -> RenderResult {
        let id = self.id;
        self.receiver.blocking_recv().unwrap_or_else(|_| lost(id))
    }
}

fn lost(id: RequestId) -> RenderResult {
    RenderResult::failed(id, RenderError::WorkerLost, None, Duration::ZERO)
}

impl Future for RenderHandle {
    type Output = RenderResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| lost(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::PixelBuffer;
    use crate::state::request::{Backend, RenderStatus};

    #[test]
    fn test_resolved_handle() {
        let image = PixelBuffer::solid(2, 2, [0.1, 0.2, 0.3, 1.0]);
        let result = RenderResult::completed(9, image, Backend::Cpu, Duration::ZERO);
        let handle = RenderHandle::resolved(9, CancellationToken::new(), result);
        assert_eq!(handle.id(), 9);
        assert_eq!(handle.wait().status(), RenderStatus::Completed);
    }

    #[test]
    fn test_dropped_sender_reports_worker_lost() {
        let (sender, receiver) = oneshot::channel();
        let handle = RenderHandle::new(4, CancellationToken::new(), receiver);
        drop(sender);

        let result = pollster::block_on(handle);
        assert_eq!(result.id, 4);
        assert_eq!(result.error, Some(RenderError::WorkerLost));
        assert_eq!(result.status(), RenderStatus::Failed);
    }

    #[test]
    fn test_cancel_sets_token() {
        let (_sender, receiver) = oneshot::channel();
        let handle = RenderHandle::new(1, CancellationToken::new(), receiver);
        let observer = handle.token().clone();
        handle.cancel();
        assert!(observer.is_cancelled());
    }
}
