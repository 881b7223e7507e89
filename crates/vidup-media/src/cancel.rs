//! Per-job cancellation token.

use tokio_util::sync::CancellationToken;

/// Cooperative cancellation flag shared between the registry and a job's run loop.
///
/// Clones observe the same flag. Requesting cancellation more than once, or
/// after the job finished, has no further effect.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.request_cancel();
        token.request_cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_clone_observes_cancel() {
        let token = CancelToken::new();
        let observer = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.request_cancel();
        });
        tokio::time::timeout(Duration::from_secs(1), observer.cancelled())
            .await
            .expect("cancellation observed");
    }
}
