use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::RecognitionError;

/// Stop signal shared by every stage of one recognition request.
///
/// Cloning yields a handle to the same signal. Once raised it stays raised.
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    /// Raise the signal. Idempotent.
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Fail fast if the signal is already raised.
    pub fn check(&self) -> Result<(), RecognitionError> {
        if self.is_cancelled() {
            Err(RecognitionError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Resolves once the signal is raised.
    pub async fn cancelled(&self) {
        let mut rx = self.signal.subscribe();
        // The sender lives as long as `self`, so this only returns once raised.
        let _ = rx.wait_for(|raised| *raised).await;
    }

    /// Drive `fut` until it completes or the signal is raised.
    ///
    /// A raised signal wins over a ready future, and the future is dropped
    /// without being polled again.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, RecognitionError> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(RecognitionError::Aborted),
            out = fut => Ok(out),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
