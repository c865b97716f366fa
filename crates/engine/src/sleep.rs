//! Sleep abstraction so the retry loop can be driven without real timers.

use std::time::Duration;

/// Suspends the calling task for a backoff delay.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Production sleeper backed by the tokio timer.
///
/// Only the task performing the retry is suspended; other forwards keep running.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
