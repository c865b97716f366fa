//! Cooperative cancellation for forward operations.
//!
//! The retry loop checks the signal between attempts. An attempt that is
//! already in flight always runs to completion, since aborting it mid-call
//! would leave the worker's receipt state unknown.

use tokio::sync::watch;

/// Receiving side: observed by the forwarding engine.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// Create a linked guard/signal pair.
    pub fn pair() -> (CancelGuard, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelGuard { tx, armed: true }, Self { rx: Some(rx) })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested; pends forever otherwise.
    pub async fn cancelled(&self) {
        let Some(rx) = self.rx.as_ref() else {
            return std::future::pending().await;
        };

        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Guard went away without cancelling (disarmed).
                if *rx.borrow() {
                    return;
                }
                return std::future::pending().await;
            }
        }
    }
}

/// Sending side: cancels on drop unless disarmed.
///
/// Held by whoever owns the originating request, so that dropping the request
/// (client disconnect) stops further retries.
#[derive(Debug)]
pub struct CancelGuard {
    tx: watch::Sender<bool>,
    armed: bool,
}

impl CancelGuard {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Drop the guard without cancelling.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.tx.send_replace(true);
        }
    }
}
