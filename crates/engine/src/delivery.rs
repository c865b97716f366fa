//! Single-attempt delivery to the downstream worker.

use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

use courier_core::Job;

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    /// Server-side or throttling response; the same request may succeed later.
    #[error("worker returned {status}: {body}")]
    Transient { status: u16, body: String },

    /// The worker refused the request itself; resending it cannot help.
    #[error("worker rejected request with {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl DeliveryError {
    /// Classify a non-success HTTP status.
    ///
    /// 5xx, 408 (request timeout) and 429 (too many requests) are transient;
    /// every other status is a rejection.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status >= 500 || status == 408 || status == 429 {
            Self::Transient { status, body }
        } else {
            Self::Rejected { status, body }
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Worker accepted the job; carries its response body.
    Success(JsonValue),
    RetryableFailure(DeliveryError),
    FatalFailure(DeliveryError),
}

impl AttemptOutcome {
    pub fn from_error(err: DeliveryError) -> Self {
        if err.is_retryable() {
            Self::RetryableFailure(err)
        } else {
            Self::FatalFailure(err)
        }
    }
}

/// Performs exactly one outbound call per `send`.
///
/// Implementations never retry internally and never fail past their boundary:
/// every outcome, including timeouts, comes back as an [`AttemptOutcome`].
#[async_trait::async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send(&self, job: &Job) -> AttemptOutcome;
}
