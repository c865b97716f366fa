//! Forwarding mechanics: backoff, the retry loop, dead-lettering and health
//! aggregation.
//!
//! Everything here is expressed against traits (`DeliveryClient`,
//! `DeadLetterStore`, `Probe`, `Sleeper`). Network-backed implementations live
//! in `courier-infra`; this crate ships only the in-memory store used by tests
//! and local runs.

pub mod backoff;
pub mod cancel;
pub mod delivery;
pub mod dlq;
pub mod engine;
pub mod health;
pub mod sleep;

#[cfg(test)]
mod testing;

pub use backoff::RetryPolicy;
pub use cancel::{CancelGuard, Cancellation};
pub use delivery::{AttemptOutcome, DeliveryClient, DeliveryError};
pub use dlq::{DeadLetterStore, InMemoryDeadLetterStore, StoreError};
pub use engine::{ForwardError, ForwardResult, ForwardingEngine, ReplayError};
pub use health::{
    HealthAggregator, HealthSnapshot, HealthStatus, Probe, ServiceHealth, ServiceStatus, StoreProbe,
};
pub use sleep::{Sleeper, TokioSleeper};
