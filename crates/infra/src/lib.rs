//! Infrastructure layer: environment config, the HTTP worker client, the Redis
//! dead-letter store and the worker health probe.

pub mod config;
pub mod http_delivery;
pub mod probes;

#[cfg(feature = "redis")]
pub mod redis_dlq;

pub use config::{ConfigError, CourierConfig};
pub use http_delivery::HttpDeliveryClient;
pub use probes::WorkerProbe;

#[cfg(feature = "redis")]
pub use redis_dlq::RedisDeadLetterStore;
