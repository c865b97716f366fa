//! HTTP API: router, handlers, middleware and process lifecycle helpers.

pub mod app;
pub mod middleware;
pub mod signal;
