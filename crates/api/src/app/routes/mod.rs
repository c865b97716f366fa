use axum::{
    Router,
    routing::{delete, get, post},
};

pub mod dlq;
pub mod process;
pub mod system;

/// Router for everything under `/function`.
pub fn router() -> Router {
    Router::new()
        .route("/process", post(process::process))
        .route("/health", get(system::health))
        .route("/dlq", get(dlq::list))
        .route("/dlq/replay", post(dlq::replay))
        .route("/dlq/:id", delete(dlq::remove))
}
