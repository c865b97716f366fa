use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::services::AppServices;

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Dependency health; `503` when any dependency is not healthy.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let snapshot = services.health().await;
    let status = if snapshot.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot)).into_response()
}
