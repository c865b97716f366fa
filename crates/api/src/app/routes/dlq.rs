use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use courier_core::EntryId;
use courier_engine::{ForwardResult, ReplayError};

use crate::app::{dto, errors, services::AppServices};

pub async fn list(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.store().list().await {
        Ok(entries) => Json(dto::DlqListResponse::from(entries)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn replay(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::ReplayRequest>, JsonRejection>,
) -> axum::response::Response {
    let message_id = match body {
        Ok(Json(dto::ReplayRequest {
            message_id: Some(id),
        })) if !id.trim().is_empty() => id,
        Ok(_) => return errors::bad_request("Missing message_id"),
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };

    // Ids are generated here; anything that does not parse cannot be in the queue.
    let Ok(entry_id) = message_id.parse::<EntryId>() else {
        return not_found();
    };

    match Arc::clone(&services).replay(entry_id).await {
        Ok(Ok(ForwardResult::Delivered { response, .. })) => Json(dto::ReplayResponse {
            success: true,
            message: "Message replayed successfully".to_string(),
            result: Some(response),
            error: None,
            dlq_entry_id: None,
        })
        .into_response(),
        Ok(Ok(ForwardResult::DeadLettered {
            entry_id,
            last_error,
            ..
        })) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(dto::ReplayResponse {
                success: false,
                message: "Replay failed".to_string(),
                result: None,
                error: Some(last_error.to_string()),
                dlq_entry_id: Some(entry_id),
            }),
        )
            .into_response(),
        Ok(Err(ReplayError::NotFound(_))) => not_found(),
        Ok(Err(ReplayError::Store(e))) => errors::store_error_to_response(e),
        Err(e) => {
            error!(error = %e, "replay task failed");
            errors::internal("replay task failed")
        }
    }
}

pub async fn remove(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let entry_id = match id.parse::<EntryId>() {
        Ok(entry_id) => entry_id,
        Err(e) => return errors::bad_request(e.to_string()),
    };

    match services.store().remove(entry_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

fn not_found() -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", "Message not found in DLQ")
}
