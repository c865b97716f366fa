use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use tracing::error;

use courier_core::Job;
use courier_engine::{ForwardError, ForwardResult};

use crate::app::{dto, errors, services::AppServices};

pub async fn process(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::ProcessRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::bad_request(rejection.body_text()),
    };

    let job = match Job::from_parts(body.data, body.idempotency_key) {
        Ok(job) => job,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let retry_after = services.retry_after_secs();
    match Arc::clone(&services).forward(job).await {
        Ok(Ok(ForwardResult::Delivered { response, .. })) => {
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(Ok(ForwardResult::DeadLettered {
            entry_id,
            last_error,
            attempts,
        })) => unavailable(
            retry_after,
            format!("Failed after {attempts} attempt(s): {last_error}"),
            Some(entry_id),
        ),
        Ok(Err(ForwardError::Persistence {
            attempts,
            last_error,
            ..
        })) => unavailable(
            retry_after,
            format!("Failed after {attempts} attempt(s): {last_error}; the job could not be dead-lettered"),
            None,
        ),
        Err(e) => {
            error!(error = %e, "forward task failed");
            errors::internal("forward task failed")
        }
    }
}

fn unavailable(
    retry_after: u64,
    message: String,
    dlq_entry_id: Option<courier_core::EntryId>,
) -> axum::response::Response {
    let body = dto::UnavailableResponse {
        error: "service_unavailable",
        message,
        retry_after,
        dlq_entry_id,
    };
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
