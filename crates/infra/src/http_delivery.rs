//! reqwest-backed delivery client: one `POST {worker}/process` per attempt.

use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::debug;

use courier_core::Job;
use courier_engine::{AttemptOutcome, DeliveryClient, DeliveryError};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Bodies longer than this are truncated in error messages.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpDeliveryClient {
    client: reqwest::Client,
    process_url: String,
    timeout: Duration,
}

impl HttpDeliveryClient {
    /// `client` is shared across requests so connections are pooled.
    pub fn new(client: reqwest::Client, worker_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            process_url: format!("{}/process", worker_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub fn process_url(&self) -> &str {
        &self.process_url
    }

    fn classify(&self, err: &reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else {
            DeliveryError::Network(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn send(&self, job: &Job) -> AttemptOutcome {
        let mut request = self
            .client
            .post(&self.process_url)
            .timeout(self.timeout)
            .json(job);
        if let Some(key) = job.idempotency_key() {
            request = request.header(IDEMPOTENCY_HEADER, key.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::from_error(self.classify(&e)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return AttemptOutcome::from_error(self.classify(&e)),
        };
        debug!(status = status.as_u16(), "worker responded");

        if status.is_success() {
            AttemptOutcome::Success(parse_body(body))
        } else {
            AttemptOutcome::from_error(DeliveryError::from_status(
                status.as_u16(),
                truncate(body),
            ))
        }
    }
}

/// Worker bodies are JSON in the common case; anything else is passed through
/// as a JSON string.
fn parse_body(body: String) -> JsonValue {
    if body.trim().is_empty() {
        return JsonValue::Null;
    }
    serde_json::from_str(&body).unwrap_or(JsonValue::String(body))
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
