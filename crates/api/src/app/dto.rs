use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use courier_core::{DeadLetterEntry, EntryId};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /function/process`. Both fields are optional at the wire
/// level so that a missing `data` gets a domain error rather than a serde one.
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    #[serde(default)]
    pub message_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct UnavailableResponse {
    pub error: &'static str,
    pub message: String,
    pub retry_after: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dlq_entry_id: Option<EntryId>,
}

#[derive(Debug, Serialize)]
pub struct DlqListResponse {
    pub dlq_messages: Vec<DeadLetterEntry>,
    pub count: usize,
}

impl From<Vec<DeadLetterEntry>> for DlqListResponse {
    fn from(dlq_messages: Vec<DeadLetterEntry>) -> Self {
        Self {
            count: dlq_messages.len(),
            dlq_messages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dlq_entry_id: Option<EntryId>,
}
