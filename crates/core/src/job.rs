//! The unit of work handed to the forwarding engine.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};

/// Caller-supplied token that lets the downstream worker recognise repeated
/// deliveries of the same logical job.
///
/// Opaque to this crate: it is never parsed, trimmed or regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wrap a raw key. Empty keys are treated as "no key".
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() { None } else { Some(Self(raw)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job submitted for forwarding.
///
/// Immutable once constructed: the engine only ever borrows it, so every
/// attempt (retries and replays included) sends exactly the same payload and
/// idempotency key. The serialized form is also the wire body sent to the
/// worker: `{"data": ..., "idempotency_key": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    data: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<IdempotencyKey>,
}

impl Job {
    /// Create a job, rejecting missing or empty payloads.
    ///
    /// `null`, `""`, `[]` and `{}` count as empty. Scalars such as `0` or
    /// `false` are valid payloads.
    pub fn new(data: JsonValue, idempotency_key: Option<IdempotencyKey>) -> DomainResult<Self> {
        if is_empty_payload(&data) {
            return Err(DomainError::validation("Missing required field: data"));
        }
        Ok(Self {
            data,
            idempotency_key,
        })
    }

    /// Build a job from loosely-typed request fields.
    pub fn from_parts(data: Option<JsonValue>, idempotency_key: Option<String>) -> DomainResult<Self> {
        let data = data.ok_or_else(|| DomainError::validation("Missing required field: data"))?;
        Self::new(data, idempotency_key.and_then(IdempotencyKey::new))
    }

    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }
}

fn is_empty_payload(data: &JsonValue) -> bool {
    match data {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
        JsonValue::Bool(_) | JsonValue::Number(_) => false,
    }
}
