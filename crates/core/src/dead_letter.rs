//! Dead-letter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::EntryId;
use crate::job::Job;

/// A job that exhausted its delivery attempts.
///
/// Entries are never expired: they stay until a replay succeeds or an operator
/// removes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: EntryId,
    pub created_at: DateTime<Utc>,
    /// The job exactly as it was submitted; replay re-sends it verbatim.
    pub original_job: Job,
    pub attempts_made: u32,
    /// Display text of the failure that ended delivery.
    pub last_error: String,
}

impl DeadLetterEntry {
    /// Create a fresh entry with a new id and the current time.
    pub fn new(original_job: Job, attempts_made: u32, last_error: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            created_at: Utc::now(),
            original_job,
            attempts_made,
            last_error: last_error.into(),
        }
    }
}
