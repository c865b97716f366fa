//! Dead-letter store abstraction and the in-memory implementation.
//!
//! Entries are keyed by a synthetic [`EntryId`], never by value, so two
//! dead-lettered copies of the same payload can be replayed or removed
//! independently. `list` returns entries **newest-first**.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

use courier_core::{DeadLetterEntry, EntryId, Job};

/// Dead-letter store error.
///
/// Kept apart from delivery errors: a failing store means a failed job may be
/// lost, which operators must be able to tell from "the worker is down".
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("dead-letter store disconnected: {0}")]
    Disconnected(String),

    #[error("dead-letter store command failed: {0}")]
    Command(String),

    #[error("dead-letter entry serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True when the backing store could not be reached or did not answer.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Command(_))
    }
}

/// Durable collection of permanently-failed jobs.
#[async_trait::async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persist a job with a freshly assigned id and timestamp.
    async fn enqueue(
        &self,
        job: &Job,
        attempts_made: u32,
        last_error: &str,
    ) -> Result<EntryId, StoreError>;

    /// All entries, newest first.
    async fn list(&self) -> Result<Vec<DeadLetterEntry>, StoreError>;

    async fn get(&self, id: EntryId) -> Result<Option<DeadLetterEntry>, StoreError>;

    /// Remove an entry. Removing an unknown id is not an error.
    async fn remove(&self, id: EntryId) -> Result<(), StoreError>;

    /// Cheap round-trip used by health probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Order entries newest-first (ties broken by id, which is time-ordered).
pub fn sort_newest_first(entries: &mut [DeadLetterEntry]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

/// In-memory dead-letter store for tests/dev.
///
/// Can be switched "offline" to exercise the store-unavailable paths.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    entries: RwLock<HashMap<EntryId, DeadLetterEntry>>,
    offline: AtomicBool,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the backing store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Disconnected("in-memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn enqueue(
        &self,
        job: &Job,
        attempts_made: u32,
        last_error: &str,
    ) -> Result<EntryId, StoreError> {
        self.check_online()?;
        let entry = DeadLetterEntry::new(job.clone(), attempts_made, last_error);
        let id = entry.id;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, entry);
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<DeadLetterEntry>, StoreError> {
        self.check_online()?;
        let mut result: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sort_newest_first(&mut result);
        Ok(result)
    }

    async fn get(&self, id: EntryId) -> Result<Option<DeadLetterEntry>, StoreError> {
        self.check_online()?;
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    async fn remove(&self, id: EntryId) -> Result<(), StoreError> {
        self.check_online()?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn job(data: serde_json::Value) -> Job {
        Job::new(data, None).unwrap()
    }

    #[tokio::test]
    async fn enqueue_get_remove() {
        let store = InMemoryDeadLetterStore::new();
        let id = store.enqueue(&job(json!("a")), 4, "boom").await.unwrap();

        let entry = store.get(id).await.unwrap().unwrap();
        assert_eq!(entry.attempts_made, 4);
        assert_eq!(entry.last_error, "boom");
        assert_eq!(entry.original_job, job(json!("a")));

        store.remove(id).await.unwrap();
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryDeadLetterStore::new();
        let id = store.enqueue(&job(json!("a")), 1, "x").await.unwrap();

        store.remove(id).await.unwrap();
        store.remove(id).await.unwrap();
        store.remove(EntryId::new()).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn identical_jobs_are_separate_entries() {
        let store = InMemoryDeadLetterStore::new();
        let first = store.enqueue(&job(json!("dup")), 1, "x").await.unwrap();
        let second = store.enqueue(&job(json!("dup")), 1, "x").await.unwrap();
        assert_ne!(first, second);

        store.remove(first).await.unwrap();
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second);
    }

    #[test]
    fn newest_first_ordering() {
        let now = Utc::now();
        let mut older = DeadLetterEntry::new(job(json!("old")), 1, "x");
        older.created_at = now - Duration::seconds(10);
        let mut newer = DeadLetterEntry::new(job(json!("new")), 1, "x");
        newer.created_at = now;

        let mut entries = vec![older.clone(), newer.clone()];
        sort_newest_first(&mut entries);
        assert_eq!(entries[0].id, newer.id);
        assert_eq!(entries[1].id, older.id);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = InMemoryDeadLetterStore::new();
        store.set_offline(true);

        let err = store.enqueue(&job(json!("a")), 1, "x").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.list().await.unwrap_err().is_unavailable());
        assert!(store.remove(EntryId::new()).await.unwrap_err().is_unavailable());
        assert!(store.ping().await.is_err());

        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
