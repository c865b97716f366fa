//! Redis-backed dead-letter store.
//!
//! ## Layout
//!
//! - **Key**: one hash, `courier:dlq` by default
//! - **Field**: the entry id (UUIDv7 text)
//! - **Value**: the entry as JSON
//!
//! Keying by id makes removal exact even when two entries carry identical
//! payloads. `HVALS` has no order, so `list` sorts newest-first after reading.
//!
//! The connection is opened lazily on first use and reused afterwards
//! (`ConnectionManager` reconnects on its own). If the first connect fails the
//! call reports `Disconnected` and the next call tries again.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use courier_core::{DeadLetterEntry, EntryId, Job};
use courier_engine::dlq::sort_newest_first;
use courier_engine::{DeadLetterStore, StoreError};

use crate::config::DEFAULT_DLQ_KEY;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisDeadLetterStore {
    client: redis::Client,
    key: String,
    connect_timeout: Duration,
    conn: OnceCell<ConnectionManager>,
}

impl RedisDeadLetterStore {
    /// Validate the URL without connecting.
    pub fn new(redis_url: impl AsRef<str>, key: Option<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Disconnected(e.to_string()))?;

        Ok(Self {
            client,
            key: key.unwrap_or_else(|| DEFAULT_DLQ_KEY.to_string()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            conn: OnceCell::new(),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!(key = %self.key, "connecting to redis");
                match tokio::time::timeout(
                    self.connect_timeout,
                    self.client.get_connection_manager(),
                )
                .await
                {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => {
                        warn!(error = %e, "redis connection failed");
                        Err(StoreError::Disconnected(e.to_string()))
                    }
                    Err(_) => Err(StoreError::Disconnected(format!(
                        "connect timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ))),
                }
            })
            .await?;
        Ok(conn.clone())
    }
}

fn command_error(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        StoreError::Disconnected(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn decode(raw: &str) -> Result<DeadLetterEntry, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait::async_trait]
impl DeadLetterStore for RedisDeadLetterStore {
    #[instrument(skip(self, job, last_error), fields(key = %self.key), err)]
    async fn enqueue(
        &self,
        job: &Job,
        attempts_made: u32,
        last_error: &str,
    ) -> Result<EntryId, StoreError> {
        let entry = DeadLetterEntry::new(job.clone(), attempts_made, last_error);
        let payload =
            serde_json::to_string(&entry).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut conn = self.connection().await?;
        let _: () = conn
            .hset(&self.key, entry.id.to_string(), payload)
            .await
            .map_err(command_error)?;

        Ok(entry.id)
    }

    async fn list(&self) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.hvals(&self.key).await.map_err(command_error)?;

        let mut entries = Vec::with_capacity(raw.len());
        for value in &raw {
            match decode(value) {
                Ok(entry) => entries.push(entry),
                // A corrupt entry must not hide the rest of the queue.
                Err(e) => warn!(key = %self.key, error = %e, "skipping unreadable dead-letter entry"),
            }
        }
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn get(&self, id: EntryId) -> Result<Option<DeadLetterEntry>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .hget(&self.key, id.to_string())
            .await
            .map_err(command_error)?;
        raw.as_deref().map(decode).transpose()
    }

    async fn remove(&self, id: EntryId) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .hdel(&self.key, id.to_string())
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }
}
