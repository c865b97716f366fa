use std::sync::Arc;

use tokio::task::JoinError;
use tokio_util::task::TaskTracker;

use courier_core::{EntryId, Job};
use courier_engine::{
    Cancellation, DeadLetterStore, ForwardError, ForwardResult, ForwardingEngine,
    HealthAggregator, HealthSnapshot, ReplayError, StoreProbe,
};
use courier_infra::{CourierConfig, HttpDeliveryClient, WorkerProbe};

#[cfg(feature = "redis")]
use courier_engine::StoreError;
#[cfg(feature = "redis")]
use courier_infra::RedisDeadLetterStore;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    engine: ForwardingEngine,
    health: HealthAggregator,
    retry_after_secs: u64,
    tasks: TaskTracker,
}

impl AppServices {
    pub fn new(engine: ForwardingEngine, health: HealthAggregator, retry_after_secs: u64) -> Self {
        Self {
            engine,
            health,
            retry_after_secs,
            tasks: TaskTracker::new(),
        }
    }

    /// Wire the HTTP worker client and probes around an existing store.
    pub fn with_store(config: &CourierConfig, store: Arc<dyn DeadLetterStore>) -> Self {
        let http = reqwest::Client::new();

        let delivery = Arc::new(HttpDeliveryClient::new(
            http.clone(),
            &config.worker_url,
            config.delivery_timeout(),
        ));
        let engine = ForwardingEngine::new(delivery, store.clone(), config.retry_policy());

        let health = HealthAggregator::new(config.health_timeout())
            .with_probe(Arc::new(WorkerProbe::new(
                http,
                &config.worker_url,
                config.health_timeout(),
            )))
            .with_probe(Arc::new(StoreProbe::new(store)));

        Self::new(engine, health, config.retry_after_secs())
    }

    /// Production wiring: Redis-backed store. Does not connect yet.
    #[cfg(feature = "redis")]
    pub fn from_config(config: &CourierConfig) -> Result<Self, StoreError> {
        let store = RedisDeadLetterStore::new(&config.redis_url, Some(config.dlq_key.clone()))?;
        tracing::info!(key = %store.key(), "using redis dead-letter store");
        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn engine(&self) -> &ForwardingEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn DeadLetterStore> {
        self.engine.store()
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }

    pub async fn health(&self) -> HealthSnapshot {
        self.health.check().await
    }

    /// Wait for every spawned forward and replay to finish.
    ///
    /// Called after the server stops accepting requests, so a forward whose
    /// client disconnected still gets delivered or dead-lettered before exit.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Number of forwards and replays still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Forward on a tracked task tied to the caller by a drop guard.
    ///
    /// If the caller's future is dropped (client went away), the guard fires
    /// and the task stops scheduling retries; the job is then dead-lettered
    /// rather than lost.
    pub async fn forward(
        self: Arc<Self>,
        job: Job,
    ) -> Result<Result<ForwardResult, ForwardError>, JoinError> {
        let (guard, cancel) = Cancellation::pair();
        let services = Arc::clone(&self);
        let task = self.tasks.spawn(async move {
            let policy = *services.engine.policy();
            services.engine.forward_with(&job, &policy, &cancel).await
        });

        let joined = task.await;
        guard.disarm();
        joined
    }

    /// Replay on a tracked task; cancellation only stops further retries.
    pub async fn replay(
        self: Arc<Self>,
        entry_id: EntryId,
    ) -> Result<Result<ForwardResult, ReplayError>, JoinError> {
        let (guard, cancel) = Cancellation::pair();
        let services = Arc::clone(&self);
        let task = self.tasks.spawn(async move {
            let policy = *services.engine.policy();
            services.engine.replay_with(entry_id, &policy, &cancel).await
        });

        let joined = task.await;
        guard.disarm();
        joined
    }
}
