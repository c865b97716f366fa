//! Forwarding engine: bounded retries, then dead-lettering.
//!
//! ## Attempt loop
//!
//! Each forward walks `Attempting(n) → Waiting(n) → Attempting(n+1)` until it
//! reaches `Delivered` or gives up. Attempts for one job are strictly
//! sequential; separate forwards share nothing but the delivery client and the
//! store, so they interleave freely.
//!
//! The job is only ever borrowed, which is what guarantees the payload and the
//! idempotency key are identical on every attempt and on replay.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use courier_core::{EntryId, Job};

use crate::backoff::RetryPolicy;
use crate::cancel::Cancellation;
use crate::delivery::{AttemptOutcome, DeliveryClient, DeliveryError};
use crate::dlq::{DeadLetterStore, StoreError};
use crate::sleep::{Sleeper, TokioSleeper};

/// Final outcome of a forward (or replay).
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardResult {
    Delivered {
        response: JsonValue,
        attempts: u32,
    },
    /// Delivery gave up; the job is held in the dead-letter store under `entry_id`.
    DeadLettered {
        entry_id: EntryId,
        last_error: DeliveryError,
        attempts: u32,
    },
}

/// Forwarding failed *and* the job could not be dead-lettered.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("job failed after {attempts} attempt(s) ({last_error}) and could not be dead-lettered: {source}")]
    Persistence {
        attempts: u32,
        last_error: DeliveryError,
        #[source]
        source: StoreError,
    },
}

/// Replay error.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("dead-letter entry not found: {0}")]
    NotFound(EntryId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

enum AttemptState {
    Attempting(u32),
    Waiting { attempt: u32, cause: DeliveryError },
}

enum RunOutcome {
    Delivered {
        response: JsonValue,
        attempts: u32,
    },
    GaveUp {
        last_error: DeliveryError,
        attempts: u32,
        cancelled: bool,
    },
}

/// Orchestrates delivery attempts, backoff and dead-lettering.
pub struct ForwardingEngine {
    delivery: Arc<dyn DeliveryClient>,
    store: Arc<dyn DeadLetterStore>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl ForwardingEngine {
    pub fn new(
        delivery: Arc<dyn DeliveryClient>,
        store: Arc<dyn DeadLetterStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            delivery,
            store,
            sleeper: Arc::new(TokioSleeper),
            policy,
        }
    }

    /// Replace the timer used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn DeadLetterStore> {
        &self.store
    }

    /// Forward a job with the engine's default policy.
    pub async fn forward(&self, job: &Job) -> Result<ForwardResult, ForwardError> {
        self.forward_with(job, &self.policy, &Cancellation::never())
            .await
    }

    /// Forward a job, dead-lettering it if delivery gives up.
    ///
    /// A cancelled forward is dead-lettered too (with the attempts made so
    /// far), so a job is never dropped silently.
    pub async fn forward_with(
        &self,
        job: &Job,
        policy: &RetryPolicy,
        cancel: &Cancellation,
    ) -> Result<ForwardResult, ForwardError> {
        match self.run_attempts(job, policy, cancel).await {
            RunOutcome::Delivered { response, attempts } => {
                Ok(ForwardResult::Delivered { response, attempts })
            }
            RunOutcome::GaveUp {
                last_error,
                attempts,
                cancelled,
            } => {
                let reason = if cancelled {
                    format!("cancelled after {attempts} attempt(s): {last_error}")
                } else {
                    last_error.to_string()
                };

                match self.store.enqueue(job, attempts, &reason).await {
                    Ok(entry_id) => {
                        warn!(%entry_id, attempts, error = %last_error, "job dead-lettered");
                        Ok(ForwardResult::DeadLettered {
                            entry_id,
                            last_error,
                            attempts,
                        })
                    }
                    Err(source) => {
                        error!(
                            persistence_failure = true,
                            attempts,
                            delivery_error = %last_error,
                            error = %source,
                            "failed to dead-letter job; it is not recoverable from the DLQ"
                        );
                        Err(ForwardError::Persistence {
                            attempts,
                            last_error,
                            source,
                        })
                    }
                }
            }
        }
    }

    /// Replay a dead-lettered job with the engine's default policy.
    pub async fn replay(&self, entry_id: EntryId) -> Result<ForwardResult, ReplayError> {
        self.replay_with(entry_id, &self.policy, &Cancellation::never())
            .await
    }

    /// Resubmit an entry's original job.
    ///
    /// On delivery the entry is removed. On renewed failure the entry is left
    /// untouched and its id is returned; no second entry is created.
    pub async fn replay_with(
        &self,
        entry_id: EntryId,
        policy: &RetryPolicy,
        cancel: &Cancellation,
    ) -> Result<ForwardResult, ReplayError> {
        let entry = self
            .store
            .get(entry_id)
            .await?
            .ok_or(ReplayError::NotFound(entry_id))?;

        info!(%entry_id, "replaying dead-lettered job");

        match self.run_attempts(&entry.original_job, policy, cancel).await {
            RunOutcome::Delivered { response, attempts } => {
                if let Err(e) = self.store.remove(entry_id).await {
                    error!(
                        persistence_failure = true,
                        %entry_id,
                        error = %e,
                        "replay delivered but the entry could not be removed; it may be delivered again"
                    );
                }
                Ok(ForwardResult::Delivered { response, attempts })
            }
            RunOutcome::GaveUp {
                last_error,
                attempts,
                ..
            } => {
                warn!(%entry_id, attempts, error = %last_error, "replay failed; entry kept");
                Ok(ForwardResult::DeadLettered {
                    entry_id,
                    last_error,
                    attempts,
                })
            }
        }
    }

    async fn run_attempts(
        &self,
        job: &Job,
        policy: &RetryPolicy,
        cancel: &Cancellation,
    ) -> RunOutcome {
        let max_attempts = policy.max_attempts();
        let mut state = AttemptState::Attempting(0);

        loop {
            state = match state {
                AttemptState::Attempting(attempt) => {
                    let number = attempt + 1;
                    debug!(attempt = number, max_attempts, "forwarding job");

                    match self.delivery.send(job).await {
                        AttemptOutcome::Success(response) => {
                            info!(attempt = number, "job delivered");
                            return RunOutcome::Delivered {
                                response,
                                attempts: number,
                            };
                        }
                        AttemptOutcome::FatalFailure(cause) => {
                            warn!(attempt = number, error = %cause, "fatal delivery failure; not retrying");
                            return RunOutcome::GaveUp {
                                last_error: cause,
                                attempts: number,
                                cancelled: false,
                            };
                        }
                        AttemptOutcome::RetryableFailure(cause) if number < max_attempts => {
                            AttemptState::Waiting { attempt, cause }
                        }
                        AttemptOutcome::RetryableFailure(cause) => {
                            warn!(attempts = number, error = %cause, "retries exhausted");
                            return RunOutcome::GaveUp {
                                last_error: cause,
                                attempts: number,
                                cancelled: false,
                            };
                        }
                    }
                }
                AttemptState::Waiting { attempt, cause } => {
                    let number = attempt + 1;
                    if cancel.is_cancelled() {
                        return cancelled(cause, number);
                    }

                    let delay = policy.delay_for_attempt(attempt);
                    info!(
                        attempt = number,
                        max_attempts,
                        delay_ms = millis(delay),
                        error = %cause,
                        "attempt failed; backing off"
                    );

                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => AttemptState::Attempting(number),
                        _ = cancel.cancelled() => return cancelled(cause, number),
                    }
                }
            };
        }
    }
}

fn cancelled(cause: DeliveryError, attempts: u32) -> RunOutcome {
    info!(attempts, "forward cancelled; no further attempts");
    RunOutcome::GaveUp {
        last_error: cause,
        attempts,
        cancelled: true,
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use courier_core::IdempotencyKey;
    use serde_json::json;

    use crate::cancel::CancelGuard;
    use crate::dlq::InMemoryDeadLetterStore;
    use crate::testing::{fatal, retryable, success, RecordingSleeper, ScriptedDelivery};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, ms(100), ms(5000))
    }

    fn keyed_job() -> Job {
        Job::new(json!({"reading": 21.5}), IdempotencyKey::new("order-42")).unwrap()
    }

    struct Harness {
        delivery: Arc<ScriptedDelivery>,
        store: Arc<InMemoryDeadLetterStore>,
        sleeper: Arc<RecordingSleeper>,
        engine: ForwardingEngine,
    }

    fn harness(delivery: ScriptedDelivery) -> Harness {
        let delivery = Arc::new(delivery);
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let engine = ForwardingEngine::new(delivery.clone(), store.clone(), policy())
            .with_sleeper(sleeper.clone());
        Harness {
            delivery,
            store,
            sleeper,
            engine,
        }
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_retry() {
        let h = harness(ScriptedDelivery::always(success(json!({"result": "ok"}))));

        let result = h.engine.forward(&keyed_job()).await.unwrap();

        assert_eq!(
            result,
            ForwardResult::Delivered {
                response: json!({"result": "ok"}),
                attempts: 1
            }
        );
        assert_eq!(h.delivery.calls(), 1);
        assert!(h.sleeper.delays().is_empty());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn success_on_attempt_k_makes_k_plus_one_calls() {
        let h = harness(ScriptedDelivery::new(
            vec![retryable(), retryable(), retryable()],
            success(json!("done")),
        ));

        let result = h.engine.forward(&keyed_job()).await.unwrap();

        assert!(matches!(result, ForwardResult::Delivered { attempts: 4, .. }));
        assert_eq!(h.delivery.calls(), 4);
        assert!(h.store.is_empty());

        let delays = h.sleeper.delays();
        assert_eq!(delays.len(), 3);
        for (delay, base) in delays.iter().zip([100u64, 200, 400]) {
            assert!(*delay >= ms(base) && *delay < ms(base + base / 10), "{delay:?}");
        }
    }

    #[tokio::test]
    async fn exhausted_retries_produce_one_entry() {
        let h = harness(ScriptedDelivery::always(retryable()));
        let job = keyed_job();

        let result = h.engine.forward(&job).await.unwrap();

        let ForwardResult::DeadLettered {
            entry_id,
            attempts,
            last_error,
        } = result
        else {
            panic!("expected dead-lettered, got {result:?}");
        };
        assert_eq!(attempts, 4);
        assert!(last_error.is_retryable());
        assert_eq!(h.delivery.calls(), 4);

        let entries = h.store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry_id);
        assert_eq!(entries[0].attempts_made, 4);
        assert_eq!(entries[0].original_job, job);
    }

    #[tokio::test]
    async fn fatal_failure_short_circuits() {
        let h = harness(ScriptedDelivery::always(fatal()));

        let result = h.engine.forward(&keyed_job()).await.unwrap();

        assert!(matches!(
            result,
            ForwardResult::DeadLettered {
                attempts: 1,
                last_error: DeliveryError::Rejected { status: 400, .. },
                ..
            }
        ));
        assert_eq!(h.delivery.calls(), 1);
        assert!(h.sleeper.delays().is_empty());

        let entries = h.store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts_made, 1);
        assert!(entries[0].last_error.contains("400"));
    }

    #[tokio::test]
    async fn fatal_after_retry_stops_immediately() {
        let h = harness(ScriptedDelivery::new(vec![retryable(), fatal()], success(json!(1))));

        let result = h.engine.forward(&keyed_job()).await.unwrap();

        assert!(matches!(result, ForwardResult::DeadLettered { attempts: 2, .. }));
        assert_eq!(h.delivery.calls(), 2);
        assert_eq!(h.sleeper.delays().len(), 1);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let h = harness(ScriptedDelivery::always(retryable()));

        let result = h
            .engine
            .forward_with(&keyed_job(), &RetryPolicy::no_retry(), &Cancellation::never())
            .await
            .unwrap();

        assert!(matches!(result, ForwardResult::DeadLettered { attempts: 1, .. }));
        assert_eq!(h.delivery.calls(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_reported_distinctly() {
        let h = harness(ScriptedDelivery::always(retryable()));
        h.store.set_offline(true);

        let err = h.engine.forward(&keyed_job()).await.unwrap_err();

        let ForwardError::Persistence {
            attempts, source, ..
        } = err;
        assert_eq!(attempts, 4);
        assert!(source.is_unavailable());
    }

    #[tokio::test]
    async fn replay_success_removes_only_that_entry() {
        let h = harness(ScriptedDelivery::always(retryable()));
        let other = h
            .store
            .enqueue(&Job::new(json!("other"), None).unwrap(), 4, "x")
            .await
            .unwrap();

        let ForwardResult::DeadLettered { entry_id, .. } =
            h.engine.forward(&keyed_job()).await.unwrap()
        else {
            panic!("expected dead-lettered");
        };
        assert_eq!(h.store.len(), 2);

        h.delivery.set_fallback(success(json!({"result": "late"})));
        let result = h.engine.replay(entry_id).await.unwrap();

        assert_eq!(
            result,
            ForwardResult::Delivered {
                response: json!({"result": "late"}),
                attempts: 1
            }
        );
        let remaining = h.store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, other);
    }

    #[tokio::test]
    async fn failed_replay_keeps_the_original_entry() {
        let h = harness(ScriptedDelivery::always(retryable()));
        let ForwardResult::DeadLettered { entry_id, .. } =
            h.engine.forward(&keyed_job()).await.unwrap()
        else {
            panic!("expected dead-lettered");
        };

        let result = h.engine.replay(entry_id).await.unwrap();

        assert!(matches!(
            result,
            ForwardResult::DeadLettered { entry_id: id, attempts: 4, .. } if id == entry_id
        ));
        let entries = h.store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry_id);
        assert_eq!(entries[0].attempts_made, 4);
    }

    #[tokio::test]
    async fn replay_of_unknown_entry_is_not_found() {
        let h = harness(ScriptedDelivery::always(success(json!(1))));
        let missing = EntryId::new();

        let err = h.engine.replay(missing).await.unwrap_err();

        assert!(matches!(err, ReplayError::NotFound(id) if id == missing));
        assert_eq!(h.delivery.calls(), 0);
    }

    #[tokio::test]
    async fn replay_against_offline_store_is_a_store_error() {
        let h = harness(ScriptedDelivery::always(success(json!(1))));
        h.store.set_offline(true);

        let err = h.engine.replay(EntryId::new()).await.unwrap_err();
        assert!(matches!(err, ReplayError::Store(e) if e.is_unavailable()));
    }

    #[tokio::test]
    async fn idempotency_key_is_stable_across_retries_and_replay() {
        let h = harness(ScriptedDelivery::always(retryable()));
        let job = keyed_job();

        let ForwardResult::DeadLettered { entry_id, .. } = h.engine.forward(&job).await.unwrap()
        else {
            panic!("expected dead-lettered");
        };
        h.delivery.set_fallback(success(json!("ok")));
        h.engine.replay(entry_id).await.unwrap();

        let seen = h.delivery.seen();
        assert_eq!(seen.len(), 5);
        for sent in &seen {
            assert_eq!(sent, &job);
            assert_eq!(sent.idempotency_key().map(|k| k.as_str()), Some("order-42"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_at_least_the_unjittered_schedule() {
        let delivery = Arc::new(ScriptedDelivery::new(
            vec![retryable(), retryable(), retryable()],
            success(json!("ok")),
        ));
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let engine = ForwardingEngine::new(delivery.clone(), store.clone(), policy());

        let started = tokio::time::Instant::now();
        let result = engine.forward(&keyed_job()).await.unwrap();
        let elapsed = started.elapsed();

        assert!(matches!(result, ForwardResult::Delivered { attempts: 4, .. }));
        assert_eq!(delivery.calls(), 4);
        assert!(elapsed >= ms(700), "elapsed {elapsed:?}");
        assert!(elapsed < ms(770), "elapsed {elapsed:?}");
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn one_jobs_backoff_does_not_hold_up_another() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let slow = Arc::new(ForwardingEngine::new(
            Arc::new(ScriptedDelivery::always(retryable())),
            store.clone(),
            RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(60)),
        ));
        let fast = ForwardingEngine::new(
            Arc::new(ScriptedDelivery::always(success(json!("fast")))),
            store.clone(),
            policy(),
        );

        let started = tokio::time::Instant::now();
        let slow_task = tokio::spawn({
            let slow = slow.clone();
            async move { slow.forward(&keyed_job()).await }
        });
        tokio::task::yield_now().await;

        let result = fast.forward(&keyed_job()).await.unwrap();
        assert!(matches!(result, ForwardResult::Delivered { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!slow_task.is_finished());

        let slow_result = slow_task.await.unwrap().unwrap();
        assert!(matches!(slow_result, ForwardResult::DeadLettered { attempts: 4, .. }));
        assert!(started.elapsed() >= Duration::from_secs(70));
    }

    /// Cancels the forward as soon as the engine starts backing off.
    struct CancelOnSleep {
        guard: Mutex<Option<CancelGuard>>,
    }

    #[async_trait::async_trait]
    impl Sleeper for CancelOnSleep {
        async fn sleep(&self, _delay: Duration) {
            drop(self.guard.lock().unwrap().take());
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn cancellation_stops_scheduling_and_dead_letters() {
        let (guard, cancel) = Cancellation::pair();
        let delivery = Arc::new(ScriptedDelivery::always(retryable()));
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let engine = ForwardingEngine::new(delivery.clone(), store.clone(), policy()).with_sleeper(
            Arc::new(CancelOnSleep {
                guard: Mutex::new(Some(guard)),
            }),
        );

        let result = engine
            .forward_with(&keyed_job(), &policy(), &cancel)
            .await
            .unwrap();

        assert!(matches!(result, ForwardResult::DeadLettered { attempts: 1, .. }));
        assert_eq!(delivery.calls(), 1);
        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].last_error.starts_with("cancelled after 1 attempt(s)"));
    }

    /// Cancels while the attempt is in flight, then lets the attempt succeed.
    struct CancelMidFlight {
        guard: Mutex<Option<CancelGuard>>,
    }

    #[async_trait::async_trait]
    impl DeliveryClient for CancelMidFlight {
        async fn send(&self, _job: &Job) -> AttemptOutcome {
            drop(self.guard.lock().unwrap().take());
            tokio::task::yield_now().await;
            success(json!("finished anyway"))
        }
    }

    #[tokio::test]
    async fn in_flight_attempt_completes_after_cancellation() {
        let (guard, cancel) = Cancellation::pair();
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let engine = ForwardingEngine::new(
            Arc::new(CancelMidFlight {
                guard: Mutex::new(Some(guard)),
            }),
            store.clone(),
            policy(),
        );

        let result = engine
            .forward_with(&keyed_job(), &policy(), &cancel)
            .await
            .unwrap();

        assert_eq!(
            result,
            ForwardResult::Delivered {
                response: json!("finished anyway"),
                attempts: 1
            }
        );
        assert!(store.is_empty());
    }
}
