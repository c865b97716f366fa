//! Test doubles shared by the engine's unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value as JsonValue;

use courier_core::Job;

use crate::delivery::{AttemptOutcome, DeliveryClient, DeliveryError};
use crate::sleep::Sleeper;

pub fn retryable() -> AttemptOutcome {
    AttemptOutcome::RetryableFailure(DeliveryError::from_status(503, "unavailable"))
}

pub fn fatal() -> AttemptOutcome {
    AttemptOutcome::FatalFailure(DeliveryError::from_status(400, "malformed"))
}

pub fn success(body: JsonValue) -> AttemptOutcome {
    AttemptOutcome::Success(body)
}

/// Replays a fixed script of outcomes, then a fallback; records every job sent.
pub struct ScriptedDelivery {
    script: Mutex<VecDeque<AttemptOutcome>>,
    fallback: Mutex<AttemptOutcome>,
    seen: Mutex<Vec<Job>>,
}

impl ScriptedDelivery {
    pub fn new(script: Vec<AttemptOutcome>, fallback: AttemptOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always(outcome: AttemptOutcome) -> Self {
        Self::new(Vec::new(), outcome)
    }

    /// Change what the worker answers once the script runs out.
    pub fn set_fallback(&self, outcome: AttemptOutcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<Job> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DeliveryClient for ScriptedDelivery {
    async fn send(&self, job: &Job) -> AttemptOutcome {
        self.seen.lock().unwrap().push(job.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
        tokio::task::yield_now().await;
    }
}
