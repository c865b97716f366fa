//! Worker health probe (`GET {worker}/healthz`).

use std::time::{Duration, Instant};

use courier_engine::{Probe, ServiceHealth};

pub struct WorkerProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WorkerProbe {
    pub const NAME: &'static str = "worker";

    pub fn new(client: reqwest::Client, worker_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: format!("{}/healthz", worker_url.trim_end_matches('/')),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Probe for WorkerProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn probe(&self) -> ServiceHealth {
        let started = Instant::now();
        let health = match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => ServiceHealth::healthy(),
            Ok(resp) => ServiceHealth::unhealthy(format!("worker returned {}", resp.status())),
            Err(e) if e.is_connect() => ServiceHealth::disconnected(e.to_string()),
            Err(e) => ServiceHealth::unhealthy(e.to_string()),
        };
        health.with_response_time(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_engine::ServiceStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn healthy_worker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = WorkerProbe::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(1));
        let health = probe.probe().await;

        assert!(health.is_healthy());
        assert!(health.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn failing_worker_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let probe = WorkerProbe::new(reqwest::Client::new(), &server.uri(), Duration::from_secs(1));
        let health = probe.probe().await;

        assert_eq!(health.status, ServiceStatus::Unhealthy);
        assert!(health.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn unreachable_worker_is_disconnected() {
        let probe = WorkerProbe::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1",
            Duration::from_secs(1),
        );
        assert_eq!(probe.probe().await.status, ServiceStatus::Disconnected);
    }
}
