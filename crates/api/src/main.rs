use std::sync::Arc;

use anyhow::Context;

use courier_api::app::{AppServices, build_app};
use courier_api::signal::shutdown_signal;
use courier_infra::CourierConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_observability::init();

    let config = CourierConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        worker_url = %config.worker_url,
        redis_url = %config.redis_url,
        dlq_key = %config.dlq_key,
        max_retries = config.max_retries,
        base_delay_ms = config.base_delay_ms,
        max_delay_ms = config.max_delay_ms,
        min_delay_ms = config.min_delay_ms,
        delivery_timeout_ms = config.delivery_timeout_ms,
        health_timeout_ms = config.health_timeout_ms,
        "configuration loaded"
    );

    let services = AppServices::from_config(&config).context("failed to set up dead-letter store")?;
    let services = Arc::new(services);
    let drain_timeout = config.delivery_timeout() * 2;
    let app = build_app(Arc::clone(&services));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let in_flight = services.in_flight();
    if in_flight > 0 {
        tracing::info!(in_flight, "waiting for in-flight forwards");
    }
    if tokio::time::timeout(drain_timeout, services.drain()).await.is_err() {
        tracing::warn!(
            in_flight = services.in_flight(),
            "in-flight forwards did not finish before shutdown"
        );
    }

    tracing::info!("server stopped");
    Ok(())
}
