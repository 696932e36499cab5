//! Postroom Worker - High-performance async RabbitMQ consumer for bulk email delivery.
//!
//! This worker drains bulk delivery requests from the bulk_delivery queue,
//! sending one templated message per recipient through the configured
//! transport with bounded retries, and reports a per-job summary.

mod consumer;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use postroom::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        cloudamqp_url_set = !config.cloudamqp_url.is_empty(),
        max_send_attempts = config.max_send_attempts,
        send_timeout_ms = config.send_timeout_ms,
        retry_base_delay_ms = config.retry_base_delay_ms,
        concurrency = config.worker_concurrency,
        "config_loaded"
    );

    // Start the consumer
    consumer::run(config).await?;

    Ok(())
}
