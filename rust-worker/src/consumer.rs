//! RabbitMQ consumer module using lapin.
//!
//! This module handles connecting to RabbitMQ, consuming bulk requests
//! from the bulk_delivery queue, and spawning an async drain per request
//! so several jobs can deliver concurrently.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
    Connection, ConnectionProperties,
};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use postroom::{
    BulkRequest, Config, JobStore, MailgunTransport, RetryPolicy, SendExecutor, DELIVERY_QUEUE,
};

/// Run the RabbitMQ consumer.
///
/// This function:
/// 1. Builds the delivery transport and executor from configuration
/// 2. Connects to RabbitMQ and sets QoS for concurrent processing
/// 3. Declares the queue (idempotent operation)
/// 4. Starts consuming bulk requests, spawning a drain for each
/// 5. On SIGINT/SIGTERM, cancels live jobs and lets in-flight sends finish
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    // Build the delivery pipeline shared by every job
    let transport =
        Arc::new(MailgunTransport::from_config(&config).context("Failed to build transport")?);
    let policy = RetryPolicy::from_config(&config);
    let executor = Arc::new(SendExecutor::new(transport, policy));
    let store = Arc::new(JobStore::new());

    // Connect to RabbitMQ
    info!(url_length = config.cloudamqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(
        &config.cloudamqp_url,
        ConnectionProperties::default(),
    )
    .await
    .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    // Create a channel
    let channel = conn.create_channel().await.context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    // One prefetched request per concurrently drained job
    let prefetch_count = config.worker_concurrency as u16;
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    // Declare the queue (durable to match the publisher)
    channel
        .queue_declare(
            DELIVERY_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare queue")?;

    info!(queue = DELIVERY_QUEUE, "rabbitmq_queue_declared");

    // Start consuming messages
    let mut consumer = channel
        .basic_consume(
            DELIVERY_QUEUE,
            "postroom-worker",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = DELIVERY_QUEUE, "rabbitmq_consumer_started");
    info!("worker_ready");

    // Clone channel for use in message handler
    let channel = Arc::new(channel);

    // Create shutdown signal future
    let shutdown = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = terminate => info!("Received SIGTERM"),
        }
    };

    // Pin the shutdown future
    tokio::pin!(shutdown);

    // One entry per live drain
    let mut drains: JoinSet<()> = JoinSet::new();

    // Process messages until shutdown
    loop {
        tokio::select! {
            // Check for shutdown signal
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            // Reap finished drains so the set stays small
            Some(_) = drains.join_next(), if !drains.is_empty() => {}
            // Process next message
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let delivery_tag = delivery.delivery_tag;
                        let message_id = delivery
                            .properties
                            .message_id()
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "unknown".to_string());

                        info!(
                            queue = DELIVERY_QUEUE,
                            message_id = %message_id,
                            delivery_tag = delivery_tag,
                            "delivery_job_received"
                        );

                        // Clone resources for the spawned drain
                        let store = Arc::clone(&store);
                        let executor = Arc::clone(&executor);
                        let channel = Arc::clone(&channel);

                        drains.spawn(async move {
                            // Parse the bulk request JSON
                            let request: Result<BulkRequest, _> =
                                serde_json::from_slice(&delivery.data);

                            match request {
                                Ok(request) => {
                                    drain_request(&store, &executor, request).await;

                                    // Acknowledge the message
                                    if let Err(e) = channel
                                        .basic_ack(delivery_tag, BasicAckOptions::default())
                                        .await
                                    {
                                        error!(
                                            delivery_tag = delivery_tag,
                                            error = %e,
                                            "rabbitmq_ack_failed"
                                        );
                                    } else {
                                        info!(
                                            queue = DELIVERY_QUEUE,
                                            message_id = %message_id,
                                            "delivery_job_completed"
                                        );
                                    }
                                }
                                Err(e) => {
                                    error!(
                                        message_id = %message_id,
                                        error = %e,
                                        "bulk_request_parse_failed"
                                    );

                                    // A malformed request will not improve on redelivery
                                    if let Err(nack_err) = channel
                                        .basic_nack(
                                            delivery_tag,
                                            BasicNackOptions {
                                                requeue: false,
                                                ..Default::default()
                                            },
                                        )
                                        .await
                                    {
                                        error!(
                                            delivery_tag = delivery_tag,
                                            error = %nack_err,
                                            "rabbitmq_nack_failed"
                                        );
                                    }
                                }
                            }
                        });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        break;
                    }
                }
            }
        }
    }

    // Stop handing out claims; in-flight sends are allowed to complete
    let cancelled = store.cancel_all();
    info!(jobs_cancelled = cancelled, "worker_jobs_cancelled");

    while drains.join_next().await.is_some() {}

    info!("worker_shutdown_complete");
    Ok(())
}

/// Submit one bulk request to the store, drain it, and log the summary.
async fn drain_request(store: &JobStore, executor: &SendExecutor, request: BulkRequest) {
    let request_id = request.request_id;

    let job_id = match store.submit_request(request) {
        Ok(job_id) => job_id,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "bulk_request_rejected");
            return;
        }
    };

    if let Some(summary) = executor.drain(store, job_id).await {
        match serde_json::to_string(&summary) {
            Ok(json) => info!(
                request_id = %request_id,
                job_id = %job_id,
                summary = %json,
                "bulk_job_summary"
            ),
            Err(e) => error!(job_id = %job_id, error = %e, "summary_serialize_failed"),
        }
    }
}
