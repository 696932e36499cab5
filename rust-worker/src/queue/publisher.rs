//! Async RabbitMQ publisher for enqueueing messages.
//!
//! This module provides a connection-pooled publisher that can be shared
//! across multiple async tasks for high-throughput message publishing.

use std::sync::Arc;

use anyhow::{Context, Result};
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::types::{BulkRequest, SubmissionPayload, DELIVERY_QUEUE, SUBMISSION_QUEUE};

/// Async RabbitMQ publisher with connection management.
///
/// The publisher maintains a persistent connection and channel to RabbitMQ,
/// automatically reconnecting on failure.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a new publisher with the given RabbitMQ URL.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        // Check if we have a valid channel
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        // Need to reconnect
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        // Create new connection
        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_publisher_connected");

        // Create new channel
        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        // Declare both queues (idempotent operation)
        ch.queue_declare(
            SUBMISSION_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare submission queue")?;

        ch.queue_declare(
            DELIVERY_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare delivery queue")?;

        info!(
            submission_queue = SUBMISSION_QUEUE,
            delivery_queue = DELIVERY_QUEUE,
            "rabbitmq_queues_declared"
        );

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Publish a raw submission to the inbound_submissions queue.
    pub async fn publish_submission(&self, payload: &SubmissionPayload) -> Result<()> {
        let channel = self.ensure_connected().await?;

        let body = serde_json::to_vec(payload).context("Failed to serialize submission")?;

        // Generate a message ID for tracking
        let message_id = format!("submission-{}-{}", payload.template.name, payload.rows.len());

        channel
            .basic_publish(
                "",
                SUBMISSION_QUEUE,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.clone().into()),
            )
            .await
            .context("Failed to publish to submission queue")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            queue = SUBMISSION_QUEUE,
            message_id = %message_id,
            body_length = body.len(),
            "rabbitmq_submission_published"
        );

        Ok(())
    }

    /// Publish a normalized bulk request to the bulk_delivery queue.
    pub async fn publish_request(&self, request: &BulkRequest) -> Result<()> {
        let channel = self.ensure_connected().await?;

        let body = serde_json::to_vec(request).context("Failed to serialize bulk request")?;

        channel
            .basic_publish(
                "",
                DELIVERY_QUEUE,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(request.request_id.to_string().into()),
            )
            .await
            .context("Failed to publish to delivery queue")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            queue = DELIVERY_QUEUE,
            request_id = %request.request_id,
            recipients = request.recipients.len(),
            body_length = body.len(),
            "rabbitmq_request_published"
        );

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_creation() {
        let publisher = Publisher::new("amqp://localhost:5672".to_string());
        // Just verify it can be created
        assert!(Arc::strong_count(&publisher.inner) == 1);
    }
}
