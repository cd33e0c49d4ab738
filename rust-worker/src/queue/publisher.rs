//! Async RabbitMQ publisher for report requests.
//!
//! This is the producing side of the pipeline. The publisher connects
//! lazily, declares the same topology as the worker, and publishes persistent
//! messages with publisher confirms enabled.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    publisher_confirm::Confirmation,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::topology::{declare_topology, BrokerTopology};
use super::types::ReportRequest;

/// Async RabbitMQ publisher with connection management.
///
/// The publisher keeps one connection and one confirm-mode channel,
/// reconnecting on the next publish if the channel has gone away.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    topology: BrokerTopology,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    pub fn new(url: String, topology: BrokerTopology) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                topology,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        declare_topology(&ch, &self.inner.topology).await?;

        info!("rabbitmq_publisher_connected");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Publish a report request and wait for the broker to confirm it.
    ///
    /// Returns the generated message id.
    pub async fn publish_report(&self, request: &ReportRequest) -> Result<String> {
        let channel = self.ensure_connected().await?;

        let body = serde_json::to_vec(request).context("Failed to serialize report request")?;
        let message_id = format!("report-{:016x}", rand::random::<u64>());
        let topology = &self.inner.topology;

        let confirmation = channel
            .basic_publish(
                &topology.exchange,
                &topology.routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.clone().into()),
            )
            .await
            .context("Failed to publish report request")?
            .await
            .context("Failed to confirm publish")?;

        if let Confirmation::Nack(_) = confirmation {
            bail!("Broker refused report request {}", message_id);
        }

        info!(
            exchange = %topology.exchange,
            routing_key = %topology.routing_key,
            message_id = %message_id,
            body_length = body.len(),
            "rabbitmq_report_published"
        );

        Ok(message_id)
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
