//! Exchange, queue and binding declaration.
//!
//! Declarations are idempotent on the broker side: redeclaring an existing
//! entity with the same arguments succeeds, while declaring it with different
//! arguments (for example a non-durable queue of the same name) is refused
//! with a channel-level precondition failure. That refusal is fatal to
//! startup.

use anyhow::Result;
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, ExchangeKind,
};
use thiserror::Error;
use tracing::info;

use crate::config::BrokerConfig;

/// Names making up the durable routing path to the worker's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTopology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl BrokerTopology {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl From<&BrokerConfig> for BrokerTopology {
    fn from(config: &BrokerConfig) -> Self {
        Self::new(&config.exchange, &config.queue, &config.routing_key)
    }
}

/// Handle to the declared queue, used to start consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Which declaration the broker refused.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to declare exchange '{name}': {source}")]
    Exchange {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to declare queue '{name}': {source}")]
    Queue {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to bind queue '{queue}' to '{exchange}' with key '{routing_key}': {source}")]
    Binding {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The topology operations a channel must support.
#[async_trait]
pub trait TopologyChannel: Send + Sync {
    /// Declare a durable topic exchange.
    async fn declare_durable_topic_exchange(&self, name: &str) -> Result<()>;

    /// Declare a durable queue.
    async fn declare_durable_queue(&self, name: &str) -> Result<QueueHandle>;

    /// Bind a queue to an exchange.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;
}

#[async_trait]
impl TopologyChannel for Channel {
    async fn declare_durable_topic_exchange(&self, name: &str) -> Result<()> {
        self.exchange_declare(
            name,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn declare_durable_queue(&self, name: &str) -> Result<QueueHandle> {
        let queue = self
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(QueueHandle {
            name: queue.name().as_str().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }
}

/// Declare the exchange, the queue and their binding, in that order.
pub async fn declare_topology<C>(
    channel: &C,
    topology: &BrokerTopology,
) -> Result<QueueHandle, TopologyError>
where
    C: TopologyChannel + ?Sized,
{
    channel
        .declare_durable_topic_exchange(&topology.exchange)
        .await
        .map_err(|source| TopologyError::Exchange {
            name: topology.exchange.clone(),
            source,
        })?;

    info!(exchange = %topology.exchange, "rabbitmq_exchange_declared");

    let queue = channel
        .declare_durable_queue(&topology.queue)
        .await
        .map_err(|source| TopologyError::Queue {
            name: topology.queue.clone(),
            source,
        })?;

    info!(
        queue = %queue.name,
        message_count = queue.message_count,
        consumer_count = queue.consumer_count,
        "rabbitmq_queue_declared"
    );

    channel
        .bind_queue(&queue.name, &topology.exchange, &topology.routing_key)
        .await
        .map_err(|source| TopologyError::Binding {
            queue: queue.name.clone(),
            exchange: topology.exchange.clone(),
            routing_key: topology.routing_key.clone(),
            source,
        })?;

    info!(
        queue = %queue.name,
        exchange = %topology.exchange,
        routing_key = %topology.routing_key,
        "rabbitmq_queue_bound"
    );

    Ok(queue)
}
