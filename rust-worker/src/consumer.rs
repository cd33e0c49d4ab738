//! RabbitMQ consumer loop.
//!
//! This module handles connecting to RabbitMQ, declaring the report topology,
//! consuming deliveries and spawning an async task to process each one. The
//! broker prefetch bounds how many of those tasks are in flight.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use lapin::{options::BasicConsumeOptions, types::FieldTable, Consumer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::BrokerConfig;
use crate::error::StartupError;
use crate::processor::ReportProcessor;
use crate::queue::{
    declare_topology, BrokerSession, BrokerTopology, DeliveryEnvelope, DeliveryHandle, QueueHandle,
};

/// Why the consumer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The shutdown signal fired.
    Shutdown,
    /// The broker closed the consumer stream, usually because the connection
    /// dropped.
    StreamClosed,
}

/// Run the RabbitMQ consumer until `shutdown` is cancelled or the broker closes
/// the stream.
///
/// This function:
/// 1. Connects to RabbitMQ and opens a channel
/// 2. Sets QoS to the configured prefetch
/// 3. Declares exchange, queue and binding (idempotent)
/// 4. Consumes deliveries, spawning a task for each
/// 5. Closes channel and connection on the way out
///
/// A shutdown during steps 1-3 abandons startup and returns
/// [`ConsumerExit::Shutdown`].
pub async fn run(
    config: &BrokerConfig,
    processor: Arc<ReportProcessor>,
    shutdown: CancellationToken,
) -> Result<ConsumerExit, StartupError> {
    let stopped = shutdown.cancelled();
    tokio::pin!(stopped);

    let session = tokio::select! {
        biased;
        _ = &mut stopped => {
            info!("worker_stopping_during_startup");
            return Ok(ConsumerExit::Shutdown);
        }
        session = BrokerSession::establish(&config.url) => session?,
    };

    let started = tokio::select! {
        biased;
        _ = &mut stopped => None,
        started = start_consuming(&session, config) => Some(started),
    };

    let (queue, consumer) = match started {
        Some(Ok(started)) => started,
        Some(Err(e)) => {
            session.shutdown().await;
            return Err(e);
        }
        None => {
            info!("worker_stopping_during_startup");
            session.shutdown().await;
            return Ok(ConsumerExit::Shutdown);
        }
    };

    info!(
        queue = %queue.name,
        consumer_tag = %config.consumer_tag,
        "rabbitmq_consumer_started"
    );
    info!("worker_ready");

    let channel = Arc::clone(session.channel());
    let deliveries = consumer.map(move |delivery| {
        delivery.map(|delivery| DeliveryEnvelope::from_lapin(delivery, Arc::clone(&channel)))
    });

    let exit = consume(deliveries, processor, stopped.as_mut()).await;

    session.shutdown().await;

    info!(exit = ?exit, "worker_shutdown_complete");
    Ok(exit)
}

/// Apply QoS, declare topology and register the consumer.
async fn start_consuming(
    session: &BrokerSession,
    config: &BrokerConfig,
) -> Result<(QueueHandle, Consumer), StartupError> {
    session.set_prefetch(config.prefetch).await?;

    let topology = BrokerTopology::from(config);
    let queue = declare_topology(&**session.channel(), &topology).await?;

    let consumer = session
        .channel()
        .basic_consume(
            &queue.name,
            &config.consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|source| StartupError::Consume {
            queue: queue.name.clone(),
            source,
        })?;

    Ok((queue, consumer))
}

/// Hand each delivery from `deliveries` to its own task until `shutdown`
/// resolves or the stream ends.
///
/// Shutdown is checked before every delivery. Spawned tasks are not awaited.
pub async fn consume<St, H, E, S>(
    deliveries: St,
    processor: Arc<ReportProcessor>,
    shutdown: S,
) -> ConsumerExit
where
    St: Stream<Item = Result<DeliveryEnvelope<H>, E>>,
    H: DeliveryHandle + 'static,
    E: Display,
    S: Future<Output = ()>,
{
    tokio::pin!(deliveries);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("worker_stopping");
                return ConsumerExit::Shutdown;
            }
            delivery = deliveries.next() => {
                match delivery {
                    Some(Ok(envelope)) => {
                        let processor = Arc::clone(&processor);

                        tokio::spawn(async move {
                            processor.handle_delivery(envelope).await;
                        });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        return ConsumerExit::StreamClosed;
                    }
                }
            }
        }
    }
}
