//! Broker connection lifecycle.
//!
//! A [`BrokerSession`] owns the one connection and one channel the worker
//! uses. It is created at startup and closed at shutdown; there is no
//! reconnect, so a lost connection ends the consumer loop and the process.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use lapin::{options::BasicQosOptions, Channel, Connection, ConnectionProperties};
use tracing::{info, warn};

use crate::error::StartupError;

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Establish a transport connection to the broker.
pub async fn connect(url: &str) -> Result<Connection, StartupError> {
    info!(url_length = url.len(), "rabbitmq_connecting");

    let connection = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(StartupError::Connection)?;

    info!("rabbitmq_connected");
    Ok(connection)
}

/// Open a channel multiplexed over `connection`.
pub async fn open_channel(connection: &Connection) -> Result<Channel, StartupError> {
    let channel = connection
        .create_channel()
        .await
        .map_err(StartupError::Channel)?;

    info!(channel_id = channel.id(), "rabbitmq_channel_created");
    Ok(channel)
}

/// The connection and channel shared by the consumer loop.
pub struct BrokerSession {
    connection: Connection,
    channel: Arc<Channel>,
}

impl BrokerSession {
    /// Connect and open the consumer channel.
    pub async fn establish(url: &str) -> Result<Self, StartupError> {
        let connection = connect(url).await?;
        let channel = open_channel(&connection).await?;

        Ok(Self {
            connection,
            channel: Arc::new(channel),
        })
    }

    /// Limit the number of unacknowledged deliveries on the channel.
    pub async fn set_prefetch(&self, prefetch: u16) -> Result<(), StartupError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(StartupError::Channel)?;

        info!(prefetch_count = prefetch, "rabbitmq_qos_set");
        Ok(())
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Close the channel, then the connection.
    ///
    /// Errors are logged and swallowed. Deliveries still being handled lose
    /// their handle and will be redelivered by the broker.
    pub async fn shutdown(self) {
        close_in_order(
            self.channel.close(REPLY_SUCCESS, "Normal shutdown"),
            self.connection.close(REPLY_SUCCESS, "Normal shutdown"),
        )
        .await;

        info!("rabbitmq_session_closed");
    }
}

/// Await the channel close, then the connection close, whatever the first
/// one returned.
async fn close_in_order<C, K, E>(channel_close: C, connection_close: K)
where
    C: Future<Output = Result<(), E>>,
    K: Future<Output = Result<(), E>>,
    E: Display,
{
    if let Err(e) = channel_close.await {
        warn!(error = %e, "rabbitmq_channel_close_error");
    }

    if let Err(e) = connection_close.await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }
}
