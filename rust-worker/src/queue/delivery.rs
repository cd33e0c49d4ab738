//! Deliveries and their resolution.
//!
//! A [`DeliveryEnvelope`] is owned by exactly one handling task. Resolving it
//! consumes the envelope, so a delivery cannot be acknowledged twice.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
    Channel,
};

/// Final broker-side decision for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// `basic.ack`: the message was fully processed.
    Ack,
    /// `basic.nack` with `requeue=false`: the message is dropped or
    /// dead-lettered, never redelivered to this queue.
    RejectWithoutRequeue,
}

/// The opaque handle used to settle a delivery with the broker.
#[async_trait]
pub trait DeliveryHandle: Send + Sync {
    async fn resolve(&self, resolution: Resolution) -> Result<()>;
}

/// Settles deliveries over the shared consumer channel by delivery tag.
#[derive(Clone)]
pub struct ChannelHandle {
    channel: Arc<Channel>,
    delivery_tag: u64,
}

impl ChannelHandle {
    pub fn new(channel: Arc<Channel>, delivery_tag: u64) -> Self {
        Self {
            channel,
            delivery_tag,
        }
    }
}

#[async_trait]
impl DeliveryHandle for ChannelHandle {
    async fn resolve(&self, resolution: Resolution) -> Result<()> {
        match resolution {
            Resolution::Ack => {
                self.channel
                    .basic_ack(self.delivery_tag, BasicAckOptions::default())
                    .await?
            }
            Resolution::RejectWithoutRequeue => {
                self.channel
                    .basic_nack(
                        self.delivery_tag,
                        BasicNackOptions {
                            multiple: false,
                            requeue: false,
                        },
                    )
                    .await?
            }
        }
        Ok(())
    }
}

/// One message handed to the worker, paired with the handle that settles it.
pub struct DeliveryEnvelope<H> {
    pub handle: H,
    pub delivery_tag: u64,
    /// AMQP `message_id` property, or `unknown`
    pub message_id: String,
    pub redelivered: bool,
    pub payload: Vec<u8>,
}

impl<H> DeliveryEnvelope<H> {
    pub fn new(handle: H, delivery_tag: u64, payload: Vec<u8>) -> Self {
        Self {
            handle,
            delivery_tag,
            message_id: "unknown".to_string(),
            redelivered: false,
            payload,
        }
    }
}

impl DeliveryEnvelope<ChannelHandle> {
    /// Wrap a lapin delivery received on `channel`.
    pub fn from_lapin(delivery: Delivery, channel: Arc<Channel>) -> Self {
        let message_id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            handle: ChannelHandle::new(channel, delivery.delivery_tag),
            delivery_tag: delivery.delivery_tag,
            message_id,
            redelivered: delivery.redelivered,
            payload: delivery.data,
        }
    }
}
