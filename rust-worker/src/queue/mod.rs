//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - Connection and channel lifecycle for the consumer
//! - Durable topology declaration
//! - Report message decoding and validation
//! - Delivery envelopes and their ack/reject resolution
//! - A publisher for the producing side
//!
//! ## Topology
//!
//! ```text
//! Producer → <exchange> (topic, durable) --routing key--> <queue> (durable) → Worker
//! ```

pub mod delivery;
pub mod publisher;
pub mod session;
pub mod topology;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use delivery::{ChannelHandle, DeliveryEnvelope, DeliveryHandle, Resolution};
pub use publisher::Publisher;
pub use session::BrokerSession;
pub use topology::{declare_topology, BrokerTopology, QueueHandle, TopologyChannel, TopologyError};
pub use types::{DecodeError, ReportMessage, ReportRequest, ValidationError};
