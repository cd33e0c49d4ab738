//! In-memory stand-ins for broker-side objects used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::delivery::{DeliveryHandle, Resolution};
use super::topology::{QueueHandle, TopologyChannel};

/// Models the declare/bind semantics of a broker: redeclaring with the same
/// durability succeeds, a durability mismatch is a precondition failure, and
/// bindings form a set.
#[derive(Default)]
pub struct InMemoryBroker {
    exchanges: Mutex<HashMap<String, bool>>,
    queues: Mutex<HashMap<String, bool>>,
    bindings: Mutex<HashSet<(String, String, String)>>,
}

impl InMemoryBroker {
    pub fn seed_transient_exchange(&self, name: &str) {
        self.exchanges.lock().unwrap().insert(name.to_string(), false);
    }

    pub fn seed_transient_queue(&self, name: &str) {
        self.queues.lock().unwrap().insert(name.to_string(), false);
    }

    pub fn has_durable_exchange(&self, name: &str) -> bool {
        self.exchanges.lock().unwrap().get(name) == Some(&true)
    }

    pub fn has_durable_queue(&self, name: &str) -> bool {
        self.queues.lock().unwrap().get(name) == Some(&true)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.lock().unwrap().len()
    }
}

fn declare(map: &Mutex<HashMap<String, bool>>, name: &str) -> Result<()> {
    let mut map = map.lock().unwrap();
    match map.get(name) {
        Some(false) => Err(anyhow!(
            "PRECONDITION_FAILED - inequivalent arg 'durable' for '{}'",
            name
        )),
        Some(true) => Ok(()),
        None => {
            map.insert(name.to_string(), true);
            Ok(())
        }
    }
}

#[async_trait]
impl TopologyChannel for InMemoryBroker {
    async fn declare_durable_topic_exchange(&self, name: &str) -> Result<()> {
        declare(&self.exchanges, name)
    }

    async fn declare_durable_queue(&self, name: &str) -> Result<QueueHandle> {
        declare(&self.queues, name)?;
        Ok(QueueHandle {
            name: name.to_string(),
            message_count: 0,
            consumer_count: 0,
        })
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        if !self.queues.lock().unwrap().contains_key(queue) {
            return Err(anyhow!("NOT_FOUND - no queue '{}'", queue));
        }
        if !self.exchanges.lock().unwrap().contains_key(exchange) {
            return Err(anyhow!("NOT_FOUND - no exchange '{}'", exchange));
        }
        self.bindings.lock().unwrap().insert((
            queue.to_string(),
            exchange.to_string(),
            routing_key.to_string(),
        ));
        Ok(())
    }
}

/// Records every resolution sent for a delivery.
#[derive(Clone, Default)]
pub struct RecordingHandle {
    resolutions: Arc<Mutex<Vec<Resolution>>>,
    fail: bool,
}

impl RecordingHandle {
    /// A handle whose resolve call fails, as when the channel has closed.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn resolutions(&self) -> Vec<Resolution> {
        self.resolutions.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryHandle for RecordingHandle {
    async fn resolve(&self, resolution: Resolution) -> Result<()> {
        self.resolutions.lock().unwrap().push(resolution);
        if self.fail {
            return Err(anyhow!("channel closed"));
        }
        Ok(())
    }
}
