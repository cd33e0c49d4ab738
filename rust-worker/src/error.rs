//! Startup failures.
//!
//! Anything in here aborts the process before it consumes a single message.
//! Per-message failures never surface as errors past the delivery handler;
//! see [`crate::processor::ProcessingOutcome`].

use thiserror::Error;

use crate::config::ConfigError;
use crate::queue::TopologyError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to connect to RabbitMQ: {0}")]
    Connection(#[source] lapin::Error),

    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("topology declaration failed: {0}")]
    Topology(#[from] TopologyError),

    #[error("failed to start consuming from '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
