//! Report mailer - emails task reports announced on RabbitMQ.
//!
//! The worker consumes report requests from a durable queue, downloads the
//! referenced file from S3-compatible object storage and mails it to the
//! requested recipient.
//!
//! ## Architecture
//!
//! ```text
//! report-enqueue → exchange --routing key--> queue → report-worker → S3 fetch → Mailgun
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod notify;
pub mod processor;
pub mod queue;
pub mod storage;
pub mod util;
pub mod web;

// Re-export commonly used types
pub use config::{BrokerConfig, Config, ConfigError, DeliveryMode};
pub use error::StartupError;
pub use notify::{MailgunNotifier, Notifier, NotifyError};
pub use processor::{ProcessingOutcome, ReportProcessor};
pub use queue::{
    BrokerTopology, DeliveryEnvelope, DeliveryHandle, Publisher, ReportRequest, Resolution,
};
pub use storage::{Artifact, ArtifactFetcher, FetchError, S3Fetcher};
