//! Report delivery by email.
//!
//! The pipeline only knows the [`Notifier`] capability: recipient plus
//! artifact in, success or failure out. Whether the report travels as an
//! attachment or as a pointer to storage is decided by the implementation.

pub mod mailgun;

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::Artifact;

pub use mailgun::MailgunNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail API rejected message with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("mail API request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Dispatches one email carrying a report.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, artifact: &Artifact) -> Result<(), NotifyError>;
}
