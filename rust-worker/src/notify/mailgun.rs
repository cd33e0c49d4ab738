//! Report delivery through the Mailgun messages API.
//!
//! Reference: https://documentation.mailgun.com/docs/mailgun/api-reference/openapi-final/tag/Messages/
//!
//! Two delivery modes share this client:
//! - `Attachment`: the report file rides along as a multipart attachment
//! - `Notice`: a text-only email telling the recipient where the report is

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use tracing::{error, info};

use super::{Notifier, NotifyError};
use crate::config::{DeliveryMode, MailConfig};
use crate::storage::Artifact;

/// Longest API error body kept for logs and errors.
const MAX_ERROR_BODY: usize = 500;

pub struct MailgunNotifier {
    client: Client,
    messages_url: String,
    api_key: String,
    from: String,
    subject: String,
    mode: DeliveryMode,
    timeout: Duration,
}

impl MailgunNotifier {
    pub fn new(client: Client, config: &MailConfig, timeout: Duration) -> Self {
        Self {
            client,
            messages_url: format!(
                "{}/v3/{}/messages",
                config.api_base.trim_end_matches('/'),
                config.domain
            ),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            subject: config.subject.clone(),
            mode: config.mode,
            timeout,
        }
    }

    pub fn messages_url(&self) -> &str {
        &self.messages_url
    }

    /// Plain-text body for the configured mode.
    fn body_text(&self, artifact: &Artifact) -> String {
        match self.mode {
            DeliveryMode::Attachment => format!(
                "Your task report is attached ({}, {} bytes).",
                artifact.file_name(),
                artifact.content.len()
            ),
            DeliveryMode::Notice => format!(
                "Your task report has been generated and is available at {}.",
                artifact.location()
            ),
        }
    }

    fn build_form(&self, recipient: &str, artifact: &Artifact) -> Result<Form, NotifyError> {
        let form = Form::new()
            .text("from", self.from.clone())
            .text("to", recipient.to_string())
            .text("subject", self.subject.clone())
            .text("text", self.body_text(artifact));

        match self.mode {
            DeliveryMode::Notice => Ok(form),
            DeliveryMode::Attachment => {
                let part = Part::bytes(artifact.content.to_vec())
                    .file_name(artifact.file_name().to_string())
                    .mime_str(content_type(artifact.file_name()))?;
                Ok(form.part("attachment", part))
            }
        }
    }
}

/// Guess a MIME type from the file extension.
fn content_type(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".csv") {
        "text/csv"
    } else if lower.ends_with(".json") {
        "application/json"
    } else if lower.ends_with(".txt") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

#[async_trait]
impl Notifier for MailgunNotifier {
    async fn notify(&self, recipient: &str, artifact: &Artifact) -> Result<(), NotifyError> {
        let form = self.build_form(recipient, artifact)?;

        info!(
            recipient = recipient,
            mode = ?self.mode,
            attachment_length = artifact.content.len(),
            "mailgun_send_starting"
        );

        let response = self
            .client
            .post(&self.messages_url)
            .basic_auth("api", Some(&self.api_key))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!(
                    recipient = recipient,
                    is_timeout = e.is_timeout(),
                    error = %e,
                    "mailgun_send_transport_error"
                );
                NotifyError::Transport(e)
            })?;

        let status = response.status();
        if status.is_success() {
            info!(
                recipient = recipient,
                status_code = status.as_u16(),
                "mailgun_send_complete"
            );
            return Ok(());
        }

        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_ERROR_BODY)
            .collect();

        error!(
            recipient = recipient,
            status_code = status.as_u16(),
            body = %body,
            "mailgun_send_rejected"
        );

        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
