//! Delivery processing - decode, fetch, notify, resolve.
//!
//! Every delivery walks the same path:
//!
//! ```text
//! Received → Decoding → Fetching → Notifying → Resolved(Ack)
//!               │           │           │
//!               └───────────┴───────────┴──→ Resolved(RejectWithoutRequeue)
//! ```
//!
//! Each step only runs if the previous one succeeded. Any failure, including
//! a panic inside a collaborator, is turned into a reject-without-requeue so
//! a single bad message never reaches the consumer loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::notify::Notifier;
use crate::queue::{DeliveryEnvelope, DeliveryHandle, ReportMessage, ReportRequest, Resolution};
use crate::storage::ArtifactFetcher;

/// Longest body excerpt logged for an undecodable message.
const BODY_PREVIEW_LEN: usize = 500;

/// How handling one delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Success,
    /// The body could not be decoded or is missing required fields.
    ValidationFailure,
    FetchFailure,
    NotifyFailure,
}

impl ProcessingOutcome {
    /// Broker decision for this outcome.
    ///
    /// Failures are never requeued: a poison message would otherwise loop
    /// forever.
    pub fn resolution(self) -> Resolution {
        match self {
            ProcessingOutcome::Success => Resolution::Ack,
            ProcessingOutcome::ValidationFailure
            | ProcessingOutcome::FetchFailure
            | ProcessingOutcome::NotifyFailure => Resolution::RejectWithoutRequeue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingOutcome::Success => "success",
            ProcessingOutcome::ValidationFailure => "validation_failure",
            ProcessingOutcome::FetchFailure => "fetch_failure",
            ProcessingOutcome::NotifyFailure => "notify_failure",
        }
    }
}

/// The collaborators a delivery needs, shared read-only by all handlers.
pub struct ReportProcessor {
    fetcher: Arc<dyn ArtifactFetcher>,
    notifier: Arc<dyn Notifier>,
}

impl ReportProcessor {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, notifier: Arc<dyn Notifier>) -> Self {
        Self { fetcher, notifier }
    }

    /// Decode and validate a body.
    ///
    /// Decoding fails before any field is inspected.
    pub fn decode(
        &self,
        message_id: &str,
        delivery_tag: u64,
        payload: &[u8],
    ) -> Option<ReportRequest> {
        let message = match ReportMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    message_id = %message_id,
                    delivery_tag = delivery_tag,
                    error = %e,
                    body_preview = %String::from_utf8_lossy(
                        &payload[..payload.len().min(BODY_PREVIEW_LEN)]
                    ),
                    "report_decode_failed"
                );
                return None;
            }
        };

        match message.validate() {
            Ok(request) => Some(request),
            Err(e) => {
                error!(
                    message_id = %message_id,
                    delivery_tag = delivery_tag,
                    missing_fields = ?e.missing,
                    error = %e,
                    "report_validation_failed"
                );
                None
            }
        }
    }

    /// Fetch the artifact for `request` and mail it.
    pub async fn deliver(
        &self,
        message_id: &str,
        delivery_tag: u64,
        request: &ReportRequest,
    ) -> ProcessingOutcome {
        let artifact = match self
            .fetcher
            .fetch(&request.storage_bucket, &request.storage_key)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(
                    message_id = %message_id,
                    delivery_tag = delivery_tag,
                    bucket = %request.storage_bucket,
                    key = %request.storage_key,
                    error = %e,
                    "report_fetch_failed"
                );
                return ProcessingOutcome::FetchFailure;
            }
        };

        info!(
            message_id = %message_id,
            delivery_tag = delivery_tag,
            bucket = %request.storage_bucket,
            key = %request.storage_key,
            content_length = artifact.content.len(),
            "report_fetched"
        );

        if let Err(e) = self
            .notifier
            .notify(&request.recipient_email, &artifact)
            .await
        {
            error!(
                message_id = %message_id,
                delivery_tag = delivery_tag,
                recipient = %request.recipient_email,
                error = %e,
                "report_notify_failed"
            );
            return ProcessingOutcome::NotifyFailure;
        }

        info!(
            message_id = %message_id,
            delivery_tag = delivery_tag,
            recipient = %request.recipient_email,
            "report_sent"
        );

        ProcessingOutcome::Success
    }

    /// Run decode, fetch and notify for one payload.
    pub async fn process(
        &self,
        message_id: &str,
        delivery_tag: u64,
        payload: &[u8],
    ) -> ProcessingOutcome {
        match self.decode(message_id, delivery_tag, payload) {
            Some(request) => self.deliver(message_id, delivery_tag, &request).await,
            None => ProcessingOutcome::ValidationFailure,
        }
    }

    /// Handle one delivery end to end and settle it with the broker.
    ///
    /// The envelope is consumed, so it is resolved exactly once. Resolution
    /// runs even if processing panics.
    pub async fn handle_delivery<H>(&self, envelope: DeliveryEnvelope<H>) -> ProcessingOutcome
    where
        H: DeliveryHandle,
    {
        let DeliveryEnvelope {
            handle,
            delivery_tag,
            message_id,
            redelivered,
            payload,
        } = envelope;

        info!(
            message_id = %message_id,
            delivery_tag = delivery_tag,
            redelivered = redelivered,
            body_length = payload.len(),
            "rabbitmq_report_received"
        );

        let outcome = match AssertUnwindSafe(self.process(&message_id, delivery_tag, &payload))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    message_id = %message_id,
                    delivery_tag = delivery_tag,
                    "report_processing_panicked"
                );
                ProcessingOutcome::NotifyFailure
            }
        };

        let resolution = outcome.resolution();
        match handle.resolve(resolution).await {
            Ok(()) => match resolution {
                Resolution::Ack => info!(
                    message_id = %message_id,
                    delivery_tag = delivery_tag,
                    outcome = outcome.as_str(),
                    "rabbitmq_report_acked"
                ),
                Resolution::RejectWithoutRequeue => warn!(
                    message_id = %message_id,
                    delivery_tag = delivery_tag,
                    outcome = outcome.as_str(),
                    "rabbitmq_report_rejected"
                ),
            },
            Err(e) => match resolution {
                Resolution::Ack => error!(
                    message_id = %message_id,
                    delivery_tag = delivery_tag,
                    error = %e,
                    "rabbitmq_ack_failed"
                ),
                Resolution::RejectWithoutRequeue => error!(
                    message_id = %message_id,
                    delivery_tag = delivery_tag,
                    error = %e,
                    "rabbitmq_reject_failed"
                ),
            },
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{MockNotifier, NotifyError};
    use crate::queue::testing::RecordingHandle;
    use crate::storage::{Artifact, FetchError, MockArtifactFetcher};
    use mockall::predicate::eq;

    const VALID: &[u8] =
        br#"{"s3_bucket":"reports","s3_key":"2024/q1.csv","recipient_email":"a@x.com"}"#;

    fn envelope(handle: &RecordingHandle, payload: &[u8]) -> DeliveryEnvelope<RecordingHandle> {
        DeliveryEnvelope::new(handle.clone(), 1, payload.to_vec())
    }

    fn processor(fetcher: MockArtifactFetcher, notifier: MockNotifier) -> ReportProcessor {
        ReportProcessor::new(Arc::new(fetcher), Arc::new(notifier))
    }

    #[test]
    fn test_outcome_resolution() {
        assert_eq!(ProcessingOutcome::Success.resolution(), Resolution::Ack);
        for outcome in [
            ProcessingOutcome::ValidationFailure,
            ProcessingOutcome::FetchFailure,
            ProcessingOutcome::NotifyFailure,
        ] {
            assert_eq!(outcome.resolution(), Resolution::RejectWithoutRequeue);
        }
    }

    #[tokio::test]
    async fn test_success_acks() {
        let mut fetcher = MockArtifactFetcher::new();
        fetcher
            .expect_fetch()
            .with(eq("reports"), eq("2024/q1.csv"))
            .times(1)
            .returning(|b, k| Ok(Artifact::new(b, k, "id,name\n1,foo\n")));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|recipient, artifact| {
                recipient == "a@x.com" && &artifact.content[..] == b"id,name\n1,foo\n"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let handle = RecordingHandle::default();
        let outcome = processor(fetcher, notifier)
            .handle_delivery(envelope(&handle, VALID))
            .await;

        assert_eq!(outcome, ProcessingOutcome::Success);
        assert_eq!(handle.resolutions(), vec![Resolution::Ack]);
    }

    #[tokio::test]
    async fn test_missing_field_never_fetches() {
        let mut fetcher = MockArtifactFetcher::new();
        fetcher.expect_fetch().never();
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();

        let handle = RecordingHandle::default();
        let outcome = processor(fetcher, notifier)
            .handle_delivery(envelope(
                &handle,
                br#"{"s3_bucket":"reports","s3_key":"2024/q1.csv"}"#,
            ))
            .await;

        assert_eq!(outcome, ProcessingOutcome::ValidationFailure);
        assert_eq!(handle.resolutions(), vec![Resolution::RejectWithoutRequeue]);
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let mut fetcher = MockArtifactFetcher::new();
        fetcher.expect_fetch().never();
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();

        let handle = RecordingHandle::default();
        let outcome = processor(fetcher, notifier)
            .handle_delivery(envelope(&handle, b"not-json"))
            .await;

        assert_eq!(outcome, ProcessingOutcome::ValidationFailure);
        assert_eq!(handle.resolutions(), vec![Resolution::RejectWithoutRequeue]);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_notify() {
        let mut fetcher = MockArtifactFetcher::new();
        fetcher.expect_fetch().times(1).returning(|b, k| {
            Err(FetchError::NotFound {
                bucket: b.to_string(),
                key: k.to_string(),
            })
        });
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();

        let handle = RecordingHandle::default();
        let outcome = processor(fetcher, notifier)
            .handle_delivery(envelope(&handle, VALID))
            .await;

        assert_eq!(outcome, ProcessingOutcome::FetchFailure);
        assert_eq!(handle.resolutions(), vec![Resolution::RejectWithoutRequeue]);
    }

    #[tokio::test]
    async fn test_notify_failure_rejects() {
        let mut fetcher = MockArtifactFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|b, k| Ok(Artifact::new(b, k, "x")));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|_, _| {
            Err(NotifyError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            })
        });

        let handle = RecordingHandle::default();
        let outcome = processor(fetcher, notifier)
            .handle_delivery(envelope(&handle, VALID))
            .await;

        assert_eq!(outcome, ProcessingOutcome::NotifyFailure);
        assert_eq!(handle.resolutions(), vec![Resolution::RejectWithoutRequeue]);
    }

    /// JSON log lines written while a test subscriber is installed.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl CapturedLogs {
        fn install() -> (Self, tracing::subscriber::DefaultGuard) {
            let logs = Self::default();
            let subscriber = tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_writer(logs.clone())
                .finish();
            let guard = tracing::subscriber::set_default(subscriber);
            (logs, guard)
        }

        fn event(&self, name: &str) -> serde_json::Value {
            let raw = self.0.lock().unwrap().clone();
            String::from_utf8_lossy(&raw)
                .lines()
                .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
                .find(|event| event["message"] == name)
                .unwrap_or_else(|| panic!("no {name} event logged"))
        }
    }

    #[tokio::test]
    async fn test_failure_logs_carry_delivery_tag() {
        let (logs, _guard) = CapturedLogs::install();

        let mut fetcher = MockArtifactFetcher::new();
        fetcher.expect_fetch().returning(|b, k| {
            Err(FetchError::AccessDenied {
                bucket: b.to_string(),
                key: k.to_string(),
            })
        });
        let processor = processor(fetcher, MockNotifier::new());

        for (tag, payload) in [
            (41, &b"not-json"[..]),
            (42, &br#"{"s3_bucket":"reports"}"#[..]),
            (43, VALID),
        ] {
            let handle = RecordingHandle::default();
            processor
                .handle_delivery(DeliveryEnvelope::new(handle, tag, payload.to_vec()))
                .await;
        }

        for (name, tag) in [
            ("report_decode_failed", 41u64),
            ("report_validation_failed", 42),
            ("report_fetch_failed", 43),
        ] {
            let event = logs.event(name);
            assert_eq!(event["delivery_tag"], tag, "{name}");
            assert_eq!(event["message_id"], "unknown", "{name}");
        }
    }

    #[tokio::test]
    async fn test_notify_failure_log_carries_delivery_tag() {
        let (logs, _guard) = CapturedLogs::install();

        let mut fetcher = MockArtifactFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|b, k| Ok(Artifact::new(b, k, "x")));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _| {
            Err(NotifyError::Rejected {
                status: 400,
                body: "bad recipient".to_string(),
            })
        });

        processor(fetcher, notifier)
            .handle_delivery(DeliveryEnvelope::new(
                RecordingHandle::default(),
                44,
                VALID.to_vec(),
            ))
            .await;

        assert_eq!(logs.event("report_notify_failed")["delivery_tag"], 44u64);
    }

    #[tokio::test]
    async fn test_resolve_failure_event_names_resolution() {
        let (logs, _guard) = CapturedLogs::install();

        let mut fetcher = MockArtifactFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|b, k| Ok(Artifact::new(b, k, "x")));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _| Ok(()));
        let processor = processor(fetcher, notifier);

        processor
            .handle_delivery(DeliveryEnvelope::new(
                RecordingHandle::failing(),
                5,
                VALID.to_vec(),
            ))
            .await;
        processor
            .handle_delivery(DeliveryEnvelope::new(
                RecordingHandle::failing(),
                6,
                b"{}".to_vec(),
            ))
            .await;

        assert_eq!(logs.event("rabbitmq_ack_failed")["delivery_tag"], 5u64);
        assert_eq!(logs.event("rabbitmq_reject_failed")["delivery_tag"], 6u64);
    }

    struct PanickingFetcher;

    #[async_trait::async_trait]
    impl ArtifactFetcher for PanickingFetcher {
        async fn fetch(&self, _bucket: &str, _key: &str) -> Result<Artifact, FetchError> {
            panic!("storage client bug")
        }
    }

    #[tokio::test]
    async fn test_panic_is_resolved_as_reject() {
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();

        let handle = RecordingHandle::default();
        let outcome = ReportProcessor::new(Arc::new(PanickingFetcher), Arc::new(notifier))
            .handle_delivery(envelope(&handle, VALID))
            .await;

        assert_eq!(outcome, ProcessingOutcome::NotifyFailure);
        assert_eq!(handle.resolutions(), vec![Resolution::RejectWithoutRequeue]);
    }

    #[tokio::test]
    async fn test_resolve_failure_does_not_propagate() {
        let mut fetcher = MockArtifactFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|b, k| Ok(Artifact::new(b, k, "x")));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _| Ok(()));

        let handle = RecordingHandle::failing();
        let outcome = processor(fetcher, notifier)
            .handle_delivery(envelope(&handle, VALID))
            .await;

        assert_eq!(outcome, ProcessingOutcome::Success);
        assert_eq!(handle.resolutions(), vec![Resolution::Ack]);
    }
}
