//! S3 object fetcher over plain HTTP.
//!
//! Objects are addressed path-style (`{endpoint}/{bucket}/{key}`), which works
//! against AWS as well as S3-compatible stores such as MinIO.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use tracing::{error, info};

use super::sigv4::{sign_get, uri_encode, Credentials};
use super::{Artifact, ArtifactFetcher, FetchError};
use crate::config::StorageConfig;

/// Longest error body kept for logs and errors.
const MAX_ERROR_BODY: usize = 500;

pub struct S3Fetcher {
    client: Client,
    endpoint: String,
    region: String,
    credentials: Credentials,
    timeout: Duration,
}

impl S3Fetcher {
    pub fn new(client: Client, config: &StorageConfig, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            region: config.region.clone(),
            credentials: Credentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                session_token: config.session_token.clone(),
            },
            timeout,
        }
    }

    /// Build the object URL for `bucket`/`key`.
    ///
    /// The key is used verbatim, including a leading `/`. Keys with `.` or
    /// `..` segments are refused: URL parsing resolves those (encoded or not),
    /// so the request would name another object.
    pub fn object_url(&self, bucket: &str, key: &str) -> Result<Url, FetchError> {
        if is_dot_segment(bucket) || key.split('/').any(is_dot_segment) {
            return Err(FetchError::DotSegment {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let raw = format!(
            "{}/{}/{}",
            self.endpoint,
            uri_encode(bucket, false),
            uri_encode(key, true)
        );
        Ok(Url::parse(&raw)?)
    }
}

fn is_dot_segment(segment: &str) -> bool {
    matches!(segment, "." | "..")
}

/// `host[:port]` as it appears in the Host header.
fn host_header(url: &Url) -> Result<String, FetchError> {
    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

#[async_trait]
impl ArtifactFetcher for S3Fetcher {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Artifact, FetchError> {
        let url = self.object_url(bucket, key)?;
        let host = host_header(&url)?;
        let signed = sign_get(&self.credentials, &self.region, &host, url.path(), Utc::now());

        info!(bucket = bucket, key = key, "s3_fetch_starting");

        let mut request = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", &signed.authorization);
        if let Some(token) = &signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request.send().await.map_err(|e| {
            error!(
                bucket = bucket,
                key = key,
                is_timeout = e.is_timeout(),
                error = %e,
                "s3_fetch_transport_error"
            );
            FetchError::Transport(e)
        })?;

        let status = response.status();
        if status.is_success() {
            let content = response.bytes().await?;
            info!(
                bucket = bucket,
                key = key,
                content_length = content.len(),
                "s3_fetch_complete"
            );
            return Ok(Artifact::new(bucket, key, content));
        }

        let body = truncate(&response.text().await.unwrap_or_default());
        error!(
            bucket = bucket,
            key = key,
            status_code = status.as_u16(),
            body = %body,
            "s3_fetch_failed"
        );

        Err(match status {
            StatusCode::NOT_FOUND => FetchError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            StatusCode::FORBIDDEN => FetchError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => FetchError::Status {
                status: status.as_u16(),
                body,
            },
        })
    }
}
