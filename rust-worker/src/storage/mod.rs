//! Report artifact retrieval from object storage.

pub mod s3;
pub mod sigv4;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use s3::S3Fetcher;

/// A fetched report file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bucket: String,
    /// Object key the bytes were read from
    pub key: String,
    pub content: Bytes,
}

impl Artifact {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            content: content.into(),
        }
    }

    /// Last path segment of the key, used as the attachment file name.
    pub fn file_name(&self) -> &str {
        self.key
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("report")
    }

    /// `s3://bucket/key` form of the object location.
    pub fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("object s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("access to s3://{bucket}/{key} denied")]
    AccessDenied { bucket: String, key: String },

    #[error("object storage returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("object storage request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A `.` or `..` path segment in the bucket or key. URL parsing would
    /// resolve it and address a different object.
    #[error("s3://{bucket}/{key} contains a dot path segment")]
    DotSegment { bucket: String, key: String },

    #[error("invalid object URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Retrieves a stored object by bucket and key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Artifact, FetchError>;
}
