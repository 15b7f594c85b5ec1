use std::future::Future;

use bytes::Bytes;
use thiserror::Error;

pub mod s3;

pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const CONTENT_ENCODING: &str = "gzip";

/// A single object write. `content_length` is always `body.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub key: String,
    pub body: Bytes,
    pub content_type: &'static str,
    pub content_encoding: &'static str,
    pub content_length: usize,
}

impl PutObject {
    /// A gzip-encoded text object.
    pub fn gzip_text(key: impl Into<String>, body: Bytes) -> Self {
        Self {
            key: key.into(),
            content_length: body.len(),
            body,
            content_type: CONTENT_TYPE,
            content_encoding: CONTENT_ENCODING,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage backend rejected object: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("cannot build object URL from endpoint {0}")]
    InvalidUrl(String),
}

/// The one outbound operation the pipeline needs from a storage backend.
pub trait ObjectStore: Send + Sync + 'static {
    fn put_object(&self, object: &PutObject) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Type-level stand-in for runs with `NO_UPLOAD`, where no credentials exist.
/// Unreachable in practice: the executor returns before touching the store
/// when uploads are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunStore;

impl ObjectStore for DryRunStore {
    async fn put_object(&self, object: &PutObject) -> Result<(), StoreError> {
        tracing::debug!(key = %object.key, "dry run, object discarded");
        Ok(())
    }
}
