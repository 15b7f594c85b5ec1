use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzEncoder;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::buffers::ReadyBatch;
use crate::config::Config;
use crate::status::SharedState;
use crate::store::{ObjectStore, PutObject, StoreError};

/// Receives the final result of a delivery sequence. A dropped receiver is
/// ignored.
pub type Completion = oneshot::Sender<Result<(), Arc<UploadError>>>;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("gzip compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
    /// Dry run: never compress or call the store.
    pub no_upload: bool,
    /// Log batch contents at debug level.
    pub debug: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(15_000),
            no_upload: false,
            debug: false,
        }
    }
}

impl From<&Config> for UploadPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.max_upload_attempts,
            retry_delay: config.failed_upload_delay,
            no_upload: config.no_upload,
            debug: config.debug,
        }
    }
}

/// How a delivery sequence ended.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    Succeeded { attempts: u32 },
    Skipped,
    Abandoned { attempts: u32, error: Arc<UploadError> },
}

impl UploadOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            UploadOutcome::Succeeded { attempts } | UploadOutcome::Abandoned { attempts, .. } => {
                *attempts
            }
            UploadOutcome::Skipped => 0,
        }
    }

    fn into_result(self) -> Result<(), Arc<UploadError>> {
        match self {
            UploadOutcome::Abandoned { error, .. } => Err(error),
            _ => Ok(()),
        }
    }
}

/// One batch's in-progress delivery.
struct UploadAttempt {
    object: PutObject,
    attempts: u32,
}

/// Compresses ready batches and pushes them to the store, retrying failed
/// puts a bounded number of times.
pub struct UploadExecutor<S: ObjectStore> {
    store: Arc<S>,
    policy: UploadPolicy,
    state: SharedState,
}

impl<S: ObjectStore> Clone for UploadExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S: ObjectStore> UploadExecutor<S> {
    pub fn new(store: Arc<S>, policy: UploadPolicy, state: SharedState) -> Self {
        Self {
            store,
            policy,
            state,
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Drive one batch to success or abandonment, then notify `completion`.
    pub async fn run(&self, batch: ReadyBatch, completion: Option<Completion>) -> UploadOutcome {
        let outcome = self.deliver(batch).await;
        if let Some(tx) = completion {
            let _ = tx.send(outcome.clone().into_result());
        }
        outcome
    }

    async fn deliver(&self, batch: ReadyBatch) -> UploadOutcome {
        if self.policy.debug {
            debug!(key = %batch.key, content = %batch.content, "batch contents");
        }
        if self.policy.no_upload {
            info!(key = %batch.key, bytes = batch.content.len(), "upload disabled, dropping batch");
            return UploadOutcome::Skipped;
        }

        let body = match compress_gzip(batch.content.as_bytes()) {
            Ok(body) => body,
            Err(e) => {
                let error = Arc::new(UploadError::from(e));
                self.state.record_failure(Arc::clone(&error));
                error!(key = %batch.key, %error, "abandoning batch");
                return UploadOutcome::Abandoned { attempts: 0, error };
            }
        };

        let mut attempt = UploadAttempt {
            object: PutObject::gzip_text(batch.key, Bytes::from(body)),
            attempts: 0,
        };

        loop {
            attempt.attempts += 1;
            let error = match self.store.put_object(&attempt.object).await {
                Ok(()) => {
                    info!(
                        key = %attempt.object.key,
                        bytes = attempt.object.content_length,
                        attempts = attempt.attempts,
                        "uploaded batch"
                    );
                    return UploadOutcome::Succeeded {
                        attempts: attempt.attempts,
                    };
                }
                Err(e) => Arc::new(UploadError::from(e)),
            };
            self.state.record_failure(Arc::clone(&error));

            if attempt.attempts >= self.policy.max_attempts {
                error!(
                    key = %attempt.object.key,
                    attempts = attempt.attempts,
                    %error,
                    "upload attempts exhausted, abandoning batch"
                );
                return UploadOutcome::Abandoned {
                    attempts: attempt.attempts,
                    error,
                };
            }

            warn!(
                key = %attempt.object.key,
                attempt = attempt.attempts,
                max_attempts = self.policy.max_attempts,
                %error,
                retry_in_ms = self.policy.retry_delay.as_millis() as u64,
                "upload failed, retrying"
            );
            tokio::time::sleep(self.policy.retry_delay).await;
        }
    }
}

pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}
