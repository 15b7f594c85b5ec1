use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::buffers::{FlushBuffer, ReadyBatch};
use crate::config::Config;
use crate::encoder::{self, EncodeOptions};
use crate::key_name::KeyNamer;
use crate::snapshot::MetricsSnapshot;
use crate::status::{SharedState, StatusReporter};
use crate::store::ObjectStore;
use crate::uploader::{Completion, UploadError, UploadExecutor, UploadOutcome, UploadPolicy};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub namespace: String,
    pub encode: EncodeOptions,
    pub num_buffered_intervals: usize,
    pub upload: UploadPolicy,
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            namespace: config.namespace.clone(),
            encode: EncodeOptions {
                sparse: config.sparse,
                precision: config.precision,
            },
            num_buffered_intervals: config.num_buffered_intervals,
            upload: UploadPolicy::from(config),
        }
    }
}

/// Per-interval entry point: encode, buffer, and hand full batches to the
/// upload executor.
///
/// At most one upload task exists at a time. A hand-off that finds the
/// previous task still retrying waits for it before spawning the next.
pub struct Pipeline<S: ObjectStore, K: KeyNamer> {
    namespace: String,
    encode: EncodeOptions,
    buffer: FlushBuffer<K>,
    executor: UploadExecutor<S>,
    state: SharedState,
    upload_task: Option<JoinHandle<UploadOutcome>>,
}

impl<S: ObjectStore, K: KeyNamer> Pipeline<S, K> {
    pub fn new(options: &PipelineOptions, store: Arc<S>, key_namer: K, state: SharedState) -> Self {
        Self {
            namespace: options.namespace.clone(),
            encode: options.encode,
            buffer: FlushBuffer::new(options.num_buffered_intervals, key_namer),
            executor: UploadExecutor::new(store, options.upload.clone(), state.clone()),
            state,
            upload_task: None,
        }
    }

    pub fn status(&self) -> StatusReporter {
        self.state.reporter()
    }

    pub fn last_error(&self) -> Option<Arc<UploadError>> {
        self.state.last_error()
    }

    pub fn buffered_intervals(&self) -> usize {
        self.buffer.len()
    }

    /// Record one interval. Passing a `completion` forces a hand-off and
    /// later receives the upload's outcome.
    ///
    /// Returns `true` if a batch was handed off.
    pub async fn flush(
        &mut self,
        timestamp: u64,
        snapshot: &MetricsSnapshot,
        completion: Option<Completion>,
    ) -> bool {
        let payload = encoder::encode(timestamp, &self.namespace, snapshot, &self.encode);
        if payload.is_empty() {
            debug!(timestamp, "snapshot rendered no lines");
        }
        self.state.record_flush(timestamp);

        match self
            .buffer
            .on_interval(timestamp, payload, completion.is_some())
        {
            Some(batch) => {
                self.hand_off(batch, completion).await;
                true
            }
            None => false,
        }
    }

    /// Hand off whatever is buffered, without a new interval. Used at shutdown.
    /// A `completion` is answered with success when there was nothing to send.
    pub async fn flush_pending(&mut self, completion: Option<Completion>) -> bool {
        match self.buffer.take_pending() {
            Some(batch) => {
                self.hand_off(batch, completion).await;
                true
            }
            None => {
                if let Some(tx) = completion {
                    let _ = tx.send(Ok(()));
                }
                false
            }
        }
    }

    /// Wait for the in-flight upload, if any, to finish.
    pub async fn join_upload(&mut self) -> Option<UploadOutcome> {
        let handle = self.upload_task.take()?;
        match handle.await {
            Ok(outcome) => {
                debug!(attempts = outcome.attempts(), "upload task finished");
                Some(outcome)
            }
            Err(e) => {
                error!(error = %e, "upload task panicked");
                None
            }
        }
    }

    async fn hand_off(&mut self, batch: ReadyBatch, completion: Option<Completion>) {
        if self.executor.policy().no_upload {
            self.executor.run(batch, completion).await;
            return;
        }

        if self
            .upload_task
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            warn!(key = %batch.key, "previous upload still in flight, waiting before hand-off");
        }
        self.join_upload().await;

        let executor = self.executor.clone();
        self.upload_task = Some(tokio::spawn(async move {
            executor.run(batch, completion).await
        }));
    }
}
