use tracing::{debug, info};

use crate::encoder::EncodedPayload;
use crate::key_name::KeyNamer;

/// Intervals accumulated since the last hand-off, oldest first.
#[derive(Debug, Default)]
pub struct BufferedBatch {
    pub timestamps: Vec<u64>,
    pub payloads: Vec<EncodedPayload>,
    pub size_bytes: usize,
}

impl BufferedBatch {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn push(&mut self, timestamp: u64, payload: EncodedPayload) {
        self.size_bytes += payload.len();
        self.timestamps.push(timestamp);
        self.payloads.push(payload);
    }

    /// Join every buffered payload with `\n`, in call order.
    fn join(&self) -> String {
        let mut content =
            String::with_capacity(self.size_bytes + self.payloads.len().saturating_sub(1));
        for (i, payload) in self.payloads.iter().enumerate() {
            if i > 0 {
                content.push('\n');
            }
            content.push_str(payload.as_str());
        }
        content
    }
}

/// A finalized batch, detached from the buffer and ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyBatch {
    pub key: String,
    pub content: String,
    pub timestamps: Vec<u64>,
}

/// Collects encoded intervals until `num_buffered_intervals` of them are
/// waiting (or a flush is forced), then hands the whole batch off at once.
pub struct FlushBuffer<K: KeyNamer> {
    batch: BufferedBatch,
    num_buffered_intervals: usize,
    key_namer: K,
}

impl<K: KeyNamer> FlushBuffer<K> {
    pub fn new(num_buffered_intervals: usize, key_namer: K) -> Self {
        Self {
            batch: BufferedBatch::default(),
            num_buffered_intervals: num_buffered_intervals.max(1),
            key_namer,
        }
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.batch.size_bytes
    }

    /// Append one interval. Returns the finished batch when the threshold is
    /// reached or `force` is set; the buffer is empty again on return.
    pub fn on_interval(
        &mut self,
        timestamp: u64,
        payload: EncodedPayload,
        force: bool,
    ) -> Option<ReadyBatch> {
        self.batch.push(timestamp, payload);
        if !force && self.batch.len() < self.num_buffered_intervals {
            debug!(
                timestamp,
                buffered = self.batch.len(),
                bytes = self.size_bytes(),
                threshold = self.num_buffered_intervals,
                "buffering stats"
            );
            return None;
        }
        Some(self.hand_off())
    }

    /// Hand off whatever is buffered without appending a new interval.
    pub fn take_pending(&mut self) -> Option<ReadyBatch> {
        if self.is_empty() {
            return None;
        }
        Some(self.hand_off())
    }

    fn hand_off(&mut self) -> ReadyBatch {
        let batch = std::mem::take(&mut self.batch);
        let key = self.key_namer.key_name(&batch.timestamps);
        info!(
            key = %key,
            intervals = batch.len(),
            bytes = batch.size_bytes,
            "flushing stats"
        );
        ReadyBatch {
            content: batch.join(),
            key,
            timestamps: batch.timestamps,
        }
    }
}
