use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Config;
use crate::store::{ObjectStore, PutObject, StoreError};

pub struct RecordedPut {
    pub object: PutObject,
    pub at: Instant,
}

/// Store that fails its first `failures` puts with a 503, then succeeds.
/// Every call is recorded with the (tokio) time it happened.
pub struct RecordingStore {
    calls: Mutex<Vec<RecordedPut>>,
    failures_left: AtomicU32,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(failures),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|c| c.at).collect()
    }

    pub fn objects(&self) -> Vec<PutObject> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.object.clone())
            .collect()
    }
}

impl ObjectStore for RecordingStore {
    async fn put_object(&self, object: &PutObject) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(RecordedPut {
            object: object.clone(),
            at: Instant::now(),
        });
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            Err(StoreError::Rejected {
                status: 503,
                body: "SlowDown".into(),
            })
        } else {
            Ok(())
        }
    }
}

/// reqwest is built with `rustls-no-provider`; any test that builds a client
/// needs a process-wide provider first.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

pub fn dummy_config() -> Config {
    Config {
        bucket: "metrics".into(),
        region: "us-east-1".into(),
        endpoint: url::Url::parse("http://localhost:9000").unwrap(),
        key_prefix: "stats/".into(),
        namespace: "test".into(),
        sparse: false,
        precision: 0,
        num_buffered_intervals: 1,
        max_upload_attempts: 3,
        failed_upload_delay: Duration::from_millis(15_000),
        upload_timeout: Duration::from_millis(100),
        no_upload: false,
        debug: false,
        listener_port: 0,
        credentials: None,
    }
}
