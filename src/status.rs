use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::uploader::UploadError;

/// Category reported alongside each status key.
pub const CATEGORY: &str = "s3";

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Process-lifetime delivery state. Both timestamps start at process start.
#[derive(Debug, Clone)]
pub struct BackendState {
    pub last_flush: u64,
    pub last_exception: u64,
    pub last_error: Option<Arc<UploadError>>,
}

/// Handle to the one `BackendState` of a process.
///
/// Writers are the pipeline and its upload task, which never overlap; the
/// lock is only there so monitors can read from other tasks. It is never held
/// across `.await`.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<BackendState>>,
}

impl SharedState {
    pub fn new(startup_time: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BackendState {
                last_flush: startup_time,
                last_exception: startup_time,
                last_error: None,
            })),
        }
    }

    // Every write is a single field assignment; poisoned state is still whole.
    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_flush(&self, timestamp: u64) {
        self.lock().last_flush = timestamp;
    }

    pub fn record_failure(&self, error: Arc<UploadError>) {
        let mut state = self.lock();
        state.last_exception = unix_now();
        state.last_error = Some(error);
    }

    pub fn snapshot(&self) -> BackendState {
        self.lock().clone()
    }

    pub fn last_error(&self) -> Option<Arc<UploadError>> {
        self.lock().last_error.clone()
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter {
            state: self.clone(),
        }
    }
}

/// Read-only view for monitors.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    state: SharedState,
}

impl StatusReporter {
    /// Call `write(error, category, key, value)` once for `lastFlush` and
    /// once for `lastException`. Reading the state cannot fail, so `error`
    /// is always `None`.
    pub fn report<F>(&self, mut write: F)
    where
        F: FnMut(Option<&UploadError>, &str, &str, u64),
    {
        let state = self.state.snapshot();
        write(None, CATEGORY, "lastFlush", state.last_flush);
        write(None, CATEGORY, "lastException", state.last_exception);
    }

    /// Render the report as `category.key: value` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.report(|_, category, key, value| {
            out.push_str(&format!("{category}.{key}: {value}\n"));
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn starts_at_startup_time() {
        let state = SharedState::new(1000);
        let mut seen = Vec::new();
        state
            .reporter()
            .report(|e, c, k, v| seen.push((e.is_some(), c.to_owned(), k.to_owned(), v)));
        assert_eq!(
            seen,
            vec![
                (false, "s3".to_owned(), "lastFlush".to_owned(), 1000),
                (false, "s3".to_owned(), "lastException".to_owned(), 1000),
            ]
        );
    }

    #[test]
    fn record_flush_updates_last_flush_only() {
        let state = SharedState::new(1000);
        state.record_flush(2000);
        let snap = state.snapshot();
        assert_eq!(snap.last_flush, 2000);
        assert_eq!(snap.last_exception, 1000);
    }

    #[test]
    fn record_failure_stores_error_and_time() {
        let state = SharedState::new(0);
        let err = Arc::new(UploadError::Store(StoreError::Rejected {
            status: 503,
            body: String::new(),
        }));
        state.record_failure(Arc::clone(&err));
        let snap = state.snapshot();
        assert!(snap.last_exception > 0);
        assert!(Arc::ptr_eq(&state.last_error().unwrap(), &err));
    }

    #[test]
    fn render_formats_lines() {
        let state = SharedState::new(42);
        assert_eq!(
            state.reporter().render(),
            "s3.lastFlush: 42\ns3.lastException: 42\n"
        );
    }

    #[test]
    fn reporting_does_not_mutate() {
        let state = SharedState::new(42);
        let reporter = state.reporter();
        reporter.report(|_, _, _, _| {});
        reporter.report(|_, _, _, _| {});
        assert_eq!(state.snapshot().last_flush, 42);
        assert!(state.last_error().is_none());
    }
}
