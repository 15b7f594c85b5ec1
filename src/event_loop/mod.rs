use std::net::SocketAddr;
use std::ops::ControlFlow;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::key_name::KeyNamer;
use crate::listener::{self, FlushRequest, ListenerError};
use crate::pipeline::Pipeline;
use crate::store::ObjectStore;

const INTAKE_CAPACITY: usize = 128;

/// Owns the pipeline and the intake listener task.
///
/// Every flush goes through this loop, so flushes are applied one at a time
/// in arrival order. Cancelling the token returned by [`EventLoop::shutdown_token`]
/// drains the intake channel, hands off whatever is still buffered and waits
/// for that final upload.
pub struct EventLoop<S: ObjectStore, K: KeyNamer> {
    pipeline: Pipeline<S, K>,
    flush_rx: mpsc::Receiver<FlushRequest>,
    listener_cancel: CancellationToken,
    shutdown: CancellationToken,
    listener_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl<S: ObjectStore, K: KeyNamer> EventLoop<S, K> {
    /// Bind the intake listener and spawn its server task.
    pub async fn new(pipeline: Pipeline<S, K>, port: u16) -> Result<Self, ListenerError> {
        let listener_cancel = CancellationToken::new();
        let (flush_tx, flush_rx) = mpsc::channel::<FlushRequest>(INTAKE_CAPACITY);

        let tcp = listener::bind(port).await?;
        let local_addr = tcp
            .local_addr()
            .map_err(|source| ListenerError::Bind { port, source })?;

        let listener_task = tokio::spawn(listener::serve(
            tcp,
            flush_tx,
            pipeline.status(),
            listener_cancel.clone(),
        ));

        Ok(Self {
            pipeline,
            flush_rx,
            listener_cancel,
            shutdown: CancellationToken::new(),
            listener_task,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Returns `Err(ListenerError::Died)` if the listener task exits on its own.
    pub async fn run(&mut self) -> Result<(), ListenerError> {
        loop {
            match self.tick().await {
                ControlFlow::Break(result) => return result,
                ControlFlow::Continue(()) => {}
            }
        }
    }

    async fn tick(&mut self) -> ControlFlow<Result<(), ListenerError>> {
        tokio::select! {
            // Shutdown drains the channel itself, so it may go first.
            biased;
            _ = self.shutdown.cancelled() => {
                self.shut_down().await;
                return ControlFlow::Break(Ok(()));
            }
            request = self.flush_rx.recv() => {
                match request {
                    Some(request) => self.apply(request).await,
                    None => return ControlFlow::Break(Err(ListenerError::Died)),
                }
            }
        }
        ControlFlow::Continue(())
    }

    async fn apply(&mut self, request: FlushRequest) {
        let FlushRequest {
            timestamp,
            snapshot,
            completion,
        } = request;
        self.pipeline.flush(timestamp, &snapshot, completion).await;
    }

    async fn shut_down(&mut self) {
        debug!(
            buffered = self.pipeline.buffered_intervals(),
            "shutting down"
        );
        self.listener_cancel.cancel();
        let _ = (&mut self.listener_task).await;

        // Drain requests that were queued before the listener stopped.
        while let Ok(request) = self.flush_rx.try_recv() {
            self.apply(request).await;
        }

        // Best-effort final upload of a partial batch.
        if self.pipeline.flush_pending(None).await {
            info!("flushed partial batch on shutdown");
        }
        self.pipeline.join_upload().await;

        if let Some(error) = self.pipeline.last_error() {
            warn!(%error, "most recent upload failure before shutdown");
        }
    }
}
