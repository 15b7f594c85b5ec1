use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::snapshot::MetricsSnapshot;
use crate::status::{StatusReporter, unix_now};
use crate::uploader::Completion;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind intake listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("intake listener died unexpectedly")]
    Died,
}

/// Bind the intake socket on all interfaces.
pub async fn bind(port: u16) -> Result<TcpListener, ListenerError> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| ListenerError::Bind { port, source })
}

/// One interval submitted by the collector.
#[derive(Debug)]
pub struct FlushRequest {
    pub timestamp: u64,
    pub snapshot: MetricsSnapshot,
    /// Present for forced flushes.
    pub completion: Option<Completion>,
}

fn response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::default())
        .unwrap()
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

#[derive(Debug, Default, PartialEq, Eq)]
struct FlushParams {
    timestamp: Option<u64>,
    force: bool,
}

fn parse_params(query: Option<&str>) -> Result<FlushParams, String> {
    let mut params = FlushParams::default();
    let Some(query) = query else {
        return Ok(params);
    };
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match &*key {
            "timestamp" => {
                params.timestamp = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid timestamp: {value}"))?,
                );
            }
            "force" => {
                params.force = match &*value {
                    "" | "true" | "1" => true,
                    "false" | "0" => false,
                    other => return Err(format!("invalid force flag: {other}")),
                };
            }
            _ => {}
        }
    }
    Ok(params)
}

/// Validate a `POST /flush`: query string and JSON snapshot body.
async fn validate_flush<B>(req: Request<B>) -> Result<(FlushParams, MetricsSnapshot), (StatusCode, String)>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
{
    let params =
        parse_params(req.uri().query()).map_err(|reason| (StatusCode::BAD_REQUEST, reason))?;

    let body = req
        .collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|_| (StatusCode::BAD_REQUEST, "failed to read body".to_owned()))?;

    let snapshot = serde_json::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed snapshot: {e}")))?;

    Ok((params, snapshot))
}

async fn handle_flush<B>(
    req: Request<B>,
    tx: mpsc::Sender<FlushRequest>,
) -> Response<Full<Bytes>>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
{
    let (params, snapshot) = match validate_flush(req).await {
        Ok(pair) => pair,
        Err((status, reason)) => {
            warn!(%reason, "flush request rejected");
            return text(status, reason);
        }
    };

    let (completion, outcome) = if params.force {
        let (tx, rx) = oneshot::channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let request = FlushRequest {
        timestamp: params.timestamp.unwrap_or_else(unix_now),
        snapshot,
        completion,
    };
    debug!(timestamp = request.timestamp, force = params.force, "flush request accepted");

    match tx.try_send(request) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            return Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .header("Retry-After", "1")
                .body(Full::default())
                .unwrap();
        }
        // The event loop is gone (shutdown); nothing will ever process this.
        Err(TrySendError::Closed(_)) => return response(StatusCode::BAD_GATEWAY),
    }

    let Some(outcome) = outcome else {
        return response(StatusCode::OK);
    };
    match outcome.await {
        Ok(Ok(())) => response(StatusCode::OK),
        Ok(Err(e)) => text(StatusCode::BAD_GATEWAY, e.to_string()),
        Err(_) => text(
            StatusCode::BAD_GATEWAY,
            "upload ended without a result".to_owned(),
        ),
    }
}

async fn handle<B>(
    req: Request<B>,
    tx: mpsc::Sender<FlushRequest>,
    status: StatusReporter,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
{
    let path = req.uri().path().to_owned();
    let method = req.method().clone();

    let resp = match (path.as_str(), method) {
        ("/flush", Method::POST) => handle_flush(req, tx).await,
        ("/status", Method::GET) => text(StatusCode::OK, status.render()),
        ("/flush" | "/status", method) => {
            warn!(%method, %path, "method not allowed");
            response(StatusCode::METHOD_NOT_ALLOWED)
        }
        _ => {
            warn!(%path, "unknown path");
            response(StatusCode::NOT_FOUND)
        }
    };
    Ok(resp)
}

/// Unwrap an accepted stream. On error, pause before the next `accept`:
/// errors such as EMFILE persist until a connection closes.
async fn accepted<T>(result: std::io::Result<(T, SocketAddr)>) -> Option<T> {
    match result {
        Ok((stream, _)) => Some(stream),
        Err(e) => {
            warn!(error = %e, "failed to accept connection");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

pub async fn serve(
    listener: TcpListener,
    tx: mpsc::Sender<FlushRequest>,
    status: StatusReporter,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let Some(stream) = accepted(result).await else {
                    continue;
                };
                let tx = tx.clone();
                let status = status.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        handle(req, tx.clone(), status.clone())
                    });
                    let _ = Builder::new(hyper_util::rt::TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
            _ = cancel.cancelled() => {
                break;
            }
        }
    }
}
