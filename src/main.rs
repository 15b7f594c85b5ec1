mod buffers;
mod config;
mod encoder;
mod event_loop;
mod key_name;
mod listener;
mod pipeline;
mod snapshot;
mod status;
mod store;
mod uploader;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use event_loop::EventLoop;
use key_name::TimestampRangeKey;
use pipeline::{Pipeline, PipelineOptions};
use status::SharedState;
use store::{DryRunStore, ObjectStore, s3::S3Client};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Exceptional init failure: log and exit.
fn fatal(msg: &str, error: &dyn std::fmt::Display) -> ! {
    error!(%error, "{msg}");
    std::process::exit(1);
}

fn setup_logging(debug: bool) {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;

    let default = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let level = std::env::var("S3_METRICS_RELAY_LOG_LEVEL")
        .ok()
        .and_then(|val| {
            val.parse::<LevelFilter>().ok().or_else(|| {
                eprintln!("invalid S3_METRICS_RELAY_LOG_LEVEL: {val:?}, defaulting to {default}");
                None
            })
        })
        .unwrap_or(default);

    tracing_subscriber::registry()
        .with(level)
        .with(tracing_microjson::JsonLayer::new(std::io::stderr).with_target(true))
        .init();
}

fn setup_rustls() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls ring provider");
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn forward_signals(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => fatal("failed to install SIGTERM handler", &e),
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    token.cancel();
}

async fn run<S: ObjectStore>(config: &config::Config, store: S) {
    let state = SharedState::new(status::unix_now());
    let pipeline = Pipeline::new(
        &PipelineOptions::from(config),
        Arc::new(store),
        TimestampRangeKey::new(config.key_prefix.clone()),
        state,
    );

    let mut event_loop = EventLoop::new(pipeline, config.listener_port)
        .await
        .unwrap_or_else(|e| fatal("failed to start event loop", &e));
    info!(addr = %event_loop.local_addr(), "intake listener bound");
    tokio::spawn(forward_signals(event_loop.shutdown_token()));

    if let Err(e) = event_loop.run().await {
        fatal("runtime error", &e);
    }
}

#[tokio::main]
async fn main() {
    let config = config::Config::from_env();
    setup_logging(config.as_ref().is_ok_and(|c| c.debug));
    setup_rustls();

    let config = config.unwrap_or_else(|e| fatal("config error", &e));

    match (&config.credentials, config.no_upload) {
        (Some(credentials), false) => {
            let client = S3Client::new(&config, credentials)
                .unwrap_or_else(|e| fatal("failed to build S3 client", &e));
            run(&config, client).await;
        }
        (None, false) => fatal("config error", &"S3 credentials are required"),
        (_, true) => {
            info!("NO_UPLOAD set, batches will be discarded");
            run(&config, DryRunStore).await;
        }
    }
}
