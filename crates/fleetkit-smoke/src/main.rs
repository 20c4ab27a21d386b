//! FleetKit Smoke Harness
//!
//! Runs one worker generation against the live network: install, activate,
//! then request each URL through the fetch handler and print a JSON
//! summary of where every response came from.
//!
//! ```text
//! fleetkit-smoke [--config PATH] [--snapshot PATH] [--json-logs] URL...
//! ```
//!
//! With `--snapshot`, stores are loaded from the file when it exists and
//! written back afterwards, so dynamic and API entries carry over between
//! runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use fleetkit_common::{init_logging, LogConfig, LogFormat};
use fleetkit_net::{LoaderConfig, Request, ResourceLoader};
use fleetkit_sw::{ControlReply, FetchOutcome, ServiceWorker, SwConfig, WorkerEvent};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Parse command line arguments
struct Args {
    config: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    json_logs: bool,
    urls: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut snapshot = None;
        let mut json_logs = false;
        let mut urls = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config = args.next().map(PathBuf::from);
                }
                "--snapshot" => {
                    snapshot = args.next().map(PathBuf::from);
                }
                "--json-logs" => {
                    json_logs = true;
                }
                flag if flag.starts_with("--") => {
                    eprintln!("Warning: ignoring unknown flag {flag}");
                }
                _ => urls.push(arg),
            }
        }

        Self {
            config,
            snapshot,
            json_logs,
            urls,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_logging(
        LogConfig::default()
            .with_format(format)
            .with_filter("fleetkit_sw=info,fleetkit_smoke=info,warn"),
    );

    let config = match &args.config {
        Some(path) => SwConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SwConfig::default(),
    };

    let loader = ResourceLoader::new(LoaderConfig::default())?;
    let (worker, mut events) = ServiceWorker::new(config, Arc::new(loader))?;

    if let Some(path) = &args.snapshot {
        if path.exists() {
            worker
                .caches()
                .load_snapshot(path)
                .await
                .with_context(|| format!("loading snapshot {}", path.display()))?;
            info!(path = %path.display(), "Loaded store snapshot");
        }
    }

    let install_started = Instant::now();
    worker.on_install().await.context("install failed")?;
    worker.on_activate().await?;
    let install_ms = elapsed_ms(install_started);

    let mut requests = Vec::new();
    for raw in &args.urls {
        let url = match worker.config().resolve(raw) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %raw, error = %e, "Skipping URL");
                continue;
            }
        };
        let request = if url.path().ends_with('/') || !url.path().contains('.') {
            Request::navigate(url)
        } else {
            Request::get(url)
        };
        let category = worker.classifier().classify(&request);

        let started = Instant::now();
        let outcome = worker.on_fetch(request).await;
        let elapsed = elapsed_ms(started);

        let entry = match outcome {
            FetchOutcome::Passthrough => json!({
                "url": raw,
                "handled": false,
                "elapsed_ms": elapsed,
            }),
            FetchOutcome::Respond(served) => json!({
                "url": raw,
                "handled": true,
                "category": category.map(|c| format!("{c:?}")),
                "status": served.response.status.as_u16(),
                "source": format!("{:?}", served.source),
                "bytes": served.response.body.len(),
                "elapsed_ms": elapsed,
            }),
        };
        requests.push(entry);
    }

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    worker
        .on_message(&json!({"type": "GET_CACHE_INFO"}), Some(&reply_tx))
        .await;
    let cache_info = match reply_rx.recv().await {
        Some(reply @ ControlReply::CacheInfo(_)) => serde_json::to_value(reply)?,
        _ => serde_json::Value::Null,
    };

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::StateChange { new_state, .. } = event {
            transitions.push(format!("{new_state:?}"));
        }
    }

    if let Some(path) = &args.snapshot {
        worker
            .caches()
            .save_snapshot(path)
            .await
            .with_context(|| format!("saving snapshot {}", path.display()))?;
        info!(path = %path.display(), "Saved store snapshot");
    }

    let summary = json!({
        "version": worker.generation().version(),
        "install_ms": install_ms,
        "states": transitions,
        "requests": requests,
        "caches": cache_info,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}
