//! Eleganto Smoke Harness
//!
//! Installs and activates the offline worker against a live origin, resolves
//! a list of paths through it and prints a JSON summary. With `--sync` it
//! also replays whatever the submission queue holds.
//!
//! ```text
//! eleganto-smoke [--config worker.json] [--log-format json] [--memory-queue]
//!                [--sync] [--perf-output perf.json] [--navigate /about.html] /styles/main.css ...
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use eleganto_common::{init_logging, LogConfig, LogFormat};
use eleganto_net::{HttpFetcher, LoaderConfig, Request};
use eleganto_queue::{MemorySubmissionStore, SqliteSubmissionStore, SubmissionStore};
use eleganto_sw::{FetchOutcome, OfflineWorker, WorkerConfig, WorkerEvent};
use serde_json::json;
use tracing::{error, info};

/// Performance timing collector for tracking operation durations.
struct PerfTiming {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn new() -> Self {
        Self {
            timings: HashMap::new(),
        }
    }

    fn record(&mut self, operation: &'static str, duration: Duration) {
        self.timings.entry(operation).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();

        for (op, durations) in &self.timings {
            if durations.is_empty() {
                continue;
            }

            let millis: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let count = millis.len();
            let total_ms: f64 = millis.iter().sum();
            let min_ms = millis.iter().copied().fold(f64::INFINITY, f64::min);
            let max_ms = millis.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            summary.insert(
                op.to_string(),
                json!({
                    "count": count,
                    "total_ms": round2(total_ms),
                    "avg_ms": round2(total_ms / count as f64),
                    "min_ms": round2(min_ms),
                    "max_ms": round2(max_ms),
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse command line arguments
struct Args {
    config: Option<String>,
    log_format: LogFormat,
    memory_queue: bool,
    sync: bool,
    perf_output: Option<String>,
    requests: Vec<(String, bool)>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut log_format = LogFormat::Compact;
        let mut memory_queue = false;
        let mut sync = false;
        let mut perf_output = None;
        let mut requests = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config = args.next();
                }
                "--log-format" => {
                    if let Some(val) = args.next() {
                        log_format = val.parse().unwrap_or(LogFormat::Compact);
                    }
                }
                "--memory-queue" => {
                    memory_queue = true;
                }
                "--sync" => {
                    sync = true;
                }
                "--perf-output" => {
                    perf_output = args.next();
                }
                "--navigate" => {
                    if let Some(path) = args.next() {
                        requests.push((path, true));
                    }
                }
                _ => requests.push((arg, false)),
            }
        }

        Self {
            config,
            log_format,
            memory_queue,
            sync,
            perf_output,
            requests,
        }
    }
}

fn open_queue(config: &WorkerConfig, in_memory: bool) -> Result<Arc<dyn SubmissionStore>> {
    if in_memory {
        return Ok(Arc::new(MemorySubmissionStore::new()));
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let store = SqliteSubmissionStore::open(config.queue_path())
        .with_context(|| format!("opening {}", config.queue_path().display()))?;
    Ok(Arc::new(store))
}

fn outcome_json(path: &str, navigate: bool, outcome: &FetchOutcome, elapsed: Duration) -> serde_json::Value {
    let elapsed_ms = round2(elapsed.as_secs_f64() * 1000.0);
    match outcome {
        FetchOutcome::Passthrough => json!({
            "path": path,
            "navigate": navigate,
            "outcome": "passthrough",
            "elapsed_ms": elapsed_ms,
        }),
        FetchOutcome::Respond(resolved) => json!({
            "path": path,
            "navigate": navigate,
            "outcome": "respond",
            "source": format!("{:?}", resolved.source).to_lowercase(),
            "status": resolved.response.status.as_u16(),
            "bytes": resolved.response.bytes().len(),
            "elapsed_ms": elapsed_ms,
        }),
        FetchOutcome::NetworkError(message) => json!({
            "path": path,
            "navigate": navigate,
            "outcome": "network_error",
            "error": message,
            "elapsed_ms": elapsed_ms,
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LogConfig::default().with_format(args.log_format));

    let config = match args.config {
        Some(ref path) => WorkerConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => WorkerConfig::default(),
    };
    info!(origin = %config.origin, version = config.cache_version, "Starting smoke run");

    let fetcher = HttpFetcher::new(LoaderConfig {
        timeout: config.fetch_timeout(),
        ..Default::default()
    })?;
    let queue = open_queue(&config, args.memory_queue)?;
    let (worker, mut events) = OfflineWorker::new(config.clone(), Arc::new(fetcher), queue)?;

    let mut perf = PerfTiming::new();

    let start = Instant::now();
    let (worker_id, activation) = worker.install().await?;
    perf.record("install", start.elapsed());
    info!(worker = worker_id.raw(), "Worker installed");

    let mut results = Vec::new();
    for (path, navigate) in &args.requests {
        let url = match config.resolve(path) {
            Ok(url) => url,
            Err(e) => {
                error!(path = %path, error = %e, "Skipping unresolvable path");
                continue;
            }
        };
        let request = if *navigate {
            Request::navigate(url)
        } else {
            Request::get(url)
        };

        let start = Instant::now();
        let outcome = worker.handle_fetch(&request).await;
        let elapsed = start.elapsed();
        perf.record("fetch", elapsed);
        results.push(outcome_json(path, *navigate, &outcome, elapsed));
    }

    let start = Instant::now();
    worker.wait_for_background().await;
    perf.record("revalidate", start.elapsed());

    let sync = if args.sync {
        let start = Instant::now();
        let report = worker.handle_sync(&config.sync_tag).await?;
        perf.record("sync", start.elapsed());
        Some(report)
    } else {
        None
    };

    let mut cache_summary = serde_json::Map::new();
    for name in worker.caches().keys().await {
        let count = worker.caches().entry_count(&name).await;
        cache_summary.insert(name, json!(count));
    }

    worker.terminate().await;

    let mut event_count = 0usize;
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::CacheDeleted { ref name } = event {
            info!(cache = %name, "Cache deleted during activation");
        }
        event_count += 1;
    }

    let summary = json!({
        "origin": config.origin.as_str(),
        "activation": activation,
        "requests": results,
        "caches": cache_summary,
        "sync": sync,
        "events": event_count,
        "perf": perf.summary(),
    });

    if let Some(ref perf_path) = args.perf_output {
        std::fs::write(perf_path, perf.summary().to_string())
            .with_context(|| format!("writing {}", perf_path))?;
        info!(?perf_path, "Perf summary written");
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
