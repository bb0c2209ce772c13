//! Order Fraud Graph Pipeline - Main Entry Point
//!
//! `train` builds the order graph from CSV tables, trains the encoder and
//! evaluates it. `serve` loads the best checkpoint, consumes orders from NATS
//! and publishes a score for each one.

use anyhow::{bail, Context, Result};
use candle_core::Device;
use fraud_graph_pipeline::{
    config::AppConfig,
    consumer::{handle_payload, OrderConsumer},
    graph::{build, split},
    loader::Tables,
    metrics::{MetricsReporter, ScoringMetrics},
    models::{checkpoint, FraudScorer},
    producer::ScoreProducer,
    synthetic::{self, SyntheticConfig},
    training::{Trainer, TrainingReport},
    types::OrderRecord,
};
use futures::StreamExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("train");
    let config = match args.get(2) {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load().unwrap_or_else(|e| {
            eprintln!("Using default configuration: {:#}", e);
            AppConfig::default()
        }),
    };

    init_logging(&config);
    info!(command = command, "Starting Order Fraud Graph Pipeline");

    match command {
        "train" => {
            tokio::task::spawn_blocking(move || train(&config))
                .await
                .context("Training task panicked")?
        }
        "serve" => serve(config).await,
        other => bail!("Unknown command '{}', expected 'train' or 'serve'", other),
    }
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn train(config: &AppConfig) -> Result<()> {
    let tables = load_or_generate(config)?;
    let graph = build(&tables).context("Failed to build order graph")?;
    let (graph, split_report) = split(graph, &config.graph)?;
    if split_report.is_degraded() {
        warn!(missing = ?split_report.missing_positives, "Split has partitions without fraud");
    }

    if let Some(parent) = config.training.checkpoint_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let trainer = Trainer::new(&graph, &config.model, &config.training, &Device::Cpu)?;
    let (report, encoder) = trainer.run()?;

    let report_path = report_path(&report.checkpoint_path);
    fs::write(&report_path, serde_json::to_vec_pretty(&report)?)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    info!(
        path = %report_path.display(),
        roc_auc = report.test.roc_auc,
        average_precision = report.test.average_precision,
        f1 = report.test.f1,
        "Training report written"
    );

    let threshold = resolve_threshold(config, Some(&report));
    let scorer = FraudScorer::from_encoder(encoder, threshold);
    let demo = OrderRecord::new(999_999i64);
    let response = scorer.score(&demo);
    info!(
        order_id = %response.order_id,
        fraud_probability = ?response.fraud_probability,
        is_fraud = ?response.is_fraud,
        "Demo order scored"
    );
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn load_or_generate(config: &AppConfig) -> Result<Tables> {
    let dir = &config.data.data_dir;
    if Tables::present_in(dir) {
        info!(dir = %dir.display(), "Loading tables");
        return Ok(Tables::load_dir(dir)?);
    }
    if !config.data.generate_if_missing {
        bail!("No users/orders/payments CSV files in {}", dir.display());
    }
    info!(dir = %dir.display(), "No tables found, generating synthetic data");
    Ok(synthetic::write_csv_dir(&SyntheticConfig::default(), dir)?)
}

/// Training report stored next to its checkpoint.
fn report_path(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension("report.json")
}

fn resolve_threshold(config: &AppConfig, report: Option<&TrainingReport>) -> f64 {
    match report {
        Some(report) if config.detection.use_learned_threshold => {
            if report.test.is_degraded() {
                warn!(status = ?report.test.status, "Learned threshold is a fallback value");
            }
            report.test.threshold
        }
        _ => config.detection.threshold,
    }
}

fn read_report(path: &Path) -> Option<TrainingReport> {
    let bytes = fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable training report");
            None
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let checkpoint = &checkpoint::resolve(&config.training.checkpoint_path)?;
    info!(path = %checkpoint.display(), "Resolved model checkpoint");
    let report = if config.detection.use_learned_threshold {
        read_report(&report_path(checkpoint))
    } else {
        None
    };
    let threshold = resolve_threshold(&config, report.as_ref());
    let scorer = Arc::new(
        FraudScorer::load(checkpoint, threshold)
            .with_context(|| format!("Failed to load model from {}", checkpoint.display()))?,
    );

    let metrics = Arc::new(ScoringMetrics::new());

    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = OrderConsumer::new(client.clone(), &config.nats.order_subject);
    let producer = Arc::new(ScoreProducer::new(client.clone(), &config.nats.score_subject));
    info!(
        workers = config.pipeline.workers,
        orders = consumer.subject(),
        scores = producer.subject(),
        threshold = threshold,
        "Starting scoring loop"
    );

    let semaphore = Arc::new(Semaphore::new(config.pipeline.workers.max(1)));
    let processed = Arc::new(AtomicU64::new(0));

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.report_interval_secs);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;
    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let scorer = scorer.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();
        let processed = processed.clone();

        tokio::spawn(async move {
            let start = Instant::now();
            let response = handle_payload(&scorer, &message.payload);
            let elapsed = start.elapsed();
            metrics.record(elapsed, &response);
            producer.deliver(message.reply, &response).await;

            debug!(
                order_id = %response.order_id,
                fraud_probability = ?response.fraud_probability,
                error = ?response.error,
                latency_us = elapsed.as_micros(),
                "Order handled"
            );

            let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                info!(
                    processed = count,
                    throughput = format!("{:.1} orders/s", metrics.throughput()),
                    avg_latency_us = metrics.latency_stats().mean_us,
                    "Processing milestone"
                );
            }
            drop(permit);
        });
    }

    info!("Subscription closed, shutting down");
    metrics.print_summary();
    Ok(())
}
