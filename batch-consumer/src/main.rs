//! Consume a topic in batches and log a summary of each one.
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{routing::get, Router};
use futures::future::ready;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use batch_consumer::config::Config;
use batch_consumer::{Batch, BatchProcessor, JsonDecoder, KafkaBatchConsumer};

struct BatchLogger;

#[async_trait]
impl BatchProcessor<Value> for BatchLogger {
    async fn process_batch(&self, batch: Batch<Value>) -> Result<()> {
        let objects = batch.values().iter().filter(|v| v.is_object()).count();
        let Some(last) = batch.last_message() else {
            return Ok(());
        };

        info!(
            topic = last.topic(),
            partition = last.partition_number(),
            first_offset = ?batch.first_offset(),
            last_offset = last.offset(),
            message_count = batch.len(),
            objects,
            "Processed batch"
        );
        Ok(())
    }
}

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .context("invalid histogram buckets")?
        .install_recorder()
        .context("failed to install metrics recorder")
}

pub async fn index() -> &'static str {
    "batch consumer"
}

fn start_server(config: &Config, recorder: PrometheusHandle) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(|| ready("ok")))
        .route("/metrics", get(move || ready(recorder.render())));

    let bind = config.bind_address();

    tokio::task::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Failed to bind metrics server on {bind}: {e}");
                return;
            }
        };
        if let Err(e) = axum::serve(listener, router).await {
            warn!("Metrics server stopped: {e}");
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("Starting batch consumer");

    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;
    info!("Configuration loaded: {:?}", config);

    let batch_config = config.batch_config()?;
    let recorder = setup_metrics_recorder()?;
    let server_handle = start_server(&config, recorder);
    info!("Started metrics server on {}", config.bind_address());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, stopping consumer");
        }
        signal_token.cancel();
    });

    let consumer = KafkaBatchConsumer::new(
        &config.consumer_config(),
        &config.kafka_consumer_topic,
        batch_config,
        JsonDecoder::<Value>::new(),
        Arc::new(BatchLogger),
        shutdown,
    )
    .context("Failed to create Kafka consumer")?;

    // Run until shutdown or a batch fails; a failure exits non-zero so the
    // orchestrator restarts us and the uncommitted batch is consumed again.
    let result = consumer.run().await;

    server_handle.abort();

    result.context("Batch consumer stopped with an error")
}
