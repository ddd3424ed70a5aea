use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use log::{error, info};
use prometheus::{IntCounter, Opts, Registry, TextEncoder};

/// Pipeline counters, registered in a registry owned by the run.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub packets: IntCounter,
    pub records: IntCounter,
    pub skipped: IntCounter,
    pub dropped: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            packets: counter(
                "featsniff_packets_total",
                "packets handed to the feature pipeline",
            )?,
            records: counter("featsniff_records_total", "feature records written")?,
            skipped: counter(
                "featsniff_skipped_total",
                "packets without a TCP/IPv4 layer",
            )?,
            dropped: counter(
                "featsniff_dropped_total",
                "live packets dropped because the pipeline fell behind",
            )?,
            registry,
        })
    }

    /// Renders all counters in the prometheus text format.
    pub fn export(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

async fn export(State(metrics): State<Metrics>) -> Result<String, StatusCode> {
    metrics.export().map_err(|e| {
        error!("failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Serves `GET /metrics` on `addr` until the task is dropped.
pub async fn serve(addr: SocketAddr, metrics: Metrics) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(export))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("serving metrics on http://{}/metrics", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
