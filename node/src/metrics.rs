//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the metrics
//! port. Everything is registered in a dedicated [`prometheus::Registry`]
//! prefixed `veilstream_`.
//!
//! Counters are fed from the contract's event log after every call, so a
//! rejected call never moves a success counter.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use veilstream_contracts::TokenEvent;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Successful `mint` calls.
    pub mints_total: IntCounter,
    /// Transfers recorded by the ledger, including stream settlements.
    pub transfers_total: IntCounter,
    pub streams_started_total: IntCounter,
    /// Withdrawals and cancellations.
    pub streams_settled_total: IntCounter,
    pub disclosures_requested_total: IntCounter,
    /// Oracle results handed back, whatever their outcome.
    pub disclosures_fulfilled_total: IntCounter,
    /// Calls that returned an error.
    pub rejected_operations_total: IntCounter,
    pub block_height: IntGauge,
    pub active_streams: IntGauge,
    pub pending_oracle_jobs: IntGauge,
    /// Wall time spent inside one contract call, lock wait included.
    pub operation_latency_seconds: Histogram,
}

fn register<M: Collector + Clone + 'static>(
    registry: &Registry,
    metric: M,
) -> Result<M, prometheus::Error> {
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("veilstream".into()), None)?;

        let mints_total = register(
            &registry,
            IntCounter::new("mints_total", "Total number of successful mints")?,
        )?;
        let transfers_total = register(
            &registry,
            IntCounter::new(
                "transfers_total",
                "Total number of encrypted transfers, stream settlements included",
            )?,
        )?;
        let streams_started_total = register(
            &registry,
            IntCounter::new("streams_started_total", "Total number of streams started")?,
        )?;
        let streams_settled_total = register(
            &registry,
            IntCounter::new(
                "streams_settled_total",
                "Total number of stream withdrawals and cancellations",
            )?,
        )?;
        let disclosures_requested_total = register(
            &registry,
            IntCounter::new(
                "disclosures_requested_total",
                "Total number of decryption jobs submitted to the oracle",
            )?,
        )?;
        let disclosures_fulfilled_total = register(
            &registry,
            IntCounter::new(
                "disclosures_fulfilled_total",
                "Total number of decryption results returned by the oracle",
            )?,
        )?;
        let rejected_operations_total = register(
            &registry,
            IntCounter::new(
                "rejected_operations_total",
                "Total number of contract calls that returned an error",
            )?,
        )?;
        let block_height = register(
            &registry,
            IntGauge::new("block_height", "Height of the latest block")?,
        )?;
        let active_streams = register(
            &registry,
            IntGauge::new("active_streams", "Number of streams currently accruing")?,
        )?;
        let pending_oracle_jobs = register(
            &registry,
            IntGauge::new(
                "pending_oracle_jobs",
                "Decryption jobs waiting in the local oracle queue",
            )?,
        )?;
        let operation_latency_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "operation_latency_seconds",
                    "Contract call latency in seconds",
                )
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0,
                ]),
            )?,
        )?;

        Ok(Self {
            registry,
            mints_total,
            transfers_total,
            streams_started_total,
            streams_settled_total,
            disclosures_requested_total,
            disclosures_fulfilled_total,
            rejected_operations_total,
            block_height,
            active_streams,
            pending_oracle_jobs,
            operation_latency_seconds,
        })
    }

    /// Bump the counters matching a batch of contract events.
    pub fn observe_events(&self, events: &[TokenEvent]) {
        for event in events {
            match event {
                TokenEvent::Mint { .. } => self.mints_total.inc(),
                TokenEvent::Transfer { .. } => self.transfers_total.inc(),
                TokenEvent::StreamStarted { .. } => self.streams_started_total.inc(),
                TokenEvent::StreamWithdrawn { .. } | TokenEvent::StreamCancelled { .. } => {
                    self.streams_settled_total.inc()
                }
                TokenEvent::DecryptionRequested { .. } => self.disclosures_requested_total.inc(),
                TokenEvent::Approval { .. }
                | TokenEvent::StreamCompleted { .. }
                | TokenEvent::BalanceRevealed { .. } => {}
            }
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
