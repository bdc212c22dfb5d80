//! # Prometheus Metrics
//!
//! Operational metrics for the replica, scraped from `/metrics` on the
//! dedicated metrics port.
//!
//! All metrics live in their own [`prometheus::Registry`] so they never
//! collide with a default global registry consumer.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Registry that owns every metric below.
    registry: Registry,
    /// Total committed blocks applied by this replica (consensus,
    /// broadcast, or sync).
    pub blocks_applied_total: IntCounter,
    /// Total proof-carrying reads served.
    pub queries_served_total: IntCounter,
    /// Total writes accepted into consensus by this replica.
    pub writes_accepted_total: IntCounter,
    /// Total inbound consensus messages processed.
    pub consensus_messages_total: IntCounter,
    /// Height of the local chain tip.
    pub chain_height: IntGauge,
    /// Latency of serving a query (tree rebuild + proof), in seconds.
    pub query_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("vera".into()), None)
            .expect("failed to create prometheus registry");

        let blocks_applied_total = IntCounter::new(
            "blocks_applied_total",
            "Total committed blocks applied by this replica",
        )
        .expect("metric creation");
        registry
            .register(Box::new(blocks_applied_total.clone()))
            .expect("metric registration");

        let queries_served_total = IntCounter::new(
            "queries_served_total",
            "Total proof-carrying reads served",
        )
        .expect("metric creation");
        registry
            .register(Box::new(queries_served_total.clone()))
            .expect("metric registration");

        let writes_accepted_total = IntCounter::new(
            "writes_accepted_total",
            "Total writes accepted into consensus",
        )
        .expect("metric creation");
        registry
            .register(Box::new(writes_accepted_total.clone()))
            .expect("metric registration");

        let consensus_messages_total = IntCounter::new(
            "consensus_messages_total",
            "Total inbound consensus messages processed",
        )
        .expect("metric creation");
        registry
            .register(Box::new(consensus_messages_total.clone()))
            .expect("metric registration");

        let chain_height = IntGauge::new("chain_height", "Height of the local chain tip")
            .expect("metric creation");
        registry
            .register(Box::new(chain_height.clone()))
            .expect("metric registration");

        let query_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "query_latency_seconds",
                "Latency of serving a proof-carrying read in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(query_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            blocks_applied_total,
            queries_served_total,
            writes_accepted_total,
            consensus_messages_total,
            chain_height,
            query_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_encode() {
        let metrics = NodeMetrics::new();
        metrics.blocks_applied_total.inc();
        metrics.chain_height.set(7);

        let text = metrics.encode().unwrap();
        assert!(text.contains("vera_blocks_applied_total 1"));
        assert!(text.contains("vera_chain_height 7"));
    }
}
