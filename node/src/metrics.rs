//! # Prometheus Metrics
//!
//! Operational metrics for the registry node, scraped at the `/metrics`
//! HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so
//! they do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it can
/// be shared across request handlers.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total number of students registered (single and batch).
    pub students_registered_total: IntCounter,
    /// Total number of documents signed (tokens minted).
    pub documents_signed_total: IntCounter,
    /// Total number of document revocations.
    pub documents_revoked_total: IntCounter,
    /// Total number of document reactivations.
    pub documents_reactivated_total: IntCounter,
    /// Total number of ownership token transfers.
    pub tokens_transferred_total: IntCounter,
    /// Current number of active students.
    pub active_students: IntGauge,
    /// Current size of the manager set.
    pub managers: IntGauge,
    /// Histogram of document signing latency in seconds.
    pub sign_duration_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("tessera".into()), None)
            .expect("failed to create prometheus registry");

        let students_registered_total = IntCounter::new(
            "students_registered_total",
            "Total number of students registered",
        )
        .expect("metric creation");
        registry
            .register(Box::new(students_registered_total.clone()))
            .expect("metric registration");

        let documents_signed_total = IntCounter::new(
            "documents_signed_total",
            "Total number of documents signed and tokenized",
        )
        .expect("metric creation");
        registry
            .register(Box::new(documents_signed_total.clone()))
            .expect("metric registration");

        let documents_revoked_total = IntCounter::new(
            "documents_revoked_total",
            "Total number of document revocations",
        )
        .expect("metric creation");
        registry
            .register(Box::new(documents_revoked_total.clone()))
            .expect("metric registration");

        let documents_reactivated_total = IntCounter::new(
            "documents_reactivated_total",
            "Total number of document reactivations",
        )
        .expect("metric creation");
        registry
            .register(Box::new(documents_reactivated_total.clone()))
            .expect("metric registration");

        let tokens_transferred_total = IntCounter::new(
            "tokens_transferred_total",
            "Total number of ownership token transfers",
        )
        .expect("metric creation");
        registry
            .register(Box::new(tokens_transferred_total.clone()))
            .expect("metric registration");

        let active_students =
            IntGauge::new("active_students", "Current number of active students")
                .expect("metric creation");
        registry
            .register(Box::new(active_students.clone()))
            .expect("metric registration");

        let managers = IntGauge::new("managers", "Current size of the manager set")
            .expect("metric creation");
        registry
            .register(Box::new(managers.clone()))
            .expect("metric registration");

        let sign_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sign_duration_seconds",
                "End-to-end document signing latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(sign_duration_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            students_registered_total,
            documents_signed_total,
            documents_revoked_total,
            documents_reactivated_total,
            tokens_transferred_total,
            active_students,
            managers,
            sign_duration_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
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
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
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
