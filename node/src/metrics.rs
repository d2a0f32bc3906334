//! # Prometheus Metrics
//!
//! Operational metrics for the gateway, scraped by Prometheus at `/metrics`
//! on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `xrpgw` namespace so they do not collide with any default global
//! registry consumers.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Holds all Prometheus metric handles for the gateway.
///
/// Clone-friendly (prometheus handles are `Arc`s internally) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Operations built, by kind (`payment` or `simulated`).
    pub operations_built_total: IntCounterVec,
    /// Broadcasts that returned a transaction hash.
    pub broadcasts_total: IntCounter,
    /// Broadcasts that failed, by error code.
    pub broadcasts_failed_total: IntCounterVec,
    /// Same-owner transfers completed on the gateway's books.
    pub simulated_transfers_total: IntCounter,
    /// Ledger calls that failed at the transport or RPC level.
    pub ledger_errors_total: IntCounter,
    /// HTTP request latency by method and matched route.
    pub request_duration_seconds: HistogramVec,
}

fn register<M: Collector + Clone + 'static>(registry: &Registry, metric: M) -> M {
    registry
        .register(Box::new(metric.clone()))
        .expect("metric registration");
    metric
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("xrpgw".into()), None)
            .expect("failed to create prometheus registry");

        let operations_built_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("operations_built_total", "Operations built, by kind"),
                &["kind"],
            )
            .expect("metric creation"),
        );
        let broadcasts_total = register(
            &registry,
            IntCounter::new("broadcasts_total", "Broadcasts that returned a transaction hash")
                .expect("metric creation"),
        );
        let broadcasts_failed_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("broadcasts_failed_total", "Failed broadcasts, by error code"),
                &["error_code"],
            )
            .expect("metric creation"),
        );
        let simulated_transfers_total = register(
            &registry,
            IntCounter::new(
                "simulated_transfers_total",
                "Same-owner transfers completed without touching the ledger",
            )
            .expect("metric creation"),
        );
        let ledger_errors_total = register(
            &registry,
            IntCounter::new("ledger_errors_total", "Failed ledger calls")
                .expect("metric creation"),
        );
        let request_duration_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new("request_duration_seconds", "HTTP request latency in seconds")
                    .buckets(vec![
                        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                    ]),
                &["method", "route"],
            )
            .expect("metric creation"),
        );

        Self {
            registry,
            operations_built_total,
            broadcasts_total,
            broadcasts_failed_total,
            simulated_transfers_total,
            ledger_errors_total,
            request_duration_seconds,
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

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<GatewayMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

/// Middleware recording request latency per matched route.
pub async fn track_latency(
    State(metrics): State<SharedMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    metrics
        .request_duration_seconds
        .with_label_values(&[method.as_str(), route.as_str()])
        .observe(started.elapsed().as_secs_f64());
    response
}
