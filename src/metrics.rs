use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::errors::ErrorCategory;

/// Prometheus metrics for one run, registered in their own registry.
#[derive(Clone)]
pub struct LoadMetrics {
    registry: Registry,

    pub requests_total: IntCounter,
    pub good_requests_total: IntCounter,
    pub request_errors_by_category: IntCounterVec,
    pub response_bytes_total: IntCounter,
    pub request_duration_seconds: Histogram,
    pub active_concurrency: IntGauge,
    pub target_concurrency: IntGauge,
}

impl LoadMetrics {
    /// Create and register all metrics under `namespace`.
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests made").namespace(namespace),
        )?;

        let good_requests_total = IntCounter::with_opts(
            Opts::new(
                "good_requests_total",
                "Requests with a 2xx status that finished within the SLA",
            )
            .namespace(namespace),
        )?;

        let request_errors_by_category = IntCounterVec::new(
            Opts::new(
                "request_errors_by_category_total",
                "Failed requests and non-2xx/3xx responses by error category",
            )
            .namespace(namespace),
            &["category"],
        )?;

        let response_bytes_total = IntCounter::with_opts(
            Opts::new("response_bytes_total", "Response body bytes drained").namespace(namespace),
        )?;

        let request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds, errors included.",
            )
            .namespace(namespace),
        )?;

        let active_concurrency = IntGauge::with_opts(
            Opts::new(
                "active_concurrency",
                "Number of workers currently allowed to send requests",
            )
            .namespace(namespace),
        )?;

        let target_concurrency = IntGauge::with_opts(
            Opts::new(
                "target_concurrency",
                "Demand profile target after jitter, before clamping to the pool",
            )
            .namespace(namespace),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(good_requests_total.clone()))?;
        registry.register(Box::new(request_errors_by_category.clone()))?;
        registry.register(Box::new(response_bytes_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(active_concurrency.clone()))?;
        registry.register(Box::new(target_concurrency.clone()))?;

        // Every category is exported from the start, at zero.
        for category in ErrorCategory::all() {
            request_errors_by_category.with_label_values(&[category.label()]);
        }

        Ok(Self {
            registry,
            requests_total,
            good_requests_total,
            request_errors_by_category,
            response_bytes_total,
            request_duration_seconds,
            active_concurrency,
            target_concurrency,
        })
    }

    pub fn record_error(&self, category: ErrorCategory) {
        self.request_errors_by_category
            .with_label_values(&[category.label()])
            .inc();
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn gather_string(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
            return String::from("# ERROR ENCODING METRICS");
        }
        String::from_utf8(buffer).unwrap_or_else(|e| {
            error!(error = %e, "Metrics output was not UTF-8");
            String::from("# ERROR ENCODING METRICS TO UTF-8")
        })
    }
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    metrics: Arc<LoadMetrics>,
) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    let body = metrics.gather_string();

    let mut response = Response::new(Body::from(body));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, metrics: Arc<LoadMetrics>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let metrics = metrics.clone();
                async move { metrics_handler(req, metrics).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}
