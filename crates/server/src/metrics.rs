use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use ragd_protocol::{ApiError, Result};

/// Prometheus exposition for the API surface.
pub struct Metrics {
    registry: Registry,
    pub requests: IntCounterVec,
    pub request_duration: HistogramVec,
    pub searches: IntCounterVec,
    pub active_index_jobs: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("ragd_requests_total", "API requests by endpoint and status"),
            &["endpoint", "status"],
        )
        .map_err(|e| ApiError::Configuration(e.to_string()))?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("ragd_request_duration_seconds", "Request latency by endpoint"),
            &["endpoint"],
        )
        .map_err(|e| ApiError::Configuration(e.to_string()))?;
        let searches = IntCounterVec::new(
            Opts::new("ragd_searches_total", "Search calls by mode"),
            &["mode"],
        )
        .map_err(|e| ApiError::Configuration(e.to_string()))?;
        let active_index_jobs = IntGauge::new(
            "ragd_active_index_jobs",
            "Indexing jobs currently running",
        )
        .map_err(|e| ApiError::Configuration(e.to_string()))?;

        registry
            .register(Box::new(requests.clone()))
            .and_then(|_| registry.register(Box::new(request_duration.clone())))
            .and_then(|_| registry.register(Box::new(searches.clone())))
            .and_then(|_| registry.register(Box::new(active_index_jobs.clone())))
            .map_err(|e| ApiError::Configuration(e.to_string()))?;

        Ok(Self {
            registry,
            requests,
            request_duration,
            searches,
            active_index_jobs,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            log::error!("metrics encoding failed: {err}");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
