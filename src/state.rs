//! # Application State
//!
//! Shared state handed to every request handler and WebSocket actor: the
//! runtime configuration, request metrics, the peer/room registry, the
//! transcription manager, and the external gateway clients.
//!
//! Mutable pieces use `Arc<RwLock<..>>`; critical sections are short and
//! never held across an await, so plain std locks are sufficient even
//! though handlers are async.

use crate::config::AppConfig;
use crate::rooms::Registry;
use crate::sfu::SfuClient;
use crate::storage::TranscriptStore;
use crate::transcription::{AiGateway, TranscriptionManager};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Shared application state. Cloning is cheap; every field is an Arc (or
/// Copy, for the start time).
#[derive(Clone)]
pub struct AppState {
    /// Runtime-updatable configuration.
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP request counters, updated by middleware.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (for uptime reporting).
    pub start_time: Instant,

    /// Authoritative peer/room membership.
    pub registry: Arc<RwLock<Registry>>,

    /// Per-room transcription lifecycle and segmenters.
    pub transcription: Arc<TranscriptionManager>,

    /// Generative AI gateway (assistant queries go through here directly;
    /// the transcription manager holds its own handle).
    pub ai: Arc<dyn AiGateway>,

    /// Persistence gateway for sessions/transcripts/summaries.
    pub store: Arc<dyn TranscriptStore>,

    /// SFU session negotiation client.
    pub sfu: Arc<SfuClient>,
}

/// Request metrics collected across all HTTP traffic.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Per-endpoint statistics, keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint counters.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<RwLock<Registry>>,
        transcription: Arc<TranscriptionManager>,
        ai: Arc<dyn AiGateway>,
        store: Arc<dyn TranscriptStore>,
        sfu: Arc<SfuClient>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            registry,
            transcription,
            ai,
            store,
            sfu,
        }
    }

    /// Copy of the current configuration; cloning releases the read lock
    /// immediately instead of holding it through the caller's work.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// Record one finished request against its endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Snapshot of metrics for the health/metrics endpoints. Cloned so no
    /// lock is held while the HTTP response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Live gauges derived from the registry and transcription manager.
    pub fn connected_peers(&self) -> usize {
        self.registry.read().unwrap().peer_count()
    }

    pub fn occupied_rooms(&self) -> usize {
        self.registry.read().unwrap().occupied_room_count()
    }

    pub fn active_transcriptions(&self) -> usize {
        self.transcription.active_count()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metric_math() {
        let metric = EndpointMetric {
            request_count: 10,
            total_duration_ms: 500,
            error_count: 2,
        };
        assert_eq!(metric.average_duration_ms(), 50.0);
        assert_eq!(metric.error_rate(), 0.2);

        let empty = EndpointMetric::default();
        assert_eq!(empty.average_duration_ms(), 0.0);
        assert_eq!(empty.error_rate(), 0.0);
    }
}
