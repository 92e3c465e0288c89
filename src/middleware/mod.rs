pub mod logging;
pub mod metrics;

pub use logging::RequestTrace;
pub use metrics::MetricsCollector;
