//! Logging and metrics for overlay nodes.

mod args;
mod logging;
mod prometheus;

pub use args::LogArgs;
pub use logging::{build_filter, initialize_logging};
pub use prometheus::{MetricsArgs, initialize_metrics, install_prometheus_exporter};
