//! Prometheus exporter for the `metrics` facade.

use std::net::SocketAddr;

use clap::Args;
use eyre::eyre;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Metrics configuration.
#[derive(Debug, Args, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Metrics")]
#[serde(default)]
pub struct MetricsArgs {
    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics", value_name = "ADDR")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,
}

/// Install the global Prometheus recorder and serve it on `listen`.
///
/// Must be called within a tokio runtime. Counters recorded before this call
/// are lost.
pub fn install_prometheus_exporter(listen: SocketAddr) -> eyre::Result<PrometheusHandle> {
    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(listen).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|_| eyre!("a global metrics recorder is already installed"))?;

    tokio::spawn(async move {
        if let Err(error) = exporter.await {
            warn!(?error, "Prometheus exporter stopped");
        }
    });
    info!(%listen, "Serving Prometheus metrics");
    Ok(handle)
}

/// Install the exporter if `args` asks for one.
pub fn initialize_metrics(args: &MetricsArgs) -> eyre::Result<Option<PrometheusHandle>> {
    args.listen.map(install_prometheus_exporter).transpose()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        metrics: MetricsArgs,
    }

    #[test]
    fn test_parse_listen_address() {
        let cli = Cli::try_parse_from(["overlay", "--metrics", "127.0.0.1:9100"]).unwrap();
        assert_eq!(cli.metrics.listen, Some("127.0.0.1:9100".parse().unwrap()));

        let cli = Cli::try_parse_from(["overlay"]).unwrap();
        assert_eq!(cli.metrics, MetricsArgs::default());
    }

    #[tokio::test]
    async fn test_recorded_counters_are_rendered() {
        let handle = initialize_metrics(&MetricsArgs {
            listen: Some("127.0.0.1:0".parse().unwrap()),
        })
        .unwrap()
        .unwrap();

        metrics::counter!("peer.teardowns_total").increment(2);
        assert!(handle.render().contains("peer_teardowns_total 2"));

        // The recorder is process-wide.
        assert!(install_prometheus_exporter("127.0.0.1:0".parse().unwrap()).is_err());
    }
}
