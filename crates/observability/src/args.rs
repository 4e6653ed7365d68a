//! Logging CLI arguments.

use clap::Args;
use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Debug, Args, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Logging")]
#[serde(default)]
pub struct LogArgs {
    /// Silence all output but errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    #[serde(skip)]
    pub verbosity: u8,

    /// Log filter directive (e.g., "overlay_net_peer=trace").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json")]
    pub json: bool,
}

impl LogArgs {
    /// Level used when `RUST_LOG` is unset.
    pub fn base_level(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        log: LogArgs,
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from(["overlay", "-vv", "--log.json", "--log.filter", "tokio=warn"])
            .unwrap();

        assert_eq!(cli.log.verbosity, 2);
        assert!(cli.log.json);
        assert_eq!(cli.log.filter.as_deref(), Some("tokio=warn"));
        assert_eq!(cli.log.base_level(), "trace");
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["overlay"]).unwrap();
        assert_eq!(cli.log, LogArgs::default());
        assert_eq!(cli.log.base_level(), "info");
    }

    #[test]
    fn test_verbosity_not_read_from_config() {
        let args: LogArgs = toml::from_str("json = true\nverbosity = 3").unwrap();
        assert!(args.json);
        assert_eq!(args.verbosity, 0);
    }
}
