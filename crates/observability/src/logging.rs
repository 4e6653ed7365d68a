//! Subscriber setup.

use eyre::Result;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::args::LogArgs;

/// Build the event filter from `args`.
///
/// Precedence:
/// 1. `--quiet` shows errors only
/// 2. otherwise `RUST_LOG` if set, else the verbosity-derived level
/// 3. `--log.filter` directives are added on top
pub fn build_filter(args: &LogArgs) -> EnvFilter {
    if args.quiet {
        return EnvFilter::new("error");
    }

    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.base_level()));

    if let Some(custom) = &args.filter {
        // Invalid directives are skipped.
        for directive in custom.split(',') {
            if let Ok(directive) = directive.trim().parse() {
                filter = filter.add_directive(directive);
            }
        }
    }

    filter
}

/// Install the global tracing subscriber.
pub fn initialize_logging(args: &LogArgs) -> Result<()> {
    let stdout_layer = fmt::Layer::new().with_target(true);
    let stdout_layer = if args.json {
        stdout_layer.json().boxed()
    } else {
        stdout_layer.boxed()
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(build_filter(args))
        .try_init()?;

    Ok(())
}
