//! Log output setup for the `certmint` binary.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects `debug` over
/// `info`. Fails if a subscriber is already installed.
pub fn init_logging(verbose: bool, format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let default_level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
}
