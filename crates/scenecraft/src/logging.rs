//! Subscriber setup for binaries.
//!
//! Output goes to stderr: a native-messaging host owns stdout for framed
//! messages. `log` records from the HTTP clients are bridged into tracing.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogFormat;

pub const DEFAULT_FILTER: &str = "info,scenecraft=debug";

/// Installs the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(format: LogFormat) {
    let _ = tracing_log::LogTracer::init();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = match format {
        LogFormat::Compact => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(false)
                    .compact(),
            ),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(true),
            ),
        ),
    };

    if result.is_ok() {
        tracing::debug!("Logging initialized ({:?})", format);
    }
}
