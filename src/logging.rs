//! Tracing subscriber setup shared by every binary.

use crate::config::LogFormatter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Reads `RUST_LOG` (defaults to "info"). The output format follows `LOG_FORMATTER`.
pub fn init(formatter: LogFormatter) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    match formatter {
        LogFormatter::Json => builder.json().flatten_event(true).init(),
        LogFormatter::Brief => builder.compact().with_target(false).init(),
        LogFormatter::Console => builder.pretty().init(),
    }
}
