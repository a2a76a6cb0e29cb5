//! Tracing subscriber setup, split out of `main` so handlers can stay
//! free of process-wide init concerns.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Installs a stderr subscriber honoring `RUST_LOG`, defaulting to `info`
/// for this crate and `devrig_core` and `warn` for everything else.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,devrig_cli=info,devrig_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .init();
}
