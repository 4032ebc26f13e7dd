use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. Filter comes from `RUST_LOG`, default `info`.
///
/// Output goes to stderr: stdout carries the IPC responses.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false)
        .try_init();
}
