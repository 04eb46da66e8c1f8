use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Diagnostics go to stderr so that
/// command output (stack paths, tokens) stays clean on stdout.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
