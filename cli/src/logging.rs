use tracing_subscriber::EnvFilter;

/// Parse a filter directive, falling back to `warn` when it is malformed.
fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|err| {
        eprintln!("Warning: ignoring invalid log filter '{directive}': {err}");
        EnvFilter::new("warn")
    })
}

/// Install the global subscriber. Logs go to stderr so `--json` output on
/// stdout stays machine-readable.
pub fn init(directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(directive))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
