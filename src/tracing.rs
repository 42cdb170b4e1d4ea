use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber shared by every entrypoint.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies. Source
/// locations are emitted so retry and skip warnings from the fetch path
/// are attributable to a call site.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
