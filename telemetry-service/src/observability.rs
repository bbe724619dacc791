use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` is honoured; on top of it the service logs at `info` and sqlx
/// statement logging is held at `warn` so per-reading queries stay quiet.
pub fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("telemetry_service=info".parse().unwrap_or_else(|_| LevelFilter::INFO.into()))
        .add_directive("sqlx=warn".parse().unwrap_or_else(|_| LevelFilter::WARN.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
