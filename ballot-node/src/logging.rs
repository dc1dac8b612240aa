use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter, prelude::*, EnvFilter};

/// Installs the stdout layer and the `consensus` audit file layer
/// (`logs/audit-<node>.log`). Keep the guard alive for the process lifetime.
pub fn init_tracing(node_name: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never("logs", format!("audit-{node_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let audit_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| metadata.target() == "consensus"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,ballot_node=debug".into()))
        .with_filter(filter::filter_fn(|metadata| metadata.target() != "consensus"));

    tracing_subscriber::registry()
        .with(audit_layer)
        .with(stdout_layer)
        .init();

    guard
}
