//! Shared `tracing` subscriber setup, used identically by every binary in
//! the workspace (directory, broker, publisher, subscriber).

use std::path::Path;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Where a binary should send its logs.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Optional path to a log file. When set, logs go to both stderr and
    /// this file; when absent, stderr only.
    pub log_file: Option<std::path::PathBuf>,
}

/// Initializes the process-wide `tracing` subscriber.
///
/// `target` names the binary in the default filter (e.g. `bm_brokerd=info`)
/// so `RUST_LOG`/`BM_LOG` can be left unset for the common case. Returns a
/// guard that must be held for the lifetime of `main` when file logging is
/// enabled (dropping it flushes the non-blocking file writer).
pub fn init(
    target: &str,
    config: &LoggingConfig,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_filter = format!("{target}=info,warn");
    let env_filter = std::env::var("BM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    match &config.log_file {
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
            tracing::debug!(%target, "logging initialized, stderr only");
            Ok(None)
        }
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file_name = path
                .file_name()
                .map(|n| n.to_owned())
                .unwrap_or_else(|| "broker-mesh.log".into());
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr.and(non_blocking_appender))
                .init();
            tracing::debug!(%target, log_file = %path.display(), "logging initialized, stderr and file");
            Ok(Some(guard))
        }
    }
}
