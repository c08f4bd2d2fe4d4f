use anyhow::{Context, Result};
use bm_directory::cli::CliArgs;
use bm_directory::Registry;
use clap::Parser;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _guard = bm_common::logging::init(
        "bm_directoryd",
        &bm_common::logging::LoggingConfig {
            log_file: args.log_file.clone(),
        },
    )
    .context("failed to initialize logging")?;

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind directory listener on port {}", args.port))?;
    tracing::info!(port = args.port, "directory service listening");

    let registry = Registry::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accept failed")?;
                tracing::debug!(%peer, "directory connection accepted");
                tokio::spawn(bm_directory::handle_connection(stream, registry.clone()));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
                return Ok(());
            }
        }
    }
}
