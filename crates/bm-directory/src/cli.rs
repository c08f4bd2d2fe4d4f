use std::path::PathBuf;

use clap::Parser;

/// `bm-directoryd <port>`.
#[derive(Parser, Debug)]
#[command(about = "Broker mesh directory: append-only broker registry", version)]
pub struct CliArgs {
    /// Port to listen on.
    pub port: u16,

    /// Also write logs to this file, in addition to stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
