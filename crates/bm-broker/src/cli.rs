use std::path::PathBuf;

use clap::Parser;

/// `bm-brokerd <port> [-d host:port] | [-b host:port ...]`.
#[derive(Parser, Debug)]
#[command(about = "Broker mesh node", version)]
pub struct CliArgs {
    /// Port this broker listens on for client and peer connections.
    pub port: u16,

    /// Address this broker announces to peers and the directory, so other
    /// brokers know how to dial it back.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Directory address to register with and bootstrap peers from.
    #[arg(short = 'd', long, conflicts_with = "bootstrap")]
    pub directory: Option<String>,

    /// Explicit peer addresses to dial at startup, bypassing the directory.
    #[arg(short = 'b', long = "bootstrap", conflicts_with = "directory")]
    pub bootstrap: Vec<String>,

    /// Also write logs to this file, in addition to stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
