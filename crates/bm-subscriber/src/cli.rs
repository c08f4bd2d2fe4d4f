use clap::Parser;

/// `bm-subscriber <name> <host:port> | <name> -d <host:port>`. The same positional address is either a broker to connect to
/// directly, or — with `-d` — a directory to query for one.
#[derive(Parser, Debug)]
#[command(about = "Broker mesh subscriber CLI", version)]
pub struct CliArgs {
    /// This subscriber's name, used as the `user name` on its announce
    /// frame.
    pub name: String,

    /// `host:port` of a broker, or of a directory when `-d` is given.
    pub address: String,

    /// Treat `address` as a directory to query rather than a broker to
    /// connect to directly.
    #[arg(short = 'd', long = "directory")]
    pub via_directory: bool,
}
