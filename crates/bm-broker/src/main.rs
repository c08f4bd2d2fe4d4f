use anyhow::{Context, Result};
use bm_broker::cli::CliArgs;
use bm_broker::{peer, session, Broker, PeerAddr};
use bm_common::wire::{BrokerRegisterRequest, DirectoryResponse};
use clap::Parser;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _guard = bm_common::logging::init(
        "bm_brokerd",
        &bm_common::logging::LoggingConfig {
            log_file: args.log_file.clone(),
        },
    )
    .context("failed to initialize logging")?;

    let self_addr = PeerAddr {
        ip: args.host.clone(),
        port: args.port.to_string(),
    };

    let broker = Broker::new();

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind broker listener on port {}", args.port))?;
    tracing::info!(port = args.port, host = %args.host, "broker listening");

    if let Some(directory_addr) = &args.directory {
        bootstrap_from_directory(&broker, directory_addr, &self_addr).await?;
    } else {
        for addr in &args.bootstrap {
            let target = parse_peer_addr(addr)
                .with_context(|| format!("invalid bootstrap address {addr}"))?;
            if let Err(err) = peer::dial_peer(&broker, target, &self_addr).await {
                tracing::warn!(%addr, %err, "bootstrap dial failed");
            }
        }
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = accepted.context("accept failed")?;
                tracing::debug!(%remote, "connection accepted");
                tokio::spawn(session::handle_connection(stream, broker.clone(), self_addr.clone()));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
                return Ok(());
            }
        }
    }
}

/// Registers with the directory, then dials every peer it returns except
/// this broker's own address.
async fn bootstrap_from_directory(
    broker: &Broker,
    directory_addr: &str,
    self_addr: &PeerAddr,
) -> Result<()> {
    let mut stream = tokio::net::TcpStream::connect(directory_addr)
        .await
        .with_context(|| format!("failed to connect to directory at {directory_addr}"))?;
    let request = BrokerRegisterRequest {
        user_type: "broker".to_string(),
        broker_ip: self_addr.ip.clone(),
        broker_port: self_addr.port.clone(),
    };
    bm_common::wire::write_frame(&mut stream, &request)
        .await
        .context("failed to register with directory")?;

    let mut reader = tokio::io::BufReader::new(stream);
    let response: DirectoryResponse = bm_common::wire::read_frame(&mut reader)
        .await
        .context("failed to read directory response")?
        .context("directory closed the connection without replying")?;

    for entry in response.brokers {
        let target = PeerAddr {
            ip: entry.broker_ip,
            port: entry.broker_port,
        };
        if let Err(err) = peer::dial_peer(broker, target, self_addr).await {
            tracing::warn!(%err, "directory-sourced peer dial failed");
        }
    }
    Ok(())
}

fn parse_peer_addr(raw: &str) -> Result<PeerAddr> {
    let (ip, port) = raw
        .rsplit_once(':')
        .with_context(|| format!("expected host:port, got {raw}"))?;
    Ok(PeerAddr {
        ip: ip.to_string(),
        port: port.to_string(),
    })
}
