//! Shared plumbing for the publisher and subscriber CLIs: ask the directory for a broker list, pick one at random, open the
//! long-lived session connection, and send the announce frame.

use anyhow::{bail, Context, Result};
use bm_common::wire::{AnnounceFrame, BrokerEntry, ClientQueryRequest, DirectoryResponse, Role};
use tokio::net::TcpStream;

/// Queries the directory at `directory_addr` for the current broker list,
/// announcing as `role`.
///
/// `role` must be [`Role::Publisher`] or [`Role::Subscriber`]; a directory
/// query from a broker uses the register path instead, not this function.
pub async fn query_directory(directory_addr: &str, role: Role) -> Result<Vec<BrokerEntry>> {
    let user_type = match role {
        Role::Publisher => "publisher",
        Role::Subscriber => "subscriber",
        Role::Broker => bail!("query_directory is for publisher/subscriber roles, not broker"),
    };

    let mut stream = TcpStream::connect(directory_addr)
        .await
        .inspect_err(|err| tracing::warn!(%directory_addr, %err, "failed to connect to directory"))
        .with_context(|| format!("failed to connect to directory at {directory_addr}"))?;
    let request = ClientQueryRequest {
        user_type: user_type.to_string(),
    };
    bm_common::wire::write_frame(&mut stream, &request)
        .await
        .context("failed to send directory query")?;

    let mut reader = tokio::io::BufReader::new(stream);
    let response: DirectoryResponse = bm_common::wire::read_frame(&mut reader)
        .await
        .context("failed to read directory response")?
        .context("directory closed the connection without replying")?;
    tracing::info!(
        %directory_addr,
        brokers = response.brokers.len(),
        "directory query returned broker list"
    );
    Ok(response.brokers)
}

/// Picks one broker at random from `brokers`.
pub fn pick_broker(brokers: &[BrokerEntry]) -> Option<&BrokerEntry> {
    use rand::seq::IndexedRandom;
    brokers.choose(&mut rand::rng())
}

/// Opens the long-lived session connection to `broker` and sends the
/// announce frame identifying this client by `role` and `name`.
pub async fn connect_and_announce(
    broker: &BrokerEntry,
    role: Role,
    name: &str,
) -> Result<TcpStream> {
    let addr = format!("{}:{}", broker.broker_ip, broker.broker_port);
    let mut stream = TcpStream::connect(&addr)
        .await
        .inspect_err(|err| tracing::warn!(%addr, %err, "failed to connect to broker"))
        .with_context(|| format!("failed to connect to broker at {addr}"))?;
    let announce = AnnounceFrame {
        user_type: role,
        user_name: name.to_string(),
        ip_address: None,
        port_number: None,
    };
    bm_common::wire::write_frame(&mut stream, &announce)
        .await
        .context("failed to send announce frame")?;
    tracing::info!(%addr, ?role, %name, "announced to broker");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn query_directory_parses_broker_list() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            let _: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
            let reply = r#"{"brokers":[{"brokerIp":"127.0.0.1","brokerPort":"9001"}]}"#;
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.write_all(b"\n").await.unwrap();
        });

        let brokers = query_directory(&addr.to_string(), Role::Subscriber)
            .await
            .unwrap();
        assert_eq!(brokers.len(), 1);
        assert_eq!(brokers[0].broker_port, "9001");
    }

    #[test]
    fn pick_broker_returns_none_for_empty_list() {
        assert!(pick_broker(&[]).is_none());
    }
}
