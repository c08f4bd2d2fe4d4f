//! Directory service: a single-process, append-only registry of
//! brokers, used so a fresh broker, publisher, or subscriber can discover the
//! mesh without any prior configuration.
//!
//! Each connection carries exactly one request frame and gets exactly one
//! response frame before the socket closes — there is no session state here,
//! unlike `bm-broker`'s long-lived connections.

pub mod cli;

use std::sync::{Arc, Mutex};

use bm_common::wire::{BrokerEntry, DirectoryResponse};
use tokio::io::BufReader;
use tokio::net::TcpStream;

/// The registry: every broker that has ever announced itself.
///
/// Append-only by design: a broker that restarts and
/// re-announces produces a duplicate entry rather than replacing its prior
/// one. Nothing here ever removes an entry.
#[derive(Clone, Default)]
pub struct Registry {
    brokers: Arc<Mutex<Vec<BrokerEntry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, entry: BrokerEntry) -> Vec<BrokerEntry> {
        let mut brokers = self.brokers.lock().unwrap_or_else(|e| e.into_inner());
        brokers.push(entry);
        brokers.clone()
    }

    fn snapshot(&self) -> Vec<BrokerEntry> {
        self.brokers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Reads the single request frame on `stream`, replies, and returns.
///
/// Malformed or unrecognized request frames are logged and the connection
/// is simply dropped without a reply; the directory protocol has no error
/// frame of its own.
pub async fn handle_connection(stream: TcpStream, registry: Registry) {
    let peer = stream.peer_addr().ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let line = match bm_common::wire::read_raw_line(&mut reader).await {
        Ok(Some(line)) => line,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(?peer, %err, "failed to read directory request");
            return;
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&line) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(?peer, %err, "malformed directory request");
            return;
        }
    };

    let user_type = value.get("user type").and_then(serde_json::Value::as_str);

    let response = match user_type {
        Some("broker") => {
            let broker_ip = value.get("brokerIp").and_then(serde_json::Value::as_str);
            let broker_port = value.get("brokerPort").and_then(serde_json::Value::as_str);
            let (Some(broker_ip), Some(broker_port)) = (broker_ip, broker_port) else {
                tracing::warn!(?peer, "broker announce missing brokerIp/brokerPort");
                return;
            };
            tracing::info!(broker_ip, broker_port, "broker registered");
            let brokers = registry.register(BrokerEntry {
                broker_ip: broker_ip.to_string(),
                broker_port: broker_port.to_string(),
            });
            DirectoryResponse {
                user_type: Some("directory".to_string()),
                brokers,
            }
        }
        Some("publisher") | Some("subscriber") => DirectoryResponse {
            user_type: None,
            brokers: registry.snapshot(),
        },
        other => {
            tracing::warn!(?peer, ?other, "unrecognized directory request user type");
            return;
        }
    };

    if let Err(err) = bm_common::wire::write_frame(&mut write_half, &response).await {
        tracing::warn!(?peer, %err, "failed to write directory response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_directory() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Registry::new();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(handle_connection(stream, registry.clone()));
            }
        });
        addr
    }

    async fn send_and_read(addr: std::net::SocketAddr, request: &str) -> serde_json::Value {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[tokio::test]
    async fn registers_and_returns_full_list_including_self() {
        let addr = spawn_directory().await;
        let reply = send_and_read(
            addr,
            r#"{"user type":"broker","brokerIp":"10.0.0.1","brokerPort":"9000"}"#,
        )
        .await;
        assert_eq!(reply["user type"], "directory");
        assert_eq!(reply["brokers"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_returns_every_registered_broker() {
        let addr = spawn_directory().await;
        send_and_read(
            addr,
            r#"{"user type":"broker","brokerIp":"10.0.0.1","brokerPort":"9000"}"#,
        )
        .await;
        send_and_read(
            addr,
            r#"{"user type":"broker","brokerIp":"10.0.0.2","brokerPort":"9001"}"#,
        )
        .await;
        let reply = send_and_read(addr, r#"{"user type":"publisher"}"#).await;
        assert!(reply.get("user type").is_none());
        assert_eq!(reply["brokers"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn re_registering_the_same_address_produces_a_duplicate() {
        let addr = spawn_directory().await;
        send_and_read(
            addr,
            r#"{"user type":"broker","brokerIp":"10.0.0.1","brokerPort":"9000"}"#,
        )
        .await;
        let reply = send_and_read(
            addr,
            r#"{"user type":"broker","brokerIp":"10.0.0.1","brokerPort":"9000"}"#,
        )
        .await;
        assert_eq!(reply["brokers"].as_array().unwrap().len(), 2);
    }
}
