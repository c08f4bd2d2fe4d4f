//! Per-connection session handling: the accept loop hands every
//! new socket to [`handle_connection`], which reads the announce frame and
//! then runs the appropriate command loop until the socket closes.

use bm_common::wire::{AnnounceFrame, RequestFrame, ResponseFrame, Role};
use bm_common::BrokerError;
use bm_core::{Broker, PeerAddr};
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::peer;

/// Reads the announce frame off `stream` and dispatches to the session loop
/// matching its declared role.
pub async fn handle_connection(stream: TcpStream, broker: Broker, self_addr: PeerAddr) {
    let peer_addr = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let announce: AnnounceFrame = match bm_common::wire::read_frame(&mut reader).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(?peer_addr, %err, "failed to read announce frame");
            return;
        }
    };

    match announce.user_type {
        Role::Subscriber | Role::Publisher => {
            let role = announce.user_type;
            let name = announce.user_name;
            tracing::info!(?peer_addr, ?role, %name, "client session announced");
            match role {
                Role::Subscriber => broker.register_subscriber_session(name.clone(), write_half).await,
                Role::Publisher => broker.register_publisher_session(name.clone(), write_half).await,
                Role::Broker => unreachable!(),
            }
            run_client_loop(&mut reader, &broker, role, &name).await;
            match role {
                Role::Subscriber => broker.on_subscriber_disconnect(&name).await,
                Role::Publisher => broker.on_publisher_disconnect(&name).await,
                Role::Broker => unreachable!(),
            }
            tracing::info!(%name, ?role, "client session closed");
        }
        Role::Broker => {
            // The accepted socket's write half is never used: this broker
            // only reads sync records from an inbound peer connection. It
            // replies to the peer's mutations over a link it dials itself.
            drop(write_half);
            let Some(addr) = peer_address_from_announce(&announce) else {
                tracing::warn!(?peer_addr, "peer announce missing ip address/port number");
                return;
            };
            tracing::info!(?peer_addr, ?addr, "peer session announced");

            if !broker.has_peer_link(&addr).await {
                let broker = broker.clone();
                let self_addr = self_addr.clone();
                let dial_target = addr.clone();
                tokio::spawn(async move {
                    if let Err(err) = peer::dial_peer(&broker, dial_target, &self_addr).await {
                        tracing::warn!(%err, "reverse dial to announcing peer failed");
                    }
                });
            }

            run_peer_loop(&mut reader, &broker).await;
            // The inbound socket just closed, so the remote end is gone; drop
            // our own outbound link to it too rather than leaving a stale
            // write half that will only be noticed on the next failed write.
            broker.remove_peer_link(&addr).await;
            tracing::info!(?addr, "peer session closed");
        }
    }
}

fn peer_address_from_announce(announce: &AnnounceFrame) -> Option<PeerAddr> {
    Some(PeerAddr {
        ip: announce.ip_address.clone()?,
        port: announce.port_number.clone()?,
    })
}

/// Runs the request/response loop for a publisher or subscriber session
/// until the socket closes or the underlying read fails.
///
/// A frame that reads fine off the wire but fails to parse as a known
/// command (bad JSON, unknown `command`, missing field) is a *local* error:
/// it is logged and answered with `invalid-command`, and the session stays
/// open. Only an actual socket I/O error ends the loop.
async fn run_client_loop(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    broker: &Broker,
    role: Role,
    name: &str,
) {
    loop {
        let line = match bm_common::wire::read_raw_line(reader).await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(%name, %err, "socket read error, closing session");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: RequestFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%name, %err, %line, "invalid command");
                broker
                    .respond(role, name, ResponseFrame::failed(BrokerError::InvalidCommand))
                    .await;
                continue;
            }
        };

        let Some(response) = dispatch_request(broker, name, frame).await else {
            continue;
        };
        broker.respond(role, name, response).await;
    }
}

/// Runs the read-only loop for an inbound peer connection: every frame on
/// it is expected to be a `sync` record; anything else, and any
/// frame that fails to parse, is logged and silently dropped — only a socket I/O error ends the link.
async fn run_peer_loop(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, broker: &Broker) {
    loop {
        let line = match bm_common::wire::read_raw_line(reader).await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(%err, "socket read error on peer link, closing session");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<RequestFrame>(&line) {
            Ok(RequestFrame::Sync(action)) => broker.apply_sync(action).await,
            Ok(other) => tracing::debug!(?other, "ignoring non-sync frame on peer link"),
            Err(err) => tracing::warn!(%err, %line, "malformed frame on peer link, dropping"),
        }
    }
}

/// Executes one client command and builds the response to send back.
/// Returns `None` only for `sync` frames, which never get a response and
/// should never legitimately arrive from a publisher/subscriber session.
async fn dispatch_request(broker: &Broker, name: &str, frame: RequestFrame) -> Option<ResponseFrame> {
    let response = match frame {
        RequestFrame::List => match broker.list_topics().await {
            Ok(topics) => ResponseFrame::ok_listing("list", topics),
            Err(err) => ResponseFrame::failed(err),
        },
        RequestFrame::Subscribe { topic_id } => {
            match broker.subscribe(topic_id.clone(), name.to_string()).await {
                Ok(()) => ResponseFrame::ok_confirmation(format!(
                    "subscribed to topic id {topic_id}"
                )),
                Err(err) => ResponseFrame::failed(err),
            }
        }
        RequestFrame::Unsubscribe { topic_id } => {
            match broker.unsubscribe(topic_id.clone(), name.to_string()).await {
                Ok(()) => ResponseFrame::ok_confirmation(format!(
                    "unsubscribed from topic id {topic_id}"
                )),
                Err(err) => ResponseFrame::failed(err),
            }
        }
        RequestFrame::ShowCurrentSubscription => {
            match broker.show_current_subscription(name).await {
                Ok(topics) => ResponseFrame::ok_listing("current", topics),
                Err(err) => ResponseFrame::failed(err),
            }
        }
        RequestFrame::Create {
            topic_id,
            topic_name,
        } => {
            match broker
                .create_topic(topic_id.clone(), topic_name, name.to_string())
                .await
            {
                Ok(()) => ResponseFrame::ok_confirmation(format!("topic id {topic_id} created")),
                Err(err) => ResponseFrame::failed(err),
            }
        }
        RequestFrame::Publish { topic_id, message } => {
            match broker
                .publish_message(topic_id.clone(), message, name.to_string())
                .await
            {
                Ok(()) => {
                    ResponseFrame::ok_confirmation(format!("message published to topic id {topic_id}"))
                }
                Err(err) => ResponseFrame::failed(err),
            }
        }
        RequestFrame::Delete { topic_id } => {
            match broker.delete_topic(topic_id.clone(), name.to_string()).await {
                Ok(()) => ResponseFrame::ok_confirmation(format!("topic id {topic_id} deleted")),
                Err(err) => ResponseFrame::failed(err),
            }
        }
        RequestFrame::CountSubscriber => match broker.count_subscribers(name).await {
            Ok(counts) => ResponseFrame::ok_counts(counts),
            Err(err) => ResponseFrame::failed(err),
        },
        RequestFrame::Sync(_) => {
            tracing::warn!(%name, "sync command received on a client session, ignoring");
            return None;
        }
    };
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn spawn_broker() -> (std::net::SocketAddr, Broker) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Broker::new();
        let accepted_broker = broker.clone();
        let self_addr = PeerAddr {
            ip: addr.ip().to_string(),
            port: addr.port().to_string(),
        };
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(handle_connection(
                    stream,
                    accepted_broker.clone(),
                    self_addr.clone(),
                ));
            }
        });
        (addr, broker)
    }

    async fn read_one_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> serde_json::Value {
        bm_common::wire::read_frame(reader).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn malformed_command_gets_invalid_command_and_session_stays_open() {
        let (addr, _broker) = spawn_broker().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{\"user type\":\"publisher\",\"user name\":\"pub1\"}\n")
            .await
            .unwrap();
        write_half
            .write_all(b"{\"command\":\"frobnicate\"}\n")
            .await
            .unwrap();
        let reply = read_one_line(&mut reader).await;
        assert_eq!(reply["result"], "failed");
        assert_eq!(reply["detail"], "invalid command");

        // session must still be alive: a subsequent legitimate command works.
        write_half
            .write_all(b"{\"command\":\"create\",\"topic id\":\"1\",\"topic name\":\"news\"}\n")
            .await
            .unwrap();
        let reply = read_one_line(&mut reader).await;
        assert_eq!(reply["result"], "success");
    }

    #[tokio::test]
    async fn unowned_publish_is_rejected_over_the_wire() {
        let (addr, broker) = spawn_broker().await;
        broker
            .create_topic("5".into(), "weather".into(), "alice".into())
            .await
            .unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"{\"user type\":\"publisher\",\"user name\":\"mallory\"}\n")
            .await
            .unwrap();
        write_half
            .write_all(b"{\"command\":\"publish\",\"topic id\":\"5\",\"message\":\"x\"}\n")
            .await
            .unwrap();
        let reply = read_one_line(&mut reader).await;
        assert_eq!(reply["result"], "failed");
        assert_eq!(reply["detail"], "you don't have this topic id");
    }
}
