//! The receiver task: reads every frame the broker sends on the
//! session socket and demultiplexes by `message type`.
//!
//! Push frames (`broadcast`, `deleteNotify`) are printed immediately and
//! never reach the main loop. Response-class frames (`response`, `list`,
//! `current`) are forwarded over a bounded `mpsc` channel that the main
//! loop awaits after issuing each request, turning the rendezvous between
//! "request sent" and "response received" into ordinary message passing
//! instead of a shared condition variable.

use bm_common::wire::{BroadcastFrame, DeleteNotifyFrame, MessageTypeTag, ResponseFrame};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;

/// Runs until the socket closes or a frame fails to parse. `responses` is
/// the main loop's receiving half of the rendezvous channel.
pub async fn run(mut reader: BufReader<OwnedReadHalf>, responses: mpsc::Sender<ResponseFrame>) {
    loop {
        let line = match bm_common::wire::read_raw_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("broker closed the connection");
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "failed to read from broker");
                return;
            }
        };

        let tag: MessageTypeTag = match serde_json::from_str(&line) {
            Ok(tag) => tag,
            Err(err) => {
                tracing::warn!(%err, %line, "malformed frame from broker");
                continue;
            }
        };

        match tag.message_type.as_deref() {
            Some("broadcast") => match serde_json::from_str::<BroadcastFrame>(&line) {
                Ok(frame) => println!(
                    "[broadcast] {} on topic id {} ({}): {}",
                    frame.publisher, frame.topic_id, frame.title, frame.message
                ),
                Err(err) => tracing::warn!(%err, "malformed broadcast frame"),
            },
            Some("deleteNotify") => match serde_json::from_str::<DeleteNotifyFrame>(&line) {
                Ok(frame) => {
                    for deleted in &frame.deleted_topics {
                        println!(
                            "[deleteNotify] topic id {} ({}) removed by {}",
                            deleted.topic_id, deleted.title, deleted.publisher
                        );
                    }
                }
                Err(err) => tracing::warn!(%err, "malformed deleteNotify frame"),
            },
            Some("response") | Some("list") | Some("current") => {
                match serde_json::from_str::<ResponseFrame>(&line) {
                    Ok(frame) => {
                        if responses.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => tracing::warn!(%err, "malformed response frame"),
                }
            }
            other => tracing::warn!(?other, "unrecognized message type from broker"),
        }
    }
}
