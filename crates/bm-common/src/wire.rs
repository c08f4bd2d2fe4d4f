//! Newline-delimited JSON wire frames and the line codec used to
//! read and write them.
//!
//! One JSON object per line, UTF-8, terminated by `\n`. Keys are lowercase
//! with spaces where the protocol calls for them (`"topic id"`, `"user
//! type"`, ...) — `serde(rename = ...)` is used field by field rather than
//! a blanket `rename_all` since the casing isn't uniform.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Reads one line from `reader` and parses it as JSON.
///
/// Returns `Ok(None)` on clean EOF (no bytes read at all). A line that is
/// present but fails to parse as `T` is returned as `Err` — callers decide
/// whether that aborts the session or is merely logged and skipped.
pub async fn read_frame<R, T>(reader: &mut BufReader<R>) -> std::io::Result<Option<T>>
where
    R: tokio::io::AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Ok(Some(serde_json::from_str("null")?));
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}

/// Reads one line from `reader` as a raw string (without the trailing
/// newline), for callers that want to inspect the JSON value before
/// deciding which concrete frame type to parse it as.
pub async fn read_raw_line<R>(reader: &mut BufReader<R>) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Serializes `value` and writes it as one line, flushing immediately.
///
/// Used both for request/response traffic and for asynchronous pushes
/// (broadcasts, delete notices, sync records) — the caller decides when to
/// hold whatever lock needs to surround the write.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// `user type` on the first frame of any client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Subscriber,
    Publisher,
    Broker,
}

/// The first frame on any new connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceFrame {
    #[serde(rename = "user type")]
    pub user_type: Role,
    #[serde(rename = "user name")]
    pub user_name: String,
    #[serde(rename = "ip address")]
    pub ip_address: Option<String>,
    #[serde(rename = "port number")]
    pub port_number: Option<String>,
}

/// `{topic id, title, publisher}` as returned by `list` and
/// `showCurrentSubscription`, and embedded in `deleteNotify`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicListing {
    #[serde(rename = "topic id")]
    pub topic_id: String,
    pub title: String,
    pub publisher: String,
}

/// One row of a `countSubscriber` reply. `count` is a string on the wire,
/// not a number, matching every other numeric-looking field in this
/// protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriberCount {
    #[serde(rename = "topic id")]
    pub topic_id: String,
    pub title: String,
    pub count: String,
}

/// A client→broker request frame, tagged by `command`.
///
/// Deserialized when a broker reads a client's request; serialized when a
/// broker forwards a `sync` record to its peer links (every other variant
/// only ever needs to go in the read direction, but deriving `Serialize` on
/// the whole enum is simpler than splitting `Sync` out on its own).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum RequestFrame {
    #[serde(rename = "list")]
    List,
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "topic id")]
        topic_id: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "topic id")]
        topic_id: String,
    },
    #[serde(rename = "showCurrentSubscription")]
    ShowCurrentSubscription,
    #[serde(rename = "create")]
    Create {
        #[serde(rename = "topic id")]
        topic_id: String,
        #[serde(rename = "topic name")]
        topic_name: String,
    },
    #[serde(rename = "publish")]
    Publish {
        #[serde(rename = "topic id")]
        topic_id: String,
        message: String,
    },
    #[serde(rename = "delete")]
    Delete {
        #[serde(rename = "topic id")]
        topic_id: String,
    },
    #[serde(rename = "countSubscriber")]
    CountSubscriber,
    #[serde(rename = "sync")]
    Sync(SyncAction),
}

/// A sync record's `syncAction` and its action-specific fields.
///
/// Propagated once per mutating client request, from the originating broker
/// to every peer it currently holds a link to; never re-propagated by the
/// receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "syncAction")]
pub enum SyncAction {
    #[serde(rename = "create")]
    Create {
        #[serde(rename = "topic id")]
        topic_id: String,
        title: String,
        publisher: String,
    },
    #[serde(rename = "delete")]
    Delete {
        #[serde(rename = "topic id")]
        topic_id: String,
        publisher: String,
    },
    #[serde(rename = "publish")]
    Publish {
        #[serde(rename = "topic id")]
        topic_id: String,
        message: String,
        publisher: String,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "topic id")]
        topic_id: String,
        subscriber: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "topic id")]
        topic_id: String,
        subscriber: String,
    },
    #[serde(rename = "deleteAllTopicsByPublisher")]
    DeleteAllTopicsByPublisher {
        #[serde(rename = "topic ids")]
        topic_ids: Vec<String>,
        publisher: String,
    },
    #[serde(rename = "deleteAllTopicsBySubscriber")]
    DeleteAllTopicsBySubscriber { subscriber: String },
}

/// A broker→client response frame.
///
/// `message_type` is always one of `"list"`, `"current"`, or `"response"` —
/// never absent. A subscriber session demultiplexes every incoming line by
/// this field: `list`/`current`/`response` are synchronous
/// reply classes that wake the waiting requester, while `broadcast` and
/// `deleteNotify` (see [`PushKind`]) are asynchronous pushes that never do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub result: ResponseResult,
    pub detail: serde_json::Value,
    #[serde(rename = "message type")]
    pub message_type: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseResult {
    Success,
    Failed,
}

impl ResponseFrame {
    /// A plain string confirmation (create/publish/delete/subscribe/
    /// unsubscribe), tagged `"response"`.
    pub fn ok_confirmation(detail: impl Into<String>) -> Self {
        Self {
            result: ResponseResult::Success,
            detail: serde_json::Value::String(detail.into()),
            message_type: "response".to_string(),
        }
    }

    /// A successful `list` / `showCurrentSubscription` reply.
    pub fn ok_listing(message_type: &'static str, topics: Vec<TopicListing>) -> Self {
        Self {
            result: ResponseResult::Success,
            detail: serde_json::to_value(topics).unwrap_or(serde_json::Value::Null),
            message_type: message_type.to_string(),
        }
    }

    /// A successful `countSubscriber` reply.
    pub fn ok_counts(counts: Vec<SubscriberCount>) -> Self {
        Self {
            result: ResponseResult::Success,
            detail: serde_json::to_value(counts).unwrap_or(serde_json::Value::Null),
            message_type: "response".to_string(),
        }
    }

    /// An error reply; `detail` carries the `BrokerError`'s `Display` text.
    /// Tagged `"response"` so the subscriber's receiver always classifies
    /// it as synchronous-class regardless of which command failed.
    pub fn failed(detail: impl std::fmt::Display) -> Self {
        Self {
            result: ResponseResult::Failed,
            detail: serde_json::Value::String(detail.to_string()),
            message_type: "response".to_string(),
        }
    }
}

/// Broker→subscriber asynchronous push: a published message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastFrame {
    #[serde(rename = "message type")]
    pub message_type: PushKind,
    pub publisher: String,
    pub title: String,
    #[serde(rename = "topic id")]
    pub topic_id: String,
    pub message: String,
}

/// Broker→subscriber asynchronous push: one or more topics just vanished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteNotifyFrame {
    #[serde(rename = "message type")]
    pub message_type: PushKind,
    #[serde(rename = "deleted topic")]
    pub deleted_topics: Vec<TopicListing>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PushKind {
    Broadcast,
    DeleteNotify,
}

/// The `{"message type": ...}` tag alone, used by the subscriber receiver
/// to demultiplex an incoming line before deciding which
/// concrete struct to parse it as.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageTypeTag {
    #[serde(rename = "message type")]
    pub message_type: Option<String>,
}

/// Directory protocol: a broker registering itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerRegisterRequest {
    #[serde(rename = "user type")]
    pub user_type: String,
    #[serde(rename = "brokerIp")]
    pub broker_ip: String,
    #[serde(rename = "brokerPort")]
    pub broker_port: String,
}

/// Directory protocol: a publisher or subscriber asking for the broker list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientQueryRequest {
    #[serde(rename = "user type")]
    pub user_type: String,
}

/// One entry of a directory's broker list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BrokerEntry {
    #[serde(rename = "brokerIp")]
    pub broker_ip: String,
    #[serde(rename = "brokerPort")]
    pub broker_port: String,
}

/// Directory protocol response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryResponse {
    #[serde(rename = "user type", skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub brokers: Vec<BrokerEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_renames_topic_id() {
        let raw = r#"{"command":"subscribe","topic id":"42"}"#;
        let frame: RequestFrame = serde_json::from_str(raw).unwrap();
        match frame {
            RequestFrame::Subscribe { topic_id } => assert_eq!(topic_id, "42"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn sync_action_round_trips_through_request_frame() {
        let raw = r#"{"command":"sync","syncAction":"publish","topic id":"7","message":"hi","publisher":"pub1"}"#;
        let frame: RequestFrame = serde_json::from_str(raw).unwrap();
        match frame {
            RequestFrame::Sync(SyncAction::Publish {
                topic_id,
                message,
                publisher,
            }) => {
                assert_eq!(topic_id, "7");
                assert_eq!(message, "hi");
                assert_eq!(publisher, "pub1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn confirmation_is_tagged_response() {
        let frame = ResponseFrame::ok_confirmation("topic created");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["message type"], "response");
        assert_eq!(value["result"], "success");
    }

    #[test]
    fn failed_response_uses_error_display() {
        let frame = ResponseFrame::failed(crate::BrokerError::NotOwner);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["result"], "failed");
        assert_eq!(value["detail"], "you don't have this topic id");
    }
}
