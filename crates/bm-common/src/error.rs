//! Errors surfaced to clients over the wire.

use thiserror::Error;

/// Error kinds a broker can return in a `{"result":"failed","detail":...}`
/// response frame.
///
/// There is no machine-readable error code on the wire: the
/// `Display` string produced here *is* the `detail` field, so changing a
/// message here is a wire-compatibility break.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// `create` against a topic id that already exists.
    #[error("topic id {0} already exists")]
    AlreadyExists(String),
    /// `publish` or `delete` against a topic the caller does not own (or
    /// that does not exist at all).
    #[error("you don't have this topic id")]
    NotOwner,
    /// `subscribe`/`unsubscribe` against an unknown topic id.
    #[error("topic id {0} does not exist")]
    NoSuchTopic(String),
    /// `subscribe` when already subscribed.
    #[error("already subscribed to topic id {0}")]
    AlreadySubscribed(String),
    /// `unsubscribe` when not subscribed.
    #[error("not subscribed to topic id {0}")]
    NotSubscribed(String),
    /// `countSubscriber` when the publisher owns no topics.
    #[error("you have not created any topic")]
    NoTopicsOwned,
    /// `showCurrentSubscription` when the subscriber has no subscriptions.
    #[error("you have no subscriptions")]
    NoSubscriptions,
    /// `list` when the topic table is empty.
    #[error("there are no topics")]
    EmptyListing,
    /// Unrecognized or malformed `command`.
    #[error("invalid command")]
    InvalidCommand,
}
