//! [`Broker`]: the locked, cloneable handle every session task in
//! `bm-broker` shares.
//!
//! Every mutating method here takes the single lock, asks [`BrokerState`] to
//! perform the mutation (which also performs any local pushes it implies),
//! and — while still holding that same lock — forwards the resulting
//! [`SyncAction`] to every peer link. See [`crate::state`] for why this is
//! one critical section rather than three.

use std::sync::Arc;

use bm_common::wire::{ResponseFrame, Role, SubscriberCount, SyncAction, TopicListing};
use bm_common::BrokerError;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

pub use crate::state::PeerAddr;
use crate::state::BrokerState;

/// Cloneable handle to a broker node's entire state.
///
/// Clones share the same lock; a `bm-brokerd` process holds exactly one of
/// these and clones it into every session task it spawns.
#[derive(Clone, Default)]
pub struct Broker {
    state: Arc<Mutex<BrokerState>>,
}

impl Broker {
    /// Creates an empty broker with no topics, subscriptions, sessions or
    /// peer links.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new topic owned by `publisher`.
    pub async fn create_topic(
        &self,
        topic_id: String,
        title: String,
        publisher: String,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let action = state.create_topic(topic_id, title, publisher).await?;
        state.propagate_sync(&action).await;
        Ok(())
    }

    /// Publishes `message` to every subscriber of `topic_id`.
    pub async fn publish_message(
        &self,
        topic_id: String,
        message: String,
        publisher: String,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let action = state.publish_message(topic_id, message, publisher).await?;
        state.propagate_sync(&action).await;
        Ok(())
    }

    /// Removes a topic owned by `publisher`, notifying every subscriber
    /// that held it.
    pub async fn delete_topic(
        &self,
        topic_id: String,
        publisher: String,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let action = state.delete_topic(topic_id, publisher).await?;
        state.propagate_sync(&action).await;
        Ok(())
    }

    /// Subscribes `subscriber` to `topic_id`.
    pub async fn subscribe(&self, topic_id: String, subscriber: String) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let action = state.subscribe(topic_id, subscriber).await?;
        state.propagate_sync(&action).await;
        Ok(())
    }

    /// Unsubscribes `subscriber` from `topic_id`.
    pub async fn unsubscribe(
        &self,
        topic_id: String,
        subscriber: String,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let action = state.unsubscribe(topic_id, subscriber).await?;
        state.propagate_sync(&action).await;
        Ok(())
    }

    /// Lists every topic currently known to this broker.
    pub async fn list_topics(&self) -> Result<Vec<TopicListing>, BrokerError> {
        self.state.lock().await.list_topics()
    }

    /// Counts subscribers per topic owned by `publisher`.
    pub async fn count_subscribers(
        &self,
        publisher: &str,
    ) -> Result<Vec<SubscriberCount>, BrokerError> {
        self.state.lock().await.count_subscribers(publisher)
    }

    /// Lists the topics `subscriber` currently holds.
    pub async fn show_current_subscription(
        &self,
        subscriber: &str,
    ) -> Result<Vec<TopicListing>, BrokerError> {
        self.state.lock().await.show_current_subscription(subscriber)
    }

    /// Sends a response frame to `name`'s session, routed by `role`.
    ///
    /// The only way to write to a client socket: the session task that read
    /// the originating request does not hold its own writer, since the same
    /// socket also carries asynchronous pushes serialized through this same
    /// lock.
    pub async fn respond(&self, role: Role, name: &str, frame: ResponseFrame) {
        self.state.lock().await.respond(role, name, &frame).await;
    }

    /// Applies a peer's `sync` record locally. Never re-propagated: a sync
    /// record travels exactly one hop, from the broker that originated the
    /// mutation to each of its direct peer links.
    pub async fn apply_sync(&self, action: SyncAction) {
        self.state.lock().await.apply_sync(action).await;
    }

    /// Records `name`'s write half so pushes can reach it. A second call
    /// with the same name silently replaces the first: the old session's writer is dropped, closing its
    /// socket.
    pub async fn register_subscriber_session(&self, name: String, writer: OwnedWriteHalf) {
        self.state
            .lock()
            .await
            .register_subscriber_session(name, writer);
    }

    /// Records `name`'s write half for a publisher session.
    pub async fn register_publisher_session(&self, name: String, writer: OwnedWriteHalf) {
        self.state
            .lock()
            .await
            .register_publisher_session(name, writer);
    }

    /// Registers a peer link to `addr`, rejecting a duplicate. Returns `true` if newly registered.
    pub async fn register_peer_link(&self, addr: PeerAddr, writer: OwnedWriteHalf) -> bool {
        self.state.lock().await.register_peer_link(addr, writer)
    }

    /// Reports whether a peer link to `addr` already exists.
    pub async fn has_peer_link(&self, addr: &PeerAddr) -> bool {
        self.state.lock().await.has_peer_link(addr)
    }

    /// Number of peer links currently held.
    pub async fn peer_link_count(&self) -> usize {
        self.state.lock().await.peer_link_count()
    }

    /// Drops the peer link to `addr`, if any. Does not affect any state it
    /// had synced in; the mesh simply stops hearing from it.
    pub async fn remove_peer_link(&self, addr: &PeerAddr) {
        self.state.lock().await.remove_peer_link(addr);
    }

    /// Tears down every topic owned by `name` and forgets its session
    ///.
    pub async fn on_publisher_disconnect(&self, name: &str) {
        let mut state = self.state.lock().await;
        if let Some(action) = state.on_publisher_disconnect(name).await {
            state.propagate_sync(&action).await;
        }
        state.remove_publisher_session(name);
    }

    /// Drops every subscription held by `name` and forgets its session
    ///.
    pub async fn on_subscriber_disconnect(&self, name: &str) {
        let mut state = self.state.lock().await;
        let action = state.on_subscriber_disconnect(name);
        state.propagate_sync(&action).await;
        state.remove_subscriber_session(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_publish_then_list() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        broker
            .publish_message("1".into(), "hello".into(), "alice".into())
            .await
            .unwrap();
        let listing = broker.list_topics().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].publisher, "alice");
    }

    #[tokio::test]
    async fn publish_by_non_owner_is_rejected() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        let err = broker
            .publish_message("1".into(), "hi".into(), "mallory".into())
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::NotOwner);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        let err = broker
            .create_topic("1".into(), "other".into(), "bob".into())
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::AlreadyExists("1".into()));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_rejecting() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        broker.subscribe("1".into(), "bob".into()).await.unwrap();
        let err = broker.subscribe("1".into(), "bob".into()).await.unwrap_err();
        assert_eq!(err, BrokerError::AlreadySubscribed("1".into()));
    }

    #[tokio::test]
    async fn unsubscribe_without_subscription_fails() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        let err = broker
            .unsubscribe("1".into(), "bob".into())
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::NotSubscribed("1".into()));
    }

    #[tokio::test]
    async fn delete_topic_removes_it_from_listing() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        broker.delete_topic("1".into(), "alice".into()).await.unwrap();
        let err = broker.list_topics().await.unwrap_err();
        assert_eq!(err, BrokerError::EmptyListing);
    }

    #[tokio::test]
    async fn count_subscribers_reports_only_owned_topics() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        broker
            .create_topic("2".into(), "sports".into(), "bob".into())
            .await
            .unwrap();
        broker.subscribe("1".into(), "carol".into()).await.unwrap();
        broker.subscribe("1".into(), "dave".into()).await.unwrap();

        let counts = broker.count_subscribers("alice").await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].topic_id, "1");
        assert_eq!(counts[0].count, "2");
    }

    #[tokio::test]
    async fn publisher_disconnect_removes_all_its_topics() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        broker
            .create_topic("2".into(), "weather".into(), "alice".into())
            .await
            .unwrap();
        broker
            .create_topic("3".into(), "sports".into(), "bob".into())
            .await
            .unwrap();

        broker.on_publisher_disconnect("alice").await;

        let remaining = broker.list_topics().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].publisher, "bob");
    }

    #[tokio::test]
    async fn subscriber_disconnect_clears_its_subscriptions() {
        let broker = Broker::new();
        broker
            .create_topic("1".into(), "news".into(), "alice".into())
            .await
            .unwrap();
        broker.subscribe("1".into(), "bob".into()).await.unwrap();

        broker.on_subscriber_disconnect("bob").await;

        let err = broker
            .show_current_subscription("bob")
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::NoSubscriptions);
    }

    #[tokio::test]
    async fn apply_sync_create_then_publish_materializes_remote_topic() {
        let broker = Broker::new();
        broker
            .apply_sync(SyncAction::Create {
                topic_id: "9".into(),
                title: "remote".into(),
                publisher: "remote-pub".into(),
            })
            .await;
        let listing = broker.list_topics().await.unwrap();
        assert_eq!(listing[0].topic_id, "9");
    }

    /// Two writer halves for the same nominal remote address; only the
    /// first registration should stick.
    async fn two_write_halves() -> (OwnedWriteHalf, OwnedWriteHalf) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let accept = listener.accept();
        let (a, (b, _)) = tokio::join!(connect, accept);
        (a.unwrap().into_split().1, b.unwrap().into_split().1)
    }

    #[tokio::test]
    async fn duplicate_peer_link_registration_is_rejected() {
        let broker = Broker::new();
        let addr = PeerAddr {
            ip: "10.0.0.5".into(),
            port: "7000".into(),
        };
        let (first, second) = two_write_halves().await;

        assert!(broker.register_peer_link(addr.clone(), first).await);
        assert_eq!(broker.peer_link_count().await, 1);

        assert!(!broker.register_peer_link(addr.clone(), second).await);
        assert_eq!(broker.peer_link_count().await, 1);
    }

    #[tokio::test]
    async fn distinct_peer_addresses_both_register() {
        let broker = Broker::new();
        let (w1, w2) = two_write_halves().await;

        assert!(
            broker
                .register_peer_link(
                    PeerAddr {
                        ip: "10.0.0.5".into(),
                        port: "7000".into(),
                    },
                    w1
                )
                .await
        );
        assert!(
            broker
                .register_peer_link(
                    PeerAddr {
                        ip: "10.0.0.6".into(),
                        port: "7001".into(),
                    },
                    w2
                )
                .await
        );
        assert_eq!(broker.peer_link_count().await, 2);
    }
}
