//! The broker's in-memory state and the atomic mutations that act
//! on it.
//!
//! Every method here takes `&mut self` and is called with the broker's
//! single coarse lock already held by the caller (see [`crate::Broker`]).
//! Local pushes to connected subscribers and forwards to peer links happen
//! inline, inside that same critical section, on purpose: a mutation, its
//! local pushes, and its peer forwards must be serialized in one order,
//! even at the cost of one slow remote socket stalling every other session
//! on this broker.

use std::collections::{HashMap, HashSet};

use bm_common::wire::{
    BroadcastFrame, DeleteNotifyFrame, PushKind, RequestFrame, ResponseFrame, SubscriberCount,
    SyncAction, TopicListing,
};
use bm_common::BrokerError;
use tokio::net::tcp::OwnedWriteHalf;

/// Remote endpoint a peer link was dialed to or accepted from, used for the
/// dedup invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub ip: String,
    pub port: String,
}

pub(crate) struct Topic {
    pub title: String,
    pub owner: String,
}

/// All mutable broker state, protected by the single mutex in [`crate::Broker`].
#[derive(Default)]
pub(crate) struct BrokerState {
    topics: HashMap<String, Topic>,
    /// subscriber name -> set of topic ids it holds.
    subscriptions: HashMap<String, HashSet<String>>,
    subscriber_sessions: HashMap<String, OwnedWriteHalf>,
    publisher_sessions: HashMap<String, OwnedWriteHalf>,
    peer_links: HashMap<PeerAddr, OwnedWriteHalf>,
}

impl BrokerState {
    pub fn register_subscriber_session(&mut self, name: String, writer: OwnedWriteHalf) {
        // Name collisions silently overwrite: the prior session's handle is simply dropped here,
        // which closes that socket's write half.
        self.subscriber_sessions.insert(name, writer);
    }

    pub fn register_publisher_session(&mut self, name: String, writer: OwnedWriteHalf) {
        self.publisher_sessions.insert(name, writer);
    }

    /// Registers a peer link, rejecting it if this broker already holds one
    /// to the same `{ip, port}`.
    ///
    /// Returns `true` if the link was newly registered.
    pub fn register_peer_link(&mut self, addr: PeerAddr, writer: OwnedWriteHalf) -> bool {
        if self.peer_links.contains_key(&addr) {
            return false;
        }
        self.peer_links.insert(addr, writer);
        true
    }

    pub fn has_peer_link(&self, addr: &PeerAddr) -> bool {
        self.peer_links.contains_key(addr)
    }

    pub fn peer_link_count(&self) -> usize {
        self.peer_links.len()
    }

    pub fn remove_peer_link(&mut self, addr: &PeerAddr) {
        self.peer_links.remove(addr);
    }

    pub fn remove_subscriber_session(&mut self, name: &str) {
        self.subscriber_sessions.remove(name);
    }

    pub fn remove_publisher_session(&mut self, name: &str) {
        self.publisher_sessions.remove(name);
    }

    // ---- client-facing operations ----

    pub async fn create_topic(
        &mut self,
        topic_id: String,
        title: String,
        publisher: String,
    ) -> Result<SyncAction, BrokerError> {
        if self.topics.contains_key(&topic_id) {
            return Err(BrokerError::AlreadyExists(topic_id));
        }
        self.topics.insert(
            topic_id.clone(),
            Topic {
                title: title.clone(),
                owner: publisher.clone(),
            },
        );
        Ok(SyncAction::Create {
            topic_id,
            title,
            publisher,
        })
    }

    pub async fn publish_message(
        &mut self,
        topic_id: String,
        message: String,
        publisher: String,
    ) -> Result<SyncAction, BrokerError> {
        let title = {
            let topic = self
                .topics
                .get(&topic_id)
                .ok_or(BrokerError::NotOwner)?;
            if topic.owner != publisher {
                return Err(BrokerError::NotOwner);
            }
            topic.title.clone()
        };

        let frame = BroadcastFrame {
            message_type: PushKind::Broadcast,
            publisher: publisher.clone(),
            title,
            topic_id: topic_id.clone(),
            message: message.clone(),
        };
        self.push_broadcast_to_holders(&topic_id, &frame).await;

        Ok(SyncAction::Publish {
            topic_id,
            message,
            publisher,
        })
    }

    pub async fn delete_topic(
        &mut self,
        topic_id: String,
        publisher: String,
    ) -> Result<SyncAction, BrokerError> {
        {
            let topic = self
                .topics
                .get(&topic_id)
                .ok_or(BrokerError::NotOwner)?;
            if topic.owner != publisher {
                return Err(BrokerError::NotOwner);
            }
        }
        let topic = self.topics.remove(&topic_id).expect("checked above");
        let listing = TopicListing {
            topic_id: topic_id.clone(),
            title: topic.title,
            publisher: publisher.clone(),
        };
        self.strip_and_notify(&[listing]).await;

        Ok(SyncAction::Delete {
            topic_id,
            publisher,
        })
    }

    pub async fn subscribe(
        &mut self,
        topic_id: String,
        subscriber: String,
    ) -> Result<SyncAction, BrokerError> {
        if !self.topics.contains_key(&topic_id) {
            return Err(BrokerError::NoSuchTopic(topic_id));
        }
        let set = self.subscriptions.entry(subscriber.clone()).or_default();
        if !set.insert(topic_id.clone()) {
            return Err(BrokerError::AlreadySubscribed(topic_id));
        }
        Ok(SyncAction::Subscribe {
            topic_id,
            subscriber,
        })
    }

    pub async fn unsubscribe(
        &mut self,
        topic_id: String,
        subscriber: String,
    ) -> Result<SyncAction, BrokerError> {
        let removed = self
            .subscriptions
            .get_mut(&subscriber)
            .map(|set| set.remove(&topic_id))
            .unwrap_or(false);
        if !removed {
            return Err(BrokerError::NotSubscribed(topic_id));
        }
        Ok(SyncAction::Unsubscribe {
            topic_id,
            subscriber,
        })
    }

    pub fn list_topics(&self) -> Result<Vec<TopicListing>, BrokerError> {
        if self.topics.is_empty() {
            return Err(BrokerError::EmptyListing);
        }
        Ok(self
            .topics
            .iter()
            .map(|(id, t)| TopicListing {
                topic_id: id.clone(),
                title: t.title.clone(),
                publisher: t.owner.clone(),
            })
            .collect())
    }

    /// Counts, for every topic owned by `publisher`, how many subscribers
    /// hold it.
    ///
    /// The "does this publisher own anything" guard is checked inside the
    /// per-topic loop rather than once up front, matching a documented
    /// quirk of this operation's behavior. With this state's invariant that
    /// every topic always has a non-empty owner, the guard can never
    /// actually fire; it is kept in this shape for fidelity to that quirk
    /// rather than for any behavioral effect.
    pub fn count_subscribers(&self, publisher: &str) -> Result<Vec<SubscriberCount>, BrokerError> {
        let mut out = Vec::new();
        for (topic_id, topic) in &self.topics {
            if topic.owner.is_empty() {
                return Err(BrokerError::NoTopicsOwned);
            }
            if topic.owner == publisher {
                let count = self
                    .subscriptions
                    .values()
                    .filter(|held| held.contains(topic_id))
                    .count();
                out.push(SubscriberCount {
                    topic_id: topic_id.clone(),
                    title: topic.title.clone(),
                    count: count.to_string(),
                });
            }
        }
        if out.is_empty() {
            return Err(BrokerError::NoTopicsOwned);
        }
        Ok(out)
    }

    pub fn show_current_subscription(
        &self,
        subscriber: &str,
    ) -> Result<Vec<TopicListing>, BrokerError> {
        let held = self
            .subscriptions
            .get(subscriber)
            .filter(|s| !s.is_empty())
            .ok_or(BrokerError::NoSubscriptions)?;
        Ok(held
            .iter()
            .filter_map(|id| {
                self.topics.get(id).map(|t| TopicListing {
                    topic_id: id.clone(),
                    title: t.title.clone(),
                    publisher: t.owner.clone(),
                })
            })
            .collect())
    }

    // ---- disconnect cleanup ----

    /// Deletes every topic owned by `name`, batching the subscriber
    /// notifications into a single `deleteNotify` per affected subscriber
    /// and emitting a single sync record listing every deleted topic id.
    pub async fn on_publisher_disconnect(&mut self, name: &str) -> Option<SyncAction> {
        let owned: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, t)| t.owner == name)
            .map(|(id, _)| id.clone())
            .collect();
        if owned.is_empty() {
            return None;
        }

        let mut listings = Vec::with_capacity(owned.len());
        for id in &owned {
            if let Some(topic) = self.topics.remove(id) {
                listings.push(TopicListing {
                    topic_id: id.clone(),
                    title: topic.title,
                    publisher: name.to_string(),
                });
            }
        }
        self.strip_and_notify(&listings).await;

        Some(SyncAction::DeleteAllTopicsByPublisher {
            topic_ids: owned,
            publisher: name.to_string(),
        })
    }

    /// Drops `name`'s entire subscription set. No local notification is
    /// sent: there is no counterparty who needs to know beyond peers.
    pub fn on_subscriber_disconnect(&mut self, name: &str) -> SyncAction {
        self.subscriptions.remove(name);
        SyncAction::DeleteAllTopicsBySubscriber {
            subscriber: name.to_string(),
        }
    }

    // ---- applying a peer's sync record ----

    pub async fn apply_sync(&mut self, action: SyncAction) {
        match action {
            SyncAction::Create {
                topic_id,
                title,
                publisher,
            } => {
                // Last-writer-wins: overwrite unconditionally.
                self.topics.insert(topic_id, Topic { title, owner: publisher });
            }
            SyncAction::Delete { topic_id, publisher } => {
                let matches_owner = self
                    .topics
                    .get(&topic_id)
                    .is_some_and(|t| t.owner == publisher);
                if matches_owner {
                    if let Some(topic) = self.topics.remove(&topic_id) {
                        let listing = TopicListing {
                            topic_id,
                            title: topic.title,
                            publisher,
                        };
                        self.strip_and_notify(&[listing]).await;
                    }
                }
            }
            SyncAction::Publish {
                topic_id,
                message,
                publisher,
            } => {
                let title = self.topics.get(&topic_id).map(|t| t.title.clone());
                let Some(title) = title else { return };
                let frame = BroadcastFrame {
                    message_type: PushKind::Broadcast,
                    publisher,
                    title,
                    topic_id: topic_id.clone(),
                    message,
                };
                self.push_broadcast_to_holders(&topic_id, &frame).await;
            }
            SyncAction::Subscribe {
                topic_id,
                subscriber,
            } => {
                if self.topics.contains_key(&topic_id) {
                    self.subscriptions.entry(subscriber).or_default().insert(topic_id);
                }
            }
            SyncAction::Unsubscribe {
                topic_id,
                subscriber,
            } => {
                if let Some(set) = self.subscriptions.get_mut(&subscriber) {
                    set.remove(&topic_id);
                }
            }
            SyncAction::DeleteAllTopicsByPublisher {
                topic_ids,
                publisher,
            } => {
                let mut listings = Vec::new();
                for topic_id in topic_ids {
                    let matches_owner = self
                        .topics
                        .get(&topic_id)
                        .is_some_and(|t| t.owner == publisher);
                    if matches_owner {
                        if let Some(topic) = self.topics.remove(&topic_id) {
                            listings.push(TopicListing {
                                topic_id,
                                title: topic.title,
                                publisher: publisher.clone(),
                            });
                        }
                    }
                }
                if !listings.is_empty() {
                    self.strip_and_notify(&listings).await;
                }
            }
            SyncAction::DeleteAllTopicsBySubscriber { subscriber } => {
                self.subscriptions.remove(&subscriber);
            }
        }
    }

    // ---- push helpers ----

    /// Pushes `frame` to every locally connected subscriber currently
    /// holding `topic_id`.
    async fn push_broadcast_to_holders(&mut self, topic_id: &str, frame: &BroadcastFrame) {
        let holders: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|(_, held)| held.contains(topic_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in holders {
            self.push_to_subscriber(&name, frame).await;
        }
    }

    /// Removes `topic_id`s in `listings` from every subscription set that
    /// holds them, then pushes one `deleteNotify` (listing all of them) to
    /// each affected locally connected subscriber.
    async fn strip_and_notify(&mut self, listings: &[TopicListing]) {
        if listings.is_empty() {
            return;
        }
        let ids: HashSet<&str> = listings.iter().map(|l| l.topic_id.as_str()).collect();

        let mut affected: Vec<(String, Vec<TopicListing>)> = Vec::new();
        for (subscriber, held) in self.subscriptions.iter_mut() {
            let owned_here: Vec<TopicListing> = listings
                .iter()
                .filter(|l| held.contains(&l.topic_id))
                .cloned()
                .collect();
            held.retain(|id| !ids.contains(id.as_str()));
            if !owned_here.is_empty() {
                affected.push((subscriber.clone(), owned_here));
            }
        }

        for (subscriber, deleted) in affected {
            let frame = DeleteNotifyFrame {
                message_type: PushKind::DeleteNotify,
                deleted_topics: deleted,
            };
            self.push_to_subscriber(&subscriber, &frame).await;
        }
    }

    async fn push_to_subscriber<T: serde::Serialize>(&mut self, name: &str, frame: &T) {
        if !write_to_session(&mut self.subscriber_sessions, name, frame).await {
            self.subscriber_sessions.remove(name);
        }
    }

    /// Writes a response frame to whichever session map `role` names.
    ///
    /// Every write to a client socket — synchronous responses as much as
    /// asynchronous pushes — goes through this single locked path, since a
    /// socket's write half is single-owner: the session task that read the
    /// request does not keep its own copy to reply with directly.
    pub async fn respond(&mut self, role: bm_common::wire::Role, name: &str, frame: &ResponseFrame) {
        use bm_common::wire::Role;
        let delivered = match role {
            Role::Subscriber => write_to_session(&mut self.subscriber_sessions, name, frame).await,
            Role::Publisher => write_to_session(&mut self.publisher_sessions, name, frame).await,
            Role::Broker => {
                tracing::warn!(name, "attempted to send a response frame to a peer session");
                return;
            }
        };
        if !delivered {
            match role {
                Role::Subscriber => {
                    self.subscriber_sessions.remove(name);
                }
                Role::Publisher => {
                    self.publisher_sessions.remove(name);
                }
                Role::Broker => {}
            }
        }
    }

    /// Forwards `action` to every peer link, once. Write failures are
    /// logged and the dead link is dropped; the mesh partitions until the
    /// link is reestablished.
    pub(crate) async fn propagate_sync(&mut self, action: &SyncAction) {
        let frame = RequestFrame::Sync(action.clone());
        let dead: Vec<PeerAddr> = {
            let mut dead = Vec::new();
            for (addr, writer) in self.peer_links.iter_mut() {
                if let Err(err) = bm_common::wire::write_frame(writer, &frame).await {
                    tracing::warn!(peer = ?addr, %err, "peer link write failed, dropping link");
                    dead.push(addr.clone());
                }
            }
            dead
        };
        for addr in dead {
            self.peer_links.remove(&addr);
        }
    }
}

/// Writes `frame` to `name`'s entry in `sessions`, if present.
///
/// Returns `false` when the name is unknown or the write failed (caller is
/// responsible for evicting the entry on `false` — done here rather than
/// inside this helper so it stays usable under a shared, already-borrowed
/// `HashMap` field).
async fn write_to_session<T: serde::Serialize>(
    sessions: &mut HashMap<String, OwnedWriteHalf>,
    name: &str,
    frame: &T,
) -> bool {
    let Some(writer) = sessions.get_mut(name) else {
        return false;
    };
    match bm_common::wire::write_frame(writer, frame).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(session = name, %err, "write failed, dropping session");
            false
        }
    }
}
