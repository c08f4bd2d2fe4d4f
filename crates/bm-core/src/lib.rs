//! Broker-mesh core: topic/subscription state, local fan-out, peer sync
//! propagation, and disconnect cleanup.
//!
//! This crate has no network listener of its own — `bm-broker` owns the
//! TCP accept loop and session tasks, and drives everything here through a
//! cloned [`Broker`] handle.

mod broker;
mod state;

pub use broker::{Broker, PeerAddr};
