//! Broker node: wires [`bm_core::Broker`] to real TCP sockets. Owns the accept loop, per-connection session handling, and peer
//! link dialing; all topic/subscription logic lives in `bm-core`.

pub mod cli;
pub mod peer;
pub mod session;

pub use bm_core::{Broker, PeerAddr};
