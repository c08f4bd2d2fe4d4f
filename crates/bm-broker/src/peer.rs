//! Dialing peer links: the write-only side of a mesh
//! connection, used to forward `sync` records.
//!
//! A peer link is always the dialing side's own outbound connection; the
//! remote's accept loop (see [`crate::session::handle_connection`]) treats
//! the same TCP bytes as an inbound peer session it only ever reads from.
//! Two brokers fully linked to each other therefore hold two independent
//! sockets, one dialed by each side — which is why bidirectional sync
//! requires both sides to dial (spec REDESIGN FLAGS, open question 3).

use anyhow::{Context, Result};
use bm_common::wire::{AnnounceFrame, Role};
use bm_core::{Broker, PeerAddr};
use tokio::net::TcpStream;

/// Dials `target` and registers the resulting write half as a peer link,
/// unless `target` is this broker's own address or a link to it already
/// exists.
pub async fn dial_peer(broker: &Broker, target: PeerAddr, self_addr: &PeerAddr) -> Result<()> {
    if target == *self_addr {
        tracing::debug!(?target, "refusing to dial self");
        return Ok(());
    }
    if broker.has_peer_link(&target).await {
        tracing::debug!(?target, "peer link already established, skipping dial");
        return Ok(());
    }

    let dial_addr = format!("{}:{}", target.ip, target.port);
    let mut stream = TcpStream::connect(&dial_addr)
        .await
        .with_context(|| format!("failed to dial peer at {dial_addr}"))?;

    let announce = AnnounceFrame {
        user_type: Role::Broker,
        user_name: format!("{}:{}", self_addr.ip, self_addr.port),
        ip_address: Some(self_addr.ip.clone()),
        port_number: Some(self_addr.port.clone()),
    };
    bm_common::wire::write_frame(&mut stream, &announce)
        .await
        .context("failed to send peer announce")?;

    let (_read_half, write_half) = stream.into_split();
    if broker.register_peer_link(target.clone(), write_half).await {
        tracing::info!(?target, "peer link established");
    } else {
        tracing::debug!(?target, "lost the race to register this peer link, dropping dial");
    }
    Ok(())
}
