//! Ingress protocol engines: HTTP forward/CONNECT, SOCKS4/4a, SOCKS5, the
//! `mixed` auto-detecting front door used in Direct/Client mode, and the
//! server-role tunnel-frame decoder.
pub mod http;
pub mod mixed;
pub mod socks4;
pub mod socks5;
pub mod tunnel;

use relayd_core::{BoxedConn, PeerAddr, RequestContext, TunnelIn};
use relayd_proto::{Address, Kind, Metadata, Network};
use tokio::sync::OwnedSemaphorePermit;

/// Ceiling on simultaneously in-flight ingress sessions per listener; past
/// this, new connections are rejected outright rather than queued.
pub const MAX_CONCURRENT_SESSIONS: usize = 4096;

fn build_metadata(kind: Kind, peer: PeerAddr, target: Address) -> Metadata {
    Metadata::new(Network::Tcp, kind, peer.source.into(), peer.destination.into(), target)
}

/// Hands a parsed request to the dispatcher, wiring the held concurrency
/// permit into `post_fn` so it's released once the relay finishes (not when
/// this ingress handler returns).
fn submit(
    tunnel_in: &TunnelIn,
    src_conn: BoxedConn,
    metadata: Metadata,
    line: Option<Vec<u8>>,
    pre_reply: Option<Vec<u8>>,
    permit: OwnedSemaphorePermit,
) {
    tunnel_in.submit(RequestContext {
        src_conn,
        metadata,
        line,
        pre_reply,
        post_fn: Some(Box::new(move || drop(permit))),
    });
}
