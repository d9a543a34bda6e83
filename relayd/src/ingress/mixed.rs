//! Protocol auto-detection front door for Direct/Client-mode listeners: peeks
//! one byte to tell SOCKS4, SOCKS5, and plain HTTP apart before handing the
//! connection to the matching engine.
use super::{http, socks4, socks5, MAX_CONCURRENT_SESSIONS};
use relayd_core::{PeerAddr, TunnelIn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

/// Shared by every listener created in Direct/Client mode.
pub fn session_limiter() -> Arc<Semaphore> {
    Arc::new(Semaphore::new(MAX_CONCURRENT_SESSIONS))
}

pub async fn handle(conn: TcpStream, peer: PeerAddr, tunnel_in: TunnelIn, sessions: Arc<Semaphore>) {
    let permit = match sessions.try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(peer = %peer.source, "ingress session limit reached, dropping connection");
            return;
        }
    };

    let mut head = [0u8; 1];
    match conn.peek(&mut head).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    match head[0] {
        0x04 => socks4::handle(conn, peer, tunnel_in, permit).await,
        0x05 => socks5::handle(conn, peer, tunnel_in, permit).await,
        _ => http::handle(conn, peer, tunnel_in, permit).await,
    }
}
