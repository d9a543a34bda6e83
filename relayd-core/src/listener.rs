//! TCP accept loop with PROXY-protocol v1/v2 header parsing and graceful
//! shutdown. Each accepted connection is handed to the registered handler on
//! its own task; `shutdown(deadline)` stops accepting and waits for the
//! outstanding handler count to drain.
use crate::error::LifecycleError;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// The real peer address for an accepted connection: either the TCP peer
/// itself, or the address a PROXY-protocol header reported on its behalf.
#[derive(Debug, Clone, Copy)]
pub struct PeerAddr {
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// Listens on `addr`, running `handler` as a new task per accepted
/// connection. Returns a handle used to request shutdown.
pub struct Listener {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    outstanding: Arc<AtomicUsize>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl Listener {
    pub async fn bind<F, Fut>(addr: SocketAddr, handler: F) -> std::io::Result<Self>
    where
        F: Fn(TcpStream, PeerAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let tcp = TcpListener::bind(addr).await?;
        let local_addr = tcp.local_addr()?;
        tracing::info!(addr = %local_addr, "tcp listener bound");

        let shutdown = Arc::new(Notify::new());
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let accept_task = {
            let shutdown = Arc::clone(&shutdown);
            let stopped = Arc::clone(&stopped);
            let outstanding = Arc::clone(&outstanding);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => {
                            stopped.store(true, Ordering::SeqCst);
                            return;
                        }
                        accepted = tcp.accept() => {
                            let (stream, raw_peer) = match accepted {
                                Ok(pair) => pair,
                                Err(err) => {
                                    tracing::warn!(%err, "accept failed");
                                    continue;
                                }
                            };
                            let handler = Arc::clone(&handler);
                            let outstanding = Arc::clone(&outstanding);
                            outstanding.fetch_add(1, Ordering::SeqCst);
                            tokio::spawn(async move {
                                let peer = match read_proxy_header(&stream, raw_peer).await {
                                    Ok((peer, _consumed)) => peer,
                                    Err(err) => {
                                        tracing::warn!(%err, "proxy-protocol header rejected");
                                        outstanding.fetch_sub(1, Ordering::SeqCst);
                                        return;
                                    }
                                };
                                handler(stream, peer).await;
                                outstanding.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                    }
                }
            })
        };

        Ok(Self {
            local_addr,
            shutdown,
            stopped,
            outstanding,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new connections and waits up to `deadline` for
    /// in-flight handlers to finish.
    pub async fn shutdown(self, deadline: Duration) -> Result<(), LifecycleError> {
        self.shutdown.notify_one();
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            while !self.stopped.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await;
        self.accept_task.abort();

        let wait_for_drain = async {
            while self.outstanding.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        match tokio::time::timeout(deadline, wait_for_drain).await {
            Ok(()) => {
                tracing::info!("listener shut down cleanly");
                Ok(())
            }
            Err(_) => Err(LifecycleError::ShutdownTimeout(
                self.outstanding.load(Ordering::SeqCst),
            )),
        }
    }
}

/// Peeks the PROXY-protocol header, if any, off the front of `stream` without
/// disturbing the application bytes that follow it. Connections with no
/// recognized header fall back to the raw TCP peer address.
async fn read_proxy_header(
    stream: &TcpStream,
    raw_peer: SocketAddr,
) -> std::io::Result<(PeerAddr, usize)> {
    let mut probe = [0u8; 232];
    let n = stream.peek(&mut probe).await?;
    let local = stream.local_addr().unwrap_or(raw_peer);

    if let Some((peer, consumed)) = parse_v2(&probe[..n]) {
        drain(stream, consumed).await?;
        return Ok((peer, consumed));
    }
    if let Some((peer, consumed)) = parse_v1(&probe[..n]) {
        drain(stream, consumed).await?;
        return Ok((peer, consumed));
    }

    Ok((
        PeerAddr {
            source: raw_peer,
            destination: local,
        },
        0,
    ))
}

async fn drain(stream: &TcpStream, n: usize) -> std::io::Result<()> {
    let mut discard = vec![0u8; n];
    let mut remaining = n;
    while remaining > 0 {
        let r = stream.try_read(&mut discard[..remaining]).or_else(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                Ok(0)
            } else {
                Err(e)
            }
        })?;
        if r == 0 {
            // peer() already guaranteed these bytes are buffered; a transient
            // WouldBlock just means the read needs another poll turn.
            tokio::task::yield_now().await;
            continue;
        }
        remaining -= r;
    }
    Ok(())
}

const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Parses a binary PROXY protocol v2 header (spec §2.2 of the PROXY protocol
/// standard): 12-byte signature, version/command byte, family/transport
/// byte, 2-byte big-endian address-block length, then the address block.
fn parse_v2(buf: &[u8]) -> Option<(PeerAddr, usize)> {
    if buf.len() < 16 || buf[..12] != V2_SIGNATURE {
        return None;
    }
    let ver_cmd = buf[12];
    if ver_cmd >> 4 != 2 {
        return None;
    }
    let command = ver_cmd & 0x0F;
    let fam_proto = buf[13];
    let address_family = fam_proto >> 4;
    let addr_len = u16::from_be_bytes([buf[14], buf[15]]) as usize;
    let total = 16 + addr_len;
    if buf.len() < total {
        return None;
    }
    if command == 0 {
        // LOCAL command: health check, no proxied address; caller keeps the
        // raw TCP peer.
        return None;
    }
    let body = &buf[16..total];
    let (source, destination) = match address_family {
        1 if body.len() >= 12 => {
            let src_ip = std::net::Ipv4Addr::new(body[0], body[1], body[2], body[3]);
            let dst_ip = std::net::Ipv4Addr::new(body[4], body[5], body[6], body[7]);
            let src_port = u16::from_be_bytes([body[8], body[9]]);
            let dst_port = u16::from_be_bytes([body[10], body[11]]);
            (
                SocketAddr::new(src_ip.into(), src_port),
                SocketAddr::new(dst_ip.into(), dst_port),
            )
        }
        2 if body.len() >= 36 => {
            let mut src_octets = [0u8; 16];
            src_octets.copy_from_slice(&body[0..16]);
            let mut dst_octets = [0u8; 16];
            dst_octets.copy_from_slice(&body[16..32]);
            let src_port = u16::from_be_bytes([body[32], body[33]]);
            let dst_port = u16::from_be_bytes([body[34], body[35]]);
            (
                SocketAddr::new(std::net::Ipv6Addr::from(src_octets).into(), src_port),
                SocketAddr::new(std::net::Ipv6Addr::from(dst_octets).into(), dst_port),
            )
        }
        _ => return None,
    };
    Some((PeerAddr { source, destination }, total))
}

/// Parses a textual PROXY protocol v1 header: `PROXY TCP4|TCP6 src dst
/// sport dport\r\n`, or `PROXY UNKNOWN\r\n`.
fn parse_v1(buf: &[u8]) -> Option<(PeerAddr, usize)> {
    let text = std::str::from_utf8(buf).ok()?;
    let line_end = text.find("\r\n")?;
    let line = &text[..line_end];
    let consumed = line_end + 2;

    let mut parts = line.split(' ');
    if parts.next()? != "PROXY" {
        return None;
    }
    let proto = parts.next()?;
    if proto == "UNKNOWN" {
        return None;
    }
    if proto != "TCP4" && proto != "TCP6" {
        return None;
    }
    let src_ip: std::net::IpAddr = parts.next()?.parse().ok()?;
    let dst_ip: std::net::IpAddr = parts.next()?.parse().ok()?;
    let src_port: u16 = parts.next()?.parse().ok()?;
    let dst_port: u16 = parts.next()?.parse().ok()?;

    Some((
        PeerAddr {
            source: SocketAddr::new(src_ip, src_port),
            destination: SocketAddr::new(dst_ip, dst_port),
        },
        consumed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream as ClientStream;

    #[tokio::test]
    async fn listener_accepts_and_dispatches_without_proxy_header() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), move |mut conn, peer| {
            let tx = tx.clone();
            async move {
                let mut buf = [0u8; 4];
                let _ = conn.read_exact(&mut buf).await;
                let _ = tx.send(peer.source.ip());
            }
        })
        .await
        .unwrap();

        let addr = listener.local_addr();
        let mut client = ClientStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();

        let observed = rx.recv().await.unwrap();
        assert!(observed.is_loopback());

        listener.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn listener_parses_proxy_v1_header() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), move |mut conn, peer| {
            let tx = tx.clone();
            async move {
                let mut buf = [0u8; 3];
                let _ = conn.read_exact(&mut buf).await;
                let _ = tx.send(peer);
            }
        })
        .await
        .unwrap();

        let addr = listener.local_addr();
        let mut client = ClientStream::connect(addr).await.unwrap();
        client
            .write_all(b"PROXY TCP4 203.0.113.7 198.51.100.1 51234 443\r\nfoo")
            .await
            .unwrap();

        let peer = rx.recv().await.unwrap();
        assert_eq!(peer.source.ip(), "203.0.113.7".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(peer.source.port(), 51234);
        assert_eq!(peer.destination.port(), 443);

        listener.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn parse_v1_rejects_unknown() {
        assert!(parse_v1(b"PROXY UNKNOWN\r\n").is_none());
    }

    #[test]
    fn parse_v1_rejects_non_header_bytes() {
        assert!(parse_v1(b"GET / HTTP/1.1\r\n").is_none());
    }

    #[test]
    fn parse_v2_rejects_short_buffer() {
        assert!(parse_v2(b"too short").is_none());
    }
}
