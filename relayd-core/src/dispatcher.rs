//! Tunnel dispatcher: an unbounded queue of `RequestContext`s drained by a
//! fixed worker pool, each worker dialing the next hop and wiring up the
//! relay.
use crate::dialer::{DialOptions, Dialer};
use crate::registry::{Registry, TrackedConn};
use crate::relay::{self, RelayMode};
use relayd_proto::{Codec, Config, ConfigHandle, Metadata, RunMode};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

const SOFT_QUEUE_CAP: usize = 10_000;

/// Object-safe stand-in for `AsyncRead + AsyncWrite`: a generic bound can't
/// name an unsized trait object directly, so each concrete connection type
/// (plain TCP, TLS-wrapped TCP, a tracked connection) forwards through these
/// methods, and `Box<dyn DuplexConn>` gets its own `AsyncRead`/`AsyncWrite`
/// impl below so it can be used anywhere a generic `A: AsyncRead + AsyncWrite`
/// is expected.
pub trait DuplexConn: Send {
    fn poll_read_dyn(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>>;
    fn poll_write_dyn(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;
    fn poll_flush_dyn(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
    fn poll_shutdown_dyn(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexConn for T {
    fn poll_read_dyn(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(self, cx, buf)
    }
    fn poll_write_dyn(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(self, cx, buf)
    }
    fn poll_flush_dyn(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(self, cx)
    }
    fn poll_shutdown_dyn(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(self, cx)
    }
}

/// A boxed, type-erased duplex connection — the type every ingress engine
/// and outbound dial produces once wrapped.
pub type BoxedConn = Box<dyn DuplexConn + Unpin>;

impl AsyncRead for Box<dyn DuplexConn + Unpin> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_read_dyn(cx, buf)
    }
}

impl AsyncWrite for Box<dyn DuplexConn + Unpin> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut **self).poll_write_dyn(cx, buf)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_flush_dyn(cx)
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self).poll_shutdown_dyn(cx)
    }
}

/// A normalized request handed off from an ingress engine to the dispatcher.
pub struct RequestContext {
    pub src_conn: BoxedConn,
    pub metadata: Metadata,
    /// For HTTP-forward requests: the rewritten request line + headers.
    pub line: Option<Vec<u8>>,
    /// The protocol-specific success reply, written to `src_conn` once the
    /// outbound leg is dialed (replaces the source's `PreFn` closure — every
    /// observed use just writes a canned byte string).
    pub pre_reply: Option<Vec<u8>>,
    /// Run unconditionally when the session ends (releases an ingress
    /// concurrency permit).
    pub post_fn: Option<Box<dyn FnOnce() + Send>>,
}

pub fn worker_count() -> usize {
    let n = num_cpus::get().max(4);
    n * n
}

/// Handle producers use to submit work; cheaply cloneable.
#[derive(Clone)]
pub struct TunnelIn {
    tx: mpsc::UnboundedSender<RequestContext>,
    queue_len: Arc<AtomicUsize>,
}

impl TunnelIn {
    pub fn submit(&self, ctx: RequestContext) {
        let pending = self.queue_len.fetch_add(1, Ordering::Relaxed) + 1;
        if pending > SOFT_QUEUE_CAP {
            tracing::warn!(pending, cap = SOFT_QUEUE_CAP, "tunnel dispatcher queue over soft cap");
        }
        if self.tx.send(ctx).is_err() {
            tracing::error!("tunnel dispatcher is no longer accepting work");
        }
    }
}

/// Spawns the worker pool and returns the handle producers submit work to.
/// The returned `JoinHandle`s are for lifecycle management (tests, graceful
/// shutdown) — workers run until the channel is dropped.
pub fn start(
    config: Arc<ConfigHandle>,
    dialer: Arc<Dialer>,
    registry: Registry,
) -> (TunnelIn, Vec<tokio::task::JoinHandle<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let rx = Arc::new(Mutex::new(rx));
    let queue_len = Arc::new(AtomicUsize::new(0));

    let workers = worker_count();
    tracing::info!(workers, "starting tunnel dispatcher");

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = Arc::clone(&rx);
        let config = Arc::clone(&config);
        let dialer = Arc::clone(&dialer);
        let registry = registry.clone();
        let queue_len = Arc::clone(&queue_len);
        handles.push(tokio::spawn(async move {
            loop {
                let ctx = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                match ctx {
                    Some(ctx) => {
                        queue_len.fetch_sub(1, Ordering::Relaxed);
                        // Snapshot once per request: a reload mid-flight never
                        // changes the config a connection already in progress sees.
                        let config = config.current();
                        handle(ctx, &config, &dialer, &registry).await
                    }
                    None => return,
                }
            }
        }));
    }

    (TunnelIn { tx, queue_len }, handles)
}

async fn handle(ctx: RequestContext, config: &Config, dialer: &Dialer, registry: &Registry) {
    let RequestContext {
        mut src_conn,
        metadata,
        line,
        pre_reply,
        post_fn,
    } = ctx;

    let result = run(
        &mut src_conn,
        &metadata,
        line.as_deref(),
        pre_reply.as_deref(),
        config,
        dialer,
        registry,
    )
    .await;

    if let Err(err) = result {
        tracing::warn!(id = %metadata.id, %err, "tunnel session failed");
    }
    if let Some(post_fn) = post_fn {
        post_fn();
    }
}

async fn run(
    src_conn: &mut BoxedConn,
    metadata: &Metadata,
    line: Option<&[u8]>,
    pre_reply: Option<&[u8]>,
    config: &Config,
    dialer: &Dialer,
    registry: &Registry,
) -> io::Result<()> {
    let (target_host, target_port) = match config.run_mode {
        RunMode::Client => {
            let outbound = config
                .outbound
                .as_ref()
                .expect("client mode validated to carry an outbound server");
            (outbound.host.clone(), outbound.port)
        }
        RunMode::Direct | RunMode::Server => (metadata.target.host.clone(), metadata.target.port),
    };

    let opts = DialOptions::new()
        .with_timeout(std::time::Duration::from_secs(
            config.outbound.as_ref().map(|o| o.timeout_secs).unwrap_or(30),
        ));
    let opts = match config.outbound.as_ref().and_then(|o| o.interface.clone()) {
        Some(iface) => opts.with_interface(iface),
        None => opts,
    };
    let opts = match config.outbound.as_ref().and_then(|o| o.routing_mark) {
        Some(mark) => opts.with_routing_mark(mark),
        None => opts,
    };

    let raw = dialer
        .dial(&target_host, target_port, &opts)
        .await
        .map_err(io::Error::other)?;
    set_keepalive(&raw);

    let id = registry.join(metadata.clone());
    let tracked: BoxedConn = Box::new(TrackedConn::new(raw, id, registry.clone()));

    let mut dest_conn: BoxedConn = if config.run_mode == RunMode::Client
        && config.outbound.as_ref().is_some_and(|o| o.tls.enable)
    {
        let outbound = config.outbound.as_ref().expect("checked above");
        let name = outbound.tls.server_name.clone().unwrap_or_else(|| target_host.clone());
        Box::new(wrap_client_tls(tracked, &name).await?)
    } else {
        tracked
    };

    let codec = match config.run_mode {
        RunMode::Client => config.outbound.as_ref().and_then(codec_for_server),
        RunMode::Server => codec_for_server(&config.inbound),
        RunMode::Direct => None,
    };

    if config.run_mode == RunMode::Client {
        let codec = codec.as_ref().expect("client mode requires a tunnel token");
        codec
            .write_frame(&mut dest_conn, metadata.to_string().as_bytes())
            .await
            .map_err(io::Error::from)?;
        if let Some(line) = line {
            codec.write_frame(&mut dest_conn, line).await.map_err(io::Error::from)?;
        }
    } else if let Some(line) = line {
        dest_conn.write_all(line).await?;
    }

    if let Some(reply) = pre_reply {
        src_conn.write_all(reply).await?;
    }

    let mode = if config.run_mode == RunMode::Direct {
        RelayMode::Direct
    } else {
        RelayMode::Proxy
    };

    // Client role: src_conn is plaintext (the ingress client), dest_conn is
    // the ciphertext tunnel leg. Server role: the reverse.
    match config.run_mode {
        RunMode::Client => {
            relay::start(mode, src_conn, &mut dest_conn, codec.as_ref(), metadata).await
        }
        RunMode::Server => {
            relay::start(mode, &mut dest_conn, src_conn, codec.as_ref(), metadata).await
        }
        RunMode::Direct => {
            relay::start(mode, src_conn, &mut dest_conn, None, metadata).await
        }
    }
}

/// Builds the frame codec for a server whose `token` is set; a server with no
/// token relays plaintext (used by `[dashboard]`-style unauthenticated legs).
pub fn codec_for_server(server: &relayd_proto::Server) -> Option<Codec> {
    let _ = server.token.as_deref()?;
    let key = server.key_bytes().unwrap_or_default();
    Some(Codec::new(relayd_proto::Cipher::new(key)))
}

async fn wrap_client_tls(
    conn: BoxedConn,
    server_name: &str,
) -> io::Result<tokio_rustls::client::TlsStream<BoxedConn>> {
    let name = tokio_rustls::rustls::pki_types::ServerName::try_from(server_name.to_string())
        .map_err(io::Error::other)?;
    crate::tls::client_connector()
        .connect(name, conn)
        .await
}

fn set_keepalive(stream: &TcpStream) {
    if let Ok(sock_ref) = socket2::SockRef::try_from(stream) {
        let _ = sock_ref.set_keepalive(true);
        let _ = sock_ref.set_tcp_keepalive(
            &socket2::TcpKeepalive::new().with_time(std::time::Duration::from_secs(30)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use relayd_proto::{Address, Kind, Network};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn direct_config_handle() -> Arc<ConfigHandle> {
        let dir = std::env::temp_dir().join(format!("relayd-dispatcher-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relayd.toml");
        std::fs::write(&path, "run_mode = \"direct\"\n[inbound]\nport = 0\n").unwrap();
        ConfigHandle::load(&path).unwrap()
    }

    fn sample_metadata(target: Address) -> Metadata {
        Metadata::new(
            Network::Tcp,
            Kind::Http,
            Address::new("10.0.0.1", 1),
            Address::new("10.0.0.2", 2),
            target,
        )
    }

    #[test]
    fn codec_for_server_requires_token() {
        let untokened = relayd_proto::Server {
            host: "0.0.0.0".into(),
            port: 1080,
            token: None,
            tls: Default::default(),
            timeout_secs: 5,
            interface: None,
            routing_mark: None,
        };
        assert!(codec_for_server(&untokened).is_none());

        let tokened = relayd_proto::Server {
            token: Some("YS1zaGFyZWQtc2VjcmV0".into()),
            ..untokened
        };
        assert!(codec_for_server(&tokened).is_some());
    }

    #[tokio::test]
    async fn direct_mode_dials_target_and_relays() {
        let target_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target_listener.local_addr().unwrap();
        let target_task = tokio::spawn(async move {
            let (mut conn, _) = target_listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            conn.write_all(b"world").await.unwrap();
        });

        let resolver = Arc::new(Resolver::new(&[], &std::collections::HashMap::new()).unwrap());
        let dialer = Arc::new(Dialer::new(resolver));
        let registry = Registry::new();
        let config = direct_config_handle();

        let (tunnel_in, _workers) = start(config, dialer, registry);

        let (client_side, mut src_conn) = tokio::io::duplex(64);
        let metadata = sample_metadata(Address::new(
            target_addr.ip().to_string(),
            target_addr.port(),
        ));
        tunnel_in.submit(RequestContext {
            src_conn: Box::new(client_side),
            metadata,
            line: None,
            pre_reply: None,
            post_fn: None,
        });

        src_conn.write_all(b"hello").await.unwrap();
        let mut reply = [0u8; 5];
        src_conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"world");

        target_task.await.unwrap();
    }
}
