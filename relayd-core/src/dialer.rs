//! Outbound TCP dialing with optional source-interface binding and routing
//! mark, functional-options style.
use crate::error::DialError;
use crate::resolver::Resolver;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    pub interface: Option<String>,
    pub routing_mark: Option<i32>,
    pub timeout: Option<Duration>,
}

impl DialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface(mut self, iface: impl Into<String>) -> Self {
        self.interface = Some(iface.into());
        self
    }

    pub fn with_routing_mark(mut self, mark: i32) -> Self {
        self.routing_mark = Some(mark);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn timeout_or_default(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Resolves `host:port` via `resolver`, then dials the first address that
/// connects, honoring interface/routing-mark/timeout options.
pub async fn dial_tcp(
    host: &str,
    port: u16,
    resolver: &Resolver,
    opts: &DialOptions,
) -> Result<TcpStream, DialError> {
    let ip = resolver.resolve_ip(host).await?;
    let addr = SocketAddr::new(ip, port);
    dial_socket_addr(addr, opts).await
}

/// Dials a concrete socket address, skipping resolution. Used by the direct
/// and server-role paths, which already carry a resolved target.
pub async fn dial_socket_addr(
    addr: SocketAddr,
    opts: &DialOptions,
) -> Result<TcpStream, DialError> {
    let socket = build_socket(addr, opts)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        #[cfg(unix)]
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(DialError::Io(e)),
    }
    let stream = TcpStream::from_std(socket.into()).map_err(DialError::Io)?;
    tokio::time::timeout(opts.timeout_or_default(), stream.writable())
        .await
        .map_err(|_| DialError::Timeout(opts.timeout_or_default()))?
        .map_err(DialError::Io)?;
    if let Some(e) = stream.take_error().map_err(DialError::Io)? {
        return Err(DialError::Io(e));
    }
    Ok(stream)
}

fn build_socket(addr: SocketAddr, opts: &DialOptions) -> Result<Socket, DialError> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(DialError::Io)?;
    socket.set_nonblocking(true).map_err(DialError::Io)?;

    if let Some(iface) = &opts.interface {
        bind_to_interface(&socket, iface)?;
    }
    if let Some(mark) = opts.routing_mark {
        set_routing_mark(&socket, mark)?;
    }
    Ok(socket)
}

#[cfg(target_os = "linux")]
fn bind_to_interface(socket: &Socket, iface: &str) -> Result<(), DialError> {
    socket
        .bind_device(Some(iface.as_bytes()))
        .map_err(|e| DialError::Interface(iface.to_string(), e))
}

#[cfg(not(target_os = "linux"))]
fn bind_to_interface(_socket: &Socket, _iface: &str) -> Result<(), DialError> {
    // Interface pinning is a Linux-specific affordance; a no-op elsewhere.
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_routing_mark(socket: &Socket, mark: i32) -> Result<(), DialError> {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_MARK,
            &mark as *const i32 as *const core::ffi::c_void,
            core::mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(DialError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_routing_mark(_socket: &Socket, _mark: i32) -> Result<(), DialError> {
    // Routing marks are a Linux (SO_MARK) affordance; a no-op elsewhere.
    Ok(())
}

/// Shared dialer bound to a resolver, handed to the dispatcher.
#[derive(Clone)]
pub struct Dialer {
    pub resolver: Arc<Resolver>,
}

impl Dialer {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    pub async fn dial(
        &self,
        host: &str,
        port: u16,
        opts: &DialOptions,
    ) -> Result<TcpStream, DialError> {
        dial_tcp(host, port, &self.resolver, opts).await
    }
}
