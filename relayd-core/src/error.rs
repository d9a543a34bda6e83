use std::io;

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("dial timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("failed to bind to interface {0}: {1}")]
    Interface(String, #[source] io::Error),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Tls(#[from] rustls::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no IP address found for {0}")]
    IpNotFound(String),
    #[error("all DNS requests failed: {0}")]
    AllFailed(String),
    #[error("DNS-over-HTTPS transport error: {0}")]
    Doh(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid nameserver URI '{0}': {1}")]
    BadNameServer(String, String),
    #[error("DNS exchange timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("shutdown timed out waiting for {0} outstanding handlers")]
    ShutdownTimeout(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}
