pub mod dialer;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod tls;

pub use dialer::{DialOptions, Dialer};
pub use dispatcher::{codec_for_server, BoxedConn, DuplexConn, RequestContext, TunnelIn};
pub use error::{DialError, LifecycleError, ResolveError};
pub use listener::{Listener, PeerAddr};
pub use registry::{ConnectionInfo, Registry, TrackedConn};
pub use relay::RelayMode;
pub use resolver::Resolver;
pub use tls::TlsSetupError;
