pub mod cipher;
pub mod codec;
pub mod config;
pub mod error;
pub mod metadata;
pub mod reload;

pub use cipher::Cipher;
pub use codec::{Codec, Packet};
pub use config::{Config, ConfigError, Dns, Log, RunMode, Server, TlsConfig, TlsFingerprint};
pub use error::{CodecError, FramingError, MetadataError};
pub use metadata::{Address, Kind, Metadata, Network};
pub use reload::ConfigHandle;
