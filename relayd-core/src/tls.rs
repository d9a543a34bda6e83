//! TLS material loading for the `[inbound]`/`[outbound]` `tls` blocks. Server
//! role terminates TLS on accept; client role wraps its outbound dial in TLS
//! when the peer server requires it.
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

#[derive(Debug, thiserror::Error)]
pub enum TlsSetupError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} contains no certificates")]
    NoCertificates { path: String },
    #[error("{path} contains no private key")]
    NoPrivateKey { path: String },
    #[error(transparent)]
    Rustls(#[from] tokio_rustls::rustls::Error),
}

fn read_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let file = std::fs::File::open(path).map_err(|source| TlsSetupError::Read {
        path: path.to_string(),
        source,
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsSetupError::Read {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsSetupError::NoCertificates { path: path.to_string() });
    }
    Ok(certs)
}

fn read_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsSetupError> {
    let file = std::fs::File::open(path).map_err(|source| TlsSetupError::Read {
        path: path.to_string(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsSetupError::Read {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsSetupError::NoPrivateKey { path: path.to_string() })
}

/// Builds an acceptor for a server-role `[inbound]` block with `tls.enable = true`.
pub fn server_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, TlsSetupError> {
    let certs = read_certs(cert_path)?;
    let key = read_private_key(key_path)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Builds a connector for a client-role `[outbound]` block with `tls.enable =
/// true`. Fingerprint spoofing (the original's uTLS ClientHello mimicry) has
/// no equivalent in the corpus's crate set, so this is a standard rustls
/// handshake; `tls.fingerprint` is parsed and retained in configuration but
/// does not change the handshake shape.
pub fn client_connector() -> TlsConnector {
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
