//! Parses nameserver URIs from configuration: `udp://host[:53]`,
//! `tcp://host[:53]`, `tls://host[:853]`, `https://host/path`. A trailing
//! `#iface` fragment pins egress to a named interface.
use crate::error::ResolveError;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsTransport {
    Udp,
    Tcp,
    Tls,
    Https,
}

#[derive(Debug, Clone)]
pub struct NameServer {
    pub transport: NsTransport,
    pub host: String,
    pub port: u16,
    /// Present only for `https://`: the request path, e.g. `/dns-query`.
    pub path: Option<String>,
    pub interface: Option<String>,
}

impl NameServer {
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let url = Url::parse(raw)
            .map_err(|e| ResolveError::BadNameServer(raw.to_string(), e.to_string()))?;

        let transport = match url.scheme() {
            "udp" => NsTransport::Udp,
            "tcp" => NsTransport::Tcp,
            "tls" => NsTransport::Tls,
            "https" => NsTransport::Https,
            other => {
                return Err(ResolveError::BadNameServer(
                    raw.to_string(),
                    format!("unsupported scheme '{other}'"),
                ))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| ResolveError::BadNameServer(raw.to_string(), "missing host".into()))?
            .to_string();

        let default_port = match transport {
            NsTransport::Udp | NsTransport::Tcp => 53,
            NsTransport::Tls => 853,
            NsTransport::Https => 443,
        };
        let port = url.port().unwrap_or(default_port);

        let path = matches!(transport, NsTransport::Https).then(|| {
            let p = url.path();
            if p.is_empty() { "/dns-query".to_string() } else { p.to_string() }
        });

        let interface = url.fragment().map(|s| s.to_string());

        Ok(NameServer {
            transport,
            host,
            port,
            path,
            interface,
        })
    }

    pub fn is_ip_literal(&self) -> bool {
        self.host.parse::<std::net::IpAddr>().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udp_with_default_port() {
        let ns = NameServer::parse("udp://8.8.8.8").unwrap();
        assert_eq!(ns.transport, NsTransport::Udp);
        assert_eq!(ns.port, 53);
    }

    #[test]
    fn parses_tls_with_explicit_port_and_iface() {
        let ns = NameServer::parse("tls://1.1.1.1:853#eth0").unwrap();
        assert_eq!(ns.transport, NsTransport::Tls);
        assert_eq!(ns.interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn parses_https_with_path() {
        let ns = NameServer::parse("https://dns.google/dns-query").unwrap();
        assert_eq!(ns.transport, NsTransport::Https);
        assert_eq!(ns.path.as_deref(), Some("/dns-query"));
        assert_eq!(ns.port, 443);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(NameServer::parse("quic://1.1.1.1").is_err());
    }

    #[test]
    fn detects_ip_literal_host() {
        let ns = NameServer::parse("udp://8.8.8.8").unwrap();
        assert!(ns.is_ip_literal());
        let ns = NameServer::parse("https://dns.google/dns-query").unwrap();
        assert!(!ns.is_ip_literal());
    }
}
