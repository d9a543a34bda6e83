//! The normalized request descriptor that flows through the whole pipeline and,
//! serialized, forms the first frame of every client-to-server tunnel stream.

use crate::error::MetadataError;
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// Transport-layer network kind. Only `Tcp` is ever relayed; `Udp` appears only
/// in DNS lookups and the SOCKS5 UDP-associate advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Udp,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        })
    }
}

impl std::str::FromStr for Network {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "udp" => Ok(Network::Udp),
            other => Err(MetadataError::BadNetwork(other.to_string())),
        }
    }
}

/// Which ingress engine produced this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::Http => "HTTP",
            Kind::Https => "HTTPS",
            Kind::Socks4 => "SOCKS4",
            Kind::Socks5 => "SOCKS5",
        })
    }
}

impl std::str::FromStr for Kind {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP" => Ok(Kind::Http),
            "HTTPS" => Ok(Kind::Https),
            "SOCKS4" => Ok(Kind::Socks4),
            "SOCKS5" => Ok(Kind::Socks5),
            other => Err(MetadataError::BadKind(other.to_string())),
        }
    }
}

/// A host:port pair where `host` may be an IP literal or a DNS name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for Address {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| MetadataError::BadAddress(s.to_string(), "missing ':'".into()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| MetadataError::BadAddress(s.to_string(), "bad port".into()))?;
        Ok(Address::new(host, port))
    }
}

/// Normalized per-connection descriptor, immutable once populated.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub id: Uuid,
    pub network: Network,
    pub kind: Kind,
    pub client: Address,
    pub source: Address,
    pub target: Address,
}

impl Metadata {
    pub fn new(network: Network, kind: Kind, client: Address, source: Address, target: Address) -> Self {
        Self {
            id: Uuid::new_v4(),
            network,
            kind,
            client,
            source,
            target,
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{}#{}#{}",
            self.network, self.kind, self.client, self.source, self.target
        )
    }
}

impl std::str::FromStr for Metadata {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('#').collect();
        if fields.len() != 5 {
            return Err(MetadataError::WrongFieldCount(fields.len()));
        }
        let network: Network = fields[0].parse()?;
        let kind: Kind = fields[1].parse()?;
        let client: Address = fields[2].parse()?;
        let source: Address = fields[3].parse()?;
        let target: Address = fields[4].parse()?;
        Ok(Metadata {
            id: Uuid::new_v4(),
            network,
            kind,
            client,
            source,
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_through_wire_string() {
        let m = Metadata::new(
            Network::Tcp,
            Kind::Https,
            Address::new("203.0.113.5", 51515),
            Address::new("10.0.0.1", 1080),
            Address::new("example.com", 443),
        );
        let wire = m.to_string();
        assert_eq!(wire, "tcp#HTTPS#203.0.113.5:51515#10.0.0.1:1080#example.com:443");

        let parsed: Metadata = wire.parse().unwrap();
        assert_eq!(parsed.network, m.network);
        assert_eq!(parsed.kind, m.kind);
        assert_eq!(parsed.target, m.target);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = "tcp#HTTP#a:1#b:2".parse::<Metadata>().unwrap_err();
        assert!(matches!(err, MetadataError::WrongFieldCount(4)));
    }

    #[test]
    fn rejects_unknown_network() {
        let err = "sctp#HTTP#a:1#b:2#c:3".parse::<Metadata>().unwrap_err();
        assert!(matches!(err, MetadataError::BadNetwork(_)));
    }
}
