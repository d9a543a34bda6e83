//! SOCKS4 / SOCKS4a ingress. The handshake is read incrementally so a
//! TCP-fragmented request is tolerated — reading stops once as many NUL
//! terminators have arrived as the variant requires, rather than assuming
//! the whole request lands in one read.
use super::{build_metadata, submit};
use relayd_core::{BoxedConn, PeerAddr, TunnelIn};
use relayd_proto::{Address, Kind};
use std::net::Ipv4Addr;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;

const CMD_CONNECT: u8 = 0x01;
const MAX_REQUEST: usize = 4096;

pub async fn handle(mut conn: TcpStream, peer: PeerAddr, tunnel_in: TunnelIn, permit: OwnedSemaphorePermit) {
    let request = match read_request(&mut conn).await {
        Ok(buf) => buf,
        Err(err) => {
            tracing::debug!(peer = %peer.source, %err, "socks4 handshake failed");
            return;
        }
    };

    let Some((command, port, host)) = parse_request(&request) else {
        tracing::debug!(peer = %peer.source, "socks4 request malformed");
        return;
    };
    if command != CMD_CONNECT {
        tracing::debug!(peer = %peer.source, command, "socks4 command unsupported");
        return;
    }

    let metadata = build_metadata(Kind::Socks4, peer, Address::new(host, port));
    let src_conn: BoxedConn = Box::new(conn);
    let reply = vec![0x00, 0x5A, 0x00, 0x00, 0, 0, 0, 0];
    submit(&tunnel_in, src_conn, metadata, None, Some(reply), permit);
}

/// Reads chunks until all NUL terminators the request needs have arrived:
/// one ends the (ignored) userid field, SOCKS4a adds a second for the
/// domain name that follows the `0.0.0.x` placeholder address.
async fn read_request(conn: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_REQUEST];
    let mut filled = 0;
    loop {
        let n = conn.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "socks4 handshake truncated",
            ));
        }
        filled += n;
        if filled < 8 {
            continue;
        }
        let is_socks4a = buf[4] == 0 && buf[5] == 0 && buf[6] == 0 && buf[7] != 0;
        let needed_nulls = if is_socks4a { 2 } else { 1 };
        let seen_nulls = buf[7..filled].iter().filter(|&&b| b == 0).count();
        if seen_nulls >= needed_nulls {
            buf.truncate(filled);
            return Ok(buf);
        }
        if filled >= MAX_REQUEST {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "socks4 handshake too long",
            ));
        }
    }
}

fn parse_request(buf: &[u8]) -> Option<(u8, u16, String)> {
    if buf.len() < 9 || buf[0] != 0x04 {
        return None;
    }
    let command = buf[1];
    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);

    let rest = &buf[8..];
    let user_end = rest.iter().position(|&b| b == 0)?;
    let octets = ip.octets();
    let is_socks4a = octets[0] == 0 && octets[1] == 0 && octets[2] == 0 && octets[3] != 0;

    if is_socks4a {
        let domain_rest = &rest[user_end + 1..];
        let domain_end = domain_rest.iter().position(|&b| b == 0)?;
        let host = String::from_utf8(domain_rest[..domain_end].to_vec()).ok()?;
        Some((command, port, host))
    } else {
        Some((command, port, ip.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_socks4_connect() {
        let mut buf = vec![0x04, CMD_CONNECT, 0x00, 0x50];
        buf.extend_from_slice(&[93, 184, 216, 34]); // example.com's old IP
        buf.extend_from_slice(b"user\0");
        let (command, port, host) = parse_request(&buf).unwrap();
        assert_eq!(command, CMD_CONNECT);
        assert_eq!(port, 80);
        assert_eq!(host, "93.184.216.34");
    }

    #[test]
    fn parses_socks4a_with_domain() {
        let mut buf = vec![0x04, CMD_CONNECT, 0x01, 0xBB];
        buf.extend_from_slice(&[0, 0, 0, 1]);
        buf.extend_from_slice(b"user\0");
        buf.extend_from_slice(b"example.com\0");
        let (command, port, host) = parse_request(&buf).unwrap();
        assert_eq!(command, CMD_CONNECT);
        assert_eq!(port, 443);
        assert_eq!(host, "example.com");
    }

    #[test]
    fn rejects_wrong_version() {
        let buf = vec![0x05, CMD_CONNECT, 0x00, 0x50, 0, 0, 0, 1, 0];
        assert!(parse_request(&buf).is_none());
    }

    #[test]
    fn rejects_missing_userid_terminator() {
        let buf = vec![0x04, CMD_CONNECT, 0x00, 0x50, 1, 2, 3, 4];
        assert!(parse_request(&buf).is_none());
    }
}
