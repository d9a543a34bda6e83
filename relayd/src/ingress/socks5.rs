//! SOCKS5 ingress: no-auth-only negotiation plus CONNECT/BIND requests. UDP
//! ASSOCIATE is acknowledged then discarded — there is no UDP relay, matching
//! the protocol this was modeled on.
use super::{build_metadata, submit};
use relayd_core::{BoxedConn, PeerAddr, TunnelIn};
use relayd_proto::{Address, Kind};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;

const VERSION: u8 = 0x05;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;
const CMD_BIND: u8 = 0x02;
const CMD_UDP: u8 = 0x03;

pub async fn handle(mut conn: TcpStream, peer: PeerAddr, tunnel_in: TunnelIn, permit: OwnedSemaphorePermit) {
    if let Err(err) = negotiate(&mut conn).await {
        tracing::debug!(peer = %peer.source, %err, "socks5 negotiation failed");
        return;
    }

    let (command, target) = match read_request(&mut conn).await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::debug!(peer = %peer.source, %err, "socks5 request malformed");
            return;
        }
    };

    match command {
        CMD_CONNECT | CMD_BIND => {
            let metadata = build_metadata(Kind::Socks5, peer, target);
            let reply = vec![0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01];
            let src_conn: BoxedConn = Box::new(conn);
            submit(&tunnel_in, src_conn, metadata, None, Some(reply), permit);
        }
        CMD_UDP => {
            let mut reply = vec![VERSION, 0x00, 0x00, ATYP_IPV4];
            reply.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets());
            reply.extend_from_slice(&0u16.to_be_bytes());
            if conn.write_all(&reply).await.is_err() {
                return;
            }
            // No UDP relay: hold the control connection open, discarding
            // whatever arrives, until the client closes it.
            let mut sink = [0u8; 256];
            while matches!(conn.read(&mut sink).await, Ok(n) if n > 0) {}
        }
        other => {
            tracing::debug!(peer = %peer.source, command = other, "socks5 command unsupported");
        }
    }
}

async fn negotiate(conn: &mut TcpStream) -> std::io::Result<()> {
    let mut header = [0u8; 2];
    conn.read_exact(&mut header).await?;
    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    conn.read_exact(&mut methods).await?;
    // No credential check: every client is accepted via the no-auth method.
    conn.write_all(&[VERSION, 0x00]).await
}

async fn read_request(conn: &mut TcpStream) -> std::io::Result<(u8, Address)> {
    let mut head = [0u8; 4];
    conn.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad socks5 version"));
    }
    let command = head[1];
    let atyp = head[3];

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            conn.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            conn.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            conn.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            conn.read_exact(&mut domain).await?;
            String::from_utf8(domain)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad domain"))?
        }
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported address type {other}"),
            ))
        }
    };
    let mut port = [0u8; 2];
    conn.read_exact(&mut port).await?;
    let port = u16::from_be_bytes(port);

    Ok((command, Address::new(host, port)))
}
