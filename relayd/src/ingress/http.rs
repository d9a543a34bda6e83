//! HTTP forward-proxy ingress: CONNECT tunnelling for HTTPS and header
//! rewriting for plain HTTP requests forwarded in the clear.
use super::{build_metadata, submit};
use httpdate::fmt_http_date;
use relayd_core::{BoxedConn, PeerAddr, TunnelIn};
use relayd_proto::{Address, Kind};
use std::time::SystemTime;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;

const PROXY_AUTHORIZATION: &str = "Proxy-Authorization:";

pub async fn handle(mut conn: TcpStream, peer: PeerAddr, tunnel_in: TunnelIn, permit: OwnedSemaphorePermit) {
    let mut buf = vec![0u8; 8192];
    let n = match conn.read(&mut buf).await {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
    let lines: Vec<&str> = text.split("\r\n").collect();
    if lines.len() < 2 {
        tracing::debug!(peer = %peer.source, "http request line error");
        return;
    }

    let request_line: Vec<&str> = lines[0].splitn(3, ' ').collect();
    if request_line.len() < 3 {
        write_not_found(&mut conn).await;
        return;
    }
    let method = request_line[0].to_string();
    let target = request_line[1].to_string();
    let version = request_line[2].to_string();

    if method.eq_ignore_ascii_case("CONNECT") {
        let Some((host, port)) = parse_host_port(&target, 443) else {
            tracing::debug!(peer = %peer.source, %target, "bad CONNECT target");
            return;
        };
        let metadata = build_metadata(Kind::Https, peer, Address::new(host, port));
        let src_conn: BoxedConn = Box::new(conn);
        submit(&tunnel_in, src_conn, metadata, None, Some(connect_established()), permit);
        return;
    }

    let Some(rest) = target.splitn(2, "//").nth(1) else {
        return;
    };
    if rest.is_empty() {
        write_not_found(&mut conn).await;
        return;
    }
    let (host_port, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let Some((host, port)) = parse_host_port(host_port, 80) else {
        tracing::debug!(peer = %peer.source, %host_port, "bad forward-proxy target");
        return;
    };

    let mut header = String::new();
    for line in &lines[1..] {
        if line.is_empty() {
            break;
        }
        if line.starts_with(PROXY_AUTHORIZATION) {
            continue;
        }
        let line = line.strip_prefix("Proxy-").unwrap_or(line);
        header.push_str(line);
        header.push_str("\r\n");
    }
    let rewritten = format!("{method} {path} {version}\r\n{header}");

    let metadata = build_metadata(Kind::Http, peer, Address::new(host, port));
    let src_conn: BoxedConn = Box::new(conn);
    submit(&tunnel_in, src_conn, metadata, Some(rewritten.into_bytes()), None, permit);
}

fn parse_host_port(host_port: &str, default_port: u16) -> Option<(String, u16)> {
    match host_port.rsplit_once(':') {
        Some((host, port)) => port.parse().ok().map(|p| (host.to_string(), p)),
        None if !host_port.is_empty() => Some((host_port.to_string(), default_port)),
        None => None,
    }
}

fn connect_established() -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK Connection Established\r\nDate: {}\r\nTransfer-Encoding: chunked\r\n\r\n",
        fmt_http_date(SystemTime::now())
    )
    .into_bytes()
}

async fn write_not_found(conn: &mut TcpStream) {
    use tokio::io::AsyncWriteExt;
    let _ = conn.write_all(&crate::fallback::not_found_response()).await;
}
