//! Per-transport DNS exchange. Built directly on `hickory-proto`'s wire
//! message types rather than `hickory-resolver`'s high-level client, since the
//! resolver here does its own racing and caching.
use crate::error::ResolveError;
use crate::resolver::nameserver::{NameServer, NsTransport};
use crate::resolver::Resolver;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig as RustlsClientConfig;
use tokio_rustls::TlsConnector;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn build_query(name: &str, qtype: RecordType) -> Result<Message, ResolveError> {
    let name = Name::from_str(name)
        .map_err(|e| ResolveError::Doh(format!("invalid dns name '{name}': {e}")))?;
    let mut query = Query::new();
    query.set_name(name).set_query_class(DNSClass::IN).set_query_type(qtype);

    let mut message = Message::new();
    message
        .set_id(0)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(query);
    Ok(message)
}

pub fn answers_to_ips(msg: &Message) -> Vec<IpAddr> {
    msg.answers()
        .iter()
        .filter_map(|record: &Record| match record.data() {
            Some(RData::A(addr)) => Some(IpAddr::V4((*addr).into())),
            Some(RData::AAAA(addr)) => Some(IpAddr::V6((*addr).into())),
            _ => None,
        })
        .collect()
}

/// TTL to cache the response under: the first record's TTL from whichever of
/// Answer/Ns/Additional is non-empty, in that priority order. `None` means
/// the response carried no records at all and shouldn't be cached.
pub fn cache_ttl(msg: &Message) -> Option<u32> {
    msg.answers()
        .first()
        .or_else(|| msg.name_servers().first())
        .or_else(|| msg.additionals().first())
        .map(|r| r.ttl())
}

fn is_failure(msg: &Message) -> bool {
    use hickory_proto::op::ResponseCode;
    matches!(
        msg.response_code(),
        ResponseCode::ServFail | ResponseCode::Refused
    )
}

/// Exchanges one query against a single configured nameserver. `resolver` is
/// the owning `Resolver` itself, threaded down so the DoH transport can
/// resolve its own host through it rather than the system resolver.
pub async fn exchange(
    ns: &NameServer,
    query: Message,
    resolver: &Resolver,
) -> Result<Message, ResolveError> {
    let response = match ns.transport {
        NsTransport::Udp => exchange_udp(ns, &query).await?,
        NsTransport::Tcp => exchange_tcp(ns, &query).await?,
        NsTransport::Tls => exchange_tls(ns, &query).await?,
        NsTransport::Https => exchange_https(ns, &query, resolver).await?,
    };
    if is_failure(&response) {
        return Err(ResolveError::AllFailed(format!(
            "{:?} from {}",
            response.response_code(),
            ns.host
        )));
    }
    Ok(response)
}

async fn exchange_udp(ns: &NameServer, query: &Message) -> Result<Message, ResolveError> {
    let bind_addr = if ns.host.parse::<std::net::Ipv6Addr>().is_ok() {
        "[::]:0"
    } else {
        "0.0.0.0:0"
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    let dest: SocketAddr = format!("{}:{}", ns.host, ns.port)
        .parse()
        .map_err(|_| ResolveError::BadNameServer(ns.host.clone(), "bad udp target".into()))?;

    let wire = query
        .to_vec()
        .map_err(|e| ResolveError::Doh(e.to_string()))?;

    tokio::time::timeout(EXCHANGE_TIMEOUT, socket.send_to(&wire, dest)).await??;

    let mut buf = vec![0u8; 4096];
    let (n, _) = tokio::time::timeout(EXCHANGE_TIMEOUT, socket.recv_from(&mut buf)).await??;
    Message::from_vec(&buf[..n]).map_err(|e| ResolveError::Doh(e.to_string()))
}

async fn exchange_tcp(ns: &NameServer, query: &Message) -> Result<Message, ResolveError> {
    let stream = tokio::time::timeout(
        EXCHANGE_TIMEOUT,
        TcpStream::connect((ns.host.as_str(), ns.port)),
    )
    .await??;
    exchange_tcp_framed(stream, query).await
}

async fn exchange_tls(ns: &NameServer, query: &Message) -> Result<Message, ResolveError> {
    let tcp = tokio::time::timeout(
        EXCHANGE_TIMEOUT,
        TcpStream::connect((ns.host.as_str(), ns.port)),
    )
    .await??;

    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(std::sync::Arc::new(config));
    let server_name = ServerName::try_from(ns.host.clone())
        .map_err(|_| ResolveError::BadNameServer(ns.host.clone(), "invalid TLS server name".into()))?;

    let tls = tokio::time::timeout(EXCHANGE_TIMEOUT, connector.connect(server_name, tcp)).await??;
    exchange_tcp_framed(tls, query).await
}

async fn exchange_tcp_framed<S>(mut stream: S, query: &Message) -> Result<Message, ResolveError>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let wire = query
        .to_vec()
        .map_err(|e| ResolveError::Doh(e.to_string()))?;
    let len = (wire.len() as u16).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(&wire).await?;

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let resp_len = u16::from_be_bytes(len_buf) as usize;
    let mut resp = vec![0u8; resp_len];
    stream.read_exact(&mut resp).await?;
    Message::from_vec(&resp).map_err(|e| ResolveError::Doh(e.to_string()))
}

/// DNS-over-HTTPS: POST `application/dns-message`. The request's own TLS dial
/// resolves the DoH host through the *same* resolver it belongs to, which is
/// why at least one IP-literal bootstrap nameserver is mandatory in
/// configuration — otherwise this recurses forever; the bootstrap nameserver
/// answers the inner lookup directly, so the recursion bottoms out in one
/// hop.
async fn exchange_https(
    ns: &NameServer,
    query: &Message,
    resolver: &Resolver,
) -> Result<Message, ResolveError> {
    let wire = query
        .to_vec()
        .map_err(|e| ResolveError::Doh(e.to_string()))?;
    let path = ns.path.as_deref().unwrap_or("/dns-query");
    let url = format!("https://{}{}", ns.host, path);

    let ip = resolver
        .resolve_ip(&ns.host)
        .await
        .map_err(|e| ResolveError::Doh(format!("resolving DoH host {}: {e}", ns.host)))?;
    let addr = SocketAddr::new(ip, ns.port);

    let client = reqwest::Client::builder()
        .http2_prior_knowledge()
        .timeout(EXCHANGE_TIMEOUT)
        .resolve(&ns.host, addr)
        .build()
        .map_err(|e| ResolveError::Doh(e.to_string()))?;

    let resp = client
        .post(&url)
        .header("content-type", "application/dns-message")
        .body(wire)
        .send()
        .await
        .map_err(|e| ResolveError::Doh(e.to_string()))?
        .bytes()
        .await
        .map_err(|e| ResolveError::Doh(e.to_string()))?;

    Message::from_vec(&resp).map_err(|e| ResolveError::Doh(e.to_string()))
}
