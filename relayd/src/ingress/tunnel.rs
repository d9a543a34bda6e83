//! Server-role ingress: decodes the first tunnel frame off an accepted
//! connection (plain or TLS-terminated) into a `Metadata`, stamps in the
//! real TCP peer as the request's `source`, confirms the target resolves,
//! then hands the still-framed connection to the dispatcher for relaying.
use relayd_core::{BoxedConn, PeerAddr, RequestContext, Resolver, TunnelIn};
use relayd_proto::{Codec, Metadata};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub async fn handle<C>(mut conn: C, peer: PeerAddr, codec: Codec, resolver: Arc<Resolver>, tunnel_in: TunnelIn)
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let metadata = match read_metadata(&mut conn, &codec, peer).await {
        Ok(metadata) => metadata,
        Err(err) => {
            tracing::debug!(peer = %peer.source, %err, "tunnel handshake rejected");
            let _ = conn.write_all(&crate::fallback::not_found_response()).await;
            return;
        }
    };

    if let Err(err) = resolver.resolve_ip(&metadata.target.host).await {
        tracing::debug!(id = %metadata.id, target = %metadata.target, %err, "tunnel target does not resolve");
        return;
    }

    let src_conn: BoxedConn = Box::new(conn);
    tunnel_in.submit(RequestContext {
        src_conn,
        metadata,
        line: None,
        pre_reply: None,
        post_fn: None,
    });
}

async fn read_metadata<C: AsyncRead + Unpin>(conn: &mut C, codec: &Codec, peer: PeerAddr) -> std::io::Result<Metadata> {
    let packet = codec.read_frame(conn).await?;
    let text = String::from_utf8(packet.payload)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "metadata frame is not utf-8"))?;
    let mut metadata: Metadata = text
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed metadata frame"))?;
    metadata.source = peer.source.into();
    Ok(metadata)
}
