//! Bidirectional relay bridging an ingress leg and an outbound leg.
//!
//! A half-closed copy loop needs its opposite direction unblocked too.
//! Tokio's cooperative cancellation handles this for free: running both copy
//! directions as branches of a single `select!` means the moment either
//! branch finishes, the other is simply dropped, which closes its socket
//! half — no read-deadline bookkeeping needed.
use relayd_proto::{Codec, Metadata};
use std::time::Instant;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Plain byte copy both ways, no codec involved.
    Direct,
    /// One side is framed/enciphered, the other is plaintext.
    Proxy,
    /// Refuse the connection; no bytes are copied.
    Block,
}

/// Runs the relay to completion and logs entry/exit the way every session is
/// accounted for: `access` when the relay starts, `finish` with elapsed time
/// when it ends.
pub async fn start<A, B>(
    mode: RelayMode,
    plaintext: &mut A,
    ciphertext: &mut B,
    codec: Option<&Codec>,
    metadata: &Metadata,
) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    tracing::info!(id = %metadata.id, client = %metadata.client, source = %metadata.source, target = %metadata.target, "access");

    let result = match mode {
        RelayMode::Block => Ok(()),
        RelayMode::Direct => direct(plaintext, ciphertext).await,
        RelayMode::Proxy => {
            let codec = codec.expect("proxy mode requires a codec");
            proxy(plaintext, ciphertext, codec).await
        }
    };

    tracing::info!(id = %metadata.id, elapsed = ?start.elapsed(), "finish");
    result
}

async fn direct<A, B>(a: &mut A, b: &mut B) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    match io::copy_bidirectional(a, b).await {
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    }
}

/// `plaintext` carries raw application bytes; `ciphertext` carries framed,
/// compressed, enciphered records. One direction frames+writes, the other
/// reads frames and writes the decoded payload out.
async fn proxy<A, B>(plaintext: &mut A, ciphertext: &mut B, codec: &Codec) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut p_rd, mut p_wr) = tokio::io::split(plaintext);
    let (mut c_rd, mut c_wr) = tokio::io::split(ciphertext);

    let encode_up = async {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = p_rd.read(&mut buf).await?;
            if n == 0 {
                return Ok::<(), io::Error>(());
            }
            codec
                .write_frame(&mut c_wr, &buf[..n])
                .await
                .map_err(io::Error::from)?;
        }
    };

    let decode_down = async {
        loop {
            let packet = codec.read_frame(&mut c_rd).await.map_err(io::Error::from)?;
            p_wr.write_all(&packet.payload).await?;
        }
    };

    tokio::select! {
        res = encode_up => res,
        res = decode_down => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayd_proto::{Address, Cipher, Kind, Network};
    use tokio::io::duplex;
    use tokio::net::{TcpListener, TcpStream};

    fn sample_metadata() -> Metadata {
        Metadata::new(
            Network::Tcp,
            Kind::Http,
            Address::new("10.0.0.1", 1),
            Address::new("10.0.0.2", 2),
            Address::new("example.com", 80),
        )
    }

    #[tokio::test]
    async fn direct_relay_copies_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(b"world").await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (mut a, mut b) = duplex(64);

        let relay = tokio::spawn(async move {
            let metadata = sample_metadata();
            start(RelayMode::Direct, &mut a, &mut client, None, &metadata).await
        });

        b.write_all(b"hello").await.unwrap();
        let mut resp = [0u8; 5];
        b.read_exact(&mut resp).await.unwrap();
        assert_eq!(&resp, b"world");

        drop(b);
        server.await.unwrap();
        let _ = relay.await.unwrap();
    }

    #[tokio::test]
    async fn proxy_relay_frames_one_side() {
        let (mut plaintext_client, mut plaintext_app) = duplex(256);
        let (mut ciphertext_local, mut ciphertext_remote) = duplex(256);
        let codec = Codec::new(Cipher::new(b"shared-secret".to_vec()));
        let codec_remote = codec.clone();

        let relay = tokio::spawn(async move {
            let metadata = sample_metadata();
            start(
                RelayMode::Proxy,
                &mut plaintext_app,
                &mut ciphertext_local,
                Some(&codec),
                &metadata,
            )
            .await
        });

        plaintext_client.write_all(b"ping").await.unwrap();
        let packet = codec_remote.read_frame(&mut ciphertext_remote).await.unwrap();
        assert_eq!(packet.payload, b"ping");

        codec_remote
            .write_frame(&mut ciphertext_remote, b"pong")
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        plaintext_client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(plaintext_client);
        drop(ciphertext_remote);
        let _ = relay.await.unwrap();
    }
}
