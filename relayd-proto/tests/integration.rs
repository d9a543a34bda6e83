//! Full tunnel roundtrip over a real TCP socket: a fake client sends the
//! metadata frame followed by data frames, a fake server decodes each and
//! echoes the payload back through the same codec.
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use relayd_proto::{Address, Cipher, Codec, Kind, Metadata, Network};

const TEST_TOKEN: &[u8] = b"test-integration-key-1234567890!";
const TIMEOUT: Duration = Duration::from_secs(5);

fn make_codec() -> Codec {
    Codec::new(Cipher::new(TEST_TOKEN.to_vec()))
}

/// Minimal server-role peer: decode the first frame as metadata, then echo
/// every subsequent frame back through the same codec.
async fn run_test_server(listener: TcpListener, codec: Codec) {
    let (mut conn, _addr) = listener.accept().await.unwrap();

    let first = codec.read_frame(&mut conn).await.unwrap();
    let metadata: Metadata = String::from_utf8(first.payload)
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(metadata.network, Network::Tcp);

    loop {
        match codec.read_frame(&mut conn).await {
            Ok(packet) => {
                codec.write_frame(&mut conn, &packet.payload).await.unwrap();
            }
            Err(_) => return,
        }
    }
}

#[tokio::test]
async fn full_tunnel_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_codec = make_codec();
    tokio::spawn(run_test_server(listener, server_codec));

    let codec = make_codec();
    let mut conn = timeout(TIMEOUT, TcpStream::connect(addr)).await.unwrap().unwrap();

    let metadata = Metadata::new(
        Network::Tcp,
        Kind::Https,
        Address::new("203.0.113.9", 55123),
        Address::new("127.0.0.1", 1080),
        Address::new("example.com", 443),
    );
    codec
        .write_frame(&mut conn, metadata.to_string().as_bytes())
        .await
        .unwrap();

    let messages: [&[u8]; 3] = [
        b"Hello through the tunnel!",
        b"Second message with more data",
        b"Final message",
    ];

    for msg in messages {
        codec.write_frame(&mut conn, msg).await.unwrap();
        let echoed = timeout(TIMEOUT, codec.read_frame(&mut conn)).await.unwrap().unwrap();
        assert_eq!(echoed.payload, msg);
    }
}

#[tokio::test]
async fn wrong_key_produces_garbage_not_original_metadata() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let server_codec = Codec::new(Cipher::new(b"correct-shared-token".to_vec()));
        // The decode either errors (decompression failure) or yields bytes
        // that do not parse back into valid metadata.
        match server_codec.read_frame(&mut conn).await {
            Err(_) => {}
            Ok(packet) => {
                let parsed: Result<Metadata, _> =
                    String::from_utf8(packet.payload).unwrap_or_default().parse();
                assert!(parsed.is_err());
            }
        }
    });

    let wrong_codec = Codec::new(Cipher::new(b"wrong-shared-token!!".to_vec()));
    let mut conn = timeout(TIMEOUT, TcpStream::connect(addr)).await.unwrap().unwrap();
    let metadata = Metadata::new(
        Network::Tcp,
        Kind::Socks5,
        Address::new("198.51.100.1", 4000),
        Address::new("127.0.0.1", 1080),
        Address::new("198.51.100.2", 9999),
    );
    wrong_codec
        .write_frame(&mut conn, metadata.to_string().as_bytes())
        .await
        .unwrap();

    // Give the server task a chance to run its assertion before the test exits.
    tokio::time::sleep(Duration::from_millis(100)).await;
}
