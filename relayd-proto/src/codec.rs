//! Tunnel wire format: one length-prefixed, compressed, enciphered record per frame.
//!
//! ```text
//! offset  size  field
//! 0       4     body_len   (u32, big-endian, <= 2^24)
//! 4       2     rand       (u16, big-endian, opaque)
//! 6       N     body       = cipher(compress(payload))
//! ```
//!
//! `rand` carries no cryptographic role — it exists only to vary the on-wire
//! length/shape of otherwise-identical payloads and is regenerated per frame.
//! It's derived from the pre-compression payload length: draw `r` uniformly
//! from `[1, 99]`, then `rand = r` for an empty payload, else
//! `rand = payload.len() % r`.

use crate::cipher::Cipher;
use crate::error::{CodecError, FramingError};
use rand::Rng;
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const BODY_LEN_FIELD: usize = 4;
const RAND_FIELD: usize = 2;
const HEADER_LEN: usize = BODY_LEN_FIELD + RAND_FIELD;
const MAX_BODY_LEN: usize = 1 << 24;

/// A decoded frame: the opaque `rand` field plus the plaintext payload.
#[derive(Debug, Clone)]
pub struct Packet {
    pub rand: u16,
    pub payload: Vec<u8>,
}

/// Stateless encode/decode pair keyed by the shared cipher.
#[derive(Clone)]
pub struct Codec {
    cipher: Cipher,
}

impl Codec {
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }

    /// Compress + encrypt `payload` and prepend the header. Fails on empty input.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::EmptyData);
        }

        let rand = random_field(payload.len());

        let compressed = zstd::stream::encode_all(payload, 0).map_err(CodecError::Compress)?;
        let mut body = compressed;
        self.cipher.apply(&mut body);

        if body.len() > MAX_BODY_LEN {
            return Err(FramingError::TooLargePacket(body.len()).into());
        }

        let mut wire = Vec::with_capacity(HEADER_LEN + body.len());
        wire.extend_from_slice(&(body.len() as u32).to_be_bytes());
        wire.extend_from_slice(&rand.to_be_bytes());
        wire.extend_from_slice(&body);
        Ok(wire)
    }

    /// Decrypt + decompress a body previously produced by [`Codec::encode`].
    fn open(&self, rand: u16, mut body: Vec<u8>) -> Result<Packet, CodecError> {
        self.cipher.apply(&mut body);
        let payload = zstd::stream::decode_all(&body[..]).map_err(CodecError::Decompress)?;
        Ok(Packet { rand, payload })
    }

    /// Read exactly one frame from a synchronous, blocking reader.
    pub fn read_full<R: Read>(&self, reader: &mut R) -> Result<Packet, CodecError> {
        let mut header = [0u8; HEADER_LEN];
        read_exact_mapped(reader, &mut header)?;
        let body_len = u32::from_be_bytes(header[..4].try_into().unwrap()) as usize;
        let rand = u16::from_be_bytes(header[4..6].try_into().unwrap());
        if body_len > MAX_BODY_LEN {
            return Err(FramingError::TooLargePacket(body_len).into());
        }
        let mut body = vec![0u8; body_len];
        read_exact_mapped(reader, &mut body)?;
        self.open(rand, body)
    }

    /// Write one frame to a synchronous writer.
    pub fn write_full<W: Write>(&self, writer: &mut W, payload: &[u8]) -> Result<(), CodecError> {
        let wire = self.encode(payload)?;
        writer.write_all(&wire).map_err(FramingError::from)?;
        Ok(())
    }

    /// Read exactly one frame from an async reader.
    pub async fn read_frame<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<Packet, CodecError> {
        let mut header = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header)
            .await
            .map_err(FramingError::from)?;
        let body_len = u32::from_be_bytes(header[..4].try_into().unwrap()) as usize;
        let rand = u16::from_be_bytes(header[4..6].try_into().unwrap());
        if body_len > MAX_BODY_LEN {
            return Err(FramingError::TooLargePacket(body_len).into());
        }
        let mut body = vec![0u8; body_len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(FramingError::from)?;
        self.open(rand, body)
    }

    /// Write one frame to an async writer.
    pub async fn write_frame<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        payload: &[u8],
    ) -> Result<(), CodecError> {
        let wire = self.encode(payload)?;
        writer.write_all(&wire).await.map_err(FramingError::from)?;
        Ok(())
    }
}

/// `r` uniform over `[1, 99]`; empty payload yields `r` itself, otherwise
/// `len % r`.
fn random_field(payload_len: usize) -> u16 {
    let r: u16 = rand::thread_rng().gen_range(1..=99);
    if payload_len == 0 {
        r
    } else {
        (payload_len % r as usize) as u16
    }
}

fn read_exact_mapped<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FramingError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FramingError::IncompletePacket {
            expected: buf.len(),
            got: 0,
        }),
        Err(e) => Err(FramingError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> Codec {
        Codec::new(Cipher::new(b"test-key-32-bytes-long-enough!!!".to_vec()))
    }

    #[test]
    fn roundtrip() {
        let codec = codec();
        let payload = b"Hello from the tunnel!".repeat(4);
        let wire = codec.encode(&payload).unwrap();

        assert_eq!(u32::from_be_bytes(wire[0..4].try_into().unwrap()) as usize, wire.len() - HEADER_LEN);

        let mut cursor = io::Cursor::new(wire);
        let packet = codec.read_full(&mut cursor).unwrap();
        assert_eq!(packet.payload, payload);
    }

    #[test]
    fn random_field_is_len_mod_bounded_draw() {
        for _ in 0..200 {
            let rand = random_field(250);
            assert!(rand < 99);
        }
        for _ in 0..200 {
            let rand = random_field(0);
            assert!((1..=99).contains(&rand));
        }
    }

    #[test]
    fn empty_payload_rejected() {
        let codec = codec();
        assert!(matches!(codec.encode(&[]), Err(CodecError::EmptyData)));
    }

    #[test]
    fn oversized_body_len_rejected_without_reading_body() {
        let codec = codec();
        let mut header = Vec::new();
        header.extend_from_slice(&(0x0200_0000u32).to_be_bytes()); // 2^25
        header.extend_from_slice(&0u16.to_be_bytes());
        let mut cursor = io::Cursor::new(header);
        let err = codec.read_full(&mut cursor).unwrap_err();
        assert!(matches!(err, CodecError::Framing(FramingError::TooLargePacket(_))));
    }

    #[test]
    fn truncated_frame_is_incomplete() {
        let codec = codec();
        let wire = codec.encode(b"some payload").unwrap();
        let mut cursor = io::Cursor::new(&wire[..wire.len() - 2]);
        let err = codec.read_full(&mut cursor).unwrap_err();
        assert!(matches!(err, CodecError::Framing(FramingError::IncompletePacket { .. })));
    }

    #[tokio::test]
    async fn async_roundtrip() {
        let codec = codec();
        let payload = b"async payload over the wire".to_vec();
        let mut buf = Vec::new();
        codec.write_frame(&mut buf, &payload).await.unwrap();

        let mut cursor = io::Cursor::new(buf);
        let packet = codec.read_frame(&mut cursor).await.unwrap();
        assert_eq!(packet.payload, payload);
    }
}
