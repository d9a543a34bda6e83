use std::io;

/// Errors raised by the framer while reading or writing one wire record.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("incomplete packet: expected {expected} bytes, got {got}")]
    IncompletePacket { expected: usize, got: usize },
    #[error("packet too large: {0} bytes exceeds the 2^24 limit")]
    TooLargePacket(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors raised while compressing/encrypting or decrypting/decompressing a frame body.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cannot encode an empty payload")]
    EmptyData,
    #[error("compression failed: {0}")]
    Compress(#[source] io::Error),
    #[error("decompression failed: {0}")]
    Decompress(#[source] io::Error),
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Errors raised while parsing the `network#type#client#source#target` descriptor.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("expected 5 '#'-separated fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid network kind: {0}")]
    BadNetwork(String),
    #[error("invalid ingress kind: {0}")]
    BadKind(String),
    #[error("invalid address '{0}': {1}")]
    BadAddress(String, String),
}

impl From<CodecError> for io::Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Framing(FramingError::Io(e)) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

impl From<FramingError> for io::Error {
    fn from(e: FramingError) -> Self {
        match e {
            FramingError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
