//! Envelope serialization
//!
//! Cached responses and the dead-letter management view carry envelopes as
//! bytes. [`MimeCodec`] writes a `Content-Type` header block followed by the
//! raw body so the media type survives a round trip.

use std::io::{self, Write};
use bytes::Bytes;

use esb_common::{CacheError, Envelope};

pub trait EnvelopeCodec: Send + Sync {
    fn encode(&self, envelope: &Envelope, out: &mut dyn Write) -> io::Result<()>;

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CacheError>;

    fn to_bytes(&self, envelope: &Envelope) -> Result<Bytes, CacheError> {
        let mut buf = Vec::with_capacity(envelope.len() + 64);
        self.encode(envelope, &mut buf)
            .map_err(|e| CacheError::Codec(e.to_string()))?;
        Ok(Bytes::from(buf))
    }
}

const HEADER_END: &[u8] = b"\r\n\r\n";
const CONTENT_TYPE: &str = "content-type:";

#[derive(Debug, Default, Clone, Copy)]
pub struct MimeCodec;

impl EnvelopeCodec for MimeCodec {
    fn encode(&self, envelope: &Envelope, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "Content-Type: {}\r\n\r\n", envelope.content_type)?;
        out.write_all(&envelope.body)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, CacheError> {
        let split = bytes
            .windows(HEADER_END.len())
            .position(|w| w == HEADER_END)
            .ok_or_else(|| CacheError::Codec("missing header terminator".to_string()))?;

        let headers = std::str::from_utf8(&bytes[..split])
            .map_err(|e| CacheError::Codec(format!("header is not UTF-8: {}", e)))?;

        let content_type = headers
            .lines()
            .find_map(|line| {
                let lower = line.to_ascii_lowercase();
                lower
                    .starts_with(CONTENT_TYPE)
                    .then(|| line[CONTENT_TYPE.len()..].trim().to_string())
            })
            .ok_or_else(|| CacheError::Codec("missing Content-Type header".to_string()))?;

        let body = Bytes::copy_from_slice(&bytes[split + HEADER_END.len()..]);
        Ok(Envelope::new(content_type, body))
    }
}

/// Write sink that refuses to grow past a fixed limit
#[derive(Debug)]
pub struct FixedSizeBuffer {
    buf: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl FixedSizeBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(64 * 1024)),
            limit,
            overflowed: false,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

impl Write for FixedSizeBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            self.overflowed = true;
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("message exceeds {} bytes", self.limit),
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
