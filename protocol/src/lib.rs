//! Wire format shared by the chat server and client.
//!
//! Payloads are raw text with no type tag. A fresh connection is asked for
//! its nickname with the literal `NICK` token; everything after that is
//! relayed verbatim. Framing is either raw (whatever bytes a read returns,
//! bounded by a chunk size) or a big-endian `u16` length prefix.

use std::fmt;
use std::io;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub mod envelope;
pub mod event_bus;
pub mod transport;
mod validate;

pub use envelope::{Envelope, Notice};
pub use event_bus::{ClientStatus, Event, EventBus, EventReceiver, ServerStatus};
pub use transport::{Acceptor, BoxedReader, BoxedWriter, Connector, Stream, TcpAcceptor, TcpConnector};
pub use validate::{parse_port, validate_host, validate_nickname, ValidationError};

/// Sent by the server to ask a peer for its nickname.
pub const HANDSHAKE_TOKEN: &[u8] = b"NICK";

/// Upper bound of a single raw read.
pub const MAX_CHUNK: usize = 1024;

const LEN_PREFIX: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One socket write per message, no delimiter. Reads may split or coalesce.
    #[default]
    Raw,
    /// `u16` length ahead of every payload.
    LengthPrefixed,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Raw => f.write_str("raw"),
            Framing::LengthPrefixed => f.write_str("length-prefixed"),
        }
    }
}

impl FromStr for Framing {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "length-prefixed" | "length" | "lp" => Ok(Framing::LengthPrefixed),
            other => Err(ValidationError::UnknownFraming(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatCodec {
    framing: Framing,
    max_chunk: usize,
}

impl ChatCodec {
    pub const fn new(framing: Framing) -> Self {
        ChatCodec {
            framing,
            max_chunk: MAX_CHUNK,
        }
    }

    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }
}

impl Default for ChatCodec {
    fn default() -> Self {
        ChatCodec::new(Framing::Raw)
    }
}

// convert buffered bytes into one payload
impl Decoder for ChatCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::Raw => {
                if src.is_empty() {
                    return Ok(None);
                }

                let n = src.len().min(self.max_chunk);
                Ok(Some(src.split_to(n).freeze()))
            }
            Framing::LengthPrefixed => decode_prefixed(src),
        }
    }
}

// take a payload and convert it to bytes
impl Encoder<Bytes> for ChatCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self.framing {
            Framing::Raw => dst.extend_from_slice(&item),
            Framing::LengthPrefixed => encode_prefixed(&item, dst)?,
        }

        Ok(())
    }
}

// read one length prefixed payload, waiting for more bytes on a partial frame
fn decode_prefixed(src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
    if src.len() < LEN_PREFIX {
        return Ok(None);
    }

    let len = u16::from_be_bytes([src[0], src[1]]) as usize;
    if src.len() < LEN_PREFIX + len {
        src.reserve(LEN_PREFIX + len - src.len());
        return Ok(None);
    }

    src.advance(LEN_PREFIX);
    Ok(Some(src.split_to(len).freeze()))
}

// write payload into BytesMut behind its u16 length
fn encode_prefixed(msg: &[u8], dst: &mut BytesMut) -> Result<(), io::Error> {
    let len = u16::try_from(msg.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes exceeds length prefix", msg.len()),
        )
    })?;

    dst.reserve(LEN_PREFIX + msg.len());
    dst.put_u16(len);
    dst.extend_from_slice(msg);
    Ok(())
}
