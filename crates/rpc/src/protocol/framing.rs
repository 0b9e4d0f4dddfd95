//! Length-prefixed frames carrying envelopes over a byte stream.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! +-------------+---------+--------------+-----------------+
//! | len: u32    | kind: u8| crc32: u32   | payload: len B  |
//! +-------------+---------+--------------+-----------------+
//! ```
//!
//! A zero checksum is not verified, which is also what an empty payload
//! hashes to.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Largest payload accepted by default (10 MiB).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Bytes in front of every payload.
pub const FRAME_HEADER_SIZE: usize = 9;

/// What a frame carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FrameType {
    /// A `RequestEnvelope`, client to server.
    Request = 0x01,
    /// A `ResponseEnvelope`, server to client.
    Response = 0x02,
    /// The server is draining; send no new requests on this connection.
    GoAway = 0x03,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        [Self::Request, Self::Response, Self::GoAway]
            .into_iter()
            .find(|kind| *kind as u8 == value)
            .ok_or_else(|| ProtocolError::InvalidFrame(format!("unknown frame type {value:#04x}")))
    }
}

/// One unit on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// What the payload holds.
    pub frame_type: FrameType,
    /// Encoded envelope, empty for go-away.
    pub payload: Bytes,
}

impl Frame {
    /// A frame of `frame_type` around `payload`.
    #[must_use]
    pub const fn new(frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// The drain announcement a server sends before closing.
    #[must_use]
    pub const fn go_away() -> Self {
        Self::new(FrameType::GoAway, Bytes::new())
    }
}

struct Header {
    len: usize,
    kind: u8,
    crc: u32,
}

impl Header {
    fn peek(buf: &[u8]) -> Option<Self> {
        let mut raw = buf.get(..FRAME_HEADER_SIZE)?;
        Some(Self {
            len: raw.get_u32() as usize,
            kind: raw.get_u8(),
            crc: raw.get_u32(),
        })
    }
}

/// Splits a byte stream into [`Frame`]s and back.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// A codec accepting payloads up to [`MAX_FRAME_SIZE`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Limits payloads to `size` bytes in both directions.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    fn check_size(&self, size: usize) -> io::Result<()> {
        if size > self.max_frame_size {
            return Err(invalid_data(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }));
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        let Some(header) = Header::peek(buf) else {
            return Ok(None);
        };
        self.check_size(header.len)?;

        let needed = FRAME_HEADER_SIZE + header.len;
        if buf.len() < needed {
            buf.reserve(needed - buf.len());
            return Ok(None);
        }

        let frame_type = FrameType::try_from(header.kind).map_err(invalid_data)?;
        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.len).freeze();

        if header.crc != 0 {
            let actual = crc32fast::hash(&payload);
            if actual != header.crc {
                return Err(invalid_data(ProtocolError::ChecksumMismatch {
                    expected: header.crc,
                    actual,
                }));
            }
        }

        Ok(Some(Frame::new(frame_type, payload)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> io::Result<()> {
        self.check_size(frame.payload.len())?;
        let len = u32::try_from(frame.payload.len()).map_err(|_| {
            invalid_data(ProtocolError::FrameTooLarge {
                size: frame.payload.len(),
                max: u32::MAX as usize,
            })
        })?;

        buf.reserve(FRAME_HEADER_SIZE + frame.payload.len());
        buf.put_u32(len);
        buf.put_u8(frame.frame_type as u8);
        buf.put_u32(crc32fast::hash(&frame.payload));
        buf.put(frame.payload);
        Ok(())
    }
}

fn invalid_data(e: ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}
