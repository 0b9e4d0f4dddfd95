//! Protocol layer for the RPC framework.
//!
//! This module contains the core protocol definitions including:
//! - Framing of the byte stream
//! - Request and response envelopes
//! - The CBOR codec used for typed payloads

pub mod codec;
pub mod framing;
pub mod message;

pub use framing::{Frame, FrameCodec, FrameType, MAX_FRAME_SIZE};
pub use message::{RequestEnvelope, ResponseEnvelope};
