//! Envelopes carried inside request and response frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::metadata::Metadata;
use crate::status::{Code, Status};

use super::framing::{Frame, FrameType};

/// Request envelope for wire format.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Per-connection call id, echoed back by the response.
    pub id: u64,
    /// Fully-qualified method path, `/{service}/{method}`.
    pub method: String,
    /// Caller-supplied metadata.
    pub metadata: Metadata,
    /// Time the caller is willing to wait, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Serialized message payload.
    pub payload: Vec<u8>,
}

/// Response envelope for wire format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Call id this response is for.
    pub id: u64,
    /// Outcome code, [`Code::Ok`] on success.
    pub code: Code,
    /// Error message, empty on success.
    pub message: String,
    /// Response metadata.
    pub metadata: Metadata,
    /// Serialized response payload.
    pub payload: Vec<u8>,
}

impl RequestEnvelope {
    /// Encodes the envelope into a request frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be serialized.
    pub fn into_frame(&self) -> Result<Frame> {
        let bytes = bincode::serialize(self).map_err(CodecError::from)?;
        Ok(Frame::new(FrameType::Request, Bytes::from(bytes)))
    }

    /// Decodes an envelope from a frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid envelope.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        bincode::deserialize(payload)
            .map_err(|e| CodecError::DeserializationFailed(e.to_string()).into())
    }
}

impl ResponseEnvelope {
    /// Builds a successful response envelope.
    #[must_use]
    pub fn ok(id: u64, metadata: Metadata, payload: Bytes) -> Self {
        Self {
            id,
            code: Code::Ok,
            message: String::new(),
            metadata,
            payload: payload.to_vec(),
        }
    }

    /// Builds a failed response envelope.
    #[must_use]
    pub fn error(id: u64, status: &Status) -> Self {
        Self {
            id,
            code: status.code(),
            message: status.message().to_string(),
            metadata: Metadata::new(),
            payload: Vec::new(),
        }
    }

    /// Encodes the envelope into a response frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be serialized.
    pub fn into_frame(&self) -> Result<Frame> {
        let bytes = bincode::serialize(self).map_err(CodecError::from)?;
        Ok(Frame::new(FrameType::Response, Bytes::from(bytes)))
    }

    /// Decodes an envelope from a frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid envelope.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        bincode::deserialize(payload)
            .map_err(|e| CodecError::DeserializationFailed(e.to_string()).into())
    }

    /// Splits the envelope into a status (on failure) or metadata and payload.
    ///
    /// # Errors
    ///
    /// Returns the carried status when the code is not [`Code::Ok`].
    pub fn into_result(self) -> std::result::Result<(Metadata, Bytes), Status> {
        if self.code == Code::Ok {
            Ok((self.metadata, Bytes::from(self.payload)))
        } else {
            Err(Status::new(self.code, self.message))
        }
    }
}
