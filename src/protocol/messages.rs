//! Message payloads riding the link.
//!
//! The hello/welcome handshake is JSON, so either half can reject a
//! version mismatch without agreeing on the binary codec first. Every
//! later payload is MsgPack with named fields, keeping messages readable
//! to tooling and tolerant of field additions.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::anc::AncBlob;
use crate::config::{FrameRate, StreamConfig};
use crate::error::{FramewireError, Result};
use crate::frame::FrameMeta;

/// Link protocol version; halves interoperate when the major part
/// matches.
pub const LINK_VERSION: &str = "1.0.0";

/// Client greeting, JSON payload of `Hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub version: String,
    /// Client name for peer-side logs.
    pub client: String,
}

impl Hello {
    pub fn current() -> Self {
        Self {
            version: LINK_VERSION.to_string(),
            client: format!("framewire/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Peer reply, JSON payload of `Welcome`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub version: String,
    /// Adapter ordinal the peer renders on.
    pub adapter: u32,
}

/// `OpenStream` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub config: StreamConfig,
}

/// `OpenAck` payload: parameters the peer decided for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReply {
    pub frame_rate: FrameRate,
    /// True when the peer paces lock calls (blocking locks stall until
    /// a grant arrives).
    pub synchrone: bool,
}

/// `OpenNack` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenNack {
    /// Stable error code, see `FramewireError::code`.
    pub code: u32,
}

/// `FrameGrant` payload: one slot the client may lock next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameGrant {
    /// Pool index of the granted slot.
    pub slot: u32,
    pub meta: FrameMeta,
    /// Blobs accompanying the granted frame.
    pub anc: Vec<AncBlob>,
}

/// `SubmitFrame` payload: the locked slot goes back filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitFrame {
    /// Pool index of the submitted slot.
    pub slot: u32,
    /// `frame_count` of the grant this submit answers; the peer uses it
    /// to tell a late submit from the current one when a slot was
    /// regranted.
    pub frame_count: u64,
    /// Field parity for interlaced submissions.
    pub field: Option<u8>,
    /// Caller counter of the user buffer backing the lock, if any.
    pub user_count: Option<u64>,
    /// Blobs delivered with the frame, all or nothing.
    pub anc: Vec<AncBlob>,
}

/// `SetDelay` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDelay {
    pub delay: u32,
    /// New total slot count after the pool grew.
    pub slots: u32,
}

/// `ProtectionSignature` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionSignature {
    pub signature: [u8; 4],
}

/// True when two link versions can interoperate (equal major part).
pub fn version_compatible(ours: &str, theirs: &str) -> bool {
    fn major(v: &str) -> &str {
        v.split('.').next().unwrap_or("")
    }
    !major(ours).is_empty() && major(ours) == major(theirs)
}

/// Encodes a data-plane payload as named-field MsgPack.
pub fn encode_msg<T: Serialize>(value: &T) -> Result<Bytes> {
    rmp_serde::to_vec_named(value)
        .map(Bytes::from)
        .map_err(|_| FramewireError::Unspecified)
}

/// Decodes a data-plane payload.
pub fn decode_msg<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    rmp_serde::from_slice(payload).map_err(|_| FramewireError::Unspecified)
}

/// Encodes a control-plane (handshake) payload as JSON.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|_| FramewireError::Unspecified)
}

/// Decodes a control-plane payload.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|_| FramewireError::Unspecified)
}
