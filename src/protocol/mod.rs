//! Link protocol: envelope wire format and message payloads.
//!
//! Two planes share one envelope format:
//! - the JSON handshake (hello/welcome) that gates everything else
//! - MsgPack control messages for opens, grants, submits and teardown
//!
//! Frame pixel data is not part of either plane; it stays in the shared
//! slot pools and only slot indices appear inside messages.

mod messages;
mod wire;

pub use messages::{
    decode_json, decode_msg, encode_json, encode_msg, version_compatible,
    FrameGrant, Hello, OpenNack, OpenReply, OpenRequest, ProtectionSignature,
    SetDelay, SubmitFrame, Welcome, LINK_VERSION,
};
pub use wire::{
    Envelope, Header, MsgKind, HEADER_SIZE, MAX_PAYLOAD_SIZE, UNSOLICITED_SEQ,
};
