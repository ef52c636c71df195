//! Error types for framewire.
//!
//! The taxonomy is deliberately flat: every entry point reports one of the
//! codes below and callers branch on the kind, not on payload data. Codes
//! are stable across versions and match the values carried on the wire.

use thiserror::Error;

/// Main error type for all framewire operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramewireError {
    /// Internal failure with no more specific class.
    #[error("unspecified internal error")]
    Unspecified,

    /// No frame is ready to lock yet; retry on the next tick.
    #[error("no frame available")]
    NoFrame,

    /// Buffer or slot allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Peer unreachable, or the session is not initialized.
    #[error("no connection to peer")]
    NoConnection,

    /// Unknown, stale, or already-closed handle.
    #[error("bad stream handle")]
    BadHandle,

    /// Parameter out of range or invalid for this operation.
    #[error("bad parameter")]
    BadParameter,

    /// Frame or buffer dimensions out of range for the packing.
    #[error("bad size")]
    BadSize,

    /// GPU transfer mode requires a device binding that is absent.
    #[error("graphics context required")]
    RequireContext,

    /// Channel and direction already open, or shutdown attempted with
    /// streams still open.
    #[error("already open")]
    AlreadyOpen,

    /// Stream is locked; unlock it first.
    #[error("stream is locked")]
    Locked,

    /// Operation requires the stream to be locked.
    #[error("stream is not locked")]
    NotLocked,

    /// Direct3D surface operation failed.
    #[error("Direct3D failure")]
    DirectX,

    /// OpenGL surface operation failed.
    #[error("OpenGL failure")]
    OpenGl,

    /// Feature is not available in this build.
    #[error("not implemented")]
    NotImplemented,

    /// The license does not cover this stream kind.
    #[error("not licensed")]
    NotLicensed,

    /// Color or depth packing incompatible with the transfer mode.
    #[error("bad packing")]
    BadPacking,

    /// No ancillary blob stored under the requested tag and index.
    #[error("ancillary data not found")]
    AncNotFound,

    /// Per-frame ancillary budget exceeded.
    #[error("ancillary data overflow")]
    AncOverflow,

    /// Peer speaks an incompatible protocol version.
    #[error("incompatible link version")]
    BadLinkVersion,

    /// The peer terminated; shut the session down and re-init.
    #[error("connection broken")]
    ConnectionBroken,

    /// User buffer shape does not match the stream.
    #[error("incompatible buffer")]
    IncompatibleBuffer,

    /// Buffer is mapped but must not be.
    #[error("buffer is mapped")]
    Mapped,

    /// Buffer is not mapped but must be.
    #[error("buffer is not mapped")]
    NotMapped,

    /// Async operation still pending; poll the continuation again.
    #[error("async operation pending")]
    AsyncWait,
}

impl FramewireError {
    /// Stable numeric code, as carried in nack messages.
    pub fn code(self) -> u32 {
        match self {
            Self::Unspecified => 1,
            Self::NoFrame => 2,
            Self::OutOfMemory => 3,
            Self::NoConnection => 4,
            Self::BadHandle => 5,
            Self::BadParameter => 6,
            Self::BadSize => 7,
            Self::RequireContext => 8,
            Self::AlreadyOpen => 9,
            Self::Locked => 10,
            Self::NotLocked => 11,
            Self::DirectX => 12,
            Self::OpenGl => 13,
            Self::NotImplemented => 14,
            Self::NotLicensed => 15,
            Self::BadPacking => 16,
            Self::AncNotFound => 17,
            Self::AncOverflow => 18,
            Self::BadLinkVersion => 19,
            Self::ConnectionBroken => 20,
            Self::IncompatibleBuffer => 21,
            Self::Mapped => 22,
            Self::NotMapped => 23,
            Self::AsyncWait => 24,
        }
    }

    /// Inverse of [`code`](Self::code). Unknown codes collapse to
    /// `Unspecified` so a newer peer cannot wedge an older client.
    pub fn from_code(code: u32) -> Self {
        match code {
            2 => Self::NoFrame,
            3 => Self::OutOfMemory,
            4 => Self::NoConnection,
            5 => Self::BadHandle,
            6 => Self::BadParameter,
            7 => Self::BadSize,
            8 => Self::RequireContext,
            9 => Self::AlreadyOpen,
            10 => Self::Locked,
            11 => Self::NotLocked,
            12 => Self::DirectX,
            13 => Self::OpenGl,
            14 => Self::NotImplemented,
            15 => Self::NotLicensed,
            16 => Self::BadPacking,
            17 => Self::AncNotFound,
            18 => Self::AncOverflow,
            19 => Self::BadLinkVersion,
            20 => Self::ConnectionBroken,
            21 => Self::IncompatibleBuffer,
            22 => Self::Mapped,
            23 => Self::NotMapped,
            24 => Self::AsyncWait,
            _ => Self::Unspecified,
        }
    }

    /// True for codes that mean "try again later", not failure.
    #[inline]
    pub fn is_retry(self) -> bool {
        matches!(self, Self::NoFrame | Self::AsyncWait)
    }

    /// True when the session must be shut down and re-initialized.
    #[inline]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::ConnectionBroken)
    }
}

/// Result type alias using FramewireError.
pub type Result<T> = std::result::Result<T, FramewireError>;
