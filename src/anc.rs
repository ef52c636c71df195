//! Ancillary per-frame metadata: fourcc-tagged binary blobs riding along
//! with a frame.
//!
//! Blobs staged while a frame is locked travel with that frame's submit
//! message, all or nothing. Inbound blobs arrive with the grant and are
//! readable until the unlock discards the leftovers.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{FramewireError, Result};

/// Most blobs a single frame may carry.
pub const MAX_ANC_BLOBS: usize = 16;

/// Byte budget shared by all blobs of a single frame.
pub const MAX_ANC_BYTES: usize = 64 * 1024;

/// Four-character tag identifying an ancillary blob kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct AncTag(u32);

impl AncTag {
    /// Camera transform matrix, 16 little-endian f32 values.
    pub const CAMERA: AncTag = AncTag::new(*b"CAMR");

    /// Projection matrix, 16 little-endian f32 values.
    pub const PROJECTION: AncTag = AncTag::new(*b"PROJ");

    /// Builds a tag from its four characters.
    #[inline]
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// The four characters of the tag.
    #[inline]
    pub const fn bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for AncTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes() {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// One tagged blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncBlob {
    pub tag: AncTag,
    pub data: Bytes,
}

/// Ordered blob store for a single frame, indexed per tag.
///
/// `index` always counts among blobs sharing the tag, so removing index 0
/// shifts the remaining same-tag blobs down and draining index 0 in a loop
/// visits every one.
#[derive(Debug, Default)]
pub(crate) struct AncQueue {
    blobs: Vec<AncBlob>,
    total_bytes: usize,
}

impl AncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a blob, enforcing the per-frame budget.
    ///
    /// # Errors
    ///
    /// `AncOverflow` when the blob count or byte budget would be exceeded.
    pub fn push(&mut self, tag: AncTag, data: Bytes) -> Result<()> {
        if self.blobs.len() >= MAX_ANC_BLOBS
            || self.total_bytes + data.len() > MAX_ANC_BYTES
        {
            return Err(FramewireError::AncOverflow);
        }
        self.total_bytes += data.len();
        self.blobs.push(AncBlob { tag, data });
        Ok(())
    }

    /// Reads the `index`-th blob of `tag`, optionally removing it.
    ///
    /// # Errors
    ///
    /// `AncNotFound` when no such blob exists.
    pub fn take(
        &mut self,
        tag: AncTag,
        index: usize,
        remove: bool,
    ) -> Result<Bytes> {
        let pos = self
            .blobs
            .iter()
            .enumerate()
            .filter(|(_, blob)| blob.tag == tag)
            .nth(index)
            .map(|(pos, _)| pos)
            .ok_or(FramewireError::AncNotFound)?;
        if remove {
            let blob = self.blobs.remove(pos);
            self.total_bytes -= blob.data.len();
            Ok(blob.data)
        } else {
            Ok(self.blobs[pos].data.clone())
        }
    }

    /// Moves all blobs out, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<AncBlob> {
        self.total_bytes = 0;
        std::mem::take(&mut self.blobs)
    }

    /// Replaces the content with blobs arriving from the peer.
    pub fn replace(&mut self, blobs: Vec<AncBlob>) {
        self.total_bytes = blobs.iter().map(|b| b.data.len()).sum();
        self.blobs = blobs;
    }

    /// Discards everything, returning how many blobs were dropped.
    pub fn clear(&mut self) -> usize {
        self.total_bytes = 0;
        std::mem::take(&mut self.blobs).len()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }
}
