//! Frame metadata and the locked-frame view.
//!
//! Pixel storage never crosses the message channel. Host-memory planes live
//! in shared slots guarded by a mutex; GPU frames are carried as shared
//! surface ids the way cross-process Direct3D sharing works. A
//! [`LockedFrame`] is the caller's view of one granted slot and is
//! meaningful only until the matching unlock returns the slot to the peer.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Broadcast-style timecode attached to every granted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timecode {
    /// Nominal rate the counter runs at, rounded to an integer.
    pub fps: u8,
    pub drop_frame: bool,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl Timecode {
    pub const ZERO: Timecode = Timecode {
        fps: 0,
        drop_frame: false,
        hours: 0,
        minutes: 0,
        seconds: 0,
        frames: 0,
    };

    /// Non-drop timecode for the `index`-th frame at `fps`.
    pub fn from_frame_index(index: u64, fps: u32) -> Self {
        let fps = fps.max(1) as u64;
        let total_secs = index / fps;
        Self {
            fps: fps.min(255) as u8,
            drop_frame: false,
            hours: (total_secs / 3600 % 24) as u8,
            minutes: (total_secs / 60 % 60) as u8,
            seconds: (total_secs % 60) as u8,
            frames: (index % fps) as u8,
        }
    }
}

/// Peer-side counters delivered with every granted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Peer cluster clock at grant time, in peer frame ticks.
    pub cluster_clock: u64,
    /// Frames the peer expected so far: delivered plus dropped.
    pub frame_count: u64,
    /// Grants that expired before they were locked.
    pub drop_count: u64,
    pub timecode: Timecode,
}

/// Backing store for one host-memory slot: a color plane and an optional
/// depth plane (empty when depth is off).
#[derive(Debug, Default)]
pub(crate) struct HostStorage {
    pub color: BytesMut,
    pub depth: BytesMut,
}

pub(crate) type SharedStorage = Arc<Mutex<HostStorage>>;

/// Allocates zeroed plane storage for one slot.
pub(crate) fn alloc_host_storage(
    color_len: usize,
    depth_len: usize,
) -> SharedStorage {
    let mut color = BytesMut::with_capacity(color_len);
    color.resize(color_len, 0);
    let mut depth = BytesMut::with_capacity(depth_len);
    depth.resize(depth_len, 0);
    Arc::new(Mutex::new(HostStorage { color, depth }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaneKind {
    Color,
    Depth,
}

/// Layout of, and guarded access to, one plane of a host-memory frame.
#[derive(Clone)]
pub struct HostPlane {
    storage: SharedStorage,
    kind: PlaneKind,
    /// Bytes occupied by one line.
    pub bytes_per_line: usize,
    /// Number of lines.
    pub lines: usize,
}

impl HostPlane {
    pub(crate) fn color(
        storage: SharedStorage,
        bytes_per_line: usize,
        lines: usize,
    ) -> Self {
        Self {
            storage,
            kind: PlaneKind::Color,
            bytes_per_line,
            lines,
        }
    }

    pub(crate) fn depth(
        storage: SharedStorage,
        bytes_per_line: usize,
        lines: usize,
    ) -> Self {
        Self {
            storage,
            kind: PlaneKind::Depth,
            bytes_per_line,
            lines,
        }
    }

    /// Total plane size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes_per_line * self.lines
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires the plane bytes. The guard derefs to `[u8]` both ways;
    /// hold it only for the duration of the access.
    pub fn lock(&self) -> PlaneGuard<'_> {
        PlaneGuard {
            guard: self.storage.lock(),
            kind: self.kind,
        }
    }
}

impl std::fmt::Debug for HostPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPlane")
            .field("kind", &self.kind)
            .field("bytes_per_line", &self.bytes_per_line)
            .field("lines", &self.lines)
            .finish()
    }
}

/// Exclusive access to one plane's bytes.
pub struct PlaneGuard<'a> {
    guard: MutexGuard<'a, HostStorage>,
    kind: PlaneKind,
}

impl Deref for PlaneGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.kind {
            PlaneKind::Color => &self.guard.color,
            PlaneKind::Depth => &self.guard.depth,
        }
    }
}

impl DerefMut for PlaneGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self.kind {
            PlaneKind::Color => &mut self.guard.color,
            PlaneKind::Depth => &mut self.guard.depth,
        }
    }
}

/// Shared Direct3D 9 surface, addressed by its cross-process share id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct D3d9Surface {
    pub share_id: u64,
    pub width: u32,
    pub height: u32,
}

/// Shared Direct3D 11 texture with its render-target and shader-resource
/// view ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct D3d11Texture {
    pub texture_id: u64,
    pub target_view_id: u64,
    pub shader_view_id: u64,
    pub width: u32,
    pub height: u32,
}

/// Frame payload view, shaped by the stream's transfer mode.
#[derive(Debug, Clone)]
pub enum FramePlanes {
    Host {
        color: HostPlane,
        depth: Option<HostPlane>,
    },
    D3d9 {
        color: D3d9Surface,
        depth: Option<D3d9Surface>,
    },
    D3d11 {
        color: D3d11Texture,
        depth: Option<D3d11Texture>,
    },
}

/// Caller's view of a locked frame.
///
/// The planes stay exclusively owned by the caller until the matching
/// `unlock_frame`; accessing a kept copy after unlock is a protocol error
/// (the slot may already carry the next frame), though never a memory
/// hazard.
#[derive(Debug, Clone)]
pub struct LockedFrame {
    pub meta: FrameMeta,
    /// Field parity when an interlaced field was selected at lock time.
    pub field: Option<u8>,
    pub planes: FramePlanes,
}

impl LockedFrame {
    /// Host color plane, `None` for GPU transfer modes.
    pub fn host_color(&self) -> Option<&HostPlane> {
        match &self.planes {
            FramePlanes::Host { color, .. } => Some(color),
            _ => None,
        }
    }

    /// Host depth plane, `None` for GPU modes or when depth is off.
    pub fn host_depth(&self) -> Option<&HostPlane> {
        match &self.planes {
            FramePlanes::Host { depth, .. } => depth.as_ref(),
            _ => None,
        }
    }
}
