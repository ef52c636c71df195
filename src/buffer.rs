//! Caller-owned frame buffers.
//!
//! A [`UserBuffer`] is host-memory frame storage whose lifetime the
//! caller controls. Streams opened with `StreamFlags::USER_BUFFERS`
//! substitute one at lock time instead of drawing from the stream's own
//! pool. Buffers outlive streams and sessions; the only coupling is the
//! lock currently in flight.
//!
//! Access states form a small machine: idle, mapped (caller is reading
//! or writing through [`MappedBuffer`]) or locked into a stream. The
//! two exclusive states reject each other, so a frame can never be
//! half-written by two parties.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{
    ColorPacking, DepthPacking, Direction, TransferMode, MAX_DIMENSION,
};
use crate::error::{FramewireError, Result};
use crate::frame::{alloc_host_storage, HostPlane, SharedStorage};

/// Requested shape of a user buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// `Bidirectional` buffers attach to streams of either direction.
    pub direction: Direction,
    /// Must be `HostMemory`; user buffers never wrap GPU surfaces.
    pub transfer: TransferMode,
    pub color: ColorPacking,
    pub depth: DepthPacking,
    pub width: u32,
    pub height: u32,
}

impl BufferInfo {
    fn validate(&self) -> Result<()> {
        if self.transfer != TransferMode::HostMemory {
            return Err(FramewireError::BadParameter);
        }
        // the 10 bit packed groups don't expose a per-pixel stride a
        // caller could sensibly address
        if matches!(
            self.color,
            ColorPacking::Uyvy10 | ColorPacking::Yukyvk10
        ) {
            return Err(FramewireError::BadPacking);
        }
        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(FramewireError::BadSize);
        }
        if self.color.is_chroma_subsampled() && self.width % 2 != 0 {
            return Err(FramewireError::BadSize);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferState {
    Idle,
    Mapped,
    Locked,
    Dead,
}

#[derive(Debug)]
pub(crate) struct BufferInner {
    info: BufferInfo,
    storage: SharedStorage,
    state: Mutex<BufferState>,
    user_field_count: AtomicU64,
}

/// Caller-owned host-memory frame buffer.
#[derive(Debug)]
pub struct UserBuffer {
    inner: Arc<BufferInner>,
}

impl UserBuffer {
    /// Allocates a buffer of the given shape, zero-initialized.
    ///
    /// # Errors
    ///
    /// - `BadParameter` for GPU transfer modes
    /// - `BadPacking` for packings without a caller-addressable stride
    /// - `BadSize` for out-of-range dimensions or odd 4:2:2 width
    /// - `OutOfMemory` when the plane size computation overflows
    pub fn create(info: &BufferInfo) -> Result<Self> {
        info.validate()?;
        let color_len = info
            .color
            .bytes_per_line(info.width)
            .checked_mul(info.height as usize)
            .ok_or(FramewireError::OutOfMemory)?;
        let depth_len = info
            .depth
            .bytes_per_line(info.width)
            .checked_mul(info.height as usize)
            .ok_or(FramewireError::OutOfMemory)?;
        Ok(Self {
            inner: Arc::new(BufferInner {
                info: *info,
                storage: alloc_host_storage(color_len, depth_len),
                state: Mutex::new(BufferState::Idle),
                user_field_count: AtomicU64::new(0),
            }),
        })
    }

    /// Releases the buffer. Fails without side effects while the buffer
    /// is mapped or locked into a stream; the buffer stays usable.
    ///
    /// # Errors
    ///
    /// `Mapped`, `Locked`, or `BadHandle` when already destroyed.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        match *state {
            BufferState::Idle => {
                *state = BufferState::Dead;
                Ok(())
            }
            BufferState::Mapped => Err(FramewireError::Mapped),
            BufferState::Locked => Err(FramewireError::Locked),
            BufferState::Dead => Err(FramewireError::BadHandle),
        }
    }

    /// Maps the planes for direct access until `unmap`.
    ///
    /// # Errors
    ///
    /// `Mapped` when already mapped, `Locked` while locked into a
    /// stream, `BadHandle` after destroy.
    pub fn map(&self) -> Result<MappedBuffer> {
        let mut state = self.inner.state.lock();
        match *state {
            BufferState::Idle => {
                *state = BufferState::Mapped;
                Ok(MappedBuffer {
                    color: self.color_plane(),
                    depth: self.depth_plane(),
                })
            }
            BufferState::Mapped => Err(FramewireError::Mapped),
            BufferState::Locked => Err(FramewireError::Locked),
            BufferState::Dead => Err(FramewireError::BadHandle),
        }
    }

    /// Ends a mapping. The planes of the corresponding [`MappedBuffer`]
    /// must not be used afterwards.
    ///
    /// # Errors
    ///
    /// `NotMapped` when not mapped, `BadHandle` after destroy.
    pub fn unmap(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        match *state {
            BufferState::Mapped => {
                *state = BufferState::Idle;
                Ok(())
            }
            BufferState::Dead => Err(FramewireError::BadHandle),
            _ => Err(FramewireError::NotMapped),
        }
    }

    #[inline]
    pub fn info(&self) -> &BufferInfo {
        &self.inner.info
    }

    /// Free-running caller counter delivered with frames submitted from
    /// this buffer.
    #[inline]
    pub fn user_field_count(&self) -> u64 {
        self.inner.user_field_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_user_field_count(&self, value: u64) {
        self.inner.user_field_count.store(value, Ordering::Relaxed);
    }

    fn color_plane(&self) -> HostPlane {
        HostPlane::color(
            self.inner.storage.clone(),
            self.inner.info.color.bytes_per_line(self.inner.info.width),
            self.inner.info.height as usize,
        )
    }

    fn depth_plane(&self) -> Option<HostPlane> {
        if self.inner.info.depth == DepthPacking::Off {
            return None;
        }
        Some(HostPlane::depth(
            self.inner.storage.clone(),
            self.inner.info.depth.bytes_per_line(self.inner.info.width),
            self.inner.info.height as usize,
        ))
    }

    /// Transitions idle -> locked for a stream lock. The returned guard
    /// releases the buffer when dropped, however the lock ends.
    pub(crate) fn begin_stream_lock(&self) -> Result<StreamLock> {
        let mut state = self.inner.state.lock();
        match *state {
            BufferState::Idle => {
                *state = BufferState::Locked;
                Ok(StreamLock {
                    inner: self.inner.clone(),
                })
            }
            BufferState::Mapped => Err(FramewireError::Mapped),
            BufferState::Locked => Err(FramewireError::Locked),
            BufferState::Dead => Err(FramewireError::BadHandle),
        }
    }
}

impl BufferInner {
    /// Releases the stream lock taken by `begin_stream_lock`.
    fn end_stream_lock(&self) {
        let mut state = self.state.lock();
        if *state == BufferState::Locked {
            *state = BufferState::Idle;
        }
    }
}

/// Holds a buffer on behalf of an in-flight stream lock.
///
/// Dropping the guard returns the buffer to idle, so a stream discarded
/// while locked (crash teardown, session drop) releases its buffer
/// instead of stranding it.
#[derive(Debug)]
pub(crate) struct StreamLock {
    inner: Arc<BufferInner>,
}

impl StreamLock {
    pub fn storage(&self) -> SharedStorage {
        self.inner.storage.clone()
    }

    pub fn user_field_count(&self) -> u64 {
        self.inner.user_field_count.load(Ordering::Relaxed)
    }
}

impl Drop for StreamLock {
    fn drop(&mut self) {
        self.inner.end_stream_lock();
    }
}

/// Mapped view of a user buffer, valid until the matching `unmap`.
#[derive(Debug)]
pub struct MappedBuffer {
    pub color: HostPlane,
    pub depth: Option<HostPlane>,
}
