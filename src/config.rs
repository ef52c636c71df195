//! Stream configuration: directions, transfer modes, pixel packings, flags,
//! and the open-time validation rules tying them together.
//!
//! A [`StreamConfig`] travels inside the open request, so everything here
//! serializes. Validation runs client-side before the request is sent; the
//! peer re-checks and nacks with the same codes.

use std::num::NonZeroU64;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{FramewireError, Result};

/// Number of stream channels per direction.
pub const MAX_CHANNELS: usize = 2;

/// Largest accepted frame edge, in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

/// Ceiling for `set_delay` and for `extra_buffers` at open time.
pub const MAX_DELAY_FRAMES: u32 = 8;

/// Swap slots every stream starts with, before extras and delay.
pub const BASE_SLOTS: u32 = 2;

/// Which way frames travel over a stream or through a user buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Frames are produced locally and handed to the peer.
    ToPeer,
    /// Frames are produced by the peer and consumed locally.
    FromPeer,
    /// Buffer-creation only: usable with streams of either direction.
    Bidirectional,
}

/// Where frame memory lives and how it is handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferMode {
    /// Host memory planes, copied through shared slots.
    HostMemory,
    /// Direct3D 9 shared surfaces, exchanged by surface id.
    Direct3d9,
    /// Direct3D 11 shared textures, exchanged by texture id.
    Direct3d11,
}

impl TransferMode {
    /// True for the GPU-surface modes.
    #[inline]
    pub fn is_gpu(self) -> bool {
        !matches!(self, Self::HostMemory)
    }
}

/// Color plane pixel packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorPacking {
    /// 8 bit RGBA, 4 bytes per pixel.
    Rgba8,
    /// 8 bit BGRA, 4 bytes per pixel.
    Bgra8,
    /// 32 bit float RGBA, 16 bytes per pixel.
    RgbaF32,
    /// 8 bit 4:2:2, U Y V Y order, 4 bytes per pixel pair.
    Uyvy8,
    /// 8 bit 4:2:2, Y U Y V order, 4 bytes per pixel pair.
    Yuyv8,
    /// 10 bit 4:2:2, 6 pixels packed into 16 bytes.
    Uyvy10,
    /// 10 bit 4:2:2:4 with key, 2 pixels packed into 8 bytes.
    Yukyvk10,
}

impl ColorPacking {
    /// True for the 4:2:2 family, which shares chroma between pixel pairs
    /// and therefore needs an even width.
    #[inline]
    pub fn is_chroma_subsampled(self) -> bool {
        matches!(
            self,
            Self::Uyvy8 | Self::Yuyv8 | Self::Uyvy10 | Self::Yukyvk10
        )
    }

    /// Bytes occupied by one line of `width` pixels.
    pub fn bytes_per_line(self, width: u32) -> usize {
        let w = width as usize;
        match self {
            Self::Rgba8 | Self::Bgra8 => w * 4,
            Self::RgbaF32 => w * 16,
            Self::Uyvy8 | Self::Yuyv8 => w * 2,
            Self::Uyvy10 => w.div_ceil(6) * 16,
            Self::Yukyvk10 => w.div_ceil(2) * 8,
        }
    }
}

/// Depth plane packing. `Off` disables the depth plane entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthPacking {
    Off,
    /// 32 bit float depth.
    F32,
    /// 16 bit unsigned normalized depth.
    U16,
    /// Depth encoded into an 8 bit BGRA surface.
    Bgra8,
}

impl DepthPacking {
    /// Bytes occupied by one line of `width` pixels, zero when off.
    pub fn bytes_per_line(self, width: u32) -> usize {
        let w = width as usize;
        match self {
            Self::Off => 0,
            Self::F32 => w * 4,
            Self::U16 => w * 2,
            Self::Bgra8 => w * 4,
        }
    }
}

/// Color space tag carried with YUV frames. Informational; no conversion
/// happens inside the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    Rgb,
    Bt601,
    Bt709,
}

bitflags! {
    /// Open-time stream options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StreamFlags: u32 {
        /// Keep two submission buffers in flight (host memory only).
        const DOUBLE_BUFFER = 1 << 0;
        /// Route host-memory transfers through a Direct3D 9 staging path.
        const CPU_USING_DX9 = 1 << 1;
        /// Frames are delivered as interlaced fields (host memory only).
        const INTERLACED = 1 << 2;
        /// Caller supplies frame storage via the buffer pool.
        const USER_BUFFERS = 1 << 3;
        /// Open, lock and unlock return `AsyncWait` instead of blocking.
        const ASYNC = 1 << 4;
    }
}

bitflags! {
    /// Per-lock options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LockFlags: u32 {
        /// Populate the planes during the lock call itself. The plain lock
        /// entry point implies this; the extended one lets fill be deferred
        /// to `fill_buffers`.
        const FILL_BUFFERS = 1 << 0;
        /// Lock the even field of an interlaced stream.
        const INTERLACE_FIELD_0 = 1 << 8;
        /// Lock the odd field of an interlaced stream.
        const INTERLACE_FIELD_1 = 1 << 9;
        /// Take the field parity from the running frame counter.
        const INTERLACE_FIELD_FROM_COUNT = 1 << 10;
    }
}

impl LockFlags {
    /// All interlace field-select bits.
    pub const INTERLACE_MASK: LockFlags = LockFlags::INTERLACE_FIELD_0
        .union(LockFlags::INTERLACE_FIELD_1)
        .union(LockFlags::INTERLACE_FIELD_FROM_COUNT);

    /// Resolves the requested field parity for the given frame counter.
    ///
    /// Returns `None` when no field selection was requested (progressive
    /// lock) and `BadParameter` when more than one select bit is set.
    pub fn field_parity(self, frame_count: u64) -> Result<Option<u8>> {
        let select = self.intersection(Self::INTERLACE_MASK);
        if select.is_empty() {
            return Ok(None);
        }
        if select.bits().count_ones() > 1 {
            return Err(FramewireError::BadParameter);
        }
        let parity = if select.contains(Self::INTERLACE_FIELD_1) {
            1
        } else if select.contains(Self::INTERLACE_FIELD_FROM_COUNT) {
            (frame_count & 1) as u8
        } else {
            0
        };
        Ok(Some(parity))
    }
}

/// Frame rate as a rational, e.g. 60000/1001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    /// Fallback rate reported before the peer states its own.
    pub const DEFAULT: FrameRate = FrameRate { num: 60, den: 1 };
}

/// Opaque Direct3D 9 device binding, identified by a non-zero share id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct D3d9Device(NonZeroU64);

impl D3d9Device {
    /// Wraps a raw device share id; zero means no device.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Opaque Direct3D 11 device binding, identified by a non-zero share id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct D3d11Device(NonZeroU64);

impl D3d11Device {
    /// Wraps a raw device share id; zero means no device.
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Opaque window binding used by staging paths that need a swap target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(NonZeroU64);

impl WindowHandle {
    #[inline]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Device bindings handed to `Session::init`. All members optional; GPU
/// transfer modes require the matching one at open time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceBindings {
    pub d3d9: Option<D3d9Device>,
    pub d3d11: Option<D3d11Device>,
    pub window: Option<WindowHandle>,
}

impl DeviceBindings {
    /// Bindings with no devices, for host-memory-only sessions.
    #[inline]
    pub fn none() -> Self {
        Self::default()
    }

    /// True when the binding required by `transfer` is present.
    pub fn supports(&self, transfer: TransferMode) -> bool {
        match transfer {
            TransferMode::HostMemory => true,
            TransferMode::Direct3d9 => self.d3d9.is_some(),
            TransferMode::Direct3d11 => self.d3d11.is_some(),
        }
    }
}

/// Everything needed to open a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Channel index, `0..MAX_CHANNELS`.
    pub channel: u8,
    pub direction: Direction,
    pub transfer: TransferMode,
    pub color: ColorPacking,
    pub depth: DepthPacking,
    pub color_space: ColorSpace,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels (full frame, even when interlaced).
    pub height: u32,
    /// Additional swap slots beyond the base pair.
    pub extra_buffers: u32,
    pub flags: StreamFlags,
}

impl StreamConfig {
    /// Host-memory RGBA config with everything else at its default.
    pub fn host_rgba(channel: u8, width: u32, height: u32) -> Self {
        Self {
            channel,
            direction: Direction::ToPeer,
            transfer: TransferMode::HostMemory,
            color: ColorPacking::Rgba8,
            depth: DepthPacking::Off,
            color_space: ColorSpace::Rgb,
            width,
            height,
            extra_buffers: 0,
            flags: StreamFlags::empty(),
        }
    }

    /// Checks the configuration against the open-time rules.
    ///
    /// # Errors
    ///
    /// - `BadParameter` for channel, direction, flag or extra-buffer misuse
    /// - `NotImplemented` for from-peer streams
    /// - `BadSize` for out-of-range dimensions or odd 4:2:2 width
    /// - `BadPacking` for packings foreign to the transfer mode
    /// - `RequireContext` when the GPU binding is missing
    pub fn validate(&self, bindings: &DeviceBindings) -> Result<()> {
        if self.channel as usize >= MAX_CHANNELS {
            return Err(FramewireError::BadParameter);
        }
        match self.direction {
            Direction::ToPeer => {}
            Direction::FromPeer => return Err(FramewireError::NotImplemented),
            Direction::Bidirectional => {
                return Err(FramewireError::BadParameter)
            }
        }
        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(FramewireError::BadSize);
        }
        if self.color.is_chroma_subsampled() {
            if self.transfer != TransferMode::HostMemory {
                return Err(FramewireError::BadPacking);
            }
            if self.width % 2 != 0 {
                return Err(FramewireError::BadSize);
            }
        }
        if self.extra_buffers > MAX_DELAY_FRAMES {
            return Err(FramewireError::BadParameter);
        }
        let host_only = StreamFlags::DOUBLE_BUFFER
            | StreamFlags::CPU_USING_DX9
            | StreamFlags::INTERLACED
            | StreamFlags::USER_BUFFERS;
        if self.flags.intersects(host_only)
            && self.transfer != TransferMode::HostMemory
        {
            return Err(FramewireError::BadParameter);
        }
        if self.flags.contains(StreamFlags::INTERLACED) && self.height % 2 != 0
        {
            return Err(FramewireError::BadSize);
        }
        if !bindings.supports(self.transfer) {
            return Err(FramewireError::RequireContext);
        }
        Ok(())
    }

    /// Size in bytes of one full color plane.
    #[inline]
    pub fn color_plane_size(&self) -> usize {
        self.color.bytes_per_line(self.width) * self.height as usize
    }

    /// Size in bytes of one full depth plane, zero when depth is off.
    #[inline]
    pub fn depth_plane_size(&self) -> usize {
        self.depth.bytes_per_line(self.width) * self.height as usize
    }

    /// Total swap slots this config asks for, before any delay growth.
    #[inline]
    pub fn slot_count(&self) -> u32 {
        BASE_SLOTS + self.extra_buffers
    }
}

/// Read-only stream snapshot returned by `Session::get_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub channel: u8,
    pub direction: Direction,
    pub transfer: TransferMode,
    pub color: ColorPacking,
    pub depth: DepthPacking,
    pub color_space: ColorSpace,
    pub width: u32,
    pub height: u32,
    pub flags: StreamFlags,
    /// Current frame delay, adjustable via `set_delay`.
    pub delay: u32,
    /// Peer-reported output rate.
    pub frame_rate: FrameRate,
    /// True when lock calls stall until the peer is ready.
    pub synchrone: bool,
}
