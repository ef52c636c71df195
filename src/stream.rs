//! Per-stream state: the lock cycle, the slot pool, interlaced field
//! weaving, frame delay and the licensing escrow.
//!
//! A stream is a state machine with three phases: opening (async open
//! still pending), ready, and locked. Entry points validate the phase
//! first, then touch the link; the link's broken flag is checked by the
//! session before any of this code runs.
//!
//! Each stream owns a mutex over its mutable state. Blocking grant
//! waits happen while holding it, which serializes calls on the same
//! handle (the caller's contract anyway) but never calls on other
//! handles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::anc::{AncQueue, AncTag};
use crate::buffer::{StreamLock, UserBuffer};
use crate::config::{
    DepthPacking, Direction, FrameRate, LockFlags, StreamConfig,
    StreamFlags, StreamInfo, TransferMode, MAX_DELAY_FRAMES,
};
use crate::error::{FramewireError, Result};
use crate::frame::{
    alloc_host_storage, D3d11Texture, D3d9Surface, FrameMeta, FramePlanes,
    HostPlane, LockedFrame, SharedStorage,
};
use crate::link::{SessionLink, SlotEntry, SlotPool};
use crate::perf::{colors, PerfMon};
use crate::protocol::{
    encode_msg, Envelope, MsgKind, ProtectionSignature, SetDelay,
    SubmitFrame, UNSOLICITED_SEQ,
};

/// How long a synchrone lock stalls before giving up with `NoFrame`.
const SYNC_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Pump granularity while stalling.
const PUMP_SLICE: Duration = Duration::from_millis(20);

/// Size of the escrow challenge handed out for signing.
pub const PROTECTION_MESSAGE_LEN: usize = 1024;

/// Size of the signature accepted back.
pub const PROTECTION_SIGNATURE_LEN: usize = 4;

#[derive(Debug)]
enum Phase {
    /// Async open sent, ack not yet consumed.
    Opening { seq: u32 },
    Ready,
    Locked(LockState),
}

#[derive(Debug)]
struct LockState {
    slot: u32,
    meta: FrameMeta,
    field: Option<u8>,
    filled: bool,
    /// Guard on the user buffer backing this lock; dropping the state
    /// releases the buffer.
    user: Option<StreamLock>,
}

struct StreamState {
    config: StreamConfig,
    frame_rate: FrameRate,
    synchrone: bool,
    delay: u32,
    pool: SlotPool,
    phase: Phase,
    /// Locks completed so far; drives field-from-count parity.
    frame_counter: u64,
    /// Half-height canvas handed out for interlaced field locks.
    field_scratch: Option<SharedStorage>,
    /// Copy of the last submitted planes, carried forward by
    /// `DOUBLE_BUFFER` population.
    last_submitted: Option<(Vec<u8>, Vec<u8>)>,
    send_anc: AncQueue,
    recv_anc: AncQueue,
    signature_set: bool,
    escrow: XorShift64,
}

/// One open stream. Shared between the registry and in-flight calls.
pub(crate) struct Stream {
    channel: u8,
    state: Mutex<StreamState>,
}

impl Stream {
    /// Builds the stream in the opening or ready phase.
    pub fn new(
        config: StreamConfig,
        pool: SlotPool,
        opening_seq: Option<u32>,
    ) -> Self {
        let field_scratch = if config.flags.contains(StreamFlags::INTERLACED)
        {
            Some(alloc_host_storage(
                config.color_plane_size() / 2,
                config.depth_plane_size() / 2,
            ))
        } else {
            None
        };
        Self {
            channel: config.channel,
            state: Mutex::new(StreamState {
                config,
                frame_rate: FrameRate::DEFAULT,
                synchrone: false,
                delay: 0,
                pool,
                phase: match opening_seq {
                    Some(seq) => Phase::Opening { seq },
                    None => Phase::Ready,
                },
                frame_counter: 0,
                field_scratch,
                last_submitted: None,
                send_anc: AncQueue::new(),
                recv_anc: AncQueue::new(),
                signature_set: false,
                escrow: XorShift64::seeded(config.channel),
            }),
        }
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Applies the peer's open reply and leaves the opening phase.
    pub fn complete_open(&self, frame_rate: FrameRate, synchrone: bool) {
        let mut st = self.state.lock();
        st.frame_rate = frame_rate;
        st.synchrone = synchrone;
        st.phase = Phase::Ready;
    }

    /// Sequence number of a still-pending open, if any.
    pub fn opening_seq(&self) -> Option<u32> {
        match self.state.lock().phase {
            Phase::Opening { seq } => Some(seq),
            _ => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Locked(_))
    }

    pub fn info(&self) -> StreamInfo {
        let st = self.state.lock();
        StreamInfo {
            channel: st.config.channel,
            direction: st.config.direction,
            transfer: st.config.transfer,
            color: st.config.color,
            depth: st.config.depth,
            color_space: st.config.color_space,
            width: st.config.width,
            height: st.config.height,
            flags: st.config.flags,
            delay: st.delay,
            frame_rate: st.frame_rate,
            synchrone: st.synchrone,
        }
    }

    /// Non-blocking readiness poll.
    ///
    /// `NoFrame` covers both "no grant queued yet" and "a required
    /// device binding is gone", so pollers treat the latter as a stream
    /// that never becomes ready.
    pub fn has_frame(
        &self,
        link: &SessionLink,
        context_ok: bool,
    ) -> Result<()> {
        let st = self.state.lock();
        if let Phase::Opening { .. } = st.phase {
            return Err(FramewireError::AsyncWait);
        }
        if !context_ok {
            return Err(FramewireError::NoFrame);
        }
        drop(st);
        link.pump_pending()?;
        if link.has_grant(self.channel) {
            Ok(())
        } else {
            Err(FramewireError::NoFrame)
        }
    }

    /// Locks the next granted frame.
    pub fn lock(
        &self,
        link: &SessionLink,
        perf: &PerfMon,
        flags: LockFlags,
        user: Option<&UserBuffer>,
        context_ok: bool,
    ) -> Result<LockedFrame> {
        let _span = perf.span(colors::LOCK);
        let mut st = self.state.lock();
        match st.phase {
            Phase::Opening { .. } => return Err(FramewireError::AsyncWait),
            Phase::Locked(_) => return Err(FramewireError::Locked),
            Phase::Ready => {}
        }
        if !context_ok {
            return Err(FramewireError::RequireContext);
        }

        let field = flags.field_parity(st.frame_counter)?;
        if field.is_some() && !st.config.flags.contains(StreamFlags::INTERLACED)
        {
            return Err(FramewireError::BadParameter);
        }

        // user-buffer streams take their storage per lock; everything
        // else draws from the stream pool. The guard releases the buffer
        // if the lock dies early.
        let user_lock = match (
            st.config.flags.contains(StreamFlags::USER_BUFFERS),
            user,
        ) {
            (true, Some(buffer)) => {
                let info = buffer.info();
                let compatible = info.width == st.config.width
                    && info.height == st.config.height
                    && info.color == st.config.color
                    && info.depth == st.config.depth
                    && (info.direction == Direction::Bidirectional
                        || info.direction == st.config.direction);
                if !compatible {
                    return Err(FramewireError::IncompatibleBuffer);
                }
                Some(buffer.begin_stream_lock()?)
            }
            (true, None) | (false, Some(_)) => {
                return Err(FramewireError::BadParameter)
            }
            (false, None) => None,
        };

        let grant = self.acquire_grant(link, perf, &st)?;

        if grant.slot as usize >= st.pool.lock().len() {
            warn!(
                "grant names slot {} outside the pool on channel {}",
                grant.slot, self.channel
            );
            return Err(FramewireError::Unspecified);
        }

        if let Some(lock) = &user_lock {
            // attach the caller's storage so the peer reads its bytes
            st.pool.lock()[grant.slot as usize].storage =
                Some(lock.storage());
        }

        st.recv_anc.replace(grant.anc);
        let meta = grant.meta;
        let filled = flags.contains(LockFlags::FILL_BUFFERS);
        st.phase = Phase::Locked(LockState {
            slot: grant.slot,
            meta,
            field,
            filled: false,
            user: user_lock,
        });
        if filled {
            let _fill = perf.span(colors::FILL);
            populate(&mut st);
        }

        Ok(self.view(&st, meta, field))
    }

    fn acquire_grant(
        &self,
        link: &SessionLink,
        perf: &PerfMon,
        st: &StreamState,
    ) -> Result<crate::protocol::FrameGrant> {
        link.pump_pending()?;
        if let Some(grant) = link.take_grant(self.channel) {
            return Ok(grant);
        }
        if st.config.flags.contains(StreamFlags::ASYNC) {
            return Err(FramewireError::AsyncWait);
        }
        if !st.synchrone {
            return Err(FramewireError::NoFrame);
        }
        let _wait = perf.span(colors::WAIT);
        let deadline = Instant::now() + SYNC_LOCK_TIMEOUT;
        loop {
            link.pump(Some(PUMP_SLICE))?;
            if let Some(grant) = link.take_grant(self.channel) {
                return Ok(grant);
            }
            if Instant::now() >= deadline {
                return Err(FramewireError::NoFrame);
            }
        }
    }

    /// Runs the population step a deferred lock skipped. Calling it on
    /// an already populated lock is a no-op.
    pub fn fill_buffers(&self, perf: &PerfMon) -> Result<()> {
        let _span = perf.span(colors::FILL);
        let mut st = self.state.lock();
        match st.phase {
            Phase::Locked(_) => {}
            Phase::Opening { .. } => return Err(FramewireError::AsyncWait),
            Phase::Ready => return Err(FramewireError::NotLocked),
        }
        populate(&mut st);
        Ok(())
    }

    /// Completes a fill batch. All stalls are paid in `fill_buffers`
    /// here, so this only validates the phase.
    pub fn fill_buffers_end(&self, perf: &PerfMon) -> Result<()> {
        let _span = perf.span(colors::FILL);
        let st = self.state.lock();
        match st.phase {
            Phase::Locked(_) => Ok(()),
            Phase::Opening { .. } => Err(FramewireError::AsyncWait),
            Phase::Ready => Err(FramewireError::NotLocked),
        }
    }

    /// Submits the locked frame and returns the stream to ready.
    pub fn unlock(&self, link: &SessionLink, perf: &PerfMon) -> Result<()> {
        let _span = perf.span(colors::UNLOCK);
        let mut st = self.state.lock();
        let lock = match &mut st.phase {
            Phase::Locked(lock) => lock,
            Phase::Opening { .. } => return Err(FramewireError::AsyncWait),
            Phase::Ready => return Err(FramewireError::NotLocked),
        };
        let slot = lock.slot;
        let frame_count = lock.meta.frame_count;
        let field = lock.field;
        let user_count = lock.user.as_ref().map(|u| u.user_field_count());

        if field.is_some() {
            weave_locked_field(&st, slot);
        }

        let submit = SubmitFrame {
            slot,
            frame_count,
            field,
            user_count,
            anc: st.send_anc.drain(),
        };
        let payload = encode_msg(&submit)?;
        link.send(Envelope::new(
            MsgKind::SubmitFrame,
            self.channel,
            UNSOLICITED_SEQ,
            payload,
        ))?;

        if st.config.flags.contains(StreamFlags::DOUBLE_BUFFER) {
            let snapshot = snapshot_slot(&st, slot);
            st.last_submitted = snapshot;
        }
        let dropped = st.recv_anc.clear();
        if dropped > 0 {
            warn!(
                "discarding {} unread anc blobs on channel {}",
                dropped, self.channel
            );
        }
        st.frame_counter += 1;
        // replacing the phase drops the lock state, which hands any
        // user buffer back to its owner
        st.phase = Phase::Ready;
        Ok(())
    }

    /// Stages a blob to travel with the locked frame.
    pub fn send_anc(&self, tag: AncTag, data: Bytes) -> Result<()> {
        let mut st = self.state.lock();
        match st.phase {
            Phase::Locked(_) => st.send_anc.push(tag, data),
            Phase::Opening { .. } => Err(FramewireError::AsyncWait),
            Phase::Ready => Err(FramewireError::NotLocked),
        }
    }

    /// Reads a blob delivered with the locked frame.
    pub fn recv_anc(
        &self,
        tag: AncTag,
        index: usize,
        remove: bool,
    ) -> Result<Bytes> {
        let mut st = self.state.lock();
        match st.phase {
            Phase::Locked(_) => st.recv_anc.take(tag, index, remove),
            Phase::Opening { .. } => Err(FramewireError::AsyncWait),
            Phase::Ready => Err(FramewireError::NotLocked),
        }
    }

    /// Changes the frame delay, growing the slot pool when needed.
    /// Legal while locked or unlocked.
    pub fn set_delay(&self, link: &SessionLink, delay: u32) -> Result<()> {
        if delay > MAX_DELAY_FRAMES {
            return Err(FramewireError::BadParameter);
        }
        let mut st = self.state.lock();
        if let Phase::Opening { .. } = st.phase {
            return Err(FramewireError::AsyncWait);
        }
        if delay == st.delay {
            return Ok(());
        }
        let slots = {
            let mut pool = st.pool.lock();
            let wanted = (st.config.slot_count() + delay) as usize;
            while pool.len() < wanted {
                pool.push(build_slot(&st.config, link));
            }
            pool.len() as u32
        };
        st.delay = delay;
        debug!(
            "channel {} delay set to {} ({} slots)",
            self.channel, delay, slots
        );
        link.send(Envelope::new(
            MsgKind::SetDelay,
            self.channel,
            UNSOLICITED_SEQ,
            encode_msg(&SetDelay { delay, slots })?,
        ))
    }

    /// Produces the escrow challenge for license signing. A fresh
    /// challenge is generated on every call.
    pub fn protection_message(
        &self,
    ) -> Result<[u8; PROTECTION_MESSAGE_LEN]> {
        let mut st = self.state.lock();
        if let Phase::Opening { .. } = st.phase {
            return Err(FramewireError::AsyncWait);
        }
        let mut message = [0u8; PROTECTION_MESSAGE_LEN];
        for chunk in message.chunks_mut(8) {
            chunk.copy_from_slice(&st.escrow.next().to_le_bytes());
        }
        Ok(message)
    }

    /// Forwards the license signature, accepted once per handle.
    pub fn set_protection_signature(
        &self,
        link: &SessionLink,
        signature: &[u8],
    ) -> Result<()> {
        if signature.len() != PROTECTION_SIGNATURE_LEN {
            return Err(FramewireError::BadSize);
        }
        let mut st = self.state.lock();
        if let Phase::Opening { .. } = st.phase {
            return Err(FramewireError::AsyncWait);
        }
        if st.signature_set {
            return Err(FramewireError::BadParameter);
        }
        let mut sig = [0u8; PROTECTION_SIGNATURE_LEN];
        sig.copy_from_slice(signature);
        link.send(Envelope::new(
            MsgKind::ProtectionSignature,
            self.channel,
            UNSOLICITED_SEQ,
            encode_msg(&ProtectionSignature { signature: sig })?,
        ))?;
        st.signature_set = true;
        Ok(())
    }

    /// Builds the caller's view of the locked slot.
    fn view(
        &self,
        st: &StreamState,
        meta: FrameMeta,
        field: Option<u8>,
    ) -> LockedFrame {
        let planes = match st.config.transfer {
            TransferMode::HostMemory => {
                let (storage, lines) = match (&st.phase, field) {
                    // field locks expose the half-height scratch canvas
                    (_, Some(_)) => (
                        st.field_scratch
                            .clone()
                            .unwrap_or_else(|| alloc_host_storage(0, 0)),
                        st.config.height as usize / 2,
                    ),
                    (Phase::Locked(lock), None) => {
                        let pool = st.pool.lock();
                        let entry = &pool[lock.slot as usize];
                        (
                            entry
                                .storage
                                .clone()
                                .unwrap_or_else(|| alloc_host_storage(0, 0)),
                            st.config.height as usize,
                        )
                    }
                    _ => (alloc_host_storage(0, 0), 0),
                };
                let color = HostPlane::color(
                    storage.clone(),
                    st.config.color.bytes_per_line(st.config.width),
                    lines,
                );
                let depth = if st.config.depth == DepthPacking::Off {
                    None
                } else {
                    Some(HostPlane::depth(
                        storage,
                        st.config.depth.bytes_per_line(st.config.width),
                        lines,
                    ))
                };
                FramePlanes::Host { color, depth }
            }
            TransferMode::Direct3d9 => {
                let pool = st.pool.lock();
                let entry = &pool[self.locked_slot(st) as usize];
                FramePlanes::D3d9 {
                    color: entry.d3d9.unwrap_or(D3d9Surface {
                        share_id: 0,
                        width: st.config.width,
                        height: st.config.height,
                    }),
                    depth: entry.d3d9_depth,
                }
            }
            TransferMode::Direct3d11 => {
                let pool = st.pool.lock();
                let entry = &pool[self.locked_slot(st) as usize];
                FramePlanes::D3d11 {
                    color: entry.d3d11.unwrap_or(D3d11Texture {
                        texture_id: 0,
                        target_view_id: 0,
                        shader_view_id: 0,
                        width: st.config.width,
                        height: st.config.height,
                    }),
                    depth: entry.d3d11_depth,
                }
            }
        };
        LockedFrame {
            meta,
            field,
            planes,
        }
    }

    fn locked_slot(&self, st: &StreamState) -> u32 {
        match &st.phase {
            Phase::Locked(lock) => lock.slot,
            _ => 0,
        }
    }
}

/// Prepares the locked canvas: carry the previous frame forward for
/// double-buffered streams, otherwise a clean zero canvas. User-buffer
/// locks keep the caller's content untouched.
fn populate(st: &mut StreamState) {
    let (slot, field, is_user) = match &mut st.phase {
        Phase::Locked(lock) => {
            if lock.filled {
                return;
            }
            lock.filled = true;
            (lock.slot, lock.field, lock.user.is_some())
        }
        _ => return,
    };
    if is_user || st.config.transfer.is_gpu() {
        return;
    }

    let double = st.config.flags.contains(StreamFlags::DOUBLE_BUFFER);
    let canvas = match field {
        Some(_) => match &st.field_scratch {
            Some(scratch) => scratch.clone(),
            None => return,
        },
        None => {
            let pool = st.pool.lock();
            match &pool[slot as usize].storage {
                Some(storage) => storage.clone(),
                None => return,
            }
        }
    };
    let mut storage = canvas.lock();

    match (&st.last_submitted, double) {
        (Some((color, depth)), true) => match field {
            None => {
                copy_clamped(&mut storage.color, color);
                copy_clamped(&mut storage.depth, depth);
            }
            Some(parity) => {
                extract_field(
                    &mut storage.color,
                    color,
                    st.config.color.bytes_per_line(st.config.width),
                    parity,
                );
                extract_field(
                    &mut storage.depth,
                    depth,
                    st.config.depth.bytes_per_line(st.config.width),
                    parity,
                );
            }
        },
        _ => {
            storage.color.fill(0);
            storage.depth.fill(0);
        }
    }
}

fn copy_clamped(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

/// Copies the `parity` lines of a full frame into a half-height canvas.
fn extract_field(
    dst: &mut [u8],
    full: &[u8],
    bytes_per_line: usize,
    parity: u8,
) {
    if bytes_per_line == 0 {
        return;
    }
    let lines = dst.len() / bytes_per_line;
    for line in 0..lines {
        let src_off = (2 * line + parity as usize) * bytes_per_line;
        let dst_off = line * bytes_per_line;
        if src_off + bytes_per_line > full.len() {
            break;
        }
        dst[dst_off..dst_off + bytes_per_line]
            .copy_from_slice(&full[src_off..src_off + bytes_per_line]);
    }
}

/// Interleaves a half-height field into the `parity` lines of a full
/// frame.
fn weave_field(
    full: &mut [u8],
    field: &[u8],
    bytes_per_line: usize,
    parity: u8,
) {
    if bytes_per_line == 0 {
        return;
    }
    let lines = field.len() / bytes_per_line;
    for line in 0..lines {
        let dst_off = (2 * line + parity as usize) * bytes_per_line;
        let src_off = line * bytes_per_line;
        if dst_off + bytes_per_line > full.len() {
            break;
        }
        full[dst_off..dst_off + bytes_per_line]
            .copy_from_slice(&field[src_off..src_off + bytes_per_line]);
    }
}

/// Weaves the field scratch into the locked slot before submission.
fn weave_locked_field(st: &StreamState, slot: u32) {
    let (scratch, parity) = match (&st.field_scratch, &st.phase) {
        (Some(scratch), Phase::Locked(lock)) => match lock.field {
            Some(parity) => (scratch.clone(), parity),
            None => return,
        },
        _ => return,
    };
    let pool = st.pool.lock();
    let storage = match &pool[slot as usize].storage {
        Some(storage) => storage.clone(),
        None => return,
    };
    drop(pool);
    let src = scratch.lock();
    let mut dst = storage.lock();
    weave_field(
        &mut dst.color,
        &src.color,
        st.config.color.bytes_per_line(st.config.width),
        parity,
    );
    weave_field(
        &mut dst.depth,
        &src.depth,
        st.config.depth.bytes_per_line(st.config.width),
        parity,
    );
}

fn snapshot_slot(
    st: &StreamState,
    slot: u32,
) -> Option<(Vec<u8>, Vec<u8>)> {
    let pool = st.pool.lock();
    let storage = pool[slot as usize].storage.clone()?;
    drop(pool);
    let guard = storage.lock();
    Some((guard.color.to_vec(), guard.depth.to_vec()))
}

/// Builds one pool slot for the given stream shape, minting shared
/// surface ids for GPU modes.
pub(crate) fn build_slot(
    config: &StreamConfig,
    link: &SessionLink,
) -> SlotEntry {
    let mut entry = SlotEntry::default();
    match config.transfer {
        TransferMode::HostMemory => {
            // user-buffer streams attach caller storage at lock time
            if !config.flags.contains(StreamFlags::USER_BUFFERS) {
                entry.storage = Some(alloc_host_storage(
                    config.color_plane_size(),
                    config.depth_plane_size(),
                ));
            }
        }
        TransferMode::Direct3d9 => {
            entry.d3d9 = Some(D3d9Surface {
                share_id: link.mint_surface_id(),
                width: config.width,
                height: config.height,
            });
            if config.depth != DepthPacking::Off {
                entry.d3d9_depth = Some(D3d9Surface {
                    share_id: link.mint_surface_id(),
                    width: config.width,
                    height: config.height,
                });
            }
        }
        TransferMode::Direct3d11 => {
            entry.d3d11 = Some(mint_d3d11(config, link));
            if config.depth != DepthPacking::Off {
                entry.d3d11_depth = Some(mint_d3d11(config, link));
            }
        }
    }
    entry
}

fn mint_d3d11(config: &StreamConfig, link: &SessionLink) -> D3d11Texture {
    D3d11Texture {
        texture_id: link.mint_surface_id(),
        target_view_id: link.mint_surface_id(),
        shader_view_id: link.mint_surface_id(),
        width: config.width,
        height: config.height,
    }
}

/// Builds the initial slot pool for a stream.
pub(crate) fn build_pool(
    config: &StreamConfig,
    link: &SessionLink,
) -> SlotPool {
    let slots = (0..config.slot_count())
        .map(|_| build_slot(config, link))
        .collect();
    Arc::new(Mutex::new(slots))
}

/// Time-seeded xorshift generator backing the escrow challenges.
struct XorShift64(u64);

impl XorShift64 {
    fn seeded(salt: u8) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let pid = std::process::id() as u64;
        let seed = nanos
            .wrapping_mul(0x517c_c1b7_2722_0a95)
            ^ (pid << 32)
            ^ u64::from(salt);
        Self(if seed == 0 { 0x9e37_79b9 } else { seed })
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamState")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("delay", &self.delay)
            .finish()
    }
}
