//! The session: handshake, stream registry and the caller-facing
//! operation surface.
//!
//! A session owns one half of a link pair. It carries no background
//! thread; inbound envelopes are routed whenever one of its calls pumps
//! the link, so a caller that never asks for frames never pays for
//! them. All frame traffic is per-channel, all control traffic is
//! request/reply keyed by sequence number.
//!
//! Handles returned by `open` are generation-checked: a handle kept
//! across `close` fails with `BadHandle` instead of touching a slot
//! that may have been reused.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::anc::AncTag;
use crate::buffer::UserBuffer;
use crate::config::{
    DeviceBindings, LockFlags, StreamConfig, StreamFlags, StreamInfo,
    MAX_CHANNELS,
};
use crate::error::{FramewireError, Result};
use crate::frame::LockedFrame;
use crate::handle::{Arena, StreamHandle};
use crate::link::SessionLink;
use crate::perf::{PerfHooks, PerfMon, PerfSpan};
use crate::protocol::{
    encode_json, encode_msg, version_compatible, Envelope, Hello, MsgKind,
    OpenReply, OpenRequest, LINK_VERSION, UNSOLICITED_SEQ,
};
use crate::stream::{build_pool, Stream, PROTECTION_MESSAGE_LEN};

/// How long the hello/welcome handshake may take.
const INIT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a synchronous open waits for the peer's reply.
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pump granularity while waiting on the peer.
const PUMP_SLICE: Duration = Duration::from_millis(20);

struct SessionState {
    initialized: bool,
    bindings: DeviceBindings,
}

/// Caller-owned connection to the compositor peer.
///
/// Construct with [`Session::connect`], bracket all use between
/// [`init`](Session::init) and [`shutdown`](Session::shutdown). The
/// session is `Send + Sync`; calls on distinct handles may run on
/// distinct threads, calls on the same handle are the caller's to
/// serialize.
pub struct Session {
    link: SessionLink,
    registry: Mutex<Arena<Arc<Stream>>>,
    state: Mutex<SessionState>,
    perf: PerfMon,
}

impl Session {
    /// Wires a session to its link half. No traffic happens until
    /// `init`.
    pub fn connect(link: SessionLink) -> Self {
        Self {
            link,
            registry: Mutex::new(Arena::new()),
            state: Mutex::new(SessionState {
                initialized: false,
                bindings: DeviceBindings::none(),
            }),
            perf: PerfMon::default(),
        }
    }

    /// Performs the hello/welcome handshake and stores the device
    /// bindings.
    ///
    /// Idempotent: calling it again on a live session refreshes the
    /// bindings (the re-arm path after [`reset_graphics`]) and returns
    /// Ok.
    ///
    /// # Errors
    ///
    /// - `NoConnection` when the peer is gone or silent
    /// - `BadLinkVersion` when the peer speaks another major version
    ///
    /// [`reset_graphics`]: Session::reset_graphics
    pub fn init(&self, bindings: DeviceBindings) -> Result<()> {
        let mut state = self.state.lock();
        if state.initialized {
            state.bindings = bindings;
            return Ok(());
        }
        self.handshake().map_err(|err| match err {
            // a link that died mid-handshake reads as "nobody there"
            FramewireError::ConnectionBroken => FramewireError::NoConnection,
            other => other,
        })?;
        state.initialized = true;
        state.bindings = bindings;
        Ok(())
    }

    fn handshake(&self) -> Result<()> {
        let payload = encode_json(&Hello::current())?;
        self.link.send(Envelope::new(
            MsgKind::Hello,
            0,
            self.link.next_seq(),
            payload,
        ))?;
        let deadline = Instant::now() + INIT_TIMEOUT;
        loop {
            self.link.pump(Some(PUMP_SLICE))?;
            if let Some(welcome) = self.link.take_welcome() {
                if !version_compatible(LINK_VERSION, &welcome.version) {
                    warn!(
                        "peer speaks link version {}, ours is {}",
                        welcome.version, LINK_VERSION
                    );
                    return Err(FramewireError::BadLinkVersion);
                }
                debug!(
                    "link established, peer adapter {}",
                    welcome.adapter
                );
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FramewireError::NoConnection);
            }
        }
    }

    /// Tears the session down.
    ///
    /// On a live link every stream must be closed first
    /// (`AlreadyOpen` otherwise). On a broken link the dead handles are
    /// dropped instead, so a caller can always get back to a clean
    /// state. Idempotent once down.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Ok(());
        }
        let mut registry = self.registry.lock();
        if !registry.is_empty() {
            if !self.link.is_broken() {
                return Err(FramewireError::AlreadyOpen);
            }
            warn!(
                "dropping {} stream handles on a broken link",
                registry.len()
            );
            let handles: Vec<StreamHandle> =
                registry.iter().map(|(handle, _)| handle).collect();
            for handle in handles {
                if let Some(stream) = registry.remove(handle) {
                    if let Some(seq) = stream.opening_seq() {
                        self.link.discard_open(seq);
                    }
                }
            }
            for channel in 0..MAX_CHANNELS as u8 {
                self.link.clear_pool(channel);
                self.link.clear_grant(channel);
            }
        }
        drop(registry);
        if !self.link.is_broken() {
            let _ = self.link.send(Envelope::new(
                MsgKind::Bye,
                0,
                UNSOLICITED_SEQ,
                Bytes::new(),
            ));
        }
        state.initialized = false;
        debug!("session down");
        Ok(())
    }

    /// Ordinal of the graphics adapter the peer renders on. Works
    /// outside the init bracket; `None` when the peer is unreachable.
    pub fn peer_adapter(&self) -> Option<u32> {
        self.link.peer_adapter()
    }

    /// Human-readable message for an error code.
    pub fn error_to_string(err: FramewireError) -> String {
        err.to_string()
    }

    /// Drops the device bindings, e.g. around a Direct3D device reset.
    ///
    /// Streams whose transfer path needs a binding (GPU modes, and
    /// CPU streams flagged `CPU_USING_DX9`) then report `NoFrame` from
    /// `has_frame` and `RequireContext` from the lock calls until
    /// `init` is called again with fresh bindings.
    pub fn reset_graphics(&self) {
        self.state.lock().bindings = DeviceBindings::none();
        debug!("device bindings dropped");
    }

    /// Installs (or clears) the enter/leave callbacks behind
    /// [`perf_span`](Session::perf_span) and the internal lock-cycle
    /// spans.
    pub fn set_perf_hooks(&self, hooks: Option<Arc<dyn PerfHooks>>) {
        self.perf.set(hooks);
    }

    /// Opens a caller-scoped profiling span. Spans nest; the guard
    /// closes its span on drop.
    pub fn perf_span(&self, color: u32) -> PerfSpan {
        self.perf.span(color)
    }

    /// Opens a stream and returns its handle.
    ///
    /// With `StreamFlags::ASYNC` the handle comes back immediately
    /// while the open is still in flight; poll
    /// [`open_continue`](Session::open_continue) until it stops
    /// returning `AsyncWait`. Without it, the call blocks for the
    /// peer's reply.
    pub fn open(&self, config: &StreamConfig) -> Result<StreamHandle> {
        self.check_link()?;
        {
            let state = self.state.lock();
            if !state.initialized {
                return Err(FramewireError::NoConnection);
            }
            config.validate(&state.bindings)?;
        }

        let mut registry = self.registry.lock();
        if registry
            .iter()
            .any(|(_, stream)| stream.channel() == config.channel)
        {
            return Err(FramewireError::AlreadyOpen);
        }

        let payload = encode_msg(&OpenRequest { config: *config })?;
        let pool = build_pool(config, &self.link);
        self.link.register_pool(config.channel, pool.clone());
        let seq = self.link.next_seq();
        self.link.register_open(seq);
        if let Err(err) = self.link.send(Envelope::new(
            MsgKind::OpenStream,
            config.channel,
            seq,
            payload,
        )) {
            self.link.discard_open(seq);
            self.link.clear_pool(config.channel);
            return Err(err);
        }

        let stream = Arc::new(Stream::new(*config, pool, Some(seq)));
        let handle = registry.insert(stream.clone());
        drop(registry);

        if config.flags.contains(StreamFlags::ASYNC) {
            debug!("channel {} open pending", config.channel);
            return Ok(handle);
        }

        match self.wait_open(seq) {
            Ok(reply) => {
                stream.complete_open(reply.frame_rate, reply.synchrone);
                debug!(
                    "channel {} open, {}/{} fps, synchrone {}",
                    config.channel,
                    reply.frame_rate.num,
                    reply.frame_rate.den,
                    reply.synchrone
                );
                Ok(handle)
            }
            Err(err) => {
                self.forget(handle, config.channel);
                Err(err)
            }
        }
    }

    fn wait_open(&self, seq: u32) -> Result<OpenReply> {
        let deadline = Instant::now() + OPEN_TIMEOUT;
        loop {
            self.link.pump(Some(PUMP_SLICE))?;
            if let Some(outcome) = self.link.take_open_outcome(seq) {
                return outcome;
            }
            if Instant::now() >= deadline {
                return Err(FramewireError::NoConnection);
            }
        }
    }

    /// Polls a pending async open. Ok once the stream is live,
    /// `AsyncWait` while the peer has not answered, the peer's refusal
    /// otherwise (which also retires the handle).
    pub fn open_continue(&self, handle: StreamHandle) -> Result<()> {
        self.check_link()?;
        let stream = self.stream(handle)?;
        let seq = match stream.opening_seq() {
            Some(seq) => seq,
            None => return Ok(()),
        };
        self.link.pump_pending()?;
        match self.link.take_open_outcome(seq) {
            Some(Ok(reply)) => {
                stream.complete_open(reply.frame_rate, reply.synchrone);
                debug!("channel {} open (async)", stream.channel());
                Ok(())
            }
            Some(Err(err)) => {
                self.forget(handle, stream.channel());
                Err(err)
            }
            None => Err(FramewireError::AsyncWait),
        }
    }

    /// Closes a stream. Hard-fails with `Locked` while a lock is
    /// outstanding; closing a pending async open aborts it.
    pub fn close(&self, handle: StreamHandle) -> Result<()> {
        self.check_link()?;
        let stream = self.stream(handle)?;
        if stream.is_locked() {
            return Err(FramewireError::Locked);
        }
        let channel = stream.channel();
        self.link.send(Envelope::new(
            MsgKind::CloseStream,
            channel,
            UNSOLICITED_SEQ,
            Bytes::new(),
        ))?;
        self.forget(handle, channel);
        debug!("channel {} closed", channel);
        Ok(())
    }

    /// Read-only snapshot of the stream's effective configuration.
    pub fn get_info(&self, handle: StreamHandle) -> Result<StreamInfo> {
        self.check_link()?;
        let stream = self.stream(handle)?;
        if stream.opening_seq().is_some() {
            return Err(FramewireError::AsyncWait);
        }
        Ok(stream.info())
    }

    /// Sets the peer-side frame delay, `0..=MAX_DELAY_FRAMES`. Callable
    /// locked or unlocked.
    pub fn set_delay(&self, handle: StreamHandle, delay: u32) -> Result<()> {
        self.check_link()?;
        let stream = self.stream(handle)?;
        stream.set_delay(&self.link, delay)
    }

    /// Non-blocking poll: Ok when a frame is ready to lock, `NoFrame`
    /// otherwise, including when the required device binding is gone.
    pub fn has_frame(&self, handle: StreamHandle) -> Result<()> {
        self.check_link()?;
        let stream = self.stream(handle)?;
        let context_ok = self.context_ok(&stream);
        stream.has_frame(&self.link, context_ok)
    }

    /// Locks the next frame with everything populated up front.
    pub fn lock_frame(&self, handle: StreamHandle) -> Result<LockedFrame> {
        self.lock_frame_with(handle, LockFlags::FILL_BUFFERS)
    }

    /// Locks the next frame with explicit fill and interlace control.
    pub fn lock_frame_with(
        &self,
        handle: StreamHandle,
        flags: LockFlags,
    ) -> Result<LockedFrame> {
        self.check_link()?;
        let stream = self.stream(handle)?;
        let context_ok = self.context_ok(&stream);
        stream.lock(&self.link, &self.perf, flags, None, context_ok)
    }

    /// Locks the next frame into a caller-owned buffer. The stream must
    /// have been opened with `StreamFlags::USER_BUFFERS`.
    pub fn lock_frame_user(
        &self,
        handle: StreamHandle,
        flags: LockFlags,
        buffer: &UserBuffer,
    ) -> Result<LockedFrame> {
        self.check_link()?;
        let stream = self.stream(handle)?;
        let context_ok = self.context_ok(&stream);
        stream.lock(&self.link, &self.perf, flags, Some(buffer), context_ok)
    }

    /// Runs the population step of a deferred lock. `NotLocked` when no
    /// lock is outstanding.
    pub fn fill_buffers(&self, handle: StreamHandle) -> Result<()> {
        self.check_link()?;
        self.stream(handle)?.fill_buffers(&self.perf)
    }

    /// Completes a fill batch across streams.
    pub fn fill_buffers_end(&self, handle: StreamHandle) -> Result<()> {
        self.check_link()?;
        self.stream(handle)?.fill_buffers_end(&self.perf)
    }

    /// Submits the locked frame together with all staged ancillary
    /// blobs.
    pub fn unlock_frame(&self, handle: StreamHandle) -> Result<()> {
        self.check_link()?;
        self.stream(handle)?.unlock(&self.link, &self.perf)
    }

    /// Stages an ancillary blob to travel with the currently locked
    /// frame. `NotLocked` outside a lock.
    pub fn send_anc(
        &self,
        handle: StreamHandle,
        tag: AncTag,
        data: Bytes,
    ) -> Result<()> {
        self.check_link()?;
        self.stream(handle)?.send_anc(tag, data)
    }

    /// Reads the `index`-th blob with `tag` delivered alongside the
    /// locked frame, optionally removing it.
    pub fn recv_anc(
        &self,
        handle: StreamHandle,
        tag: AncTag,
        index: usize,
        remove: bool,
    ) -> Result<Bytes> {
        self.check_link()?;
        self.stream(handle)?.recv_anc(tag, index, remove)
    }

    /// Produces the licensing escrow challenge for this stream.
    pub fn protection_message(
        &self,
        handle: StreamHandle,
    ) -> Result<[u8; PROTECTION_MESSAGE_LEN]> {
        self.check_link()?;
        self.stream(handle)?.protection_message()
    }

    /// Hands the license signature to the peer. Accepted once per
    /// handle; `BadSize` unless exactly four bytes.
    pub fn set_protection_signature(
        &self,
        handle: StreamHandle,
        signature: &[u8],
    ) -> Result<()> {
        self.check_link()?;
        self.stream(handle)?
            .set_protection_signature(&self.link, signature)
    }

    fn check_link(&self) -> Result<()> {
        if self.link.is_broken() {
            Err(FramewireError::ConnectionBroken)
        } else {
            Ok(())
        }
    }

    fn stream(&self, handle: StreamHandle) -> Result<Arc<Stream>> {
        self.registry
            .lock()
            .get(handle)
            .cloned()
            .ok_or(FramewireError::BadHandle)
    }

    /// True when the bindings needed by this stream's transfer path are
    /// present.
    fn context_ok(&self, stream: &Stream) -> bool {
        let state = self.state.lock();
        let info = stream.info();
        state.bindings.supports(info.transfer)
            && (!info.flags.contains(StreamFlags::CPU_USING_DX9)
                || state.bindings.d3d9.is_some())
    }

    fn forget(&self, handle: StreamHandle, channel: u8) {
        if let Some(stream) = self.registry.lock().remove(handle) {
            // a reply for an abandoned open must not pile up in the link
            if let Some(seq) = stream.opening_seq() {
                self.link.discard_open(seq);
            }
        }
        self.link.clear_pool(channel);
        self.link.clear_grant(channel);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("streams", &self.registry.lock().len())
            .field("broken", &self.link.is_broken())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link;

    #[test]
    fn test_ops_before_init_fail_cleanly() {
        let (session_link, _peer) = link::pair();
        let session = Session::connect(session_link);

        let config = StreamConfig::host_rgba(0, 64, 64);
        assert_eq!(
            session.open(&config),
            Err(FramewireError::NoConnection)
        );
        // no handles can exist yet, so stream ops are BadHandle
        let bogus = StreamHandle::new(0, 1);
        assert_eq!(
            session.get_info(bogus),
            Err(FramewireError::BadHandle)
        );
        assert_eq!(session.shutdown(), Ok(()));
    }

    #[test]
    fn test_error_to_string_passthrough() {
        assert_eq!(
            Session::error_to_string(FramewireError::NoFrame),
            "no frame available"
        );
    }

    #[test]
    fn test_broken_link_reads_as_connection_broken() {
        let (session_link, peer) = link::pair();
        let session = Session::connect(session_link);
        drop(peer);
        session.link.pump_pending().ok();

        let bogus = StreamHandle::new(0, 1);
        assert_eq!(
            session.unlock_frame(bogus),
            Err(FramewireError::ConnectionBroken)
        );
        assert_eq!(
            session.has_frame(bogus),
            Err(FramewireError::ConnectionBroken)
        );
    }
}
