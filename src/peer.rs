//! The compositor endpoint: the other half of a link pair.
//!
//! The endpoint owns the only service thread in the system. It drains
//! the peer half of the link under one mutex, so `settle` and the
//! state getters are exact: once they hold the mutex and the inbound
//! queue is empty, every message sent before the call has been
//! handled.
//!
//! Frame production is driven by the embedding code calling
//! `pump_frame` per channel per tick, the way a compositor would tick
//! its swap chains. A grant that was not submitted by the next tick is
//! reissued for the same slot with the drop counter bumped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::anc::{AncBlob, AncQueue, AncTag};
use crate::config::{FrameRate, StreamConfig, MAX_CHANNELS};
use crate::error::{FramewireError, Result};
use crate::frame::{D3d11Texture, D3d9Surface, FrameMeta, Timecode};
use crate::link::PeerLink;
use crate::protocol::{
    decode_json, decode_msg, encode_json, encode_msg, Envelope, FrameGrant,
    Hello, MsgKind, OpenNack, OpenReply, OpenRequest, ProtectionSignature,
    SetDelay, SubmitFrame, Welcome, LINK_VERSION, UNSOLICITED_SEQ,
};
use crate::stream::PROTECTION_SIGNATURE_LEN;

/// How often the service thread polls for inbound traffic.
const POLL_SLICE: Duration = Duration::from_millis(1);

/// Tunable behavior of the endpoint.
#[derive(Debug, Clone)]
pub struct PeerPolicy {
    /// Link version advertised in the welcome.
    pub version: String,
    /// Graphics adapter ordinal advertised to the session.
    pub adapter: u32,
    /// Output rate reported on open.
    pub frame_rate: FrameRate,
    /// When true, lock calls on the session side stall for a grant.
    pub synchrone: bool,
    /// When false, every open is refused with NotLicensed.
    pub license_ok: bool,
}

impl Default for PeerPolicy {
    fn default() -> Self {
        Self {
            version: LINK_VERSION.to_string(),
            adapter: 0,
            frame_rate: FrameRate::DEFAULT,
            synchrone: false,
            license_ok: true,
        }
    }
}

/// One submitted frame as the endpoint saw it.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub slot: u32,
    /// `frame_count` of the grant this frame answered.
    pub frame_count: u64,
    pub field: Option<u8>,
    /// Caller counter of the user buffer backing the lock, if any.
    pub user_count: Option<u64>,
    pub color: Vec<u8>,
    pub depth: Vec<u8>,
    pub d3d9: Option<D3d9Surface>,
    pub d3d11: Option<D3d11Texture>,
    pub anc: Vec<AncBlob>,
}

struct ChannelState {
    config: StreamConfig,
    delay: u32,
    total_slots: u32,
    /// Slots free to grant.
    free: VecDeque<u32>,
    /// The active slot and the `frame_count` of its latest grant. A
    /// slot stays active, regranted tick after tick, until the session
    /// answers the latest grant.
    active: Option<(u32, u64)>,
    /// Submitted slots retained to honor the delay.
    held: VecDeque<u32>,
    /// Grants issued so far (delivered + dropped).
    frames: u64,
    clock: u64,
    drops: u64,
    signature: Option<[u8; PROTECTION_SIGNATURE_LEN]>,
    received: Vec<ReceivedFrame>,
}

impl ChannelState {
    fn new(config: StreamConfig, total_slots: u32) -> Self {
        Self {
            config,
            delay: 0,
            total_slots,
            free: (0..total_slots).collect(),
            active: None,
            held: VecDeque::new(),
            frames: 0,
            clock: 0,
            drops: 0,
            signature: None,
            received: Vec::new(),
        }
    }
}

type Channels = [Option<ChannelState>; MAX_CHANNELS];

struct PeerShared {
    link: PeerLink,
    policy: PeerPolicy,
    channels: Mutex<Channels>,
    stop: AtomicBool,
}

/// Compositor-side endpoint. Start one per link pair; drop (or
/// [`crash`](PeerEndpoint::crash)) to take it down.
pub struct PeerEndpoint {
    shared: Arc<PeerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PeerEndpoint {
    /// Starts the endpoint with default policy.
    pub fn start(link: PeerLink) -> Self {
        Self::start_with(link, PeerPolicy::default())
    }

    /// Starts the endpoint with the given policy.
    pub fn start_with(link: PeerLink, policy: PeerPolicy) -> Self {
        link.advertise_adapter(policy.adapter);
        let shared = Arc::new(PeerShared {
            link,
            policy,
            channels: Mutex::new(std::array::from_fn(|_| None)),
            stop: AtomicBool::new(false),
        });
        let service = shared.clone();
        let thread = thread::spawn(move || {
            while !service.stop.load(Ordering::Acquire) {
                {
                    let mut channels = service.channels.lock();
                    if service.drain(&mut channels).is_err() {
                        break;
                    }
                }
                thread::sleep(POLL_SLICE);
            }
            debug!("peer service thread down");
        });
        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Issues the next frame grant on a channel, as one tick of the
    /// compositor clock.
    ///
    /// `NoFrame` when every slot is out with the session or held by the
    /// delay queue, `BadHandle` when the channel is not open.
    pub fn pump_frame(&self, channel: u8) -> Result<()> {
        self.pump_frame_with_anc(channel, Vec::new())
    }

    /// Like [`pump_frame`](PeerEndpoint::pump_frame), attaching
    /// ancillary blobs that travel to the session with the grant.
    pub fn pump_frame_with_anc(
        &self,
        channel: u8,
        anc: Vec<(AncTag, Bytes)>,
    ) -> Result<()> {
        if channel as usize >= MAX_CHANNELS {
            return Err(FramewireError::BadParameter);
        }
        let mut blobs = AncQueue::new();
        for (tag, data) in anc {
            blobs.push(tag, data)?;
        }

        let mut channels = self.shared.channels.lock();
        self.shared.drain(&mut channels)?;
        let state = channels[channel as usize]
            .as_mut()
            .ok_or(FramewireError::BadHandle)?;

        // an unanswered grant means the session missed that tick; the
        // active slot is regranted with the drop counter bumped
        let slot = match state.active {
            Some((slot, _)) => {
                state.drops += 1;
                slot
            }
            None => state
                .free
                .pop_front()
                .ok_or(FramewireError::NoFrame)?,
        };
        state.frames += 1;
        state.clock += 1;
        // timecode runs at the nominal rate, 60000/1001 counts as 60
        let den = self.shared.policy.frame_rate.den.max(1);
        let fps = (self.shared.policy.frame_rate.num + den / 2) / den;
        let grant = FrameGrant {
            slot,
            meta: FrameMeta {
                cluster_clock: state.clock,
                frame_count: state.frames,
                drop_count: state.drops,
                timecode: Timecode::from_frame_index(state.frames - 1, fps),
            },
            anc: blobs.drain(),
        };
        state.active = Some((slot, state.frames));
        drop(channels);

        self.shared.link.send(Envelope::new(
            MsgKind::FrameGrant,
            channel,
            UNSOLICITED_SEQ,
            encode_msg(&grant)?,
        ))
    }

    /// Blocks until every message sent before this call is handled.
    pub fn settle(&self) {
        let mut channels = self.shared.channels.lock();
        let _ = self.shared.drain(&mut channels);
    }

    /// True when the session has the channel open.
    pub fn is_open(&self, channel: u8) -> bool {
        self.read(channel, |_| ()).is_some()
    }

    /// Current delay on an open channel.
    pub fn delay(&self, channel: u8) -> Option<u32> {
        self.read(channel, |state| state.delay)
    }

    /// Configuration the session opened this channel with.
    pub fn stream_config(&self, channel: u8) -> Option<StreamConfig> {
        self.read(channel, |state| state.config)
    }

    /// License signature received for an open channel, if any.
    pub fn signature(
        &self,
        channel: u8,
    ) -> Option<[u8; PROTECTION_SIGNATURE_LEN]> {
        self.read(channel, |state| state.signature).flatten()
    }

    /// Drains and returns the frames submitted on a channel since the
    /// last call.
    pub fn received_frames(&self, channel: u8) -> Vec<ReceivedFrame> {
        if channel as usize >= MAX_CHANNELS {
            return Vec::new();
        }
        let mut channels = self.shared.channels.lock();
        let _ = self.shared.drain(&mut channels);
        match channels[channel as usize].as_mut() {
            Some(state) => std::mem::take(&mut state.received),
            None => Vec::new(),
        }
    }

    /// Simulates the compositor dying: the link reads as broken to both
    /// sides and the service thread exits.
    pub fn crash(&self) {
        self.shared.link.mark_broken();
        self.shared.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        debug!("peer endpoint crashed on purpose");
    }

    fn read<R>(
        &self,
        channel: u8,
        f: impl FnOnce(&ChannelState) -> R,
    ) -> Option<R> {
        if channel as usize >= MAX_CHANNELS {
            return None;
        }
        let mut channels = self.shared.channels.lock();
        let _ = self.shared.drain(&mut channels);
        channels[channel as usize].as_ref().map(f)
    }
}

impl Drop for PeerEndpoint {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl PeerShared {
    /// Handles everything queued on the inbound side. Runs under the
    /// channels mutex.
    fn drain(&self, channels: &mut Channels) -> Result<()> {
        loop {
            match self.link.recv(Duration::ZERO)? {
                Some(env) => self.handle(channels, env),
                None => return Ok(()),
            }
        }
    }

    fn handle(&self, channels: &mut Channels, env: Envelope) {
        let channel = env.header.channel as usize;
        let seq = env.header.seq;
        match env.header.kind {
            MsgKind::Hello => self.handle_hello(&env.payload, seq),
            MsgKind::OpenStream => {
                self.handle_open(channels, channel, seq, &env.payload)
            }
            MsgKind::CloseStream => {
                channels[channel] = None;
                debug!("channel {} closed by session", channel);
            }
            MsgKind::SubmitFrame => {
                self.handle_submit(channels, channel, &env.payload)
            }
            MsgKind::SetDelay => {
                self.handle_set_delay(channels, channel, &env.payload)
            }
            MsgKind::ProtectionSignature => {
                match decode_msg::<ProtectionSignature>(&env.payload) {
                    Ok(msg) => {
                        if let Some(state) = channels[channel].as_mut() {
                            state.signature = Some(msg.signature);
                        }
                    }
                    Err(_) => warn!("undecodable protection signature"),
                }
            }
            MsgKind::Bye => {
                for state in channels.iter_mut() {
                    *state = None;
                }
                debug!("session said bye");
            }
            other => {
                warn!("unexpected {:?} envelope on peer half", other);
            }
        }
    }

    fn handle_hello(&self, payload: &[u8], seq: u32) {
        match decode_json::<Hello>(payload) {
            Ok(hello) => debug!("hello from {}", hello.client),
            Err(_) => warn!("undecodable hello"),
        }
        let welcome = Welcome {
            version: self.policy.version.clone(),
            adapter: self.policy.adapter,
        };
        let send = encode_json(&welcome).and_then(|payload| {
            self.link
                .send(Envelope::new(MsgKind::Welcome, 0, seq, payload))
        });
        if let Err(err) = send {
            warn!("welcome reply failed: {err}");
        }
    }

    fn handle_open(
        &self,
        channels: &mut Channels,
        channel: usize,
        seq: u32,
        payload: &[u8],
    ) {
        let request = match decode_msg::<OpenRequest>(payload) {
            Ok(request) => request,
            Err(_) => {
                warn!("undecodable open request on channel {}", channel);
                self.nack(channel as u8, seq, FramewireError::Unspecified);
                return;
            }
        };
        if !self.policy.license_ok {
            self.nack(channel as u8, seq, FramewireError::NotLicensed);
            return;
        }
        if channels[channel].is_some() {
            self.nack(channel as u8, seq, FramewireError::AlreadyOpen);
            return;
        }
        let pool = match self.link.pool(channel as u8) {
            Some(pool) => pool,
            None => {
                warn!("open without a registered pool on channel {}", channel);
                self.nack(channel as u8, seq, FramewireError::Unspecified);
                return;
            }
        };
        let total_slots = pool.lock().len() as u32;
        channels[channel] =
            Some(ChannelState::new(request.config, total_slots));
        debug!(
            "channel {} open, {}x{}, {} slots",
            channel, request.config.width, request.config.height, total_slots
        );

        let reply = OpenReply {
            frame_rate: self.policy.frame_rate,
            synchrone: self.policy.synchrone,
        };
        let send = encode_msg(&reply).and_then(|payload| {
            self.link.send(Envelope::new(
                MsgKind::OpenAck,
                channel as u8,
                seq,
                payload,
            ))
        });
        if let Err(err) = send {
            warn!("open ack failed: {err}");
        }
    }

    fn nack(&self, channel: u8, seq: u32, code: FramewireError) {
        let send = encode_msg(&OpenNack { code: code.code() })
            .and_then(|payload| {
                self.link.send(Envelope::new(
                    MsgKind::OpenNack,
                    channel,
                    seq,
                    payload,
                ))
            });
        if let Err(err) = send {
            warn!("open nack failed: {err}");
        }
    }

    fn handle_submit(
        &self,
        channels: &mut Channels,
        channel: usize,
        payload: &[u8],
    ) {
        let submit = match decode_msg::<SubmitFrame>(payload) {
            Ok(submit) => submit,
            Err(_) => {
                warn!("undecodable submit on channel {}", channel);
                return;
            }
        };
        let state = match channels[channel].as_mut() {
            Some(state) => state,
            None => {
                warn!("submit on closed channel {}", channel);
                return;
            }
        };
        let (slot, latest) = match state.active {
            Some((slot, latest)) if slot == submit.slot => (slot, latest),
            _ => {
                warn!(
                    "stale submit for slot {} on channel {}",
                    submit.slot, channel
                );
                return;
            }
        };

        let (color, depth, d3d9, d3d11) =
            self.snapshot_slot(channel as u8, slot);
        state.received.push(ReceivedFrame {
            slot,
            frame_count: submit.frame_count,
            field: submit.field,
            user_count: submit.user_count,
            color,
            depth,
            d3d9,
            d3d11,
            anc: submit.anc,
        });

        // a submit answering an older grant of the same slot leaves the
        // slot active: the latest grant is still in flight
        if submit.frame_count == latest {
            state.active = None;
            state.held.push_back(slot);
            while state.held.len() > state.delay as usize {
                if let Some(freed) = state.held.pop_front() {
                    state.free.push_back(freed);
                }
            }
        }
    }

    /// Copies the submitted slot's planes out of the shared pool.
    fn snapshot_slot(
        &self,
        channel: u8,
        slot: u32,
    ) -> (Vec<u8>, Vec<u8>, Option<D3d9Surface>, Option<D3d11Texture>) {
        let pool = match self.link.pool(channel) {
            Some(pool) => pool,
            None => return (Vec::new(), Vec::new(), None, None),
        };
        let entries = pool.lock();
        let entry = match entries.get(slot as usize) {
            Some(entry) => entry,
            None => {
                warn!(
                    "submit names slot {} outside the pool on channel {}",
                    slot, channel
                );
                return (Vec::new(), Vec::new(), None, None);
            }
        };
        let (color, depth) = match &entry.storage {
            Some(storage) => {
                let guard = storage.lock();
                (guard.color.to_vec(), guard.depth.to_vec())
            }
            None => (Vec::new(), Vec::new()),
        };
        (color, depth, entry.d3d9, entry.d3d11)
    }

    fn handle_set_delay(
        &self,
        channels: &mut Channels,
        channel: usize,
        payload: &[u8],
    ) {
        let msg = match decode_msg::<SetDelay>(payload) {
            Ok(msg) => msg,
            Err(_) => {
                warn!("undecodable set-delay on channel {}", channel);
                return;
            }
        };
        if let Some(state) = channels[channel].as_mut() {
            state.delay = msg.delay;
            if msg.slots > state.total_slots {
                state.free.extend(state.total_slots..msg.slots);
                state.total_slots = msg.slots;
            }
            debug!(
                "channel {} delay {} ({} slots)",
                channel, msg.delay, state.total_slots
            );
        }
    }
}
