//! In-process link between a session and its peer endpoint.
//!
//! The link is the stand-in for the shared-memory connection to the
//! compositor process: two message channels (one per direction) plus
//! shared state both halves can reach directly, the way mapped memory
//! would be. Pixel planes live in per-channel slot pools inside that
//! shared state; envelopes carry slot indices only.
//!
//! The session half routes inbound envelopes on demand: every blocking
//! or polling entry point pumps the receive side and files what arrives
//! (grants per channel, open outcomes per sequence number). There is no
//! client-side thread; the calling code drives the link exactly as fast
//! as it ticks.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{
    unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::MAX_CHANNELS;
use crate::error::{FramewireError, Result};
use crate::frame::{D3d11Texture, D3d9Surface, SharedStorage};
use crate::protocol::{
    decode_json, decode_msg, Envelope, FrameGrant, MsgKind, OpenNack,
    OpenReply, Welcome,
};

/// One slot of a channel's frame pool.
///
/// Host-memory streams carry plane storage; GPU streams carry the shared
/// surface ids minted for the slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct SlotEntry {
    pub storage: Option<SharedStorage>,
    pub d3d9: Option<D3d9Surface>,
    pub d3d9_depth: Option<D3d9Surface>,
    pub d3d11: Option<D3d11Texture>,
    pub d3d11_depth: Option<D3d11Texture>,
}

/// Growable slot pool shared by both link halves.
pub(crate) type SlotPool = Arc<Mutex<Vec<SlotEntry>>>;

/// State shared by both halves, the analog of the mapped segment.
struct LinkShared {
    broken: AtomicBool,
    /// Adapter ordinal advertised by the attached peer endpoint.
    peer_adapter: Mutex<Option<u32>>,
    /// Per-channel slot pools, registered at open and cleared at close.
    pools: Mutex<[Option<SlotPool>; MAX_CHANNELS]>,
    /// Mint for cross-process surface share ids.
    next_surface_id: AtomicU64,
}

impl LinkShared {
    fn new() -> Self {
        Self {
            broken: AtomicBool::new(false),
            peer_adapter: Mutex::new(None),
            pools: Mutex::new(std::array::from_fn(|_| None)),
            next_surface_id: AtomicU64::new(1),
        }
    }
}

/// Inbound state the session half files while pumping.
struct RouteTable {
    welcome: Mutex<Option<Welcome>>,
    /// Latest grant per channel. A newer grant replaces an unconsumed
    /// one; the peer has already revoked the old slot by then.
    grants: [Mutex<Option<FrameGrant>>; MAX_CHANNELS],
    /// Outcomes of registered open requests, keyed by sequence number.
    /// `None` marks a request still waiting for its reply; replies for
    /// unregistered sequences are dropped on arrival.
    opens: Mutex<Vec<(u32, Option<Result<OpenReply>>)>>,
}

impl RouteTable {
    fn new() -> Self {
        Self {
            welcome: Mutex::new(None),
            grants: std::array::from_fn(|_| Mutex::new(None)),
            opens: Mutex::new(Vec::new()),
        }
    }
}

/// Creates a connected link: the session half and the peer half.
pub fn pair() -> (SessionLink, PeerLink) {
    let shared = Arc::new(LinkShared::new());
    let (to_peer_tx, to_peer_rx) = unbounded();
    let (to_client_tx, to_client_rx) = unbounded();
    (
        SessionLink {
            shared: shared.clone(),
            tx: to_peer_tx,
            rx: to_client_rx,
            route: RouteTable::new(),
            next_seq: AtomicU32::new(1),
        },
        PeerLink {
            shared,
            tx: to_client_tx,
            rx: to_peer_rx,
        },
    )
}

/// Session half of a link. Opaque; consumed by `Session::connect`.
pub struct SessionLink {
    shared: Arc<LinkShared>,
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
    route: RouteTable,
    next_seq: AtomicU32,
}

impl SessionLink {
    /// Sends one envelope to the peer.
    pub(crate) fn send(&self, env: Envelope) -> Result<()> {
        if self.is_broken() {
            return Err(FramewireError::ConnectionBroken);
        }
        self.tx.send(env.encode()).map_err(|_| {
            self.mark_broken();
            FramewireError::ConnectionBroken
        })
    }

    /// Receives and routes at most one inbound envelope.
    ///
    /// `wait` of `None` polls; otherwise the call blocks up to the given
    /// duration. Returns whether an envelope was consumed.
    pub(crate) fn pump(&self, wait: Option<Duration>) -> Result<bool> {
        if self.is_broken() {
            return Err(FramewireError::ConnectionBroken);
        }
        let raw = match wait {
            None => match self.rx.try_recv() {
                Ok(raw) => raw,
                Err(TryRecvError::Empty) => return Ok(false),
                Err(TryRecvError::Disconnected) => {
                    self.mark_broken();
                    return Err(FramewireError::ConnectionBroken);
                }
            },
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(raw) => raw,
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    self.mark_broken();
                    return Err(FramewireError::ConnectionBroken);
                }
            },
        };
        self.route(raw);
        Ok(true)
    }

    /// Drains everything currently queued without blocking.
    pub(crate) fn pump_pending(&self) -> Result<()> {
        while self.pump(None)? {}
        Ok(())
    }

    fn route(&self, raw: Bytes) {
        let env = match Envelope::decode(raw) {
            Ok(env) => env,
            Err(_) => {
                warn!("dropping malformed envelope from peer");
                return;
            }
        };
        let channel = env.header.channel as usize;
        match env.header.kind {
            MsgKind::Welcome => {
                match decode_json::<Welcome>(&env.payload) {
                    Ok(welcome) => *self.route.welcome.lock() = Some(welcome),
                    Err(_) => warn!("undecodable welcome from peer"),
                }
            }
            MsgKind::FrameGrant => {
                match decode_msg::<FrameGrant>(&env.payload) {
                    Ok(grant) => {
                        *self.route.grants[channel].lock() = Some(grant)
                    }
                    Err(_) => warn!("undecodable grant on channel {}", channel),
                }
            }
            MsgKind::OpenAck => match decode_msg::<OpenReply>(&env.payload) {
                Ok(reply) => {
                    self.file_open_outcome(env.header.seq, Ok(reply))
                }
                Err(_) => warn!("undecodable open ack"),
            },
            MsgKind::OpenNack => match decode_msg::<OpenNack>(&env.payload) {
                Ok(nack) => self.file_open_outcome(
                    env.header.seq,
                    Err(FramewireError::from_code(nack.code)),
                ),
                Err(_) => warn!("undecodable open nack"),
            },
            other => {
                warn!("unexpected {:?} envelope on session half", other);
            }
        }
    }

    /// Takes the routed welcome, if the peer has answered yet.
    pub(crate) fn take_welcome(&self) -> Option<Welcome> {
        self.route.welcome.lock().take()
    }

    /// Takes the pending grant for a channel.
    pub(crate) fn take_grant(&self, channel: u8) -> Option<FrameGrant> {
        self.route.grants[channel as usize].lock().take()
    }

    /// True when a grant is queued for the channel.
    pub(crate) fn has_grant(&self, channel: u8) -> bool {
        self.route.grants[channel as usize].lock().is_some()
    }

    /// Drops any queued grant for the channel (close discards it).
    pub(crate) fn clear_grant(&self, channel: u8) {
        *self.route.grants[channel as usize].lock() = None;
    }

    /// Registers interest in the outcome of an open request. Must be
    /// called before the request goes out; replies for sequences nobody
    /// registered are dropped.
    pub(crate) fn register_open(&self, seq: u32) {
        self.route.opens.lock().push((seq, None));
    }

    /// Takes the outcome of the open request with the given sequence,
    /// once it has arrived.
    pub(crate) fn take_open_outcome(
        &self,
        seq: u32,
    ) -> Option<Result<OpenReply>> {
        let mut opens = self.route.opens.lock();
        let pos = opens
            .iter()
            .position(|(s, outcome)| *s == seq && outcome.is_some())?;
        opens.remove(pos).1
    }

    /// Retires an open request nobody will wait on again. A reply
    /// arriving afterwards is dropped.
    pub(crate) fn discard_open(&self, seq: u32) {
        self.route.opens.lock().retain(|(s, _)| *s != seq);
    }

    /// Files a routed open reply into its registered slot.
    fn file_open_outcome(&self, seq: u32, outcome: Result<OpenReply>) {
        let mut opens = self.route.opens.lock();
        match opens.iter_mut().find(|(s, _)| *s == seq) {
            Some((_, slot)) => *slot = Some(outcome),
            None => debug!("dropping open reply for retired request {}", seq),
        }
    }

    /// Next request sequence number, never `UNSOLICITED_SEQ`.
    pub(crate) fn next_seq(&self) -> u32 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if seq == 0 {
            self.next_seq.fetch_add(1, Ordering::Relaxed)
        } else {
            seq
        }
    }

    /// Adapter the attached peer renders on; `None` without a live peer.
    pub(crate) fn peer_adapter(&self) -> Option<u32> {
        if self.is_broken() {
            return None;
        }
        *self.shared.peer_adapter.lock()
    }

    pub(crate) fn register_pool(&self, channel: u8, pool: SlotPool) {
        self.shared.pools.lock()[channel as usize] = Some(pool);
    }

    pub(crate) fn clear_pool(&self, channel: u8) {
        self.shared.pools.lock()[channel as usize] = None;
    }

    /// Mints a fresh shared-surface id.
    pub(crate) fn mint_surface_id(&self) -> u64 {
        self.shared.next_surface_id.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn is_broken(&self) -> bool {
        self.shared.broken.load(Ordering::Acquire)
    }

    pub(crate) fn mark_broken(&self) {
        self.shared.broken.store(true, Ordering::Release);
    }
}

/// Peer half of a link. Opaque; consumed by `PeerEndpoint::start`.
pub struct PeerLink {
    shared: Arc<LinkShared>,
    tx: Sender<Bytes>,
    rx: Receiver<Bytes>,
}

impl PeerLink {
    /// Sends one envelope to the session half.
    pub(crate) fn send(&self, env: Envelope) -> Result<()> {
        if self.is_broken() {
            return Err(FramewireError::ConnectionBroken);
        }
        self.tx.send(env.encode()).map_err(|_| {
            self.mark_broken();
            FramewireError::ConnectionBroken
        })
    }

    /// Receives one envelope; `None` on timeout.
    pub(crate) fn recv(&self, timeout: Duration) -> Result<Option<Envelope>> {
        match self.rx.recv_timeout(timeout) {
            Ok(raw) => match Envelope::decode(raw) {
                Ok(env) => Ok(Some(env)),
                Err(_) => {
                    warn!("dropping malformed envelope from client");
                    Ok(None)
                }
            },
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(FramewireError::ConnectionBroken)
            }
        }
    }

    /// True when nothing is waiting on the inbound side.
    pub(crate) fn inbound_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub(crate) fn advertise_adapter(&self, adapter: u32) {
        *self.shared.peer_adapter.lock() = Some(adapter);
    }

    pub(crate) fn pool(&self, channel: u8) -> Option<SlotPool> {
        self.shared.pools.lock()[channel as usize].clone()
    }

    #[inline]
    pub(crate) fn is_broken(&self) -> bool {
        self.shared.broken.load(Ordering::Acquire)
    }

    pub(crate) fn mark_broken(&self) {
        self.shared.broken.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameMeta, Timecode};
    use crate::protocol::{encode_msg, UNSOLICITED_SEQ};

    fn grant_envelope(channel: u8, slot: u32, frame_count: u64) -> Envelope {
        let grant = FrameGrant {
            slot,
            meta: FrameMeta {
                cluster_clock: frame_count,
                frame_count,
                drop_count: 0,
                timecode: Timecode::ZERO,
            },
            anc: Vec::new(),
        };
        Envelope::new(
            MsgKind::FrameGrant,
            channel,
            UNSOLICITED_SEQ,
            encode_msg(&grant).unwrap(),
        )
    }

    #[test]
    fn test_pump_routes_grants_per_channel() {
        let (session, peer) = pair();
        peer.send(grant_envelope(0, 0, 1)).unwrap();
        peer.send(grant_envelope(1, 1, 4)).unwrap();

        session.pump_pending().unwrap();
        assert!(session.has_grant(0));
        assert!(session.has_grant(1));

        let g0 = session.take_grant(0).unwrap();
        assert_eq!(g0.meta.frame_count, 1);
        assert!(!session.has_grant(0));
        assert!(session.has_grant(1));
    }

    #[test]
    fn test_newer_grant_replaces_unconsumed_one() {
        let (session, peer) = pair();
        peer.send(grant_envelope(0, 0, 1)).unwrap();
        peer.send(grant_envelope(0, 1, 2)).unwrap();

        session.pump_pending().unwrap();
        let grant = session.take_grant(0).unwrap();
        assert_eq!(grant.slot, 1);
        assert_eq!(grant.meta.frame_count, 2);
        assert!(session.take_grant(0).is_none());
    }

    #[test]
    fn test_open_outcomes_keyed_by_seq() {
        let (session, peer) = pair();
        let reply = OpenReply {
            frame_rate: crate::config::FrameRate::DEFAULT,
            synchrone: false,
        };
        session.register_open(7);
        session.register_open(9);
        peer.send(Envelope::new(
            MsgKind::OpenAck,
            0,
            7,
            encode_msg(&reply).unwrap(),
        ))
        .unwrap();
        peer.send(Envelope::new(
            MsgKind::OpenNack,
            1,
            9,
            encode_msg(&OpenNack {
                code: FramewireError::NotLicensed.code(),
            })
            .unwrap(),
        ))
        .unwrap();

        session.pump_pending().unwrap();
        assert!(session.take_open_outcome(3).is_none());
        assert_eq!(session.take_open_outcome(7), Some(Ok(reply)));
        assert_eq!(
            session.take_open_outcome(9),
            Some(Err(FramewireError::NotLicensed))
        );
        // outcomes are consumed
        assert!(session.take_open_outcome(7).is_none());
    }

    #[test]
    fn test_replies_for_retired_requests_are_dropped() {
        let (session, peer) = pair();
        let reply = OpenReply {
            frame_rate: crate::config::FrameRate::DEFAULT,
            synchrone: false,
        };
        let ack = |seq: u32| {
            Envelope::new(MsgKind::OpenAck, 0, seq, encode_msg(&reply).unwrap())
        };

        // never registered
        peer.send(ack(5)).unwrap();
        // registered, then given up on before the reply landed
        session.register_open(7);
        session.discard_open(7);
        peer.send(ack(7)).unwrap();

        session.pump_pending().unwrap();
        assert!(session.take_open_outcome(5).is_none());
        assert!(session.take_open_outcome(7).is_none());

        // a registered request without a reply is pending, not gone
        session.register_open(8);
        assert!(session.take_open_outcome(8).is_none());
    }

    #[test]
    fn test_dropped_peer_half_breaks_the_link() {
        let (session, peer) = pair();
        drop(peer);
        // pump drains nothing and reports the break
        assert_eq!(
            session.pump(Some(Duration::from_millis(10))),
            Err(FramewireError::ConnectionBroken)
        );
        assert!(session.is_broken());
        assert_eq!(
            session.send(Envelope::new(
                MsgKind::Bye,
                0,
                UNSOLICITED_SEQ,
                Bytes::new()
            )),
            Err(FramewireError::ConnectionBroken)
        );
    }

    #[test]
    fn test_adapter_advertised_through_shared_state() {
        let (session, peer) = pair();
        assert_eq!(session.peer_adapter(), None);
        peer.advertise_adapter(2);
        assert_eq!(session.peer_adapter(), Some(2));
        peer.mark_broken();
        assert_eq!(session.peer_adapter(), None);
    }

    #[test]
    fn test_pool_registration_visible_to_peer() {
        let (session, peer) = pair();
        assert!(peer.pool(0).is_none());
        let pool: SlotPool =
            Arc::new(Mutex::new(vec![SlotEntry::default(); 3]));
        session.register_pool(0, pool);
        assert_eq!(peer.pool(0).unwrap().lock().len(), 3);
        session.clear_pool(0);
        assert!(peer.pool(0).is_none());
    }

    #[test]
    fn test_surface_ids_are_unique() {
        let (session, _peer) = pair();
        let a = session.mint_surface_id();
        let b = session.mint_surface_id();
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn test_seq_skips_unsolicited_value() {
        let (session, _peer) = pair();
        for _ in 0..10 {
            assert_ne!(session.next_seq(), UNSOLICITED_SEQ);
        }
    }
}
