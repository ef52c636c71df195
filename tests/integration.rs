//! End-to-end tests for framewire: a session and a peer endpoint wired
//! over an in-process link pair, exercising the full frame cycle the
//! way an embedding application would.

use std::thread;
use std::time::Duration;

use bytes::Bytes;
use framewire::anc::AncTag;
use framewire::buffer::{BufferInfo, UserBuffer};
use framewire::config::{
    ColorPacking, D3d11Device, D3d9Device, DepthPacking, DeviceBindings,
    Direction, FrameRate, LockFlags, StreamConfig, StreamFlags,
    TransferMode,
};
use framewire::frame::LockedFrame;
use framewire::link;
use framewire::peer::{PeerEndpoint, PeerPolicy, ReceivedFrame};
use framewire::{FramewireError, Session, StreamHandle};

/// Connected session/peer pair with default policy, already initialized.
fn rig() -> (Session, PeerEndpoint) {
    rig_with(PeerPolicy::default())
}

fn rig_with(policy: PeerPolicy) -> (Session, PeerEndpoint) {
    let (session_link, peer_link) = link::pair();
    let peer = PeerEndpoint::start_with(peer_link, policy);
    let session = Session::connect(session_link);
    session.init(DeviceBindings::none()).unwrap();
    (session, peer)
}

fn open_host(
    session: &Session,
    channel: u8,
    width: u32,
    height: u32,
) -> StreamHandle {
    session
        .open(&StreamConfig::host_rgba(channel, width, height))
        .unwrap()
}

/// Fills the whole color plane with one byte.
fn paint(frame: &LockedFrame, byte: u8) {
    frame.host_color().unwrap().lock().fill(byte);
}

/// Writes a recognizable ramp over the first `len` color bytes.
fn write_ramp(frame: &LockedFrame, len: usize) {
    let plane = frame.host_color().unwrap();
    let mut bytes = plane.lock();
    for (i, b) in bytes.iter_mut().take(len).enumerate() {
        *b = (i as u8).wrapping_mul(7).wrapping_add(3);
    }
}

/// Drains the peer's received frames and asserts exactly one arrived.
fn sole_frame(peer: &PeerEndpoint, channel: u8) -> ReceivedFrame {
    let mut frames = peer.received_frames(channel);
    assert_eq!(frames.len(), 1, "expected exactly one submitted frame");
    frames.remove(0)
}

/// Full producer cycle: open, wait for a grant, write pixels, unlock,
/// verify the peer saw the bytes, close, shut down.
#[test]
fn test_full_frame_cycle() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 256, 256);

    // nothing granted yet
    assert_eq!(session.has_frame(stream), Err(FramewireError::NoFrame));
    assert!(matches!(
        session.lock_frame(stream),
        Err(FramewireError::NoFrame)
    ));

    peer.pump_frame(0).unwrap();
    assert_eq!(session.has_frame(stream), Ok(()));

    let frame = session.lock_frame(stream).unwrap();
    assert_eq!(frame.meta.frame_count, 1);
    assert_eq!(frame.meta.drop_count, 0);
    assert_eq!(frame.meta.cluster_clock, 1);
    assert_eq!(frame.meta.timecode.frames, 0);
    assert_eq!(frame.field, None);
    {
        let plane = frame.host_color().unwrap();
        assert_eq!(plane.bytes_per_line, 256 * 4);
        assert_eq!(plane.lines, 256);
    }
    paint(&frame, 0x5A);
    session.unlock_frame(stream).unwrap();

    let got = sole_frame(&peer, 0);
    assert_eq!(got.slot, 0);
    assert_eq!(got.frame_count, 1);
    assert_eq!(got.field, None);
    assert_eq!(got.user_count, None);
    assert_eq!(got.color.len(), 256 * 256 * 4);
    assert!(got.color.iter().all(|&b| b == 0x5A));
    assert!(got.depth.is_empty());

    let info = session.get_info(stream).unwrap();
    assert_eq!(info.channel, 0);
    assert_eq!(info.width, 256);
    assert_eq!(info.height, 256);
    assert_eq!(info.frame_rate, FrameRate::DEFAULT);
    assert!(!info.synchrone);
    assert_eq!(info.delay, 0);

    session.close(stream).unwrap();
    assert!(!peer.is_open(0));
    session.shutdown().unwrap();
}

/// Lock state machine: double lock, unlock without lock, close while
/// locked, and the handle dying with the close.
#[test]
fn test_lock_state_transitions() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 4, 4);

    peer.pump_frame(0).unwrap();
    let _frame = session.lock_frame(stream).unwrap();
    assert!(matches!(
        session.lock_frame(stream),
        Err(FramewireError::Locked)
    ));
    // a lock in flight pins the stream open
    assert_eq!(session.close(stream), Err(FramewireError::Locked));
    session.unlock_frame(stream).unwrap();

    assert_eq!(
        session.unlock_frame(stream),
        Err(FramewireError::NotLocked)
    );
    assert_eq!(
        session.fill_buffers(stream),
        Err(FramewireError::NotLocked)
    );
    assert_eq!(
        session.fill_buffers_end(stream),
        Err(FramewireError::NotLocked)
    );

    session.close(stream).unwrap();
    assert_eq!(
        session.get_info(stream).err(),
        Some(FramewireError::BadHandle)
    );
    assert_eq!(
        session.unlock_frame(stream),
        Err(FramewireError::BadHandle)
    );
}

/// Open-time validation: bad configs are rejected, channels are
/// exclusive, and GPU modes need their device binding.
#[test]
fn test_open_validation() {
    let (session, _peer) = rig();

    let mut config = StreamConfig::host_rgba(5, 4, 4);
    assert!(matches!(
        session.open(&config),
        Err(FramewireError::BadParameter)
    ));

    config.channel = 0;
    config.width = 0;
    assert!(matches!(
        session.open(&config),
        Err(FramewireError::BadSize)
    ));

    config.width = 4;
    config.transfer = TransferMode::Direct3d11;
    assert!(matches!(
        session.open(&config),
        Err(FramewireError::RequireContext)
    ));

    config.transfer = TransferMode::HostMemory;
    let stream = session.open(&config).unwrap();
    assert!(matches!(
        session.open(&config),
        Err(FramewireError::AlreadyOpen)
    ));
    session.close(stream).unwrap();
}

/// Init is idempotent and shutdown refuses while streams are open on a
/// live link.
#[test]
fn test_init_shutdown_discipline() {
    let (session, peer) = rig();
    // re-init on a live session is a refresh, not an error
    session.init(DeviceBindings::none()).unwrap();

    let stream = open_host(&session, 0, 4, 4);
    assert_eq!(session.shutdown(), Err(FramewireError::AlreadyOpen));
    assert!(peer.is_open(0));

    session.close(stream).unwrap();
    session.shutdown().unwrap();
    // shutdown twice is a no-op
    session.shutdown().unwrap();

    // a shut-down session refuses stream calls until the next init
    assert!(matches!(
        session.open(&StreamConfig::host_rgba(0, 4, 4)),
        Err(FramewireError::NoConnection)
    ));
}

/// Async open hands the handle back immediately; the stream answers
/// `AsyncWait` until `open_continue` picks up the peer's reply.
#[test]
fn test_async_open_continuation() {
    let (session, peer) = rig();

    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.flags = StreamFlags::ASYNC;
    let stream = session.open(&config).unwrap();

    // pending opens park every stream operation
    assert_eq!(
        session.get_info(stream).err(),
        Some(FramewireError::AsyncWait)
    );
    assert!(matches!(
        session.lock_frame(stream),
        Err(FramewireError::AsyncWait)
    ));
    assert_eq!(
        session.set_delay(stream, 1),
        Err(FramewireError::AsyncWait)
    );

    // once the peer has answered, continuation completes the open
    peer.settle();
    session.open_continue(stream).unwrap();
    // continuing a live stream is a no-op
    session.open_continue(stream).unwrap();

    let info = session.get_info(stream).unwrap();
    assert_eq!(info.frame_rate, FrameRate::DEFAULT);

    peer.pump_frame(0).unwrap();
    let _frame = session.lock_frame(stream).unwrap();
    session.unlock_frame(stream).unwrap();
    session.close(stream).unwrap();
}

/// A refused async open surfaces its error through `open_continue` and
/// retires the handle.
#[test]
fn test_async_open_refusal_retires_handle() {
    let policy = PeerPolicy {
        license_ok: false,
        ..PeerPolicy::default()
    };
    let (session, peer) = rig_with(policy);

    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.flags = StreamFlags::ASYNC;
    let stream = session.open(&config).unwrap();

    peer.settle();
    assert_eq!(
        session.open_continue(stream),
        Err(FramewireError::NotLicensed)
    );
    assert_eq!(
        session.get_info(stream).err(),
        Some(FramewireError::BadHandle)
    );
}

/// An unlicensed peer refuses synchronous opens too, and the channel
/// stays free for a later attempt.
#[test]
fn test_open_refused_without_license() {
    let policy = PeerPolicy {
        license_ok: false,
        ..PeerPolicy::default()
    };
    let (session, peer) = rig_with(policy);

    assert!(matches!(
        session.open(&StreamConfig::host_rgba(0, 4, 4)),
        Err(FramewireError::NotLicensed)
    ));
    assert!(!peer.is_open(0));
    session.shutdown().unwrap();
}

/// Version handshake: a different major refuses the session, a
/// different minor does not.
#[test]
fn test_link_version_negotiation() {
    let (session_link, peer_link) = link::pair();
    let policy = PeerPolicy {
        version: "2.0.0".to_string(),
        ..PeerPolicy::default()
    };
    let _peer = PeerEndpoint::start_with(peer_link, policy);
    let session = Session::connect(session_link);
    assert_eq!(
        session.init(DeviceBindings::none()),
        Err(FramewireError::BadLinkVersion)
    );

    let (session_link, peer_link) = link::pair();
    let policy = PeerPolicy {
        version: "1.9.3".to_string(),
        ..PeerPolicy::default()
    };
    let _peer = PeerEndpoint::start_with(peer_link, policy);
    let session = Session::connect(session_link);
    session.init(DeviceBindings::none()).unwrap();
}

/// Ticks the session slept through show up as drops, and the counters
/// stay cumulative across later frames.
#[test]
fn test_missed_ticks_show_in_meta() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 4, 4);

    // three ticks, nobody locking: the same slot is regranted
    peer.pump_frame(0).unwrap();
    peer.pump_frame(0).unwrap();
    peer.pump_frame(0).unwrap();

    let frame = session.lock_frame(stream).unwrap();
    assert_eq!(frame.meta.frame_count, 3);
    assert_eq!(frame.meta.drop_count, 2);
    assert_eq!(frame.meta.timecode.frames, 2);
    session.unlock_frame(stream).unwrap();

    let got = sole_frame(&peer, 0);
    assert_eq!(got.frame_count, 3);

    // the next delivered frame keeps the cumulative drop count
    peer.pump_frame(0).unwrap();
    let frame = session.lock_frame(stream).unwrap();
    assert_eq!(frame.meta.frame_count, 4);
    assert_eq!(frame.meta.drop_count, 2);
    session.unlock_frame(stream).unwrap();
}

/// Ancillary blobs travel both ways: inbound with the grant, indexed
/// per tag with remove-compaction; outbound with the unlock.
#[test]
fn test_anc_round_trip() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 4, 4);

    assert_eq!(
        session.send_anc(stream, AncTag::CAMERA, Bytes::new()),
        Err(FramewireError::NotLocked)
    );

    peer.pump_frame_with_anc(
        0,
        vec![
            (AncTag::CAMERA, Bytes::from_static(b"cam-pose")),
            (AncTag::PROJECTION, Bytes::from_static(b"proj-a")),
            (AncTag::PROJECTION, Bytes::from_static(b"proj-b")),
        ],
    )
    .unwrap();

    let _frame = session.lock_frame(stream).unwrap();
    // non-destructive reads repeat
    assert_eq!(
        session.recv_anc(stream, AncTag::CAMERA, 0, false).unwrap(),
        Bytes::from_static(b"cam-pose")
    );
    assert_eq!(
        session.recv_anc(stream, AncTag::CAMERA, 0, false).unwrap(),
        Bytes::from_static(b"cam-pose")
    );
    // removal compacts same-tag indices
    assert_eq!(
        session
            .recv_anc(stream, AncTag::PROJECTION, 0, true)
            .unwrap(),
        Bytes::from_static(b"proj-a")
    );
    assert_eq!(
        session
            .recv_anc(stream, AncTag::PROJECTION, 0, false)
            .unwrap(),
        Bytes::from_static(b"proj-b")
    );
    assert_eq!(
        session.recv_anc(stream, AncTag::PROJECTION, 1, false),
        Err(FramewireError::AncNotFound)
    );

    let note = AncTag::new(*b"NOTE");
    session
        .send_anc(stream, note, Bytes::from_static(b"hello"))
        .unwrap();
    session.unlock_frame(stream).unwrap();

    let got = sole_frame(&peer, 0);
    assert_eq!(got.anc.len(), 1);
    assert_eq!(got.anc[0].tag, note);
    assert_eq!(got.anc[0].data, Bytes::from_static(b"hello"));

    // leftovers from the previous frame do not leak into the next lock
    peer.pump_frame(0).unwrap();
    let _frame = session.lock_frame(stream).unwrap();
    assert_eq!(
        session.recv_anc(stream, AncTag::CAMERA, 0, false),
        Err(FramewireError::AncNotFound)
    );
    session.unlock_frame(stream).unwrap();
}

/// Blob count and byte budgets bound what one frame may carry, on both
/// ends of the link.
#[test]
fn test_anc_budget() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 4, 4);
    let tag = AncTag::new(*b"BULK");

    peer.pump_frame(0).unwrap();
    let _frame = session.lock_frame(stream).unwrap();
    for i in 0..16u8 {
        session
            .send_anc(stream, tag, Bytes::copy_from_slice(&[i]))
            .unwrap();
    }
    assert_eq!(
        session.send_anc(stream, tag, Bytes::from_static(b"x")),
        Err(FramewireError::AncOverflow)
    );
    session.unlock_frame(stream).unwrap();
    assert_eq!(sole_frame(&peer, 0).anc.len(), 16);

    // byte budget, exceeded by a single oversize blob
    peer.pump_frame(0).unwrap();
    let _frame = session.lock_frame(stream).unwrap();
    let oversize = Bytes::from(vec![0u8; 64 * 1024 + 1]);
    assert_eq!(
        session.send_anc(stream, tag, oversize),
        Err(FramewireError::AncOverflow)
    );
    session.unlock_frame(stream).unwrap();

    // the peer applies the same budget to outgoing grants
    let too_many = (0..17)
        .map(|_| (tag, Bytes::from_static(b"y")))
        .collect::<Vec<_>>();
    assert_eq!(
        peer.pump_frame_with_anc(0, too_many),
        Err(FramewireError::AncOverflow)
    );
}

/// A deferred fill completed by `fill_buffers` produces the same bytes
/// as an immediate-fill lock, and skipping the fill keeps whatever the
/// reused slot held.
#[test]
fn test_deferred_fill_matches_immediate() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 4, 4);

    // frame A: immediate fill, partial write
    peer.pump_frame(0).unwrap();
    let frame = session.lock_frame(stream).unwrap();
    write_ramp(&frame, 32);
    session.unlock_frame(stream).unwrap();
    let a = sole_frame(&peer, 0).color;

    // frame B: deferred fill, same write
    peer.pump_frame(0).unwrap();
    let frame = session
        .lock_frame_with(stream, LockFlags::empty())
        .unwrap();
    session.fill_buffers(stream).unwrap();
    session.fill_buffers_end(stream).unwrap();
    write_ramp(&frame, 32);
    session.unlock_frame(stream).unwrap();
    let b = sole_frame(&peer, 0).color;
    assert_eq!(a, b);

    // frame C: no fill at all reuses frame A's slot bytes untouched
    peer.pump_frame(0).unwrap();
    let _frame = session
        .lock_frame_with(stream, LockFlags::empty())
        .unwrap();
    session.unlock_frame(stream).unwrap();
    let c = sole_frame(&peer, 0).color;
    assert_eq!(a, c);
}

/// `DOUBLE_BUFFER` fills each new frame from the last submitted one
/// instead of zeroing it.
#[test]
fn test_double_buffer_carries_last_frame() {
    let (session, peer) = rig();
    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.flags = StreamFlags::DOUBLE_BUFFER;
    let stream = session.open(&config).unwrap();

    peer.pump_frame(0).unwrap();
    let frame = session.lock_frame(stream).unwrap();
    paint(&frame, 0x11);
    session.unlock_frame(stream).unwrap();
    let _ = peer.received_frames(0);

    // the carried canvas lets a frame touch only what changed
    peer.pump_frame(0).unwrap();
    let frame = session.lock_frame(stream).unwrap();
    frame.host_color().unwrap().lock()[..16].fill(0x22);
    session.unlock_frame(stream).unwrap();

    let got = sole_frame(&peer, 0).color;
    assert!(got[..16].iter().all(|&b| b == 0x22));
    assert!(got[16..].iter().all(|&b| b == 0x11));
}

/// Without `DOUBLE_BUFFER`, the fill resets a reused slot to zero.
#[test]
fn test_fill_zeroes_reused_slots() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 4, 4);

    // two painted frames cycle both pool slots
    for byte in [0xEE, 0xFF] {
        peer.pump_frame(0).unwrap();
        let frame = session.lock_frame(stream).unwrap();
        paint(&frame, byte);
        session.unlock_frame(stream).unwrap();
    }
    let _ = peer.received_frames(0);

    // the third lock reuses the first slot; the fill must erase 0xEE
    peer.pump_frame(0).unwrap();
    let _frame = session.lock_frame(stream).unwrap();
    session.unlock_frame(stream).unwrap();
    let got = sole_frame(&peer, 0).color;
    assert!(got.iter().all(|&b| b == 0));
}

/// Field locks expose half-height planes and weave into the full frame
/// at their parity lines.
#[test]
fn test_interlaced_field_weave() {
    let (session, peer) = rig();
    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.flags = StreamFlags::INTERLACED;
    let stream = session.open(&config).unwrap();
    let line = 4 * 4;

    peer.pump_frame(0).unwrap();
    let frame = session
        .lock_frame_with(
            stream,
            LockFlags::FILL_BUFFERS | LockFlags::INTERLACE_FIELD_0,
        )
        .unwrap();
    assert_eq!(frame.field, Some(0));
    {
        let plane = frame.host_color().unwrap();
        assert_eq!(plane.lines, 2);
        assert_eq!(plane.bytes_per_line, line);
    }
    paint(&frame, 0xAA);
    session.unlock_frame(stream).unwrap();

    // field 0 landed on even lines, odd lines still blank
    let got = sole_frame(&peer, 0);
    assert_eq!(got.field, Some(0));
    let lines: Vec<&[u8]> = got.color.chunks(line).collect();
    assert!(lines[0].iter().all(|&b| b == 0xAA));
    assert!(lines[1].iter().all(|&b| b == 0));
    assert!(lines[2].iter().all(|&b| b == 0xAA));
    assert!(lines[3].iter().all(|&b| b == 0));

    peer.pump_frame(0).unwrap();
    let frame = session
        .lock_frame_with(
            stream,
            LockFlags::FILL_BUFFERS | LockFlags::INTERLACE_FIELD_1,
        )
        .unwrap();
    assert_eq!(frame.field, Some(1));
    paint(&frame, 0xBB);
    session.unlock_frame(stream).unwrap();

    let got = sole_frame(&peer, 0);
    assert_eq!(got.field, Some(1));
    let lines: Vec<&[u8]> = got.color.chunks(line).collect();
    assert!(lines[1].iter().all(|&b| b == 0xBB));
    assert!(lines[3].iter().all(|&b| b == 0xBB));
}

/// Field selection rules: counter-driven parity alternates with the
/// submit counter, and field flags are refused where they make no
/// sense.
#[test]
fn test_field_selection_rules() {
    let (session, peer) = rig();
    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.flags = StreamFlags::INTERLACED;
    let stream = session.open(&config).unwrap();
    let from_count =
        LockFlags::FILL_BUFFERS | LockFlags::INTERLACE_FIELD_FROM_COUNT;

    peer.pump_frame(0).unwrap();
    let frame = session.lock_frame_with(stream, from_count).unwrap();
    assert_eq!(frame.field, Some(0));
    session.unlock_frame(stream).unwrap();

    peer.pump_frame(0).unwrap();
    let frame = session.lock_frame_with(stream, from_count).unwrap();
    assert_eq!(frame.field, Some(1));
    session.unlock_frame(stream).unwrap();

    // both explicit parities at once make no sense
    assert!(matches!(
        session.lock_frame_with(
            stream,
            LockFlags::INTERLACE_FIELD_0 | LockFlags::INTERLACE_FIELD_1,
        ),
        Err(FramewireError::BadParameter)
    ));
    session.close(stream).unwrap();

    // field flags on a progressive stream are refused before any grant
    let progressive = open_host(&session, 0, 4, 4);
    assert!(matches!(
        session.lock_frame_with(progressive, LockFlags::INTERLACE_FIELD_0),
        Err(FramewireError::BadParameter)
    ));
}

/// User-buffer streams lock caller storage into the frame cycle; the
/// buffer is exclusive for the duration and its counter rides along.
#[test]
fn test_user_buffer_cycle() {
    let (session, peer) = rig();
    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.flags = StreamFlags::USER_BUFFERS;
    let stream = session.open(&config).unwrap();

    let buffer = UserBuffer::create(&BufferInfo {
        direction: Direction::Bidirectional,
        transfer: TransferMode::HostMemory,
        color: ColorPacking::Rgba8,
        depth: DepthPacking::Off,
        width: 4,
        height: 4,
    })
    .unwrap();
    buffer.set_user_field_count(7);

    peer.pump_frame(0).unwrap();
    let frame = session
        .lock_frame_user(stream, LockFlags::FILL_BUFFERS, &buffer)
        .unwrap();
    // the stream lock excludes mapping until unlock
    assert_eq!(buffer.map().err(), Some(FramewireError::Locked));
    paint(&frame, 0x77);
    session.unlock_frame(stream).unwrap();

    let got = sole_frame(&peer, 0);
    assert_eq!(got.user_count, Some(7));
    assert!(got.color.iter().all(|&b| b == 0x77));

    // the buffer is the caller's again
    let mapped = buffer.map().unwrap();
    assert_eq!(mapped.color.lock()[0], 0x77);
    buffer.unmap().unwrap();
    buffer.destroy().unwrap();
}

/// Buffer/stream mismatches fail before anything is granted or locked.
#[test]
fn test_user_buffer_rejections() {
    let (session, peer) = rig();
    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.flags = StreamFlags::USER_BUFFERS;
    let user_stream = session.open(&config).unwrap();
    let plain_stream = open_host(&session, 1, 4, 4);

    let wrong_shape = UserBuffer::create(&BufferInfo {
        direction: Direction::Bidirectional,
        transfer: TransferMode::HostMemory,
        color: ColorPacking::Rgba8,
        depth: DepthPacking::Off,
        width: 8,
        height: 4,
    })
    .unwrap();
    peer.pump_frame(0).unwrap();
    assert_eq!(
        session
            .lock_frame_user(
                user_stream,
                LockFlags::FILL_BUFFERS,
                &wrong_shape
            )
            .err(),
        Some(FramewireError::IncompatibleBuffer)
    );

    // a user-buffer stream cannot lock from its pool, and a pool
    // stream cannot take a user buffer
    assert!(matches!(
        session.lock_frame(user_stream),
        Err(FramewireError::BadParameter)
    ));
    let fitting = UserBuffer::create(&BufferInfo {
        direction: Direction::Bidirectional,
        transfer: TransferMode::HostMemory,
        color: ColorPacking::Rgba8,
        depth: DepthPacking::Off,
        width: 4,
        height: 4,
    })
    .unwrap();
    assert_eq!(
        session
            .lock_frame_user(plain_stream, LockFlags::FILL_BUFFERS, &fitting)
            .err(),
        Some(FramewireError::BadParameter)
    );

    // a mapped buffer cannot be locked into a stream
    let _mapped = fitting.map().unwrap();
    assert_eq!(
        session
            .lock_frame_user(user_stream, LockFlags::FILL_BUFFERS, &fitting)
            .err(),
        Some(FramewireError::Mapped)
    );
}

/// Delay changes are bounded, reach the peer, and grow the pool enough
/// to keep the cycle running while frames are held back.
#[test]
fn test_set_delay() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 4, 4);

    assert_eq!(
        session.set_delay(stream, 9),
        Err(FramewireError::BadParameter)
    );
    assert_eq!(session.get_info(stream).unwrap().delay, 0);
    session.set_delay(stream, 2).unwrap();
    assert_eq!(session.get_info(stream).unwrap().delay, 2);
    assert_eq!(peer.delay(0), Some(2));

    // with two frames held back the cycle still never starves
    for i in 0..5u8 {
        peer.pump_frame(0).unwrap();
        let frame = session.lock_frame(stream).unwrap();
        paint(&frame, i);
        session.unlock_frame(stream).unwrap();
    }
    let got = peer.received_frames(0);
    assert_eq!(got.len(), 5);
    for (i, frame) in got.iter().enumerate() {
        assert!(frame.color.iter().all(|&b| b == i as u8));
    }
}

/// Synchrone streams park the lock call until the peer grants.
#[test]
fn test_synchrone_lock_blocks_until_grant() {
    let policy = PeerPolicy {
        synchrone: true,
        ..PeerPolicy::default()
    };
    let (session, peer) = rig_with(policy);
    let stream = open_host(&session, 0, 4, 4);
    assert!(session.get_info(stream).unwrap().synchrone);

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            peer.pump_frame(0).unwrap();
        });
        // blocks across the pump above instead of failing
        let frame = session.lock_frame(stream).unwrap();
        assert_eq!(frame.meta.frame_count, 1);
    });
    session.unlock_frame(stream).unwrap();
    assert_eq!(sole_frame(&peer, 0).frame_count, 1);
}

/// Licensing escrow: a fresh 1024-byte challenge per call, and exactly
/// one 4-byte signature per stream.
#[test]
fn test_protection_escrow() {
    let (session, peer) = rig();
    let stream = open_host(&session, 0, 4, 4);

    let first = session.protection_message(stream).unwrap();
    let second = session.protection_message(stream).unwrap();
    assert_eq!(first.len(), framewire::PROTECTION_MESSAGE_LEN);
    assert_ne!(first[..], second[..]);

    assert_eq!(
        session.set_protection_signature(stream, &[1, 2, 3]),
        Err(FramewireError::BadSize)
    );
    session
        .set_protection_signature(stream, &[1, 2, 3, 4])
        .unwrap();
    peer.settle();
    assert_eq!(peer.signature(0), Some([1, 2, 3, 4]));

    // the escrow accepts one signature per stream
    assert_eq!(
        session.set_protection_signature(stream, &[1, 2, 3, 4]),
        Err(FramewireError::BadParameter)
    );
}

/// GPU streams carry surface ids instead of host planes, and losing the
/// device binding disables them until it returns.
#[test]
fn test_gpu_stream_surface_ids() {
    let (session_link, peer_link) = link::pair();
    let peer = PeerEndpoint::start(peer_link);
    let session = Session::connect(session_link);
    session
        .init(DeviceBindings {
            d3d11: D3d11Device::from_raw(7),
            ..DeviceBindings::none()
        })
        .unwrap();

    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.transfer = TransferMode::Direct3d11;
    let stream = session.open(&config).unwrap();

    peer.pump_frame(0).unwrap();
    let frame = session.lock_frame(stream).unwrap();
    assert!(frame.host_color().is_none());
    // the lock state machine guards GPU streams the same way
    assert!(matches!(
        session.lock_frame(stream),
        Err(FramewireError::Locked)
    ));
    session.unlock_frame(stream).unwrap();

    let got = sole_frame(&peer, 0);
    assert!(got.color.is_empty());
    let texture = got.d3d11.unwrap();
    assert_ne!(texture.texture_id, 0);
    assert_ne!(texture.target_view_id, 0);
    assert_ne!(texture.shader_view_id, 0);

    // without the binding the stream has no frames to offer
    session.reset_graphics();
    peer.pump_frame(0).unwrap();
    assert_eq!(session.has_frame(stream), Err(FramewireError::NoFrame));
    assert!(matches!(
        session.lock_frame(stream),
        Err(FramewireError::RequireContext)
    ));

    // rebinding revives it
    session
        .init(DeviceBindings {
            d3d11: D3d11Device::from_raw(7),
            ..DeviceBindings::none()
        })
        .unwrap();
    let _frame = session.lock_frame(stream).unwrap();
    session.unlock_frame(stream).unwrap();
}

/// `CPU_USING_DX9` marks a host stream that still rides a Direct3D 9
/// device, so without that binding it is as disabled as a GPU stream
/// without its context.
#[test]
fn test_cpu_dx9_flag_needs_d3d9_binding() {
    let (session, peer) = rig();
    let mut config = StreamConfig::host_rgba(0, 4, 4);
    config.flags = StreamFlags::CPU_USING_DX9;
    let stream = session.open(&config).unwrap();

    peer.pump_frame(0).unwrap();
    assert_eq!(session.has_frame(stream), Err(FramewireError::NoFrame));
    assert!(matches!(
        session.lock_frame(stream),
        Err(FramewireError::RequireContext)
    ));

    // binding the device revives the stream
    session
        .init(DeviceBindings {
            d3d9: D3d9Device::from_raw(5),
            ..DeviceBindings::none()
        })
        .unwrap();
    assert_eq!(session.has_frame(stream), Ok(()));
    let frame = session.lock_frame(stream).unwrap();
    paint(&frame, 0x33);
    session.unlock_frame(stream).unwrap();
    assert!(sole_frame(&peer, 0).color.iter().all(|&b| b == 0x33));
}

/// Fractional rates keep their exact ratio in the stream info while
/// timecode runs at the rounded nominal rate.
#[test]
fn test_fractional_rate_timecode_is_nominal() {
    let policy = PeerPolicy {
        frame_rate: FrameRate {
            num: 60000,
            den: 1001,
        },
        ..PeerPolicy::default()
    };
    let (session, peer) = rig_with(policy);
    let stream = open_host(&session, 0, 4, 4);
    assert_eq!(
        session.get_info(stream).unwrap().frame_rate,
        FrameRate {
            num: 60000,
            den: 1001
        }
    );

    peer.pump_frame(0).unwrap();
    let frame = session.lock_frame(stream).unwrap();
    // 59.94 material ticks at 60, not the truncated 59
    assert_eq!(frame.meta.timecode.fps, 60);
    session.unlock_frame(stream).unwrap();
}
