//! Frame Producer - the basic produce/lock/unlock cycle.
//!
//! This example demonstrates:
//! - Bringing up a `Session` against an in-process `PeerEndpoint`
//! - Opening a host-memory RGBA stream
//! - Locking granted frames, writing pixels and ancillary data
//! - Reading the submitted frames back on the peer side
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=framewire=debug cargo run --example producer
//! ```

use bytes::Bytes;
use framewire::anc::AncTag;
use framewire::config::{DeviceBindings, StreamConfig};
use framewire::link;
use framewire::peer::PeerEndpoint;
use framewire::Session;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;
const FRAMES: u64 = 120;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // The peer endpoint stands in for the compositor process; in a
    // deployment it lives across the link and drives the frame ticks
    // at its own output rate.
    let (session_link, peer_link) = link::pair();
    let peer = PeerEndpoint::start(peer_link);

    let session = Session::connect(session_link);
    session.init(DeviceBindings::none())?;
    println!(
        "session up, peer adapter {:?}",
        session.peer_adapter()
    );

    let stream =
        session.open(&StreamConfig::host_rgba(0, WIDTH, HEIGHT))?;
    let info = session.get_info(stream)?;
    println!(
        "stream open: {}x{} @ {}/{} fps",
        info.width, info.height, info.frame_rate.num, info.frame_rate.den
    );

    for tick in 0..FRAMES {
        // the compositor announces the next frame slot
        peer.pump_frame(0)?;

        let frame = session.lock_frame(stream)?;
        if let Some(plane) = frame.host_color() {
            // a horizontal ramp scrolling one pixel per frame
            let mut bytes = plane.lock();
            for (i, b) in bytes.iter_mut().enumerate() {
                let x = (i / 4) as u64 % WIDTH as u64;
                *b = ((x + tick) % 256) as u8;
            }
        }
        session.send_anc(
            stream,
            AncTag::CAMERA,
            Bytes::copy_from_slice(&tick.to_le_bytes()),
        )?;
        session.unlock_frame(stream)?;
    }

    let received = peer.received_frames(0);
    println!(
        "peer received {} frames, last counted {}",
        received.len(),
        received.last().map(|f| f.frame_count).unwrap_or(0)
    );

    session.close(stream)?;
    session.shutdown()?;
    println!("session closed");
    Ok(())
}
