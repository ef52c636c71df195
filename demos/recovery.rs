//! Broken Link Recovery - surviving a compositor crash.
//!
//! This example demonstrates:
//! - Detecting a dead peer through `ConnectionBroken` results
//! - Forcing the session down with `shutdown` once the link is gone
//! - Reconnecting over a fresh link pair
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=framewire=debug cargo run --example recovery
//! ```

use framewire::config::{DeviceBindings, StreamConfig};
use framewire::link;
use framewire::peer::PeerEndpoint;
use framewire::{FramewireError, Session};

fn produce_some(
    session: &Session,
    peer: &PeerEndpoint,
    frames: u32,
) -> Result<(), FramewireError> {
    let stream = session.open(&StreamConfig::host_rgba(0, 64, 64))?;
    for shade in 0..frames {
        peer.pump_frame(0)?;
        let frame = session.lock_frame(stream)?;
        if let Some(plane) = frame.host_color() {
            plane.lock().fill(shade as u8);
        }
        session.unlock_frame(stream)?;
    }
    println!(
        "  produced {} frames, peer saw {}",
        frames,
        peer.received_frames(0).len()
    );
    session.close(stream)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (session_link, peer_link) = link::pair();
    let peer = PeerEndpoint::start(peer_link);
    let session = Session::connect(session_link);
    session.init(DeviceBindings::none())?;
    println!("first session up");
    produce_some(&session, &peer, 30)?;

    // the compositor dies mid-session
    let stream = session.open(&StreamConfig::host_rgba(0, 64, 64))?;
    peer.crash();
    println!("peer crashed");

    // every call now reports the broken link
    let err = session
        .lock_frame(stream)
        .err()
        .unwrap_or(FramewireError::Unspecified);
    println!(
        "  lock after crash: {}",
        Session::error_to_string(err)
    );
    assert_eq!(err, FramewireError::ConnectionBroken);

    // shutdown force-drops the stream the peer can no longer close
    session.shutdown()?;
    println!("broken session shut down");

    // recovery is a reconnect on a fresh pair
    let (session_link, peer_link) = link::pair();
    let peer = PeerEndpoint::start(peer_link);
    let session = Session::connect(session_link);
    session.init(DeviceBindings::none())?;
    println!("second session up");
    produce_some(&session, &peer, 30)?;
    session.shutdown()?;
    println!("done");
    Ok(())
}
