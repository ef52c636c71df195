//! # framewire
//!
//! Client-side session layer for handing rendered video frames to a
//! compositor peer, over an in-process link that stands in for the
//! shared-memory transport of a production deployment.
//!
//! ## Architecture
//!
//! - **Control plane** (JSON): hello/welcome handshake gating everything
//! - **Data plane** (MsgPack envelopes): opens, frame grants, submits,
//!   delay changes, licensing
//! - **Pixels** never cross the wire: frames live in shared slot pools,
//!   messages carry slot indices
//!
//! The caller owns a [`Session`] and drives it; the only background
//! thread in the system belongs to the [`peer::PeerEndpoint`], which
//! plays the compositor.
//!
//! ## Example
//!
//! ```ignore
//! use framewire::config::{DeviceBindings, StreamConfig};
//! use framewire::peer::PeerEndpoint;
//! use framewire::{link, Session};
//!
//! fn main() -> framewire::Result<()> {
//!     let (session_link, peer_link) = link::pair();
//!     let peer = PeerEndpoint::start(peer_link);
//!
//!     let session = Session::connect(session_link);
//!     session.init(DeviceBindings::none())?;
//!     let stream = session.open(&StreamConfig::host_rgba(0, 1920, 1080))?;
//!
//!     peer.pump_frame(0)?;
//!     let frame = session.lock_frame(stream)?;
//!     // render through frame.host_color() ...
//!     session.unlock_frame(stream)?;
//!
//!     session.close(stream)?;
//!     session.shutdown()
//! }
//! ```

pub mod anc;
pub mod buffer;
pub mod config;
pub mod error;
pub mod frame;
pub mod link;
pub mod peer;
pub mod perf;
pub mod protocol;

mod handle;
mod session;
mod stream;

pub use error::{FramewireError, Result};
pub use handle::StreamHandle;
pub use session::Session;
pub use stream::{PROTECTION_MESSAGE_LEN, PROTECTION_SIGNATURE_LEN};
