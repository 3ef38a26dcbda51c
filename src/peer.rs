//! Peer wire protocol (BEP-3, BEP-10).
//!
//! The base protocol plus the extension protocol with `ut_pex`. The
//! socket-free state machine lives in [`proto`]; [`connection`] couples it
//! to a non-blocking TCP stream driven by the multiplexer.

mod bitfield;
mod connection;
mod error;
mod extension;
mod message;
mod peer_id;
mod proto;

pub use bitfield::Bitfield;
pub use connection::PeerConnection;
pub use error::PeerError;
pub use extension::{ExtensionHandshake, LOCAL_UT_PEX_ID, UT_PEX};
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN, PROTOCOL};
pub use peer_id::PeerId;
pub use proto::{PeerEvent, PeerProto, Phase};

#[cfg(test)]
mod tests;
