//! bitflood - a BitTorrent v1 leech/seed engine
//!
//! The engine drives many peer connections from a single poll-based event
//! thread: a readiness multiplexer dispatches socket events to per-peer
//! protocol state machines, a rarest-first scheduler decides which block to
//! request from whom, verified pieces are persisted across the torrent's
//! file set, and a tracker worker thread keeps the candidate queue fed.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode codec
//! - [`metainfo`] - `.torrent` parsing into a [`TorrentDescriptor`]
//! - [`storage`] - piece-to-file-span mapping and positional disk I/O
//! - [`piece`] - block tracking and SHA-1 piece verification
//! - [`scheduler`] - rarest-first block selection
//! - [`peer`] - BEP-3/BEP-10 wire protocol and peer connections
//! - [`pex`] - BEP-11 peer-exchange payloads
//! - [`mux`] - socket readiness multiplexing
//! - [`tracker`] - BEP-3/BEP-15/BEP-23 HTTP and UDP announces
//! - [`webseed`] - BEP-19 web seeding
//! - [`session`] - the orchestrating [`Session`]
//!
//! # Example
//!
//! ```no_run
//! use bitflood::{PeerId, Session, SessionConfig, TorrentDescriptor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = std::fs::read("example.torrent")?;
//! let torrent = TorrentDescriptor::from_bytes(&data)?;
//!
//! let config = SessionConfig {
//!     download_root: "./downloads".into(),
//!     ..SessionConfig::default()
//! };
//! let mut session = Session::new(torrent, PeerId::generate(), config)?;
//! session.start()?;
//! session.run(500);
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod metainfo;
pub mod mux;
pub mod peer;
pub mod pex;
pub mod piece;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod webseed;

pub use bencode::{BencodeError, Value};
pub use metainfo::{FileEntry, MetainfoError, TorrentDescriptor};
pub use mux::Multiplexer;
pub use peer::{
    Bitfield, Handshake, Message, PeerConnection, PeerError, PeerEvent, PeerId, PeerProto, Phase,
};
pub use piece::{PieceAssembler, PieceStatus};
pub use scheduler::{BlockRequest, Scheduler};
pub use session::{CandidateQueue, Session, SessionConfig, SessionError};
pub use storage::{Span, Storage, StorageError};
pub use tracker::{AnnounceRequest, AnnounceResponse, TrackerError, TrackerEvent};
pub use webseed::{WebSeedClient, WebSeedError};
