use std::collections::VecDeque;
use std::net::SocketAddrV4;

use bytes::{Bytes, BytesMut};

use crate::pex;

use super::error::PeerError;
use super::extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID};
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use super::peer_id::PeerId;

/// Upper bound on a single framed message. Large enough for a bitfield of
/// any realistic torrent and for 16 KiB piece blocks.
const MAX_MESSAGE_LEN: u32 = 2 * 1024 * 1024;

/// Protocol phase of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// TCP connect still in progress.
    Connecting,
    /// Connected, waiting for the remote preamble.
    Handshaking,
    /// Handshake verified; message stream running.
    Active,
    /// Torn down; no further I/O.
    Closed,
}

/// A parsed inbound event, delivered to the session in byte-stream order.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Handshake { peer_id: PeerId },
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { piece: u32, begin: u32, length: u32 },
    Piece { piece: u32, begin: u32, data: Bytes },
    Cancel { piece: u32, begin: u32, length: u32 },
    ExtendedHandshake(Bytes),
    Pex(Bytes),
}

/// The wire-protocol state machine, independent of any socket.
///
/// Bytes go in through [`receive`](Self::receive); typed events come out of
/// [`drain_events`](Self::drain_events). Outbound messages are serialised
/// into a frame queue that the owning connection flushes on writability.
/// All `send_*` operations enqueue and never block.
#[derive(Debug)]
pub struct PeerProto {
    info_hash: [u8; 20],
    local_id: PeerId,
    num_pieces: usize,
    phase: Phase,

    inbound: BytesMut,
    outbound: VecDeque<Bytes>,
    head_offset: usize,
    events: Vec<PeerEvent>,

    handshake_received: bool,
    remote_id: Option<PeerId>,
    remote_supports_extensions: bool,
    remote_ut_pex_id: Option<u8>,
    close_reason: Option<PeerError>,
}

impl PeerProto {
    /// State machine for a peer we dialed. The local handshake is queued
    /// immediately so it flushes as soon as the socket becomes writable.
    pub fn outgoing(info_hash: [u8; 20], local_id: PeerId, num_pieces: usize) -> Self {
        Self::new(info_hash, local_id, num_pieces, Phase::Connecting)
    }

    /// State machine for an accepted peer; the socket is already connected.
    pub fn incoming(info_hash: [u8; 20], local_id: PeerId, num_pieces: usize) -> Self {
        Self::new(info_hash, local_id, num_pieces, Phase::Handshaking)
    }

    fn new(info_hash: [u8; 20], local_id: PeerId, num_pieces: usize, phase: Phase) -> Self {
        let mut proto = Self {
            info_hash,
            local_id,
            num_pieces,
            phase,
            inbound: BytesMut::with_capacity(16 * 1024),
            outbound: VecDeque::new(),
            head_offset: 0,
            events: Vec::new(),
            handshake_received: false,
            remote_id: None,
            remote_supports_extensions: false,
            remote_ut_pex_id: None,
            close_reason: None,
        };
        proto.queue_frame(Handshake::new(info_hash, *local_id.as_bytes()).encode());
        proto
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn handshake_received(&self) -> bool {
        self.handshake_received
    }

    pub fn remote_id(&self) -> Option<PeerId> {
        self.remote_id
    }

    pub fn remote_supports_extensions(&self) -> bool {
        self.remote_supports_extensions
    }

    pub fn remote_ut_pex_id(&self) -> Option<u8> {
        self.remote_ut_pex_id
    }

    /// Why the connection closed, if it closed on a protocol error.
    pub fn close_reason(&self) -> Option<&PeerError> {
        self.close_reason.as_ref()
    }

    /// The TCP connect completed; the remote preamble may now arrive.
    pub fn mark_connected(&mut self) {
        if self.phase == Phase::Connecting {
            self.phase = Phase::Handshaking;
        }
    }

    /// Marks the connection closed. Idempotent; keeps the first reason.
    pub fn close(&mut self, reason: PeerError) {
        if self.phase != Phase::Closed {
            self.phase = Phase::Closed;
            self.close_reason = Some(reason);
        }
    }

    /// Feeds raw socket bytes through the parser.
    pub fn receive(&mut self, data: &[u8]) {
        if self.phase == Phase::Closed {
            return;
        }
        self.inbound.extend_from_slice(data);
        self.parse();
    }

    /// Takes the events parsed so far, in arrival order.
    pub fn drain_events(&mut self) -> Vec<PeerEvent> {
        std::mem::take(&mut self.events)
    }

    // --- outbound queue -------------------------------------------------

    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// The unsent remainder of the head frame.
    pub fn next_write_chunk(&self) -> Option<&[u8]> {
        self.outbound.front().map(|frame| &frame[self.head_offset..])
    }

    /// Records `n` bytes of the head frame as written.
    pub fn advance_write(&mut self, n: usize) {
        self.head_offset += n;
        if let Some(frame) = self.outbound.front() {
            if self.head_offset >= frame.len() {
                self.outbound.pop_front();
                self.head_offset = 0;
            }
        }
    }

    fn queue_frame(&mut self, frame: Bytes) {
        self.outbound.push_back(frame);
    }

    fn queue_message(&mut self, message: Message) {
        if self.phase != Phase::Closed {
            self.queue_frame(message.encode());
        }
    }

    // --- send operations -------------------------------------------------

    pub fn send_interested(&mut self) {
        self.queue_message(Message::Interested);
    }

    pub fn send_not_interested(&mut self) {
        self.queue_message(Message::NotInterested);
    }

    pub fn send_choke(&mut self) {
        self.queue_message(Message::Choke);
    }

    pub fn send_unchoke(&mut self) {
        self.queue_message(Message::Unchoke);
    }

    pub fn send_have(&mut self, piece: u32) {
        self.queue_message(Message::Have { piece });
    }

    pub fn send_bitfield(&mut self, bits: Bytes) {
        self.queue_message(Message::Bitfield(bits));
    }

    pub fn send_request(&mut self, piece: u32, begin: u32, length: u32) {
        self.queue_message(Message::Request {
            piece,
            begin,
            length,
        });
    }

    pub fn send_cancel(&mut self, piece: u32, begin: u32, length: u32) {
        self.queue_message(Message::Cancel {
            piece,
            begin,
            length,
        });
    }

    pub fn send_piece(&mut self, piece: u32, begin: u32, data: Bytes) {
        self.queue_message(Message::Piece { piece, begin, data });
    }

    pub fn send_keep_alive(&mut self) {
        self.queue_message(Message::KeepAlive);
    }

    /// Sends our extension handshake. A no-op unless the remote advertised
    /// extension-protocol support.
    pub fn send_extended_handshake(&mut self) {
        if self.remote_supports_extensions {
            self.queue_message(Message::Extended {
                id: EXTENSION_HANDSHAKE_ID,
                payload: ExtensionHandshake::ours().encode(),
            });
        }
    }

    /// Sends a `ut_pex` message with the given endpoints, under the id the
    /// remote negotiated. A no-op when `ut_pex` was not negotiated.
    pub fn send_ut_pex(&mut self, added: &[SocketAddrV4]) {
        if let Some(id) = self.remote_ut_pex_id {
            self.queue_message(Message::Extended {
                id,
                payload: pex::encode_added(added),
            });
        }
    }

    // --- inbound parsing -------------------------------------------------

    fn parse(&mut self) {
        if !self.handshake_received {
            if self.inbound.len() < HANDSHAKE_LEN {
                return;
            }
            let preamble = self.inbound.split_to(HANDSHAKE_LEN);
            let handshake = match Handshake::decode(&preamble) {
                Ok(hs) => hs,
                Err(err) => return self.close(err),
            };
            if handshake.info_hash != self.info_hash {
                return self.close(PeerError::InfoHashMismatch);
            }
            if handshake.peer_id == *self.local_id.as_bytes() {
                return self.close(PeerError::SelfConnection);
            }

            let peer_id = PeerId(handshake.peer_id);
            self.handshake_received = true;
            self.remote_id = Some(peer_id);
            self.remote_supports_extensions = handshake.supports_extension_protocol();
            self.phase = Phase::Active;
            self.events.push(PeerEvent::Handshake { peer_id });
        }

        while self.phase == Phase::Active {
            if self.inbound.len() < 4 {
                return;
            }
            let len = u32::from_be_bytes(self.inbound[..4].try_into().unwrap());
            if len == 0 {
                let _ = self.inbound.split_to(4);
                self.events.push(PeerEvent::KeepAlive);
                continue;
            }
            if len > MAX_MESSAGE_LEN {
                return self.close(PeerError::MessageTooLarge(len));
            }
            if self.inbound.len() < 4 + len as usize {
                return;
            }
            let _ = self.inbound.split_to(4);
            let mut body = self.inbound.split_to(len as usize).freeze();
            let id = body[0];
            let payload = body.split_off(1);

            match Message::decode(id, payload) {
                Ok(message) => self.dispatch(message),
                Err(err) => return self.close(err),
            }
        }
    }

    fn dispatch(&mut self, message: Message) {
        let event = match message {
            Message::KeepAlive => PeerEvent::KeepAlive,
            Message::Choke => PeerEvent::Choke,
            Message::Unchoke => PeerEvent::Unchoke,
            Message::Interested => PeerEvent::Interested,
            Message::NotInterested => PeerEvent::NotInterested,
            Message::Have { piece } => {
                if piece as usize >= self.num_pieces {
                    return self.close(PeerError::MalformedMessage("have index out of range"));
                }
                PeerEvent::Have { piece }
            }
            Message::Bitfield(bits) => PeerEvent::Bitfield(bits),
            Message::Request {
                piece,
                begin,
                length,
            } => PeerEvent::Request {
                piece,
                begin,
                length,
            },
            Message::Piece { piece, begin, data } => PeerEvent::Piece { piece, begin, data },
            Message::Cancel {
                piece,
                begin,
                length,
            } => PeerEvent::Cancel {
                piece,
                begin,
                length,
            },
            Message::Extended { id, payload } => {
                if id == EXTENSION_HANDSHAKE_ID {
                    match ExtensionHandshake::decode(&payload) {
                        Ok(hs) => self.remote_ut_pex_id = hs.ut_pex_id(),
                        Err(err) => return self.close(err),
                    }
                    PeerEvent::ExtendedHandshake(payload)
                } else if Some(id) == self.remote_ut_pex_id {
                    PeerEvent::Pex(payload)
                } else {
                    // unknown extension, ignore
                    return;
                }
            }
        };
        self.events.push(event);
    }
}
