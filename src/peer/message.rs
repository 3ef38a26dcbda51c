use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;

/// The protocol identifier carried in the handshake preamble.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
/// Total handshake length: 1 + 19 + 8 + 20 + 20.
pub const HANDSHAKE_LEN: usize = 68;

/// Message ids used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    /// Extension protocol (BEP-10).
    Extended = 20,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            20 => Ok(MessageId::Extended),
            other => Err(PeerError::InvalidMessageId(other)),
        }
    }
}

/// The 68-byte handshake preamble.
///
/// Reserved byte 5 bit `0x10` advertises extension-protocol support
/// (BEP-10); the engine always sets it on outgoing handshakes.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub reserved: [u8; 8],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[5] |= 0x10;
        Self {
            info_hash,
            peer_id,
            reserved,
        }
    }

    pub fn supports_extension_protocol(&self) -> bool {
        self.reserved[5] & 0x10 != 0
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    /// Decodes exactly [`HANDSHAKE_LEN`] bytes.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }
        if data[0] as usize != PROTOCOL.len() || &data[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// A peer wire message, after framing.
///
/// On the wire every message is a 4-byte big-endian length followed by one
/// id byte and the payload; a zero length is a keep-alive. Framing is done
/// by the connection state machine; this type maps between `(id, payload)`
/// and typed messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece: u32,
    },
    Bitfield(Bytes),
    Request {
        piece: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        piece: u32,
        begin: u32,
        data: Bytes,
    },
    Cancel {
        piece: u32,
        begin: u32,
        length: u32,
    },
    Extended {
        id: u8,
        payload: Bytes,
    },
}

impl Message {
    /// Serialises the message including its length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        match self {
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke => Self::put_bare(&mut buf, MessageId::Choke),
            Message::Unchoke => Self::put_bare(&mut buf, MessageId::Unchoke),
            Message::Interested => Self::put_bare(&mut buf, MessageId::Interested),
            Message::NotInterested => Self::put_bare(&mut buf, MessageId::NotInterested),
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                piece,
                begin,
                length,
            } => Self::put_block_coord(&mut buf, MessageId::Request, *piece, *begin, *length),
            Message::Cancel {
                piece,
                begin,
                length,
            } => Self::put_block_coord(&mut buf, MessageId::Cancel, *piece, *begin, *length),
            Message::Piece { piece, begin, data } => {
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*piece);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Extended { id, payload } => {
                buf.put_u32(2 + payload.len() as u32);
                buf.put_u8(MessageId::Extended as u8);
                buf.put_u8(*id);
                buf.put_slice(payload);
            }
        }
        buf.freeze()
    }

    /// Decodes a framed message body: the id byte plus payload, without the
    /// length prefix. An empty body is never passed here (that is a
    /// keep-alive, handled by the framer).
    pub fn decode(id: u8, mut payload: Bytes) -> Result<Self, PeerError> {
        match MessageId::try_from(id)? {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if payload.len() != 4 {
                    return Err(PeerError::MalformedMessage("have"));
                }
                Ok(Message::Have {
                    piece: payload.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(payload)),
            MessageId::Request => {
                let (piece, begin, length) = Self::get_block_coord(&mut payload, "request")?;
                Ok(Message::Request {
                    piece,
                    begin,
                    length,
                })
            }
            MessageId::Cancel => {
                let (piece, begin, length) = Self::get_block_coord(&mut payload, "cancel")?;
                Ok(Message::Cancel {
                    piece,
                    begin,
                    length,
                })
            }
            MessageId::Piece => {
                if payload.len() < 8 {
                    return Err(PeerError::MalformedMessage("piece"));
                }
                let piece = payload.get_u32();
                let begin = payload.get_u32();
                Ok(Message::Piece {
                    piece,
                    begin,
                    data: payload,
                })
            }
            MessageId::Extended => {
                if payload.is_empty() {
                    return Err(PeerError::MalformedMessage("extended"));
                }
                let ext_id = payload.get_u8();
                Ok(Message::Extended {
                    id: ext_id,
                    payload,
                })
            }
        }
    }

    fn frame_len(&self) -> usize {
        match self {
            Message::KeepAlive => 4,
            Message::Have { .. } => 9,
            Message::Bitfield(bits) => 5 + bits.len(),
            Message::Request { .. } | Message::Cancel { .. } => 17,
            Message::Piece { data, .. } => 13 + data.len(),
            Message::Extended { payload, .. } => 6 + payload.len(),
            _ => 5,
        }
    }

    fn put_bare(buf: &mut BytesMut, id: MessageId) {
        buf.put_u32(1);
        buf.put_u8(id as u8);
    }

    fn put_block_coord(buf: &mut BytesMut, id: MessageId, piece: u32, begin: u32, length: u32) {
        buf.put_u32(13);
        buf.put_u8(id as u8);
        buf.put_u32(piece);
        buf.put_u32(begin);
        buf.put_u32(length);
    }

    fn get_block_coord(
        payload: &mut Bytes,
        what: &'static str,
    ) -> Result<(u32, u32, u32), PeerError> {
        if payload.len() != 12 {
            return Err(PeerError::MalformedMessage(what));
        }
        Ok((payload.get_u32(), payload.get_u32(), payload.get_u32()))
    }
}
