use thiserror::Error;

/// Errors that close a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Socket I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The 68-byte preamble is malformed.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer is serving a different torrent.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// The remote peer id equals our own: we dialed ourselves.
    #[error("connected to self")]
    SelfConnection,

    /// Unknown message id on the wire.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// A message whose payload does not match its id.
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    /// A length prefix beyond the permitted maximum.
    #[error("message length {0} exceeds limit")]
    MessageTooLarge(u32),

    /// The remote closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// No valid handshake arrived within the allowed window.
    #[error("handshake timed out")]
    HandshakeTimeout,
}
