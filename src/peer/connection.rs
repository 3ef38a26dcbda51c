use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use tracing::debug;

use super::error::PeerError;
use super::peer_id::PeerId;
use super::proto::{PeerProto, Phase};

const READ_CHUNK: usize = 64 * 1024;

/// A peer connection: the wire state machine coupled to a non-blocking
/// TCP stream.
///
/// The multiplexer drives it through [`handle_readable`],
/// [`handle_writable`] and [`handle_error`]; none of them block. Everything
/// protocol-level lives in the embedded [`PeerProto`], which this type
/// dereferences to.
///
/// [`handle_readable`]: PeerConnection::handle_readable
/// [`handle_writable`]: PeerConnection::handle_writable
/// [`handle_error`]: PeerConnection::handle_error
#[derive(Debug)]
pub struct PeerConnection {
    stream: TcpStream,
    addr: SocketAddr,
    proto: PeerProto,
}

impl PeerConnection {
    /// Starts a non-blocking connect to `addr`. The local handshake is
    /// already queued and flushes on the first writable event.
    pub fn dial(
        addr: SocketAddr,
        info_hash: [u8; 20],
        local_id: PeerId,
        num_pieces: usize,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self {
            stream,
            addr,
            proto: PeerProto::outgoing(info_hash, local_id, num_pieces),
        })
    }

    /// Wraps an accepted socket.
    pub fn accepted(
        stream: TcpStream,
        addr: SocketAddr,
        info_hash: [u8; 20],
        local_id: PeerId,
        num_pieces: usize,
    ) -> Self {
        Self {
            stream,
            addr,
            proto: PeerProto::incoming(info_hash, local_id, num_pieces),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Reads until `WouldBlock` or EOF, feeding the parser.
    pub fn handle_readable(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.proto.close(PeerError::ConnectionClosed);
                    return;
                }
                Ok(n) => self.proto.receive(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(addr = %self.addr, error = %e, "peer read failed");
                    self.proto.close(PeerError::Io(e));
                    return;
                }
            }
        }
    }

    /// Completes a pending connect if necessary, then flushes the outbound
    /// queue until `WouldBlock`.
    pub fn handle_writable(&mut self) {
        if self.proto.phase() == Phase::Connecting {
            match self.stream.take_error() {
                Ok(None) => self.proto.mark_connected(),
                Ok(Some(e)) | Err(e) => {
                    debug!(addr = %self.addr, error = %e, "peer connect failed");
                    self.proto.close(PeerError::Io(e));
                    return;
                }
            }
        }

        loop {
            let Some(chunk) = self.proto.next_write_chunk() else {
                return;
            };
            match self.stream.write(chunk) {
                Ok(0) => {
                    self.proto.close(PeerError::ConnectionClosed);
                    return;
                }
                Ok(n) => self.proto.advance_write(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(addr = %self.addr, error = %e, "peer write failed");
                    self.proto.close(PeerError::Io(e));
                    return;
                }
            }
        }
    }

    /// The multiplexer observed an error or hangup condition.
    pub fn handle_error(&mut self) {
        let err = self
            .stream
            .take_error()
            .ok()
            .flatten()
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "socket error"));
        self.proto.close(PeerError::Io(err));
    }
}

impl std::ops::Deref for PeerConnection {
    type Target = PeerProto;

    fn deref(&self) -> &PeerProto {
        &self.proto
    }
}

impl std::ops::DerefMut for PeerConnection {
    fn deref_mut(&mut self) -> &mut PeerProto {
        &mut self.proto
    }
}
