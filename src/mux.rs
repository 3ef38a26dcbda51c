//! Socket readiness multiplexing.
//!
//! One [`Multiplexer`] drives every peer connection from a single thread.
//! Each socket is registered for readability, and for writability only
//! while its connection has buffered outbound bytes; interest is refreshed
//! automatically after every dispatch. An optional listening socket feeds
//! accepted peers back to the caller.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace};

use crate::peer::{PeerConnection, PeerEvent};

const LISTENER_TOKEN: Token = Token(0);
const FIRST_PEER_TOKEN: usize = 1;
const EVENT_CAPACITY: usize = 256;

/// Readiness-driven dispatcher for peer connections.
pub struct Multiplexer {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    connections: HashMap<Token, PeerConnection>,
    next_token: usize,
}

impl Multiplexer {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener: None,
            connections: HashMap::new(),
            next_token: FIRST_PEER_TOKEN,
        })
    }

    /// Registers the accept socket. At most one listener.
    pub fn register_listener(&mut self, mut listener: TcpListener) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Registers a connection with full interest; the first dispatch
    /// narrows it down.
    pub fn register(&mut self, mut connection: PeerConnection) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(
            connection.stream_mut(),
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        self.connections.insert(token, connection);
        Ok(token)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.connections.contains_key(&token)
    }

    pub fn connection_mut(&mut self, token: Token) -> Option<&mut PeerConnection> {
        self.connections.get_mut(&token)
    }

    /// Every live connection, for broadcasts and policy sweeps.
    pub fn connections_mut(&mut self) -> impl Iterator<Item = (Token, &mut PeerConnection)> {
        self.connections.iter_mut().map(|(&t, c)| (t, c))
    }

    /// Deregisters and drops a connection.
    pub fn remove(&mut self, token: Token) {
        if let Some(mut connection) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(connection.stream_mut());
            debug!(addr = %connection.addr(), "peer removed");
        }
    }

    /// Blocks up to `timeout` and dispatches every ready socket: errors and
    /// hangups first, then readable, then writable. Parsed events are
    /// handed to `sink` in byte-stream order; closed connections are
    /// removed after their final events are delivered.
    ///
    /// Returns sockets accepted from the listener; the caller wraps them
    /// into connections and calls [`register`](Self::register).
    pub fn poll_once(
        &mut self,
        timeout: Duration,
        mut sink: impl FnMut(Token, &mut PeerConnection, Vec<PeerEvent>),
    ) -> io::Result<Vec<(TcpStream, SocketAddr)>> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let mut accepted = Vec::new();
        let ready: Vec<_> = self
            .events
            .iter()
            .map(|ev| {
                (
                    ev.token(),
                    ev.is_error() || (ev.is_read_closed() && ev.is_write_closed()),
                    ev.is_readable(),
                    ev.is_writable(),
                )
            })
            .collect();

        for (token, is_error, is_readable, is_writable) in ready {
            if token == LISTENER_TOKEN {
                self.accept_pending(&mut accepted);
                continue;
            }
            let Some(connection) = self.connections.get_mut(&token) else {
                continue;
            };

            if is_error {
                connection.handle_error();
            } else {
                if is_readable {
                    connection.handle_readable();
                }
                if is_writable && !connection.is_closed() {
                    connection.handle_writable();
                }
            }

            let events = connection.drain_events();
            if !events.is_empty() || connection.is_closed() {
                sink(token, connection, events);
            }

            if self.connections.get(&token).is_some_and(|c| c.is_closed()) {
                self.remove(token);
            } else {
                self.refresh_interest(token);
            }
        }

        Ok(accepted)
    }

    /// Re-registers with writable interest only while output is pending.
    pub fn refresh_interest(&mut self, token: Token) {
        if let Some(connection) = self.connections.get_mut(&token) {
            let interest = if connection.wants_write() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            let _ = self
                .poll
                .registry()
                .reregister(connection.stream_mut(), token, interest);
        }
    }

    fn accept_pending(&mut self, accepted: &mut Vec<(TcpStream, SocketAddr)>) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    trace!(%addr, "accepted incoming peer");
                    accepted.push((stream, addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }
}
