//! The torrent session: one event thread, one tracker worker.
//!
//! The session owns the multiplexer, every peer's policy state, the piece
//! assembler, the scheduler and the storage. All peer I/O, parsing and
//! scheduling happens on the thread calling [`Session::run`]; the tracker
//! worker thread only feeds the candidate queue and never touches peer
//! state.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::Token;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::metainfo::TorrentDescriptor;
use crate::mux::Multiplexer;
use crate::peer::{Bitfield, PeerConnection, PeerError, PeerEvent, PeerId};
use crate::pex;
use crate::piece::PieceAssembler;
use crate::scheduler::Scheduler;
use crate::storage::{Storage, StorageError};
use crate::tracker::{self, AnnounceRequest, TrackerEvent};
use crate::webseed::WebSeedClient;

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const PEX_INTERVAL: Duration = Duration::from_secs(60);
const PEX_MAX_PER_MESSAGE: usize = 50;
/// Serve no block larger than this, whatever the request says.
const MAX_SERVED_BLOCK: u32 = 128 * 1024;
/// Sleep slice for the tracker worker, so `stop()` is prompt.
const TRACKER_SLEEP_SLICE: Duration = Duration::from_millis(250);
/// Re-announce delay after a round where every tracker failed.
const TRACKER_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Fatal construction/startup errors. Everything else the session survives.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to bind listen socket: {0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no usable tracker and no usable web seed")]
    NoPeerSource,
}

/// Session tunables. The defaults match common client behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub listen_port: u16,
    pub block_size: u32,
    pub download_root: PathBuf,
    pub max_active_peers: usize,
    pub max_inflight_per_peer: u32,
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            block_size: 16 * 1024,
            download_root: PathBuf::from("."),
            max_active_peers: 50,
            max_inflight_per_peer: 32,
            handshake_timeout: Duration::from_secs(2),
        }
    }
}

/// Deduplicated FIFO of peer endpoints, shared with the tracker worker.
///
/// `push` is idempotent: an endpoint is enqueued at most once for the
/// lifetime of the session, keyed by its full address.
pub struct CandidateQueue {
    inner: Mutex<CandidateInner>,
}

#[derive(Default)]
struct CandidateInner {
    queue: VecDeque<SocketAddr>,
    known: HashSet<SocketAddr>,
    /// Freshly learned IPv4 endpoints awaiting a PEX broadcast.
    pex_backlog: Vec<SocketAddrV4>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CandidateInner::default()),
        }
    }

    /// Enqueues an endpoint unless it was ever seen before. Returns whether
    /// it was new.
    pub fn push(&self, addr: SocketAddr) -> bool {
        let mut inner = self.inner.lock();
        if !inner.known.insert(addr) {
            return false;
        }
        inner.queue.push_back(addr);
        if let SocketAddr::V4(v4) = addr {
            inner.pex_backlog.push(v4);
        }
        true
    }

    pub fn pop(&self) -> Option<SocketAddr> {
        self.inner.lock().queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_pex_backlog(&self) -> Vec<SocketAddrV4> {
        std::mem::take(&mut self.inner.lock().pex_backlog)
    }

    /// Puts unsent endpoints back at the head of the backlog, ahead of
    /// anything learned since they were taken.
    fn return_pex_backlog(&self, mut rest: Vec<SocketAddrV4>) {
        if rest.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        rest.append(&mut inner.pex_backlog);
        inner.pex_backlog = rest;
    }
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-peer policy state, keyed by the multiplexer token.
#[derive(Debug)]
struct PeerState {
    remote_id: Option<PeerId>,
    bitfield: Bitfield,
    peer_choking: bool,
    peer_interested: bool,
    am_interested: bool,
    am_choking: bool,
    inflight: u32,
    handshake_received: bool,
    connected_at: Instant,
}

impl PeerState {
    fn new(num_pieces: usize) -> Self {
        Self {
            remote_id: None,
            bitfield: Bitfield::new(num_pieces),
            peer_choking: true,
            peer_interested: false,
            am_interested: false,
            am_choking: true,
            inflight: 0,
            handshake_received: false,
            connected_at: Instant::now(),
        }
    }
}

/// A running torrent: leeches until complete, seeds for as long as it runs.
pub struct Session {
    torrent: TorrentDescriptor,
    peer_id: PeerId,
    config: SessionConfig,

    mux: Multiplexer,
    assembler: PieceAssembler,
    scheduler: Scheduler,
    storage: Rc<Storage>,
    peers: HashMap<Token, PeerState>,

    candidates: Arc<CandidateQueue>,
    completed: Rc<RefCell<Vec<u32>>>,

    downloaded: Arc<AtomicU64>,
    uploaded: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    tracker_stop: Arc<AtomicBool>,
    completed_pending: Arc<AtomicBool>,
    tracker_thread: Option<JoinHandle<()>>,

    last_stats: Instant,
    last_pex: Instant,
}

impl Session {
    /// Builds a session: binds the dual-stack listener, opens the backing
    /// files, and wires the assembler's completion hook to storage.
    pub fn new(
        torrent: TorrentDescriptor,
        peer_id: PeerId,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let mut mux = Multiplexer::new()?;
        mux.register_listener(bind_listener(config.listen_port)?)?;

        let storage = Rc::new(Storage::new(&torrent, &config.download_root)?);
        let mut assembler = PieceAssembler::new(&torrent, config.block_size);
        let scheduler = Scheduler::new(torrent.num_pieces());

        let completed = Rc::new(RefCell::new(Vec::new()));
        {
            let storage = storage.clone();
            let completed = completed.clone();
            assembler.set_piece_complete_callback(Box::new(move |piece, bytes| {
                if let Err(err) = storage.write_piece(piece, bytes) {
                    // the piece stays complete in memory; uploads still work
                    error!(piece, %err, "failed to persist verified piece");
                }
                completed.borrow_mut().push(piece);
            }));
        }

        Ok(Self {
            torrent,
            peer_id,
            config,
            mux,
            assembler,
            scheduler,
            storage,
            peers: HashMap::new(),
            candidates: Arc::new(CandidateQueue::new()),
            completed,
            downloaded: Arc::new(AtomicU64::new(0)),
            uploaded: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(true)),
            tracker_stop: Arc::new(AtomicBool::new(false)),
            completed_pending: Arc::new(AtomicBool::new(false)),
            tracker_thread: None,
            last_stats: Instant::now(),
            last_pex: Instant::now(),
        })
    }

    /// Starts peer acquisition: spawns the tracker worker when any announce
    /// URL exists, otherwise falls back to downloading from web seeds.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let urls = self.collect_tracker_urls();
        if !urls.is_empty() {
            let worker = TrackerWorker {
                urls,
                info_hash: self.torrent.info_hash,
                peer_id: *self.peer_id.as_bytes(),
                port: self.config.listen_port,
                total_length: self.torrent.total_length,
                candidates: self.candidates.clone(),
                downloaded: self.downloaded.clone(),
                uploaded: self.uploaded.clone(),
                stop: self.tracker_stop.clone(),
                completed_pending: self.completed_pending.clone(),
            };
            self.tracker_thread = Some(std::thread::spawn(move || worker.run()));
            return Ok(());
        }

        if !self.torrent.web_seeds.is_empty() {
            info!("no trackers available, using web seeds");
            return self.download_from_web_seeds();
        }
        Err(SessionError::NoPeerSource)
    }

    /// Runs the event loop until [`stop`](Self::stop) or a peerless,
    /// finished swarm. Keeps seeding after the download completes.
    pub fn run(&mut self, tick_ms: u64) {
        while self.running.load(Ordering::Relaxed) {
            self.run_once(tick_ms);
        }
    }

    /// One event-loop iteration: dial candidates, poll readiness, process
    /// peer events, sweep handshake timeouts, emit periodic traffic.
    pub fn run_once(&mut self, tick_ms: u64) {
        self.dial_candidates();
        self.poll_and_dispatch(Duration::from_millis(tick_ms));
        self.sweep_handshake_timeouts();
        self.maybe_broadcast_pex();
        self.maybe_log_stats();
    }

    /// Stops the event loop and the tracker worker; sends `stopped` if any
    /// announce ever succeeded.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.tracker_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.tracker_thread.take() {
            let _ = handle.join();
        }
    }

    pub fn peer_count(&self) -> usize {
        self.mux.connection_count()
    }

    /// Manually queues a peer endpoint, as if a tracker had returned it.
    pub fn add_peer(&self, addr: SocketAddr) {
        self.candidates.push(addr);
    }

    pub fn is_complete(&self) -> bool {
        self.assembler.is_complete()
    }

    pub fn candidates(&self) -> &Arc<CandidateQueue> {
        &self.candidates
    }

    // --- event loop internals --------------------------------------------

    fn dial_candidates(&mut self) {
        while self.mux.connection_count() < self.config.max_active_peers {
            let Some(addr) = self.candidates.pop() else {
                return;
            };
            match PeerConnection::dial(
                addr,
                self.torrent.info_hash,
                self.peer_id,
                self.torrent.num_pieces(),
            ) {
                Ok(connection) => match self.mux.register(connection) {
                    Ok(token) => {
                        debug!(%addr, "dialing peer");
                        self.peers
                            .insert(token, PeerState::new(self.torrent.num_pieces()));
                    }
                    Err(err) => warn!(%addr, %err, "failed to register peer socket"),
                },
                Err(err) => debug!(%addr, %err, "dial failed"),
            }
        }
    }

    fn poll_and_dispatch(&mut self, timeout: Duration) {
        let mut batch: Vec<(Token, Vec<PeerEvent>, bool)> = Vec::new();
        let accepted = match self.mux.poll_once(timeout, |token, connection, events| {
            batch.push((token, events, connection.is_closed()));
        }) {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(%err, "poll failed");
                return;
            }
        };

        for (stream, addr) in accepted {
            if self.mux.connection_count() >= self.config.max_active_peers {
                debug!(%addr, "at peer cap, dropping incoming connection");
                continue;
            }
            let connection = PeerConnection::accepted(
                stream,
                addr,
                self.torrent.info_hash,
                self.peer_id,
                self.torrent.num_pieces(),
            );
            match self.mux.register(connection) {
                Ok(token) => {
                    info!(%addr, "incoming peer");
                    let mut state = PeerState::new(self.torrent.num_pieces());
                    state.connected_at = Instant::now();
                    self.peers.insert(token, state);
                }
                Err(err) => warn!(%addr, %err, "failed to register incoming peer"),
            }
        }

        for (token, events, closed) in batch {
            self.handle_peer_events(token, events);
            if closed || !self.mux.contains(token) {
                self.forget_peer(token);
            } else {
                self.update_peer_policy(token);
            }
        }

        self.drain_completed_pieces();
    }

    fn handle_peer_events(&mut self, token: Token, events: Vec<PeerEvent>) {
        for event in events {
            let Some(state) = self.peers.get_mut(&token) else {
                return;
            };
            match event {
                PeerEvent::Handshake { peer_id } => {
                    debug!(peer = %peer_id, "handshake complete");
                    state.remote_id = Some(peer_id);
                    state.handshake_received = true;
                    if let Some(connection) = self.mux.connection_mut(token) {
                        connection.send_bitfield(self.assembler.have_bitfield().to_bytes());
                        connection.send_extended_handshake();
                    }
                }
                PeerEvent::Bitfield(raw) => {
                    if !state.bitfield.is_zero() {
                        self.scheduler.peer_removed(&state.bitfield);
                    }
                    state.bitfield = Bitfield::from_bytes(&raw, self.torrent.num_pieces());
                    self.scheduler.peer_bitfield_added(&state.bitfield);
                }
                PeerEvent::Have { piece } => {
                    if !state.bitfield.has(piece) {
                        state.bitfield.set(piece);
                        self.scheduler.peer_has(piece);
                    }
                }
                PeerEvent::Choke => state.peer_choking = true,
                PeerEvent::Unchoke => state.peer_choking = false,
                PeerEvent::Interested => {
                    state.peer_interested = true;
                    // seed policy: anyone interested gets unchoked
                    if state.am_choking {
                        state.am_choking = false;
                        if let Some(connection) = self.mux.connection_mut(token) {
                            connection.send_unchoke();
                        }
                    }
                }
                PeerEvent::NotInterested => state.peer_interested = false,
                PeerEvent::Piece { piece, begin, data } => {
                    state.inflight = state.inflight.saturating_sub(1);
                    if !self.assembler.handle_block(piece, begin, &data) {
                        debug!(piece, begin, "rejected block");
                    }
                }
                PeerEvent::Request {
                    piece,
                    begin,
                    length,
                } => self.serve_request(token, piece, begin, length),
                PeerEvent::Cancel { .. } | PeerEvent::KeepAlive => {}
                PeerEvent::ExtendedHandshake(_) => {
                    debug!("extension handshake received");
                }
                PeerEvent::Pex(payload) => {
                    let mut added = 0usize;
                    for addr in pex::decode_added(&payload) {
                        if self.candidates.push(SocketAddr::V4(addr)) {
                            added += 1;
                        }
                    }
                    if added > 0 {
                        debug!(added, "peers learned via pex");
                    }
                }
            }
        }
    }

    fn serve_request(&mut self, token: Token, piece: u32, begin: u32, length: u32) {
        if !self.assembler.have_piece(piece)
            || length > MAX_SERVED_BLOCK
            || u64::from(begin) + u64::from(length)
                > u64::from(self.assembler.piece_length_of(piece))
        {
            debug!(piece, begin, length, "ignoring unserviceable request");
            return;
        }
        match self.storage.read_block(piece, begin, length) {
            Ok(data) => {
                if let Some(connection) = self.mux.connection_mut(token) {
                    connection.send_piece(piece, begin, data);
                    self.uploaded.fetch_add(u64::from(length), Ordering::Relaxed);
                }
            }
            Err(err) => error!(piece, begin, length, %err, "read for upload failed"),
        }
    }

    /// Re-evaluates interest and tops requests up to the inflight cap.
    fn update_peer_policy(&mut self, token: Token) {
        let Some(state) = self.peers.get_mut(&token) else {
            return;
        };
        let Some(connection) = self.mux.connection_mut(token) else {
            return;
        };

        let interesting = state
            .bitfield
            .has_piece_missing_from(self.assembler.have_bitfield());
        if interesting != state.am_interested {
            state.am_interested = interesting;
            if interesting {
                connection.send_interested();
            } else {
                connection.send_not_interested();
            }
        }

        if !state.peer_choking {
            while state.inflight < self.config.max_inflight_per_peer {
                let Some(request) = self
                    .scheduler
                    .next_request_for_peer(&mut self.assembler, &state.bitfield)
                else {
                    break;
                };
                connection.send_request(request.piece, request.begin, request.length);
                state.inflight += 1;
            }
        }

        self.mux.refresh_interest(token);
    }

    /// Completed pieces from this dispatch round: retire them from the
    /// scheduler, bump counters, broadcast `have` to every peer.
    fn drain_completed_pieces(&mut self) {
        let completed: Vec<u32> = self.completed.borrow_mut().drain(..).collect();
        if completed.is_empty() {
            return;
        }
        for &piece in &completed {
            self.scheduler.piece_completed(piece);
            self.downloaded.fetch_add(
                u64::from(self.assembler.piece_length_of(piece)),
                Ordering::Relaxed,
            );
            info!(piece, "piece complete");
        }

        let tokens: Vec<Token> = self.mux.connections_mut().map(|(t, _)| t).collect();
        for token in tokens {
            if let Some(connection) = self.mux.connection_mut(token) {
                for &piece in &completed {
                    connection.send_have(piece);
                }
            }
            self.mux.refresh_interest(token);
        }

        if self.assembler.is_complete() {
            info!("download complete, seeding");
            self.completed_pending.store(true, Ordering::Relaxed);
        }
    }

    fn sweep_handshake_timeouts(&mut self) {
        let timeout = self.config.handshake_timeout;
        let expired: Vec<Token> = self
            .peers
            .iter()
            .filter(|(_, state)| !state.handshake_received && state.connected_at.elapsed() > timeout)
            .map(|(&token, _)| token)
            .collect();
        for token in expired {
            if let Some(connection) = self.mux.connection_mut(token) {
                warn!(addr = %connection.addr(), "handshake timeout");
                connection.close(PeerError::HandshakeTimeout);
            }
            self.mux.remove(token);
            self.forget_peer(token);
        }
    }

    /// Drops all session state for a disposed peer. Its in-flight requests
    /// are dropped with the per-peer counter, not reassigned: the blocks
    /// stay `requested` and come back only through `reset_piece` on a hash
    /// failure.
    fn forget_peer(&mut self, token: Token) {
        if let Some(state) = self.peers.remove(&token) {
            if !state.bitfield.is_zero() {
                self.scheduler.peer_removed(&state.bitfield);
            }
        }
    }

    fn maybe_broadcast_pex(&mut self) {
        if self.last_pex.elapsed() < PEX_INTERVAL {
            return;
        }
        self.last_pex = Instant::now();

        let mut added = self.candidates.take_pex_backlog();
        if added.is_empty() {
            return;
        }
        if added.len() > PEX_MAX_PER_MESSAGE {
            // the tail goes out with the next broadcast
            let deferred = added.split_off(PEX_MAX_PER_MESSAGE);
            debug!(deferred = deferred.len(), "pex backlog over one message");
            self.candidates.return_pex_backlog(deferred);
        }

        let tokens: Vec<Token> = self.mux.connections_mut().map(|(t, _)| t).collect();
        for token in tokens {
            if let Some(connection) = self.mux.connection_mut(token) {
                connection.send_ut_pex(&added);
            }
            self.mux.refresh_interest(token);
        }
        debug!(count = added.len(), "pex broadcast");
    }

    fn maybe_log_stats(&mut self) {
        if self.last_stats.elapsed() < STATS_INTERVAL {
            return;
        }
        self.last_stats = Instant::now();
        info!(
            peers = self.peer_count(),
            candidates = self.candidates.len(),
            have = self.assembler.have_bitfield().count(),
            pieces = self.torrent.num_pieces(),
            downloaded = self.downloaded.load(Ordering::Relaxed),
            uploaded = self.uploaded.load(Ordering::Relaxed),
            "session stats"
        );
    }

    /// Usable announce URLs, deduplicated case-insensitively, order
    /// preserved. Schemes the tracker client does not speak are dropped.
    fn collect_tracker_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.torrent
            .announce_urls()
            .filter(|url| {
                let lower = url.to_ascii_lowercase();
                lower.starts_with("http://")
                    || lower.starts_with("https://")
                    || lower.starts_with("udp://")
            })
            .filter(|url| seen.insert(url.to_ascii_lowercase()))
            .map(String::from)
            .collect()
    }

    /// Fetches every missing piece from the configured web seeds, feeding
    /// blocks through the assembler so verification and persistence apply.
    fn download_from_web_seeds(&mut self) -> Result<(), SessionError> {
        for base in self.torrent.web_seeds.clone() {
            let client = match WebSeedClient::new(&base, &self.torrent.name) {
                Ok(client) => client,
                Err(err) => {
                    warn!(%base, %err, "web seed unusable");
                    continue;
                }
            };
            info!(url = client.url(), "fetching from web seed");

            let mut failed = false;
            for piece in 0..self.torrent.num_pieces() as u32 {
                if self.assembler.have_piece(piece) {
                    continue;
                }
                let length = self.torrent.piece_length_of(piece);
                let offset = u64::from(piece) * self.torrent.piece_length;
                match client.fetch_piece(piece, offset, length) {
                    Ok(body) => {
                        let block = self.assembler.block_size();
                        for begin in (0..length).step_by(block as usize) {
                            let end = (begin + block).min(length);
                            self.assembler.handle_block(
                                piece,
                                begin,
                                &body[begin as usize..end as usize],
                            );
                        }
                    }
                    Err(err) => {
                        warn!(piece, %err, "web seed fetch failed");
                        failed = true;
                        break;
                    }
                }
            }
            self.drain_completed_pieces();
            if !failed && self.assembler.is_complete() {
                return Ok(());
            }
        }

        if self.assembler.is_complete() {
            Ok(())
        } else {
            Err(SessionError::NoPeerSource)
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_listener(port: u16) -> Result<mio::net::TcpListener, SessionError> {
    use socket2::{Domain, Protocol, Socket, Type};
    use std::net::Ipv4Addr;

    // dual-stack IPv6 listener (v6only off), with an IPv4 fallback for
    // hosts without IPv6
    let attempts: [(Domain, SocketAddr); 2] = [
        (Domain::IPV6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))),
        (Domain::IPV4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))),
    ];

    let mut last_err = None;
    for (domain, addr) in attempts {
        let bound = (|| {
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
            if domain == Domain::IPV6 {
                let _ = socket.set_only_v6(false);
            }
            let _ = socket.set_reuse_address(true);
            socket.bind(&addr.into())?;
            socket.listen(128)?;
            socket.set_nonblocking(true)?;
            Ok::<_, std::io::Error>(socket)
        })();
        match bound {
            Ok(socket) => return Ok(mio::net::TcpListener::from_std(socket.into())),
            Err(err) => last_err = Some(err),
        }
    }
    Err(SessionError::Bind(last_err.unwrap()))
}

/// The announce loop, run on its own thread. Communicates with the event
/// thread only through the candidate queue and shared atomics.
struct TrackerWorker {
    urls: Vec<String>,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    port: u16,
    total_length: u64,
    candidates: Arc<CandidateQueue>,
    downloaded: Arc<AtomicU64>,
    uploaded: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    completed_pending: Arc<AtomicBool>,
}

impl TrackerWorker {
    fn run(self) {
        let mut started = false;
        let mut last_good: Option<String> = None;

        while !self.stop.load(Ordering::Relaxed) {
            let event = if !started {
                TrackerEvent::Started
            } else if self.completed_pending.swap(false, Ordering::Relaxed) {
                TrackerEvent::Completed
            } else {
                TrackerEvent::None
            };

            let mut interval = TRACKER_RETRY_INTERVAL;
            for url in &self.urls {
                if self.stop.load(Ordering::Relaxed) {
                    break;
                }
                match tracker::announce(url, &self.request(event)) {
                    Ok(response) => {
                        started = true;
                        last_good = Some(url.clone());
                        let mut fresh = 0usize;
                        for peer in &response.peers {
                            if self.candidates.push(*peer) {
                                fresh += 1;
                            }
                        }
                        info!(
                            %url,
                            peers = response.peers.len(),
                            fresh,
                            interval = response.interval,
                            seeders = response.complete,
                            leechers = response.incomplete,
                            "tracker announce"
                        );
                        interval = Duration::from_secs(u64::from(response.interval.max(10)));
                        break;
                    }
                    Err(err) => warn!(%url, %err, "tracker announce failed"),
                }
            }

            self.sleep_interruptible(interval);
        }

        if let Some(url) = last_good {
            let mut request = self.request(TrackerEvent::Stopped);
            request.left = self.total_length.saturating_sub(request.downloaded);
            if let Err(err) = tracker::announce(&url, &request) {
                debug!(%url, %err, "stopped announce failed");
            }
        }
    }

    fn request(&self, event: TrackerEvent) -> AnnounceRequest {
        let downloaded = self.downloaded.load(Ordering::Relaxed);
        AnnounceRequest {
            info_hash: self.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: self.uploaded.load(Ordering::Relaxed),
            downloaded,
            left: self.total_length.saturating_sub(downloaded),
            event,
        }
    }

    fn sleep_interruptible(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stop.load(Ordering::Relaxed) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(TRACKER_SLEEP_SLICE.min(remaining));
        }
    }
}
