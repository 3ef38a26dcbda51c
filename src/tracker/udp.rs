use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use rand::Rng as _;

use super::error::TrackerError;
use super::response::{parse_compact_peers, AnnounceRequest, AnnounceResponse};

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

/// Per-attempt receive timeouts: 500 ms, then 1 s, then 2 s.
const RETRY_TIMEOUTS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
];

/// Announces to a UDP tracker (BEP-15): connect to obtain a connection id,
/// then announce with it.
pub fn announce_udp(url: &str, request: &AnnounceRequest) -> Result<AnnounceResponse, TrackerError> {
    let addr = resolve_udp_url(url)?;
    let socket = UdpSocket::bind(match addr {
        SocketAddr::V4(_) => "0.0.0.0:0",
        SocketAddr::V6(_) => "[::]:0",
    })?;
    socket.connect(addr)?;

    let connection_id = connect(&socket)?;
    announce(&socket, connection_id, request)
}

fn connect(socket: &UdpSocket) -> Result<u64, TrackerError> {
    let transaction_id: u32 = rand::rng().random();

    let mut packet = Vec::with_capacity(16);
    packet.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    packet.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
    packet.extend_from_slice(&transaction_id.to_be_bytes());

    let response = exchange(socket, &packet, 16)?;
    let (action, tid) = read_header(&response);
    if action != ACTION_CONNECT || tid != transaction_id {
        return Err(TrackerError::InvalidResponse("connect response mismatch"));
    }
    Ok(u64::from_be_bytes(response[8..16].try_into().unwrap()))
}

fn announce(
    socket: &UdpSocket,
    connection_id: u64,
    request: &AnnounceRequest,
) -> Result<AnnounceResponse, TrackerError> {
    let transaction_id: u32 = rand::rng().random();
    let key: u32 = rand::rng().random();

    let mut packet = Vec::with_capacity(98);
    packet.extend_from_slice(&connection_id.to_be_bytes());
    packet.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    packet.extend_from_slice(&transaction_id.to_be_bytes());
    packet.extend_from_slice(&request.info_hash);
    packet.extend_from_slice(&request.peer_id);
    packet.extend_from_slice(&request.downloaded.to_be_bytes());
    packet.extend_from_slice(&request.left.to_be_bytes());
    packet.extend_from_slice(&request.uploaded.to_be_bytes());
    packet.extend_from_slice(&request.event.as_udp_code().to_be_bytes());
    packet.extend_from_slice(&0u32.to_be_bytes()); // IP: let the tracker use the source
    packet.extend_from_slice(&key.to_be_bytes());
    packet.extend_from_slice(&(-1i32).to_be_bytes()); // num_want: default
    packet.extend_from_slice(&request.port.to_be_bytes());

    let response = exchange(socket, &packet, 20)?;
    let (action, tid) = read_header(&response);
    if action == ACTION_ERROR {
        let message = String::from_utf8_lossy(&response[8..]).into_owned();
        return Err(TrackerError::Failure(message));
    }
    if action != ACTION_ANNOUNCE || tid != transaction_id {
        return Err(TrackerError::InvalidResponse("announce response mismatch"));
    }

    let interval = u32::from_be_bytes(response[8..12].try_into().unwrap());
    let leechers = u32::from_be_bytes(response[12..16].try_into().unwrap());
    let seeders = u32::from_be_bytes(response[16..20].try_into().unwrap());

    Ok(AnnounceResponse {
        interval,
        complete: Some(seeders),
        incomplete: Some(leechers),
        peers: parse_compact_peers(&response[20..]),
    })
}

/// Sends `packet` and waits for a response of at least `min_len` bytes,
/// retrying on timeout with the BEP-15 ladder.
fn exchange(socket: &UdpSocket, packet: &[u8], min_len: usize) -> Result<Vec<u8>, TrackerError> {
    let mut buf = [0u8; 2048];
    for timeout in RETRY_TIMEOUTS {
        socket.send(packet)?;
        socket.set_read_timeout(Some(timeout))?;
        match socket.recv(&mut buf) {
            Ok(n) if n >= min_len => return Ok(buf[..n].to_vec()),
            Ok(_) => return Err(TrackerError::InvalidResponse("response too short")),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(TrackerError::Io(e)),
        }
    }
    Err(TrackerError::Timeout)
}

fn read_header(response: &[u8]) -> (u32, u32) {
    let action = u32::from_be_bytes(response[..4].try_into().unwrap());
    let tid = u32::from_be_bytes(response[4..8].try_into().unwrap());
    (action, tid)
}

pub(super) fn resolve_udp_url(url: &str) -> Result<SocketAddr, TrackerError> {
    let rest = url
        .strip_prefix("udp://")
        .or_else(|| url.strip_prefix("UDP://"))
        .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;
    let host_port = rest.split('/').next().unwrap_or(rest);
    if host_port.is_empty() {
        return Err(TrackerError::InvalidUrl(url.to_string()));
    }

    host_port
        .to_socket_addrs()
        .map_err(|_| TrackerError::InvalidUrl(url.to_string()))?
        .next()
        .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))
}
