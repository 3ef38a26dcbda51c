use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::bencode::Value;

use super::error::TrackerError;

/// Announce lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Periodic re-announce.
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// BEP-15 event codes.
    pub fn as_udp_code(&self) -> u32 {
        match self {
            TrackerEvent::None => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// Everything an announce needs, independent of transport.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: TrackerEvent,
}

/// A successful announce.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the next announce.
    pub interval: u32,
    /// Seeder count, when reported.
    pub complete: Option<u32>,
    /// Leecher count, when reported.
    pub incomplete: Option<u32>,
    pub peers: Vec<SocketAddr>,
}

/// Parses BEP-23 compact peers: 6 bytes per peer, IPv4 then port, both
/// network order. Ragged trailing bytes are ignored.
pub fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|group| {
            let ip = Ipv4Addr::new(group[0], group[1], group[2], group[3]);
            let port = u16::from_be_bytes([group[4], group[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}

/// Parses the `peers` field of an HTTP announce response: either a compact
/// byte string or a list of `{ip, port}` dictionaries.
pub fn parse_peers_value(peers: &Value) -> Result<Vec<SocketAddr>, TrackerError> {
    match peers {
        Value::Bytes(raw) => Ok(parse_compact_peers(raw)),
        Value::List(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                let ip: IpAddr = entry
                    .get(b"ip")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .ok_or(TrackerError::InvalidResponse("peer ip"))?;
                let port = entry
                    .get(b"port")
                    .and_then(Value::as_int)
                    .filter(|&p| (0..=u16::MAX as i64).contains(&p))
                    .ok_or(TrackerError::InvalidResponse("peer port"))?;
                out.push(SocketAddr::new(ip, port as u16));
            }
            Ok(out)
        }
        _ => Err(TrackerError::InvalidResponse("peers")),
    }
}
