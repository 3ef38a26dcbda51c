//! Tracker announces (BEP-3, BEP-15, BEP-23).
//!
//! An announce registers us in the swarm and returns peer endpoints.
//! HTTP(S) trackers take a GET with query parameters and answer with a
//! bencoded dictionary; UDP trackers speak the binary connect/announce
//! protocol of BEP-15. Both run blocking on the tracker worker thread,
//! never on the event thread.

mod error;
mod http;
mod response;
mod udp;

pub use error::TrackerError;
pub use http::announce_http;
pub use response::{parse_compact_peers, AnnounceRequest, AnnounceResponse, TrackerEvent};
pub use udp::announce_udp;

/// Dispatches an announce on the URL scheme.
pub fn announce(url: &str, request: &AnnounceRequest) -> Result<AnnounceResponse, TrackerError> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        announce_http(url, request)
    } else if lower.starts_with("udp://") {
        announce_udp(url, request)
    } else {
        Err(TrackerError::UnsupportedScheme(url.to_string()))
    }
}

#[cfg(test)]
mod tests;
