use std::fmt::Write as _;
use std::time::Duration;

use crate::bencode::{decode, Value};

use super::error::TrackerError;
use super::response::{parse_peers_value, AnnounceRequest, AnnounceResponse};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Announces to an HTTP(S) tracker.
///
/// Query parameters per BEP-3: percent-encoded raw `info_hash` and
/// `peer_id`, `port`, `uploaded`, `downloaded`, `left`, `compact=1`, and
/// the event when not a plain re-announce.
pub fn announce_http(
    url: &str,
    request: &AnnounceRequest,
) -> Result<AnnounceResponse, TrackerError> {
    let full_url = build_announce_url(url, request);

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()?;
    let body = client.get(&full_url).send()?.error_for_status()?.bytes()?;

    parse_announce_body(&body)
}

pub(super) fn build_announce_url(url: &str, request: &AnnounceRequest) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    let mut out = format!(
        "{url}{separator}info_hash={}&peer_id={}",
        percent_encode(&request.info_hash),
        percent_encode(&request.peer_id),
    );
    let _ = write!(
        out,
        "&port={}&uploaded={}&downloaded={}&left={}&compact=1",
        request.port, request.uploaded, request.downloaded, request.left,
    );
    let event = request.event.as_str();
    if !event.is_empty() {
        let _ = write!(out, "&event={event}");
    }
    out
}

pub(super) fn parse_announce_body(body: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let value = decode(body)?;
    if value.as_dict().is_none() {
        return Err(TrackerError::InvalidResponse("expected dict"));
    }

    if let Some(reason) = value.get(b"failure reason").and_then(Value::as_str) {
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let interval = value
        .get(b"interval")
        .and_then(Value::as_int)
        .filter(|&i| i > 0)
        .ok_or(TrackerError::InvalidResponse("missing interval"))? as u32;

    let peers = match value.get(b"peers") {
        Some(peers) => parse_peers_value(peers)?,
        None => Vec::new(),
    };

    Ok(AnnounceResponse {
        interval,
        complete: value
            .get(b"complete")
            .and_then(Value::as_int)
            .map(|v| v as u32),
        incomplete: value
            .get(b"incomplete")
            .and_then(Value::as_int)
            .map(|v| v as u32),
        peers,
    })
}

/// Percent-encodes raw bytes for a query string, keeping the characters
/// RFC 3986 leaves unreserved.
pub(super) fn percent_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for &byte in data {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
