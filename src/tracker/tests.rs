use super::http::{build_announce_url, parse_announce_body, percent_encode};
use super::udp::resolve_udp_url;
use super::*;

fn request() -> AnnounceRequest {
    AnnounceRequest {
        info_hash: *b"\x124Vx\x9a\xbc\xde\xf0\x124Vx\x9a\xbc\xde\xf0\x124Vx",
        peer_id: *b"-BF0001-abcdefghijkl",
        port: 6881,
        uploaded: 10,
        downloaded: 20,
        left: 300,
        event: TrackerEvent::Started,
    }
}

#[test]
fn test_event_strings_and_codes() {
    assert_eq!(TrackerEvent::None.as_str(), "");
    assert_eq!(TrackerEvent::Started.as_str(), "started");
    assert_eq!(TrackerEvent::Stopped.as_str(), "stopped");
    assert_eq!(TrackerEvent::Completed.as_str(), "completed");

    assert_eq!(TrackerEvent::None.as_udp_code(), 0);
    assert_eq!(TrackerEvent::Completed.as_udp_code(), 1);
    assert_eq!(TrackerEvent::Started.as_udp_code(), 2);
    assert_eq!(TrackerEvent::Stopped.as_udp_code(), 3);
}

#[test]
fn test_percent_encoding_raw_bytes() {
    assert_eq!(percent_encode(b"abc-_.~XYZ"), "abc-_.~XYZ");
    assert_eq!(percent_encode(&[0x00, 0xff, b' ']), "%00%FF%20");
}

#[test]
fn test_announce_url_shape() {
    let url = build_announce_url("http://t.example/announce", &request());
    assert!(url.starts_with("http://t.example/announce?info_hash=%124Vx"));
    assert!(url.contains("&peer_id=-BF0001-abcdefghijkl"));
    assert!(url.contains("&port=6881"));
    assert!(url.contains("&uploaded=10"));
    assert!(url.contains("&downloaded=20"));
    assert!(url.contains("&left=300"));
    assert!(url.contains("&compact=1"));
    assert!(url.ends_with("&event=started"));

    // a tracker URL that already carries a query string
    let url = build_announce_url("http://t.example/announce?key=1", &request());
    assert!(url.starts_with("http://t.example/announce?key=1&info_hash="));
}

#[test]
fn test_parse_compact_response() {
    let mut body = Vec::new();
    body.extend_from_slice(b"d8:completei3e10:incompletei7e8:intervali1800e5:peers12:");
    body.extend_from_slice(&[192, 168, 1, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe2]);
    body.push(b'e');

    let resp = parse_announce_body(&body).unwrap();
    assert_eq!(resp.interval, 1800);
    assert_eq!(resp.complete, Some(3));
    assert_eq!(resp.incomplete, Some(7));
    assert_eq!(resp.peers.len(), 2);
    assert_eq!(resp.peers[0], "192.168.1.1:6881".parse().unwrap());
    assert_eq!(resp.peers[1], "10.0.0.2:6882".parse().unwrap());
}

#[test]
fn test_parse_dict_peer_list() {
    let body =
        b"d8:intervali900e5:peersld2:ip9:127.0.0.14:porti6881eed2:ip8:10.1.2.34:porti8080eeee";
    let resp = parse_announce_body(body).unwrap();
    assert_eq!(resp.interval, 900);
    assert_eq!(resp.peers.len(), 2);
    assert_eq!(resp.peers[1], "10.1.2.3:8080".parse().unwrap());
}

#[test]
fn test_parse_failure_reason() {
    let body = b"d14:failure reason12:unregisterede";
    assert!(matches!(
        parse_announce_body(body),
        Err(TrackerError::Failure(reason)) if reason == "unregistered"
    ));
}

#[test]
fn test_parse_missing_interval() {
    let body = b"d5:peers0:e";
    assert!(matches!(
        parse_announce_body(body),
        Err(TrackerError::InvalidResponse(_))
    ));
}

#[test]
fn test_compact_peers_ragged_tail_ignored() {
    let peers = parse_compact_peers(&[1, 2, 3, 4, 0x00, 0x50, 9, 9]);
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0], "1.2.3.4:80".parse().unwrap());
}

#[test]
fn test_resolve_udp_url() {
    let addr = resolve_udp_url("udp://127.0.0.1:6969/announce").unwrap();
    assert_eq!(addr, "127.0.0.1:6969".parse().unwrap());

    assert!(resolve_udp_url("http://127.0.0.1:80").is_err());
    assert!(resolve_udp_url("udp://").is_err());
}

#[test]
fn test_announce_dispatch_rejects_unknown_scheme() {
    assert!(matches!(
        announce("wss://t.example", &request()),
        Err(TrackerError::UnsupportedScheme(_))
    ));
}
