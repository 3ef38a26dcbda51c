use super::*;
use bytes::Bytes;

const INFO_HASH: [u8; 20] = [0xaa; 20];

fn local_id() -> PeerId {
    PeerId(*b"-BF0001-000000000000")
}

fn remote_id() -> PeerId {
    PeerId(*b"-XX0001-remoteremote")
}

fn remote_handshake() -> Bytes {
    Handshake::new(INFO_HASH, *remote_id().as_bytes()).encode()
}

/// Drains the outbound queue into one contiguous byte vector.
fn flush_outbound(proto: &mut PeerProto) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = proto.next_write_chunk() {
        let n = chunk.len();
        out.extend_from_slice(chunk);
        proto.advance_write(n);
    }
    out
}

#[test]
fn test_peer_id_generate() {
    let a = PeerId::generate();
    let b = PeerId::generate();
    assert_ne!(a.0, b.0);
    assert_eq!(a.client_tag(), Some("BF0001"));
}

#[test]
fn test_bitfield_set_clear_count() {
    let mut bf = Bitfield::new(21);
    assert_eq!(bf.as_bytes().len(), 3);
    assert!(!bf.has(0));

    bf.set(0);
    bf.set(20);
    assert!(bf.has(0));
    assert!(bf.has(20));
    assert_eq!(bf.count(), 2);

    bf.clear(0);
    assert!(!bf.has(0));

    // out-of-range bits are ignored, not panics
    bf.set(21);
    assert!(!bf.has(21));
    assert_eq!(bf.count(), 1);
}

#[test]
fn test_bitfield_from_bytes_zeroes_spare_bits() {
    // 10 pieces in 2 bytes; the low 6 bits of the second byte are spare
    let bf = Bitfield::from_bytes(&[0xff, 0xff], 10);
    assert_eq!(bf.as_bytes(), &[0xff, 0xc0]);
    assert_eq!(bf.count(), 10);

    // short input is zero-extended
    let bf = Bitfield::from_bytes(&[0x80], 10);
    assert_eq!(bf.as_bytes().len(), 2);
    assert!(bf.has(0));
    assert!(!bf.has(9));
}

#[test]
fn test_bitfield_interest_test() {
    let mut have = Bitfield::new(8);
    have.set(1);

    let mut theirs = Bitfield::new(8);
    theirs.set(1);
    assert!(!theirs.has_piece_missing_from(&have));

    theirs.set(5);
    assert!(theirs.has_piece_missing_from(&have));

    let empty = Bitfield::new(8);
    assert!(!empty.has_piece_missing_from(&have));
}

#[test]
fn test_handshake_round_trip() {
    let hs = Handshake::new(INFO_HASH, *local_id().as_bytes());
    assert!(hs.supports_extension_protocol());

    let encoded = hs.encode();
    assert_eq!(encoded.len(), HANDSHAKE_LEN);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[1..20], PROTOCOL);
    // reserved byte 5 carries the extension-protocol bit
    assert_eq!(encoded[25] & 0x10, 0x10);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, INFO_HASH);
    assert_eq!(decoded.peer_id, *local_id().as_bytes());
}

#[test]
fn test_handshake_rejects_bad_preamble() {
    let mut bad = remote_handshake().to_vec();
    bad[0] = 18;
    assert!(matches!(
        Handshake::decode(&bad),
        Err(PeerError::InvalidHandshake)
    ));

    assert!(Handshake::decode(&bad[..40]).is_err());
}

#[test]
fn test_message_reserialisation_is_identity() {
    let messages = vec![
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0xf0, 0x0f])),
        Message::Request {
            piece: 3,
            begin: 16384,
            length: 16384,
        },
        Message::Piece {
            piece: 3,
            begin: 16384,
            data: Bytes::from_static(b"block bytes"),
        },
        Message::Cancel {
            piece: 3,
            begin: 16384,
            length: 16384,
        },
        Message::Extended {
            id: 1,
            payload: Bytes::from_static(b"d5:added0:e"),
        },
    ];

    for message in messages {
        let frame = message.encode();
        let body = frame.slice(4..);
        let decoded = Message::decode(body[0], body.slice(1..)).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.encode(), frame);
    }
}

#[test]
fn test_keep_alive_frame_is_length_zero() {
    assert_eq!(&Message::KeepAlive.encode()[..], &[0, 0, 0, 0]);
}

#[test]
fn test_message_rejects_malformed() {
    assert!(matches!(
        Message::decode(4, Bytes::from_static(&[0, 0, 1])),
        Err(PeerError::MalformedMessage("have"))
    ));
    assert!(matches!(
        Message::decode(6, Bytes::from_static(&[0; 11])),
        Err(PeerError::MalformedMessage("request"))
    ));
    assert!(matches!(
        Message::decode(99, Bytes::new()),
        Err(PeerError::InvalidMessageId(99))
    ));
}

#[test]
fn test_extension_handshake_round_trip() {
    let ours = ExtensionHandshake::ours();
    let encoded = ours.encode();

    let decoded = ExtensionHandshake::decode(&encoded).unwrap();
    assert_eq!(decoded.ut_pex_id(), Some(LOCAL_UT_PEX_ID));
    assert!(decoded.client.unwrap().starts_with("bitflood/"));
}

#[test]
fn test_extension_handshake_ignores_disabled_extension() {
    // m: {ut_pex: 0} means "switched off"
    let decoded = ExtensionHandshake::decode(b"d1:md6:ut_pexi0eee").unwrap();
    assert_eq!(decoded.ut_pex_id(), None);
}

#[test]
fn test_proto_queues_handshake_immediately() {
    let mut proto = PeerProto::outgoing(INFO_HASH, local_id(), 16);
    assert_eq!(proto.phase(), Phase::Connecting);
    assert!(proto.wants_write());

    let sent = flush_outbound(&mut proto);
    assert_eq!(sent.len(), HANDSHAKE_LEN);
    let hs = Handshake::decode(&sent).unwrap();
    assert_eq!(hs.info_hash, INFO_HASH);
    assert!(!proto.wants_write());
}

#[test]
fn test_proto_partial_writes() {
    let mut proto = PeerProto::outgoing(INFO_HASH, local_id(), 16);
    let first = proto.next_write_chunk().unwrap().to_vec();
    assert_eq!(first.len(), HANDSHAKE_LEN);

    proto.advance_write(10);
    let rest = proto.next_write_chunk().unwrap();
    assert_eq!(rest.len(), HANDSHAKE_LEN - 10);
    assert_eq!(rest, &first[10..]);
}

#[test]
fn test_proto_handshake_then_messages() {
    let mut proto = PeerProto::incoming(INFO_HASH, local_id(), 16);
    proto.mark_connected();

    proto.receive(&remote_handshake());
    // keep-alive, then have(7)
    proto.receive(&[0, 0, 0, 0]);
    proto.receive(&Message::Have { piece: 7 }.encode());

    assert_eq!(proto.phase(), Phase::Active);
    let events = proto.drain_events();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], PeerEvent::Handshake { peer_id } if peer_id == remote_id()));
    assert!(matches!(events[1], PeerEvent::KeepAlive));
    assert!(matches!(events[2], PeerEvent::Have { piece: 7 }));
}

#[test]
fn test_proto_byte_at_a_time() {
    let mut proto = PeerProto::incoming(INFO_HASH, local_id(), 16);

    let mut stream = Vec::new();
    stream.extend_from_slice(&remote_handshake());
    stream.extend_from_slice(&Message::Unchoke.encode());
    stream.extend_from_slice(
        &Message::Piece {
            piece: 2,
            begin: 0,
            data: Bytes::from_static(b"abcd"),
        }
        .encode(),
    );

    for byte in stream {
        proto.receive(&[byte]);
    }

    let events = proto.drain_events();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[1], PeerEvent::Unchoke));
    assert!(
        matches!(&events[2], PeerEvent::Piece { piece: 2, begin: 0, data } if &data[..] == b"abcd")
    );
}

#[test]
fn test_proto_info_hash_mismatch_closes_before_any_event() {
    let mut proto = PeerProto::incoming(INFO_HASH, local_id(), 16);
    let foreign = Handshake::new([0xbb; 20], *remote_id().as_bytes()).encode();
    proto.receive(&foreign);

    assert_eq!(proto.phase(), Phase::Closed);
    assert!(proto.drain_events().is_empty());
    assert!(matches!(
        proto.close_reason(),
        Some(PeerError::InfoHashMismatch)
    ));
}

#[test]
fn test_proto_self_connection_closes() {
    let mut proto = PeerProto::outgoing(INFO_HASH, local_id(), 16);
    proto.mark_connected();

    let ours = Handshake::new(INFO_HASH, *local_id().as_bytes()).encode();
    proto.receive(&ours);

    assert_eq!(proto.phase(), Phase::Closed);
    assert!(proto.drain_events().is_empty());
    assert!(matches!(
        proto.close_reason(),
        Some(PeerError::SelfConnection)
    ));
}

#[test]
fn test_proto_oversized_frame_closes() {
    let mut proto = PeerProto::incoming(INFO_HASH, local_id(), 16);
    proto.receive(&remote_handshake());
    proto.receive(&(64 * 1024 * 1024u32).to_be_bytes());

    assert_eq!(proto.phase(), Phase::Closed);
    assert!(matches!(
        proto.close_reason(),
        Some(PeerError::MessageTooLarge(_))
    ));
}

#[test]
fn test_proto_out_of_range_have_closes() {
    let mut proto = PeerProto::incoming(INFO_HASH, local_id(), 16);
    proto.receive(&remote_handshake());
    proto.receive(&Message::Have { piece: 16 }.encode());

    assert_eq!(proto.phase(), Phase::Closed);
}

#[test]
fn test_proto_pex_negotiation() {
    let mut proto = PeerProto::incoming(INFO_HASH, local_id(), 16);
    proto.receive(&remote_handshake());

    // remote advertises ut_pex under id 3
    proto.receive(
        &Message::Extended {
            id: 0,
            payload: Bytes::from_static(b"d1:md6:ut_pexi3eee"),
        }
        .encode(),
    );
    assert_eq!(proto.remote_ut_pex_id(), Some(3));

    // a pex message under that id surfaces; other ids are ignored
    proto.receive(
        &Message::Extended {
            id: 3,
            payload: Bytes::from_static(b"d5:added6:\x01\x02\x03\x04\x1a\xe1e"),
        }
        .encode(),
    );
    proto.receive(
        &Message::Extended {
            id: 9,
            payload: Bytes::from_static(b"ignored"),
        }
        .encode(),
    );

    let events = proto.drain_events();
    let pex: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, PeerEvent::Pex(_)))
        .collect();
    assert_eq!(pex.len(), 1);

    // replies go out under the remote's id
    let endpoint = "9.9.9.9:9999".parse().unwrap();
    proto.send_ut_pex(&[endpoint]);
    let sent = flush_outbound(&mut proto);
    // the queue still holds our own handshake; the pex frame is last
    let pex_frame_start = sent.len() - (4 + 2 + crate::pex::encode_added(&[endpoint]).len());
    assert_eq!(sent[pex_frame_start + 4], 20);
    assert_eq!(sent[pex_frame_start + 5], 3);
}

#[test]
fn test_proto_send_operations_frame_correctly() {
    let mut proto = PeerProto::incoming(INFO_HASH, local_id(), 16);
    proto.receive(&remote_handshake());
    flush_outbound(&mut proto);

    proto.send_interested();
    proto.send_have(5);
    proto.send_request(1, 0, 16384);

    let sent = flush_outbound(&mut proto);
    let mut expected = Vec::new();
    expected.extend_from_slice(&Message::Interested.encode());
    expected.extend_from_slice(&Message::Have { piece: 5 }.encode());
    expected.extend_from_slice(
        &Message::Request {
            piece: 1,
            begin: 0,
            length: 16384,
        }
        .encode(),
    );
    assert_eq!(sent, expected);
}

#[test]
fn test_proto_ignores_sends_after_close() {
    let mut proto = PeerProto::incoming(INFO_HASH, local_id(), 16);
    proto.close(PeerError::ConnectionClosed);
    flush_outbound(&mut proto);

    proto.send_interested();
    assert!(!proto.wants_write());
    proto.receive(&remote_handshake());
    assert!(proto.drain_events().is_empty());
}
