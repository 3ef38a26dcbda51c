//! Peer exchange payloads (BEP-11).
//!
//! A `ut_pex` message is a bencoded dictionary. The engine reads the
//! `added` field: a byte string of 6-byte groups, 4 bytes network-order
//! IPv4 followed by a 2-byte network-order port. Other fields (`added.f`,
//! `dropped`, the IPv6 variants) are ignored, and outbound messages carry
//! `added` only.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::{BufMut, Bytes, BytesMut};

use crate::bencode::{decode, encode, Value};

/// Extracts the endpoints of the `added` field.
///
/// Returns an empty list when the payload is not a bencoded dictionary,
/// has no `added` field, or the field length is not a multiple of 6.
pub fn decode_added(payload: &[u8]) -> Vec<SocketAddrV4> {
    let Ok(value) = decode(payload) else {
        return Vec::new();
    };
    let Some(added) = value.get(b"added").and_then(Value::as_bytes) else {
        return Vec::new();
    };
    if added.len() % 6 != 0 {
        return Vec::new();
    }

    added
        .chunks_exact(6)
        .map(|group| {
            let ip = Ipv4Addr::new(group[0], group[1], group[2], group[3]);
            let port = u16::from_be_bytes([group[4], group[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect()
}

/// Builds an outbound `ut_pex` payload carrying the given endpoints under
/// `added`.
pub fn encode_added(added: &[SocketAddrV4]) -> Bytes {
    let mut packed = BytesMut::with_capacity(added.len() * 6);
    for addr in added {
        packed.put_slice(&addr.ip().octets());
        packed.put_u16(addr.port());
    }

    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"added"), Value::Bytes(packed.freeze()));
    Bytes::from(encode(&Value::Dict(dict)))
}
