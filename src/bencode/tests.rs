use super::*;
use bytes::Bytes;
use std::collections::BTreeMap;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap().as_int(), Some(42));
    assert_eq!(decode(b"i-7e").unwrap().as_int(), Some(-7));
    assert_eq!(decode(b"i0e").unwrap().as_int(), Some(0));
}

#[test]
fn test_decode_integer_rejects_non_canonical() {
    assert!(matches!(decode(b"i007e"), Err(BencodeError::InvalidInteger)));
    assert!(matches!(decode(b"i-0e"), Err(BencodeError::InvalidInteger)));
    assert!(matches!(decode(b"ie"), Err(BencodeError::InvalidInteger)));
    assert!(matches!(decode(b"i12"), Err(BencodeError::UnexpectedEof)));
}

#[test]
fn test_decode_bytes() {
    let v = decode(b"5:hello").unwrap();
    assert_eq!(v.as_str(), Some("hello"));

    let v = decode(b"0:").unwrap();
    assert_eq!(v.as_bytes().map(|b| b.len()), Some(0));
}

#[test]
fn test_decode_bytes_truncated() {
    assert!(matches!(decode(b"5:hi"), Err(BencodeError::UnexpectedEof)));
    assert!(matches!(decode(b"9999999999999999999999:x"), Err(BencodeError::InvalidLength)));
}

#[test]
fn test_decode_list() {
    let v = decode(b"li1ei2e3:fooe").unwrap();
    let items = v.as_list().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_int(), Some(1));
    assert_eq!(items[2].as_str(), Some("foo"));
}

#[test]
fn test_decode_dict() {
    let v = decode(b"d3:agei30e4:name5:Alicee").unwrap();
    assert_eq!(v.get(b"age").and_then(Value::as_int), Some(30));
    assert_eq!(v.get(b"name").and_then(Value::as_str), Some("Alice"));
    assert!(v.get(b"missing").is_none());
}

#[test]
fn test_decode_dict_rejects_non_string_key() {
    assert!(matches!(
        decode(b"di1ei2ee"),
        Err(BencodeError::NonStringKey)
    ));
}

#[test]
fn test_decode_trailing_data() {
    assert!(matches!(
        decode(b"i42extra"),
        Err(BencodeError::InvalidInteger) | Err(BencodeError::TrailingData(_))
    ));
    assert!(matches!(
        decode(b"i42eextra"),
        Err(BencodeError::TrailingData(5))
    ));
}

#[test]
fn test_decode_depth_limit() {
    let mut deep = Vec::new();
    deep.extend(std::iter::repeat(b'l').take(100));
    deep.extend(std::iter::repeat(b'e').take(100));
    assert!(matches!(decode(&deep), Err(BencodeError::NestingTooDeep)));
}

#[test]
fn test_encode_round_trip() {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"b"), Value::Int(-3));
    dict.insert(
        Bytes::from_static(b"a"),
        Value::List(vec![Value::string("x"), Value::Int(9)]),
    );
    let original = Value::Dict(dict);

    let encoded = encode(&original);
    // keys come out sorted regardless of insertion order
    assert_eq!(encoded, b"d1:al1:xi9ee1:bi-3ee");
    assert_eq!(decode(&encoded).unwrap(), original);
}

#[test]
fn test_encode_binary_string() {
    let v = Value::Bytes(Bytes::from_static(&[0x00, 0xff, 0x7f]));
    let encoded = encode(&v);
    assert_eq!(encoded, &[b'3', b':', 0x00, 0xff, 0x7f]);
    assert_eq!(decode(&encoded).unwrap(), v);
}
