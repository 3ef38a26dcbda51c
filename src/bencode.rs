//! Bencode codec (BEP-3).
//!
//! Bencoding is the serialization format used by `.torrent` files, tracker
//! responses and extension-protocol payloads. It has four data types:
//! integers, byte strings, lists, and dictionaries with byte-string keys.
//!
//! The decoder is strict: integers must be canonical (no leading zeros, no
//! `-0`), nesting depth is bounded, and trailing bytes after the value are
//! an error. The encoder produces canonical output (dictionary keys in
//! sorted order, which `BTreeMap` gives for free).

mod decode;
mod encode;
mod error;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;

#[cfg(test)]
mod tests;
