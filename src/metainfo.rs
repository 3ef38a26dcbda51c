//! Torrent metainfo parsing (BEP-3).
//!
//! A `.torrent` file is a bencoded dictionary. The `info` sub-dictionary
//! describes the payload (name, piece size, piece hashes, file list) and its
//! SHA-1 over the exact bencoded bytes is the torrent's info hash. The outer
//! dictionary carries tracker URLs (`announce`, `announce-list`) and web
//! seeds (`url-list`).

use std::path::PathBuf;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::bencode::{decode, encode, BencodeError, Value};

/// Errors from parsing a torrent descriptor.
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    #[error("torrent describes no payload bytes")]
    EmptyPayload,
}

/// A file within the torrent payload.
///
/// The concatenation of all files, in order, forms the logical byte stream
/// that pieces are cut from.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Path relative to the torrent root directory.
    pub path: PathBuf,
    /// File length in bytes.
    pub length: u64,
    /// Byte offset of this file within the logical stream.
    pub offset: u64,
}

/// A parsed torrent descriptor.
///
/// Immutable input to the engine: identifies the torrent (info hash), the
/// piece geometry, the backing file set, and where to find peers.
#[derive(Debug, Clone)]
pub struct TorrentDescriptor {
    /// Suggested name for the download directory (or single file).
    pub name: String,
    /// SHA-1 of the bencoded `info` dictionary.
    pub info_hash: [u8; 20],
    /// Bytes per piece, for every piece except possibly the last.
    pub piece_length: u64,
    /// SHA-1 hash of each piece.
    pub piece_hashes: Vec<[u8; 20]>,
    /// Ordered file list; offsets precomputed.
    pub files: Vec<FileEntry>,
    /// Sum of all file lengths.
    pub total_length: u64,
    /// Primary announce URL.
    pub announce: Option<String>,
    /// Flattened announce-list tiers, order preserved.
    pub announce_list: Vec<String>,
    /// Web seed base URLs (`url-list`, BEP-19).
    pub web_seeds: Vec<String>,
}

impl TorrentDescriptor {
    /// Parses a `.torrent` file.
    ///
    /// # Errors
    ///
    /// Fails on invalid bencode, missing or ill-typed required fields, a
    /// `pieces` string that is not a multiple of 20 bytes, and torrents
    /// with no payload bytes or no pieces.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let root = decode(data)?;
        let info = root
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;

        let info_hash = {
            let raw = encode(info);
            let digest = Sha1::digest(&raw);
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&digest);
            hash
        };

        let name = info
            .get(b"name")
            .and_then(Value::as_str)
            .ok_or(MetainfoError::MissingField("name"))?
            .to_string();

        let piece_length = info
            .get(b"piece length")
            .and_then(Value::as_int)
            .filter(|&n| n > 0)
            .ok_or(MetainfoError::InvalidField("piece length"))? as u64;

        let piece_hashes = parse_piece_hashes(
            info.get(b"pieces")
                .and_then(Value::as_bytes)
                .ok_or(MetainfoError::MissingField("pieces"))?,
        )?;

        let files = parse_files(info, &name)?;
        let total_length: u64 = files.iter().map(|f| f.length).sum();
        if total_length == 0 || piece_hashes.is_empty() {
            return Err(MetainfoError::EmptyPayload);
        }

        let expected_pieces = total_length.div_ceil(piece_length) as usize;
        if piece_hashes.len() != expected_pieces {
            return Err(MetainfoError::InvalidField("pieces"));
        }

        let announce = root
            .get(b"announce")
            .and_then(Value::as_str)
            .map(String::from);

        let announce_list = root
            .get(b"announce-list")
            .and_then(Value::as_list)
            .map(|tiers| {
                tiers
                    .iter()
                    .filter_map(Value::as_list)
                    .flatten()
                    .filter_map(|u| u.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        // url-list may be a single string or a list of strings
        let web_seeds = match root.get(b"url-list") {
            Some(Value::Bytes(_)) => root
                .get(b"url-list")
                .and_then(Value::as_str)
                .map(|s| vec![s.to_string()])
                .unwrap_or_default(),
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|u| u.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            name,
            info_hash,
            piece_length,
            piece_hashes,
            files,
            total_length,
            announce,
            announce_list,
            web_seeds,
        })
    }

    /// Number of pieces in the torrent.
    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Logical length of piece `index`; only the last piece may be short.
    pub fn piece_length_of(&self, index: u32) -> u32 {
        let full = self.piece_length * (self.num_pieces() as u64 - 1);
        if index as usize + 1 == self.num_pieces() {
            (self.total_length - full) as u32
        } else {
            self.piece_length as u32
        }
    }

    /// Every announce URL: primary first, then the flattened announce-list.
    pub fn announce_urls(&self) -> impl Iterator<Item = &str> {
        self.announce
            .as_deref()
            .into_iter()
            .chain(self.announce_list.iter().map(String::as_str))
    }
}

fn parse_piece_hashes(raw: &Bytes) -> Result<Vec<[u8; 20]>, MetainfoError> {
    if raw.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }
    Ok(raw
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn parse_files(info: &Value, name: &str) -> Result<Vec<FileEntry>, MetainfoError> {
    // single-file form: a top-level `length`
    if let Some(length) = info.get(b"length").and_then(Value::as_int) {
        if length < 0 {
            return Err(MetainfoError::InvalidField("length"));
        }
        return Ok(vec![FileEntry {
            path: PathBuf::from(name),
            length: length as u64,
            offset: 0,
        }]);
    }

    let list = info
        .get(b"files")
        .and_then(Value::as_list)
        .ok_or(MetainfoError::MissingField("files"))?;
    if list.is_empty() {
        return Err(MetainfoError::InvalidField("files"));
    }

    let mut files = Vec::with_capacity(list.len());
    let mut offset = 0u64;
    for entry in list {
        let length = entry
            .get(b"length")
            .and_then(Value::as_int)
            .filter(|&n| n >= 0)
            .ok_or(MetainfoError::InvalidField("files.length"))? as u64;

        let components = entry
            .get(b"path")
            .and_then(Value::as_list)
            .ok_or(MetainfoError::InvalidField("files.path"))?;
        let mut path = PathBuf::new();
        for part in components {
            let part = part
                .as_str()
                .ok_or(MetainfoError::InvalidField("files.path"))?;
            path.push(part);
        }
        if path.as_os_str().is_empty() {
            return Err(MetainfoError::InvalidField("files.path"));
        }

        files.push(FileEntry {
            path,
            length,
            offset,
        });
        offset += length;
    }
    Ok(files)
}
