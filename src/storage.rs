//! Disk storage: piece coordinates to file byte ranges.
//!
//! A torrent's payload is one logical byte stream cut into pieces; on disk
//! it is a list of files. [`Storage`] opens every backing file at
//! construction, precomputes the file spans of each piece and serves
//! positional reads and writes against them. All operations take `&self`:
//! positional I/O keeps no seek cursor, so concurrent block reads are safe.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::debug;

use crate::metainfo::TorrentDescriptor;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("read of piece {piece} at {begin}+{length} exceeds piece length")]
    OutOfRange { piece: u32, begin: u32, length: u32 },
}

/// A contiguous byte range within one backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Index into the torrent's file list.
    pub file: usize,
    /// Byte offset within that file.
    pub offset: u64,
    /// Length of the range.
    pub length: u64,
}

/// The torrent's backing files plus the piece-to-span mapping.
pub struct Storage {
    files: Vec<File>,
    /// Per piece, the ordered spans whose concatenation is the piece.
    piece_spans: Vec<Vec<Span>>,
    piece_lengths: Vec<u64>,
}

impl Storage {
    /// Opens (creating and sizing if absent) every file of the torrent
    /// under `<download_root>/<name>/<relative_path>`; absolute file paths
    /// are used verbatim. Fails if any file cannot be opened.
    pub fn new(torrent: &TorrentDescriptor, download_root: &Path) -> Result<Self, StorageError> {
        let base = download_root.join(&torrent.name);
        let mut files = Vec::with_capacity(torrent.files.len());
        for entry in &torrent.files {
            let path = if entry.path.is_absolute() {
                entry.path.clone()
            } else {
                base.join(&entry.path)
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| StorageError::Open {
                    path: path.clone(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| StorageError::Open {
                    path: path.clone(),
                    source,
                })?;
            file.set_len(entry.length).map_err(|source| StorageError::Open {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), length = entry.length, "opened backing file");
            files.push(file);
        }

        let piece_lengths: Vec<u64> = (0..torrent.num_pieces() as u32)
            .map(|i| u64::from(torrent.piece_length_of(i)))
            .collect();
        let piece_spans = build_piece_spans(torrent, &piece_lengths);

        Ok(Self {
            files,
            piece_spans,
            piece_lengths,
        })
    }

    /// Writes a whole verified piece across its spans.
    ///
    /// Not atomic across spans; a crash mid-write leaves the piece
    /// partially persisted, which a fresh start treats as missing.
    pub fn write_piece(&self, piece: u32, data: &[u8]) -> Result<(), StorageError> {
        let spans = self
            .piece_spans
            .get(piece as usize)
            .ok_or(StorageError::InvalidPieceIndex(piece))?;

        let mut cursor = 0usize;
        for span in spans {
            let end = cursor + span.length as usize;
            self.files[span.file].write_all_at(&data[cursor..end], span.offset)?;
            cursor = end;
        }
        Ok(())
    }

    /// Reads `length` bytes starting `begin` bytes into piece `piece`.
    ///
    /// Safe to call concurrently with other reads. The caller must not read
    /// a piece that is still being written; the session only serves pieces
    /// it already verified.
    pub fn read_block(&self, piece: u32, begin: u32, length: u32) -> Result<Bytes, StorageError> {
        let spans = self.spans_for(piece, begin, length)?;
        let mut out = BytesMut::with_capacity(length as usize);
        let mut buf = vec![0u8; 0];
        for span in spans {
            buf.resize(span.length as usize, 0);
            self.files[span.file].read_exact_at(&mut buf, span.offset)?;
            out.put_slice(&buf);
        }
        Ok(out.freeze())
    }

    /// The spans covering the sub-range `[begin, begin + length)` of a
    /// piece. Fails when the range exceeds the piece's logical length.
    pub fn spans_for(&self, piece: u32, begin: u32, length: u32) -> Result<Vec<Span>, StorageError> {
        let spans = self
            .piece_spans
            .get(piece as usize)
            .ok_or(StorageError::InvalidPieceIndex(piece))?;
        let piece_len = self.piece_lengths[piece as usize];
        if u64::from(begin) + u64::from(length) > piece_len {
            return Err(StorageError::OutOfRange {
                piece,
                begin,
                length,
            });
        }

        let mut skip = u64::from(begin);
        let mut take = u64::from(length);
        let mut out = Vec::new();
        for span in spans {
            if take == 0 {
                break;
            }
            if skip >= span.length {
                skip -= span.length;
                continue;
            }
            let avail = span.length - skip;
            let len = avail.min(take);
            out.push(Span {
                file: span.file,
                offset: span.offset + skip,
                length: len,
            });
            skip = 0;
            take -= len;
        }
        Ok(out)
    }
}

fn build_piece_spans(torrent: &TorrentDescriptor, piece_lengths: &[u64]) -> Vec<Vec<Span>> {
    let mut spans = Vec::with_capacity(piece_lengths.len());
    let mut file_idx = 0usize;
    let mut file_pos = 0u64;

    for &piece_len in piece_lengths {
        let mut piece = Vec::new();
        let mut remaining = piece_len;
        while remaining > 0 {
            let file = &torrent.files[file_idx];
            let avail = file.length - file_pos;
            if avail == 0 {
                // zero-length file, or the previous piece ended exactly here
                file_idx += 1;
                file_pos = 0;
                continue;
            }
            let len = avail.min(remaining);
            piece.push(Span {
                file: file_idx,
                offset: file_pos,
                length: len,
            });
            file_pos += len;
            remaining -= len;
        }
        spans.push(piece);
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::FileEntry;
    use tempfile::TempDir;

    fn two_file_descriptor() -> TorrentDescriptor {
        // files [a:100, b:200], piece_length 128 -> pieces of 128, 128, 44
        TorrentDescriptor {
            name: "demo".into(),
            info_hash: [0; 20],
            piece_length: 128,
            piece_hashes: vec![[0; 20]; 3],
            files: vec![
                FileEntry {
                    path: "a".into(),
                    length: 100,
                    offset: 0,
                },
                FileEntry {
                    path: "b".into(),
                    length: 200,
                    offset: 100,
                },
            ],
            total_length: 300,
            announce: None,
            announce_list: Vec::new(),
            web_seeds: Vec::new(),
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 17 % 256) as u8).collect()
    }

    #[test]
    fn test_two_file_piece_boundary_spans() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(&two_file_descriptor(), temp.path()).unwrap();

        let spans = storage.spans_for(0, 0, 128).unwrap();
        assert_eq!(
            spans,
            vec![
                Span {
                    file: 0,
                    offset: 0,
                    length: 100
                },
                Span {
                    file: 1,
                    offset: 0,
                    length: 28
                },
            ]
        );

        assert_eq!(
            storage.spans_for(1, 0, 128).unwrap(),
            vec![Span {
                file: 1,
                offset: 28,
                length: 128
            }]
        );
        assert_eq!(
            storage.spans_for(2, 0, 44).unwrap(),
            vec![Span {
                file: 1,
                offset: 156,
                length: 44
            }]
        );
    }

    #[test]
    fn test_read_block_across_boundary() {
        let temp = TempDir::new().unwrap();
        let t = two_file_descriptor();
        let storage = Storage::new(&t, temp.path()).unwrap();
        let data = payload(300);

        storage.write_piece(0, &data[0..128]).unwrap();
        storage.write_piece(1, &data[128..256]).unwrap();
        storage.write_piece(2, &data[256..300]).unwrap();

        // straddles the a/b boundary: a[96..100] + b[0..12]
        let block = storage.read_block(0, 96, 16).unwrap();
        assert_eq!(&block[..], &data[96..112]);
    }

    #[test]
    fn test_full_payload_round_trip() {
        let temp = TempDir::new().unwrap();
        let t = two_file_descriptor();
        let storage = Storage::new(&t, temp.path()).unwrap();
        let data = payload(300);

        storage.write_piece(0, &data[0..128]).unwrap();
        storage.write_piece(1, &data[128..256]).unwrap();
        storage.write_piece(2, &data[256..300]).unwrap();

        let mut read_back = Vec::new();
        for (i, len) in [(0u32, 128u32), (1, 128), (2, 44)] {
            read_back.extend_from_slice(&storage.read_block(i, 0, len).unwrap());
        }
        assert_eq!(read_back, data);

        // files landed under <root>/<name>/ with declared sizes
        let a = std::fs::read(temp.path().join("demo/a")).unwrap();
        let b = std::fs::read(temp.path().join("demo/b")).unwrap();
        assert_eq!(a, &data[..100]);
        assert_eq!(b, &data[100..]);
    }

    #[test]
    fn test_out_of_range_read_rejected() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(&two_file_descriptor(), temp.path()).unwrap();

        assert!(matches!(
            storage.read_block(2, 40, 8),
            Err(StorageError::OutOfRange { .. })
        ));
        assert!(matches!(
            storage.read_block(7, 0, 1),
            Err(StorageError::InvalidPieceIndex(7))
        ));
    }

    #[test]
    fn test_zero_length_file_contributes_no_span() {
        let temp = TempDir::new().unwrap();
        let t = TorrentDescriptor {
            name: "z".into(),
            info_hash: [0; 20],
            piece_length: 8,
            piece_hashes: vec![[0; 20]; 2],
            files: vec![
                FileEntry {
                    path: "one".into(),
                    length: 8,
                    offset: 0,
                },
                FileEntry {
                    path: "empty".into(),
                    length: 0,
                    offset: 8,
                },
                FileEntry {
                    path: "two".into(),
                    length: 4,
                    offset: 8,
                },
            ],
            total_length: 12,
            announce: None,
            announce_list: Vec::new(),
            web_seeds: Vec::new(),
        };
        let storage = Storage::new(&t, temp.path()).unwrap();

        let spans = storage.spans_for(1, 0, 4).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].file, 2);
        assert!(temp.path().join("z/empty").exists());
    }

    #[test]
    fn test_piece_straddling_three_files() {
        let temp = TempDir::new().unwrap();
        let t = TorrentDescriptor {
            name: "s".into(),
            info_hash: [0; 20],
            piece_length: 32,
            piece_hashes: vec![[0; 20]; 1],
            files: vec![
                FileEntry {
                    path: "p".into(),
                    length: 10,
                    offset: 0,
                },
                FileEntry {
                    path: "q".into(),
                    length: 10,
                    offset: 10,
                },
                FileEntry {
                    path: "r".into(),
                    length: 12,
                    offset: 20,
                },
            ],
            total_length: 32,
            announce: None,
            announce_list: Vec::new(),
            web_seeds: Vec::new(),
        };
        let storage = Storage::new(&t, temp.path()).unwrap();
        let data = payload(32);

        storage.write_piece(0, &data).unwrap();
        assert_eq!(storage.spans_for(0, 0, 32).unwrap().len(), 3);
        assert_eq!(&storage.read_block(0, 0, 32).unwrap()[..], &data[..]);
        assert_eq!(&storage.read_block(0, 8, 4).unwrap()[..], &data[8..12]);
    }
}
