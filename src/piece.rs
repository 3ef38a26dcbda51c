//! Piece assembly and verification.
//!
//! The [`PieceAssembler`] owns every in-progress piece buffer and the local
//! have-bitfield. Incoming blocks are validated, copied into place and
//! tracked in per-block bitmaps; a piece whose blocks are all present is
//! hashed, and either promoted to `Have` (firing the completion callback)
//! or thrown away on a hash mismatch.

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::metainfo::TorrentDescriptor;
use crate::peer::Bitfield;

/// Invoked on the event thread when a piece verifies: `(index, bytes)`.
pub type PieceCompleteCallback = Box<dyn FnMut(u32, &[u8])>;

/// Download status of a single piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStatus {
    /// No block received yet.
    Missing,
    /// At least one block received, buffer allocated.
    Downloading,
    /// Verified and (in memory) complete.
    Have,
}

#[derive(Debug)]
struct PieceSlot {
    status: PieceStatus,
    /// One bit per block; `requested` is a superset of `received`.
    requested: Vec<bool>,
    received: Vec<bool>,
    /// Exact-length scratch buffer, present only while `Downloading`
    /// (or once a request reserved a block).
    buffer: Option<Vec<u8>>,
}

impl PieceSlot {
    fn new(num_blocks: usize) -> Self {
        Self {
            status: PieceStatus::Missing,
            requested: vec![false; num_blocks],
            received: vec![false; num_blocks],
            buffer: None,
        }
    }

    fn all_received(&self) -> bool {
        self.received.iter().all(|&b| b)
    }
}

/// Tracks block arrival and verifies completed pieces.
pub struct PieceAssembler {
    piece_hashes: Vec<[u8; 20]>,
    piece_length: u64,
    total_length: u64,
    block_size: u32,
    slots: Vec<PieceSlot>,
    have: Bitfield,
    bytes_have: u64,
    on_complete: Option<PieceCompleteCallback>,
}

impl PieceAssembler {
    pub fn new(torrent: &TorrentDescriptor, block_size: u32) -> Self {
        assert!(block_size > 0);
        let num_pieces = torrent.num_pieces();
        let slots = (0..num_pieces as u32)
            .map(|i| {
                let blocks = torrent.piece_length_of(i).div_ceil(block_size) as usize;
                PieceSlot::new(blocks)
            })
            .collect();

        Self {
            piece_hashes: torrent.piece_hashes.clone(),
            piece_length: torrent.piece_length,
            total_length: torrent.total_length,
            block_size,
            slots,
            have: Bitfield::new(num_pieces),
            bytes_have: 0,
            on_complete: None,
        }
    }

    /// Registers the hook fired when a piece verifies.
    pub fn set_piece_complete_callback(&mut self, callback: PieceCompleteCallback) {
        self.on_complete = Some(callback);
    }

    pub fn num_pieces(&self) -> usize {
        self.slots.len()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn have_piece(&self, piece: u32) -> bool {
        self.have.has(piece)
    }

    pub fn have_bitfield(&self) -> &Bitfield {
        &self.have
    }

    pub fn is_complete(&self) -> bool {
        self.have.is_full()
    }

    /// Bytes not yet verified; the tracker's `left` parameter.
    pub fn bytes_remaining(&self) -> u64 {
        self.total_length - self.bytes_have
    }

    /// Logical length of piece `piece`.
    pub fn piece_length_of(&self, piece: u32) -> u32 {
        let full = self.piece_length * (self.slots.len() as u64 - 1);
        if piece as usize + 1 == self.slots.len() {
            (self.total_length - full) as u32
        } else {
            self.piece_length as u32
        }
    }

    /// Length of block `k` of piece `piece`: `block_size` unless truncated
    /// by the end of the piece.
    pub fn block_length(&self, piece: u32, block: usize) -> u32 {
        let piece_len = self.piece_length_of(piece);
        let begin = block as u32 * self.block_size;
        (piece_len - begin).min(self.block_size)
    }

    /// Reserves the lowest unrequested block of `piece`, allocating the
    /// piece buffer if there is none yet. Returns `(begin, length)`.
    pub fn next_unrequested_block(&mut self, piece: u32) -> Option<(u32, u32)> {
        if self.have.has(piece) {
            return None;
        }
        let piece_len = self.piece_length_of(piece) as usize;
        let block_size = self.block_size;
        let slot = &mut self.slots[piece as usize];
        let block = slot.requested.iter().position(|&r| !r)?;
        slot.requested[block] = true;
        slot.buffer.get_or_insert_with(|| vec![0; piece_len]);

        let begin = block as u32 * block_size;
        Some((begin, self.block_length(piece, block)))
    }

    /// Accepts one block. Returns `false` when the block is rejected:
    /// piece already `Have`, coordinates out of range, misaligned `begin`,
    /// wrong length for its block index, or a duplicate of a block already
    /// received.
    pub fn handle_block(&mut self, piece: u32, begin: u32, data: &[u8]) -> bool {
        if piece as usize >= self.slots.len() || self.have.has(piece) {
            return false;
        }
        let piece_len = self.piece_length_of(piece);
        if begin >= piece_len || begin % self.block_size != 0 {
            return false;
        }
        let block = (begin / self.block_size) as usize;
        let expected = self.block_length(piece, block) as usize;
        if u64::from(begin) + data.len() as u64 > u64::from(piece_len) || data.len() != expected {
            return false;
        }

        let piece_len = piece_len as usize;
        let slot = &mut self.slots[piece as usize];
        if slot.received[block] {
            return false;
        }

        let buffer = slot.buffer.get_or_insert_with(|| vec![0; piece_len]);
        buffer[begin as usize..begin as usize + data.len()].copy_from_slice(data);
        slot.received[block] = true;
        slot.requested[block] = true;
        slot.status = PieceStatus::Downloading;

        if slot.all_received() {
            self.finish_piece(piece);
        }
        true
    }

    /// Drops all progress on a piece: bitmaps cleared, buffer released.
    pub fn reset_piece(&mut self, piece: u32) {
        if let Some(slot) = self.slots.get_mut(piece as usize) {
            slot.status = PieceStatus::Missing;
            slot.requested.fill(false);
            slot.received.fill(false);
            slot.buffer = None;
        }
    }

    pub fn piece_status(&self, piece: u32) -> PieceStatus {
        self.slots[piece as usize].status
    }

    fn finish_piece(&mut self, piece: u32) {
        let slot = &mut self.slots[piece as usize];
        let buffer = slot.buffer.take().unwrap_or_default();

        let digest = Sha1::digest(&buffer);
        if digest[..] != self.piece_hashes[piece as usize] {
            warn!(piece, "piece failed hash verification, resetting");
            self.reset_piece(piece);
            return;
        }

        let slot = &mut self.slots[piece as usize];
        slot.status = PieceStatus::Have;
        slot.received.fill(true);
        slot.requested.fill(true);
        self.have.set(piece);
        self.bytes_have += buffer.len() as u64;
        debug!(piece, "piece verified");

        if let Some(callback) = self.on_complete.as_mut() {
            callback(piece, &buffer);
        }
    }

    #[cfg(test)]
    fn buffered(&self, piece: u32) -> Option<&[u8]> {
        self.slots[piece as usize].buffer.as_deref()
    }
}
