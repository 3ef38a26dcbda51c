//! Rarest-first request scheduling.
//!
//! The scheduler tracks how many connected peers claim each piece and keeps
//! non-complete pieces bucketed by that availability. Picking work for a
//! peer walks the buckets from the rarest upward and reserves the lowest
//! unrequested block through the assembler's bitmaps, so duplicate requests
//! are suppressed without any per-piece locking: two peers may legitimately
//! work different blocks of the same piece.

use std::collections::{BTreeMap, BTreeSet};

use crate::peer::Bitfield;
use crate::piece::PieceAssembler;

/// A block chosen for a specific peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub piece: u32,
    pub begin: u32,
    pub length: u32,
}

/// Chooses which block to request from which peer.
pub struct Scheduler {
    /// Connected peers claiming each piece.
    availability: Vec<u32>,
    /// availability -> pieces at that availability, non-`Have` pieces only.
    buckets: BTreeMap<u32, BTreeSet<u32>>,
    /// Pieces retired from scheduling (verified complete).
    done: Vec<bool>,
}

impl Scheduler {
    pub fn new(num_pieces: usize) -> Self {
        let mut buckets = BTreeMap::new();
        buckets.insert(0, (0..num_pieces as u32).collect::<BTreeSet<_>>());
        Self {
            availability: vec![0; num_pieces],
            buckets,
            done: vec![false; num_pieces],
        }
    }

    pub fn availability(&self, piece: u32) -> u32 {
        self.availability[piece as usize]
    }

    /// A peer announced its full bitfield.
    pub fn peer_bitfield_added(&mut self, bitfield: &Bitfield) {
        for piece in bitfield.set_indices() {
            self.bump(piece, 1);
        }
    }

    /// A peer announced one more piece (`Have`).
    pub fn peer_has(&mut self, piece: u32) {
        self.bump(piece, 1);
    }

    /// A peer went away with this claimed bitfield.
    pub fn peer_removed(&mut self, bitfield: &Bitfield) {
        for piece in bitfield.set_indices() {
            self.bump(piece, -1);
        }
    }

    /// A piece verified; stop scheduling it.
    pub fn piece_completed(&mut self, piece: u32) {
        if !std::mem::replace(&mut self.done[piece as usize], true) {
            self.bucket_remove(self.availability[piece as usize], piece);
        }
    }

    /// Picks the next block to request from a peer with the given claimed
    /// bitfield: rarest piece first, lowest unrequested block within it.
    /// Reserves the block in the assembler before returning.
    pub fn next_request_for_peer(
        &mut self,
        assembler: &mut PieceAssembler,
        peer_bitfield: &Bitfield,
    ) -> Option<BlockRequest> {
        for pieces in self.buckets.values() {
            for &piece in pieces {
                if !peer_bitfield.has(piece) || assembler.have_piece(piece) {
                    continue;
                }
                if let Some((begin, length)) = assembler.next_unrequested_block(piece) {
                    return Some(BlockRequest {
                        piece,
                        begin,
                        length,
                    });
                }
            }
        }
        None
    }

    fn bump(&mut self, piece: u32, delta: i64) {
        let old = self.availability[piece as usize];
        let new = (i64::from(old) + delta).max(0) as u32;
        if new == old {
            return;
        }
        self.availability[piece as usize] = new;
        if !self.done[piece as usize] {
            self.bucket_remove(old, piece);
            self.buckets.entry(new).or_default().insert(piece);
        }
    }

    fn bucket_remove(&mut self, availability: u32, piece: u32) {
        if let Some(set) = self.buckets.get_mut(&availability) {
            set.remove(&piece);
            if set.is_empty() && availability != 0 {
                self.buckets.remove(&availability);
            }
        }
    }
}
