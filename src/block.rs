use bitvec::vec::BitVec;

use crate::BLOCK_SIZE;

/// A single outstanding (or just-delivered) block request, identified the
/// way the wire protocol identifies it: by piece, byte offset within the
/// piece, and length. Grounded on `bittorrent/src/block.rs`'s `BlockInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: usize,
    pub offset: usize,
    pub len: usize,
}

impl BlockRequest {
    #[inline]
    pub fn idx_in_piece(&self) -> usize {
        self.offset / BLOCK_SIZE
    }
}

/// Length in bytes of the block at `block_idx` within a piece of `piece_len` bytes.
pub fn block_len(piece_len: usize, block_idx: usize) -> usize {
    BLOCK_SIZE.min(piece_len - block_idx * BLOCK_SIZE)
}

/// Number of blocks a piece of `piece_len` bytes is divided into.
pub fn num_blocks(piece_len: usize) -> usize {
    (piece_len + BLOCK_SIZE - 1) / BLOCK_SIZE
}

/// Per-piece block completion bookkeeping for a piece that is not yet whole.
///
/// Only pieces with at least one requested or received block need one of
/// these; a piece nobody has touched yet is implicitly "all missing".
#[derive(Debug, Clone)]
pub struct PartialPiece {
    pub piece: usize,
    pub done: BitVec,
}

impl PartialPiece {
    pub fn new(piece: usize, piece_len: usize) -> Self {
        Self {
            piece,
            done: BitVec::repeat(false, num_blocks(piece_len)),
        }
    }

    pub fn missing_count(&self) -> usize {
        self.done.count_zeros()
    }

    pub fn mark_done(&mut self, block_idx: usize) {
        self.done.set(block_idx, true);
    }

    pub fn is_complete(&self) -> bool {
        self.done.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_len_accounts_for_short_last_block() {
        let normal_piece_len = 32_768;
        let last_piece_len = 24_930;
        assert_eq!(block_len(normal_piece_len, 0), 16_384);
        assert_eq!(block_len(normal_piece_len, 1), 16_384);
        assert_eq!(block_len(last_piece_len, 0), 16_384);
        assert_eq!(block_len(last_piece_len, 1), 8_546);
    }

    #[test]
    fn num_blocks_rounds_up() {
        assert_eq!(num_blocks(BLOCK_SIZE), 1);
        assert_eq!(num_blocks(BLOCK_SIZE + 1), 2);
        assert_eq!(num_blocks(BLOCK_SIZE * 5 + 1000), 6);
        assert_eq!(num_blocks(0), 0);
    }

    #[test]
    fn partial_piece_tracks_completion() {
        let mut p = PartialPiece::new(0, BLOCK_SIZE * 2);
        assert_eq!(p.missing_count(), 2);
        p.mark_done(0);
        assert!(!p.is_complete());
        p.mark_done(1);
        assert!(p.is_complete());
        assert_eq!(p.missing_count(), 0);
    }
}
