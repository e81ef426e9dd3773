//! Request Scheduler / Refill (§4.3).

use tracing::trace;

use crate::addr::AddrKey;
use crate::block::{block_len, num_blocks, BlockRequest, PartialPiece};
use crate::peer::Peer;
use crate::rng::Rng;
use crate::torrent::TorrentContext;
use crate::traits::{AddRequestResult, WebseedAddResult};

/// A piece eligible for this refill pass, with the sort keys from §4.3
/// precomputed so ordering is a single cheap comparison.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    piece: usize,
    priority: crate::torrent::Priority,
    pending: u32,
    missing: usize,
    rarity: usize,
    tie: u32,
}

impl Candidate {
    fn key(&self) -> (std::cmp::Reverse<crate::torrent::Priority>, u32, usize, usize, u32) {
        (
            std::cmp::Reverse(self.priority),
            self.pending,
            self.missing,
            self.rarity,
            self.tie,
        )
    }
}

/// Build the piece ordering for one refill pass (§4.3 "Piece ordering").
fn order_pieces(t: &TorrentContext, rng: &mut Rng) -> Vec<usize> {
    let mut candidates = Vec::new();
    for piece in 0..t.num_pieces {
        if !t.wanted[piece] || t.have[piece] {
            continue;
        }
        let missing = match t.partial.get(&piece) {
            Some(p) => p.missing_count(),
            None => num_blocks(t.piece_len_of(piece)),
        };
        let rarity = t
            .registry
            .peers()
            .filter(|(_, p)| !p.client_choked && p.peer_interested && p.has_piece(piece))
            .count();
        candidates.push(Candidate {
            piece,
            priority: t.priority[piece],
            pending: t.pending_count[piece],
            missing,
            rarity,
            tie: rng.gen_range(0..u32::MAX as usize) as u32,
        });
    }
    candidates.sort_by_key(|c| c.key());
    candidates.into_iter().map(|c| c.piece).collect()
}

/// A block not yet fully requested, paired with the piece it belongs to.
struct MissingBlock {
    piece: usize,
    block_idx: usize,
}

fn missing_blocks_for(t: &TorrentContext, piece: usize) -> Vec<MissingBlock> {
    let total = num_blocks(t.piece_len_of(piece));
    match t.partial.get(&piece) {
        Some(p) => (0..total)
            .filter(|&b| !p.done[b])
            .map(|block_idx| MissingBlock { piece, block_idx })
            .collect(),
        None => (0..total).map(|block_idx| MissingBlock { piece, block_idx }).collect(),
    }
}

/// Run one refill pass: order wanted pieces, then greedily assign every
/// missing block to the first eligible peer (round-robin from a random
/// start) or, failing that, the first eligible webseed (§4.3 "Block
/// assignment").
pub fn refill(t: &mut TorrentContext, rng: &mut Rng) {
    if t.is_complete() {
        return;
    }

    let ordering = order_pieces(t, rng);
    trace!(candidates = ordering.len(), "refill pass starting");

    let peer_keys: Vec<AddrKey> = t.registry.peers().map(|(k, _)| *k).collect();
    if peer_keys.is_empty() && t.webseeds.is_empty() {
        return;
    }
    let mut full = vec![false; peer_keys.len()];
    let mut webseeds_full = vec![false; t.webseeds.len()];
    let start = if peer_keys.is_empty() { 0 } else { rng.gen_range(0..peer_keys.len()) };

    'pieces: for piece in ordering {
        for mb in missing_blocks_for(t, piece) {
            let piece_len = t.piece_len_of(mb.piece);
            let offset = mb.block_idx * crate::BLOCK_SIZE;
            let len = block_len(piece_len, mb.block_idx);

            let mut assigned = false;
            if !peer_keys.is_empty() {
                for step in 0..peer_keys.len() {
                    let idx = (start + step) % peer_keys.len();
                    if full[idx] {
                        continue;
                    }
                    let key = peer_keys[idx];
                    if let Some(peer) = t.registry.find_peer_mut(key) {
                        if peer.pending.iter().any(|r| r.piece == mb.piece && r.offset == offset) {
                            continue;
                        }
                        match request_from_peer(peer, mb.piece, offset, len) {
                            AddRequestResult::Ok => {
                                record_pending(t, mb.piece, piece_len);
                                assigned = true;
                                break;
                            }
                            AddRequestResult::Full | AddRequestResult::ClientChoked => {
                                full[idx] = true;
                            }
                            AddRequestResult::Missing | AddRequestResult::Duplicate => {}
                        }
                    }
                }
            }

            if !assigned {
                for (i, slot) in t.webseeds.iter_mut().enumerate() {
                    if webseeds_full[i] {
                        continue;
                    }
                    match slot.conn.add_request(mb.piece, offset, len) {
                        WebseedAddResult::Ok => {
                            assigned = true;
                            break;
                        }
                        WebseedAddResult::Full => webseeds_full[i] = true,
                    }
                }
            }

            if !assigned && full.iter().all(|&f| f) && webseeds_full.iter().all(|&f| f) {
                break 'pieces;
            }
        }
    }
}

fn request_from_peer(peer: &mut Peer, piece: usize, offset: usize, len: usize) -> AddRequestResult {
    let result = peer.add_request(piece, offset, len);
    if result == AddRequestResult::Ok {
        peer.pending.push(BlockRequest { piece, offset, len });
    }
    result
}

fn record_pending(t: &mut TorrentContext, piece: usize, piece_len: usize) {
    t.pending_count[piece] += 1;
    t.partial.entry(piece).or_insert_with(|| PartialPiece::new(piece, piece_len));
}
