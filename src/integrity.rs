//! Piece Integrity & Bandwidth Pulse (§4.6).

use std::net::Ipv4Addr;
use std::time::Instant;

use tracing::{error, trace, warn};

use crate::addr::AddrKey;
use crate::block::PartialPiece;
use crate::config::Config;
use crate::error::{LocalError, PeerFailure};
use crate::peer::Event;
use crate::torrent::{TorrentContext, TorrentError};

/// Outcome of handling a `PeerGotBlock` event, for the manager to react to
/// (e.g. surfacing the result to a tracker/UI layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceOutcome {
    /// The piece is not yet complete; nothing further to do.
    Incomplete,
    /// The piece hashed correctly and was marked acquired.
    Verified,
    /// The piece hash failed; it was cleared and blame assigned.
    Corrupt,
}

/// Handle `PeerGotBlock(piece, offset, length)` from `from` (§4.6 steps 1-4).
pub fn on_got_block(
    t: &mut TorrentContext,
    cfg: &Config,
    from: AddrKey,
    piece: usize,
    offset: usize,
    length: usize,
) -> PieceOutcome {
    let block_idx = offset / crate::BLOCK_SIZE;
    let piece_len = t.piece_len_of(piece);

    let partial = t
        .partial
        .entry(piece)
        .or_insert_with(|| PartialPiece::new(piece, piece_len));
    partial.mark_done(block_idx);

    if t.pending_count[piece] > 0 {
        t.pending_count[piece] -= 1;
    }

    t.blame.entry(piece).or_default().push(from);

    let complete = t.partial.get(&piece).map(|p| p.is_complete()).unwrap_or(false);

    for (_, peer) in t.registry.peers_mut() {
        peer.remove_pending(piece, offset);
        peer.messages.cancel(piece, offset, length);
    }

    if !complete {
        return PieceOutcome::Incomplete;
    }

    let ok = t.storage.test_piece(piece);
    t.partial.remove(&piece);

    if ok {
        trace!(piece, "piece hash verified");
        t.have.set(piece, true);
        for (_, peer) in t.registry.peers_mut() {
            peer.messages.have(piece);
        }
        t.blame.remove(&piece);
        PieceOutcome::Verified
    } else {
        let piece_bytes = piece_len as u64;
        warn!(piece, piece_bytes, "piece failed hash check, assigning blame");
        t.corrupt_ever += piece_bytes;
        t.downloaded_ever = t.downloaded_ever.saturating_sub(piece_bytes);
        t.have.set(piece, false);

        if let Some(contributors) = t.blame.remove(&piece) {
            for key in contributors {
                let mut should_ban = false;
                if let Some(peer) = t.registry.find_peer_mut(key) {
                    peer.strikes += 1;
                    should_ban = peer.strikes >= cfg.max_bad_pieces_per_peer;
                }
                if should_ban {
                    warn!(piece, "peer banned after repeated corrupt pieces");
                    if let Some(atom) = t.registry.find_atom_mut(Ipv4Addr::from(key)) {
                        atom.banned = true;
                    }
                    t.purge_queue.push(key);
                }
            }
        }
        PieceOutcome::Corrupt
    }
}

/// Handle `CanceledRequest(piece, offset, len)` from `from` (§4.3 "pending
/// count invariant": decremented exactly once per block on either a
/// `PeerGotBlock` or a `CanceledRequest` event).
pub fn on_canceled_request(t: &mut TorrentContext, from: AddrKey, piece: usize, offset: usize) {
    if t.pending_count[piece] > 0 {
        t.pending_count[piece] -= 1;
    }
    if let Some(peer) = t.registry.find_peer_mut(from) {
        peer.remove_pending(piece, offset);
    }
}

/// Dispatch one [`Event`] from `from` to the appropriate reaction (§6
/// "Events (produced)"). Returns whether the refill timer should be armed
/// (§4.3 trigger (a)): `true` only the first time a `NeedRequests` arrives
/// with no timer already running, so bursts of `NeedRequests` coalesce onto
/// a single one-shot timer; the caller (the async harness) is responsible
/// for actually scheduling that timer and for clearing `refill_armed` when
/// it fires via [`crate::manager::Manager::refill`].
pub fn handle_event(t: &mut TorrentContext, cfg: &Config, from: AddrKey, event: Event) -> bool {
    match event {
        Event::NeedRequests => {
            if t.refill_armed {
                return false;
            }
            t.refill_armed = true;
            return true;
        }
        Event::CanceledRequest { piece, offset, .. } => {
            on_canceled_request(t, from, piece, offset);
        }
        Event::DataSentToPeer { length, was_piece_data } => {
            if let Some(peer) = t.registry.find_peer_mut(from) {
                peer.upload_counter.add(length as u64);
            }
            if was_piece_data {
                if let Some(atom) = t.registry.find_atom_mut(Ipv4Addr::from(from)) {
                    atom.piece_data_time = Some(Instant::now());
                }
            }
        }
        Event::DataReceivedFromPeer { length, was_piece_data } => {
            if let Some(peer) = t.registry.find_peer_mut(from) {
                peer.download_counter.add(length as u64);
            }
            if was_piece_data {
                if let Some(atom) = t.registry.find_atom_mut(Ipv4Addr::from(from)) {
                    atom.piece_data_time = Some(Instant::now());
                }
                t.downloaded_ever += length as u64;
            }
        }
        Event::PeerProgress(fraction) => {
            if let Some(peer) = t.registry.find_peer_mut(from) {
                peer.progress = fraction;
                if fraction >= 1.0 {
                    peer.is_seed = true;
                }
            }
        }
        Event::PeerGotBlock { piece, offset, length } => {
            on_got_block(t, cfg, from, piece, offset, length);
        }
        Event::PeerSuggestsPiece { piece, fast_allowed } => {
            trace!(piece, fast_allowed, "peer suggested a piece");
        }
        Event::PeerDeclaresUploadOnly(upload_only) => {
            if let Some(peer) = t.registry.find_peer_mut(from) {
                peer.upload_only = upload_only;
            }
        }
        Event::PeerError(kind) => {
            on_peer_error(t, from, kind);
        }
    }
    false
}

/// Handle `PeerError(kind)` (§7).
pub fn on_peer_error(t: &mut TorrentContext, from: AddrKey, kind: PeerFailure) {
    match kind {
        PeerFailure::InvalidArgument => {
            if let Some(peer) = t.registry.find_peer_mut(from) {
                peer.strikes += 1;
            }
            t.purge_queue.push(from);
        }
        PeerFailure::OutOfRange | PeerFailure::MessageTooLarge | PeerFailure::NotConnected => {
            t.purge_queue.push(from);
        }
    }
}

/// Record a local (disk) error and stop the torrent (§7 "Local I/O").
pub fn on_local_error(t: &mut TorrentContext, err: LocalError) {
    error!(message = %err, "local I/O error, stopping torrent");
    t.error = Some(TorrentError { message: err.0 });
    t.stop();
}

/// Drain the purge queue, removing each flagged peer from the registry.
/// Called once per bandwidth pulse, after blame/error handling for the
/// pulse has settled.
pub fn drain_purge_queue(t: &mut TorrentContext) {
    let queue = std::mem::take(&mut t.purge_queue);
    for key in queue {
        t.registry.remove_peer(key);
        if t.optimistic_peer == Some(key) {
            t.optimistic_peer = None;
        }
    }
}

/// The bandwidth pulse (§4.6, process-global): flush all peers' messages
/// layers and roll each peer's rolling rates forward one round (§4.4
/// "scored by current upload rate"). Bandwidth-tree allocation itself lives
/// in the I/O layer and is out of scope; draining finished handshakes is the
/// manager's job (§4.2 step 6) since that collection is manager-wide, not
/// per-torrent.
pub fn bandwidth_pulse(t: &mut TorrentContext, cfg: &Config) {
    let period_secs = cfg.bandwidth_period.as_secs_f64().max(f64::EPSILON);
    for (_, peer) in t.registry.peers_mut() {
        peer.messages.flush();
        peer.upload_counter.reset();
        peer.download_counter.reset();
        peer.upload_rate = peer.upload_counter.avg() as f64 / period_secs;
        peer.download_rate = peer.download_counter.avg() as f64 / period_secs;
    }
    drain_purge_queue(t);
}
