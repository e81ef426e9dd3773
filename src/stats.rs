//! Statistics (§6 "Statistics (exposed)") and the §11 supplemented queries
//! grounded on `tr_peerMgrTorrentAvailability`, `tr_peerMgrGetAvailable`,
//! `tr_peerMgrHasConnections`, `tr_peerMgrWebSpeeds` and
//! `tr_peerMgrPeerIsSeed`.

use bitvec::vec::BitVec;

use crate::atom::Provenance;
use crate::torrent::TorrentContext;

#[derive(Debug, Clone, Default)]
pub struct TorrentStats {
    pub known_peers: usize,
    pub connected_peers: usize,
    pub seed_peers: usize,
    pub webseeds_sending_to_us: usize,
    pub peers_sending_to_us: usize,
    pub peers_we_are_sending_to: usize,
    pub peers_from_incoming: usize,
    pub peers_from_tracker: usize,
    pub peers_from_cache: usize,
    pub peers_from_pex: usize,
}

/// Snapshot the per-torrent counters (§6 "Statistics (exposed)" "Per torrent").
pub fn torrent_stats(t: &TorrentContext) -> TorrentStats {
    let mut s = TorrentStats {
        known_peers: t.registry.atom_count(),
        connected_peers: t.registry.peer_count(),
        ..Default::default()
    };

    for (_, peer) in t.registry.peers() {
        if peer.is_seed {
            s.seed_peers += 1;
        }
        if peer.download_rate > 0.0 {
            s.peers_sending_to_us += 1;
        }
        if !peer.peer_choked && peer.upload_rate > 0.0 {
            s.peers_we_are_sending_to += 1;
        }
    }
    for slot in &t.webseeds {
        if slot.conn.is_active() && slot.conn.speed().map(|sp| sp > 0.0).unwrap_or(false) {
            s.webseeds_sending_to_us += 1;
        }
    }
    for (_, atom) in t.registry.atoms() {
        match atom.provenance {
            Provenance::Incoming => s.peers_from_incoming += 1,
            Provenance::Tracker => s.peers_from_tracker += 1,
            Provenance::Cache => s.peers_from_cache += 1,
            Provenance::Pex => s.peers_from_pex += 1,
        }
    }
    s
}

/// Per-peer flag string (§6 "Per peer"): `O` optimistic, `D`/`d`
/// downloading-from/interested, `U`/`u` uploading-to/peer-interested, `K`
/// client neither choked nor interested, `?` peer neither choked nor
/// interested, `E` encrypted, `X` from PEX, `I` incoming.
pub fn peer_flags(peer: &crate::peer::Peer, provenance: Provenance) -> String {
    let mut s = String::new();
    if peer.is_optimistic_unchoke {
        s.push('O');
    }
    if !peer.client_choked && peer.download_rate > 0.0 {
        s.push('D');
    } else if peer.client_interested {
        s.push('d');
    }
    if !peer.peer_choked && peer.upload_rate > 0.0 {
        s.push('U');
    } else if peer.peer_interested {
        s.push('u');
    }
    if peer.client_choked && !peer.client_interested {
        s.push('K');
    }
    if peer.peer_choked && !peer.peer_interested {
        s.push('?');
    }
    if peer.encrypted {
        s.push('E');
    }
    if provenance == Provenance::Pex {
        s.push('X');
    }
    if peer.incoming {
        s.push('I');
    }
    s
}

/// Per-piece availability, bucketed to a requested table width
/// (`tr_peerMgrTorrentAvailability`, §11): for each of `width` buckets,
/// report `-1` if we're complete/seeding already, otherwise the count of
/// connected peers that have the piece at that bucket's representative
/// index. `width` is clamped to `num_pieces` (one bucket per piece at most).
pub fn piece_availability(t: &TorrentContext, width: usize) -> Vec<i8> {
    if t.num_pieces == 0 || width == 0 {
        return Vec::new();
    }
    let width = width.min(t.num_pieces);
    let mut out = Vec::with_capacity(width);
    for bucket in 0..width {
        let piece = bucket * t.num_pieces / width;
        if t.is_complete() || t.have[piece] {
            out.push(-1);
            continue;
        }
        let count = t
            .registry
            .peers()
            .filter(|(_, peer)| peer.has_piece(piece))
            .count();
        out.push(count.min(i8::MAX as usize) as i8);
    }
    out
}

/// Union of every connected peer's `have` bitfield (`tr_peerMgrGetAvailable`).
pub fn available_pieces(t: &TorrentContext) -> BitVec {
    let mut union = BitVec::repeat(false, t.num_pieces);
    for (_, peer) in t.registry.peers() {
        union |= &peer.have;
    }
    union
}

/// True iff the torrent has at least one live connection, peer or webseed
/// (`tr_peerMgrHasConnections`).
pub fn has_connections(t: &TorrentContext) -> bool {
    t.registry.peer_count() > 0 || t.webseeds.iter().any(|w| w.conn.is_active())
}

/// Per-webseed instantaneous speed, in declaration order (`tr_peerMgrWebSpeeds`).
pub fn web_speeds(t: &TorrentContext) -> Vec<Option<f64>> {
    t.webseeds.iter().map(|w| w.conn.speed()).collect()
}

/// Whether the peer identified by `key` is a seed, by atom record
/// (`tr_peerMgrPeerIsSeed`): true if either the live peer's own `is_seed`
/// flag is set or its atom's external flags say so.
pub fn peer_is_seed(t: &TorrentContext, key: crate::addr::AddrKey) -> bool {
    if let Some(peer) = t.registry.find_peer(key) {
        if peer.is_seed {
            return true;
        }
    }
    t.registry
        .atoms()
        .find(|(k, _)| **k == key)
        .map(|(_, a)| a.is_seed())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::mock::{MockStorage, SharedMockMessages};
    use crate::peer::Peer;
    use crate::traits::ChannelId;

    use super::*;

    fn torrent_with_pieces(n: usize) -> TorrentContext {
        TorrentContext::new([0u8; 20], 16 * 1024, 16 * 1024, n, Box::new(MockStorage::default()))
    }

    #[test]
    fn piece_availability_reports_minus_one_for_complete_pieces() {
        let mut t = torrent_with_pieces(4);
        t.have.set(0, true);
        let avail = piece_availability(&t, 4);
        assert_eq!(avail[0], -1);
        assert_eq!(avail[1..], [0, 0, 0]);
    }

    #[test]
    fn piece_availability_counts_peers_that_have_the_bucket_piece() {
        let mut t = torrent_with_pieces(4);
        let addr = Ipv4Addr::new(10, 0, 0, 1);
        let key = crate::addr::addr_key(addr);
        let mut peer = Peer::new(key, ChannelId(0), false, 4, SharedMockMessages::new().boxed());
        peer.mark_have(1);
        t.registry.insert_peer(peer);

        let avail = piece_availability(&t, 4);
        assert_eq!(avail, vec![0, 1, 0, 0]);
    }

    #[test]
    fn piece_availability_clamps_width_to_piece_count() {
        let t = torrent_with_pieces(2);
        assert_eq!(piece_availability(&t, 10).len(), 2);
    }

    #[test]
    fn has_connections_is_false_with_no_peers_or_webseeds() {
        let t = torrent_with_pieces(1);
        assert!(!has_connections(&t));
    }

    #[test]
    fn peer_flags_reflects_optimistic_encrypted_and_pex_state() {
        let key = crate::addr::addr_key(Ipv4Addr::new(10, 0, 0, 1));
        let mut peer = Peer::new(key, ChannelId(0), true, 1, SharedMockMessages::new().boxed());
        peer.is_optimistic_unchoke = true;
        peer.encrypted = true;
        let flags = peer_flags(&peer, Provenance::Pex);
        assert!(flags.contains('O'));
        assert!(flags.contains('E'));
        assert!(flags.contains('X'));
        assert!(flags.contains('I'));
        assert!(flags.contains('?'));
    }
}
