//! Choking Controller / Rechoke (§4.4).

use tracing::debug;

use crate::addr::AddrKey;
use crate::config::Config;
use crate::rng::Rng;
use crate::torrent::TorrentContext;

/// How "new" a peer must be to count as new for the optimistic weighting.
const NEW_PEER_AGE_SECS: u64 = 45;

/// Run one rechoke pass. Grounded on `rechoke()`: seed/upload-only/global
/// choking first, then a rate sort with an interested-peer cap, then one
/// weighted optimistic slot.
pub fn rechoke(t: &mut TorrentContext, cfg: &Config, rng: &mut Rng) {
    let keys: Vec<AddrKey> = t.registry.peers().map(|(k, _)| *k).collect();

    if !t.upload_allowed {
        for key in &keys {
            if let Some(peer) = t.registry.find_peer_mut(*key) {
                set_choke(peer, true);
            }
        }
        t.optimistic_peer = None;
        return;
    }

    let mut chokeable = Vec::new();
    for key in &keys {
        let peer = t.registry.find_peer(*key).unwrap();
        let is_seed_peer = peer.is_seed;
        let upload_only = peer.upload_only;
        if is_seed_peer || upload_only {
            let peer = t.registry.find_peer_mut(*key).unwrap();
            set_choke(peer, true);
            continue;
        }
        chokeable.push(*key);
    }

    // Sort by upload rate descending; ties prefer currently-unchoked peers.
    chokeable.sort_by(|a, b| {
        let pa = t.registry.find_peer(*a).unwrap();
        let pb = t.registry.find_peer(*b).unwrap();
        pb.upload_rate
            .partial_cmp(&pa.upload_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| pa.peer_choked.cmp(&pb.peer_choked))
    });

    let mut interested_unchoked = 0u32;
    for key in &chokeable {
        let peer = t.registry.find_peer_mut(*key).unwrap();
        if peer.peer_interested {
            if interested_unchoked < cfg.max_unchoked_peers {
                set_choke(peer, false);
                interested_unchoked += 1;
            } else {
                set_choke(peer, true);
            }
        } else {
            // An uninterested peer never counts against the interested
            // cap but is still unchoked if its rate earned a slot, so it
            // can signal interest later (§4.4 step 4).
            set_choke(peer, false);
        }
    }

    // Optimistic slot: weighted draw among interested, currently-choked
    // peers (a peer already unchoked by the regular pass gains nothing
    // from also being the optimistic pick).
    let mut pool: Vec<(AddrKey, u32)> = Vec::new();
    for key in &chokeable {
        let peer = t.registry.find_peer(*key).unwrap();
        if !peer.peer_interested || !peer.peer_choked {
            continue;
        }
        let mut weight = 1u32;
        if peer.age_secs < NEW_PEER_AGE_SECS {
            weight *= 3;
        }
        if peer.same_client_family {
            weight *= 3;
        }
        pool.push((*key, weight));
    }

    t.optimistic_peer = pick_weighted(&pool, rng);
    if let Some(key) = t.optimistic_peer {
        if let Some(peer) = t.registry.find_peer_mut(key) {
            set_choke(peer, false);
            peer.is_optimistic_unchoke = true;
            debug!(client = %peer.client_id, "optimistic unchoke slot granted");
        }
    }
}

fn set_choke(peer: &mut crate::peer::Peer, choke: bool) {
    if peer.peer_choked != choke {
        peer.peer_choked = choke;
        peer.last_choke_change = std::time::Instant::now();
        peer.messages.set_choke(choke);
    }
    if choke {
        peer.is_optimistic_unchoke = false;
    }
}

fn pick_weighted(pool: &[(AddrKey, u32)], rng: &mut Rng) -> Option<AddrKey> {
    let total: u32 = pool.iter().map(|(_, w)| *w).sum();
    if total == 0 {
        return None;
    }
    let mut draw = rng.gen_range(0..total as usize) as u32;
    for (key, weight) in pool {
        if draw < *weight {
            return Some(*key);
        }
        draw -= weight;
    }
    None
}
