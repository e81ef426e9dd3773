//! Reconnect / Eviction Controller (§4.5).

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::addr::AddrKey;
use crate::atom::PeerAtom;
use crate::config::{reconnect_backoff_secs, Config};
use crate::torrent::TorrentContext;
use crate::traits::{Blocklist, IoReactor};

/// A throttle shared across all torrents for the per-second dial cap
/// (§4.5 "process-global throttles"); the per-pulse cap is per call.
pub struct GlobalThrottle {
    window_start: Instant,
    dialed_this_second: u32,
}

impl GlobalThrottle {
    pub fn new(now: Instant) -> Self {
        Self { window_start: now, dialed_this_second: 0 }
    }

    fn remaining(&mut self, now: Instant, max_per_second: u32) -> u32 {
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.dialed_this_second = 0;
        }
        max_per_second.saturating_sub(self.dialed_this_second)
    }

    fn record_dial(&mut self) {
        self.dialed_this_second += 1;
    }
}

/// §4.5 "Eviction": decide whether a live peer should be closed.
pub fn should_close_peer(
    purge_flagged: bool,
    seeding: bool,
    peer_is_seed_or_has_everything: bool,
    pex_enabled: bool,
    secs_since_atom_change: u64,
    idle_time: Duration,
    cfg: &Config,
    peer_count: usize,
    max_peer_count: usize,
) -> bool {
    if purge_flagged {
        return true;
    }
    if seeding
        && peer_is_seed_or_has_everything
        && (!pex_enabled || secs_since_atom_change >= 30)
    {
        return true;
    }
    idle_time > idle_limit(cfg, peer_count, max_peer_count)
}

/// `limit = MAX_UPLOAD_IDLE - (MAX_UPLOAD_IDLE - MIN_UPLOAD_IDLE) * strictness`
/// where `strictness = min(1, peerCount / (0.9 * maxPeerCount))` (§4.5).
pub fn idle_limit(cfg: &Config, peer_count: usize, max_peer_count: usize) -> Duration {
    let denom = 0.9 * max_peer_count as f64;
    let strictness = if denom <= 0.0 { 1.0 } else { (peer_count as f64 / denom).min(1.0) };
    let max = cfg.max_upload_idle.as_secs_f64();
    let min = cfg.min_upload_idle.as_secs_f64();
    Duration::from_secs_f64(max - (max - min) * strictness)
}

/// Called after a peer is evicted: adjust the atom's failure count and
/// timestamp (§4.5 "On eviction").
pub fn on_evicted(atom: &mut PeerAtom, now: Instant) {
    if atom.piece_data_time.is_some() {
        atom.num_fails = 0;
    } else {
        atom.num_fails += 1;
    }
    atom.time = now;
}

/// Whether `atom`'s backoff has elapsed, i.e. it is eligible to be dialed
/// again right now (§4.5 "Reconnect backoff").
pub fn backoff_elapsed(atom: &PeerAtom, now: Instant, min_reconnect_interval: Duration) -> bool {
    let required = if let Some(pdt) = atom.piece_data_time {
        if now.duration_since(pdt) <= min_reconnect_interval * 2 {
            min_reconnect_interval.as_secs()
        } else {
            reconnect_backoff_secs(atom.num_fails)
        }
    } else {
        reconnect_backoff_secs(atom.num_fails)
    };
    now.duration_since(atom.time) >= Duration::from_secs(required)
}

/// Build the sorted candidate list for dialing (§4.5 "Candidate selection").
/// `incoming_pending` is the manager-wide set of addresses with a pending
/// incoming handshake (§4.1 "is-in-use"), threaded in by the caller since
/// that bookkeeping lives above any single torrent.
pub fn select_candidates(
    t: &TorrentContext,
    blocklist: &dyn Blocklist,
    now: Instant,
    min_reconnect_interval: Duration,
    incoming_pending: &[Ipv4Addr],
) -> Vec<AddrKey> {
    let mut candidates: Vec<(AddrKey, &PeerAtom)> = t
        .registry
        .atoms()
        .filter(|(key, atom)| {
            !atom.banned
                && !atom.unreachable
                && !t.is_addr_in_use(atom.addr, incoming_pending)
                && !blocklist.is_blocked(atom.addr)
                && backoff_elapsed(atom, now, min_reconnect_interval)
                && !both_seeds(t, **key, atom)
        })
        .map(|(k, a)| (*k, a))
        .collect();

    candidates.sort_by(|(_, a), (_, b)| {
        b.piece_data_time
            .cmp(&a.piece_data_time)
            .then_with(|| a.num_fails.cmp(&b.num_fails))
            .then_with(|| a.time.cmp(&b.time))
            .then_with(|| a.provenance.cmp(&b.provenance))
    });

    candidates.into_iter().map(|(k, _)| k).collect()
}

fn both_seeds(t: &TorrentContext, _key: AddrKey, atom: &PeerAtom) -> bool {
    t.seeding && atom.is_seed()
}

/// Refresh each live peer's connection age and encryption flag from the I/O
/// reactor (§3 Peer "age... refreshed by the I/O reactor"), used by the
/// rechoke optimistic-unchoke "new peer" bonus (§4.4).
fn refresh_peer_liveness(t: &mut TorrentContext, io: &dyn IoReactor) {
    for (_, peer) in t.registry.peers_mut() {
        peer.age_secs = io.age_secs(peer.channel);
        peer.encrypted = io.is_encrypted(peer.channel);
    }
}

/// Dial outgoing connections to the best candidates, respecting the
/// pulse/second/torrent-peer caps (§4.5 "Dialing").
pub fn reconnect_pulse(
    t: &mut TorrentContext,
    cfg: &Config,
    io: &mut dyn IoReactor,
    blocklist: &dyn Blocklist,
    throttle: &mut GlobalThrottle,
    now: Instant,
    incoming_pending: &[Ipv4Addr],
) {
    if !t.running {
        return;
    }
    refresh_peer_liveness(t, io);
    let candidates = select_candidates(t, blocklist, now, cfg.minimum_reconnect_interval, incoming_pending);

    let mut dialed_this_pulse = 0u32;
    for key in candidates {
        if dialed_this_pulse >= cfg.max_reconnections_per_pulse {
            break;
        }
        if throttle.remaining(now, cfg.max_connections_per_second) == 0 {
            break;
        }
        if t.registry.peer_count() >= cfg.max_peers_per_torrent as usize {
            break;
        }

        let (addr, port) = {
            let atom = t.registry.atoms().find(|(k, _)| **k == key).map(|(_, a)| a).unwrap();
            (atom.addr, atom.port)
        };

        match io.new_outgoing(addr, port, t.info_hash) {
            Some(_channel) => {
                debug!(%addr, port, "dialing outgoing handshake");
                t.outgoing_handshakes.start(addr, port);
                dialed_this_pulse += 1;
                throttle.record_dial();
            }
            None => {
                warn!(%addr, port, "outgoing connection attempt could not be started");
                if let Some(atom) = t.registry.find_atom_mut(addr) {
                    atom.unreachable = true;
                }
            }
        }

        if let Some(atom) = t.registry.find_atom_mut(addr) {
            atom.time = now;
        }
    }
}
