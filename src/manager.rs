//! The synchronous core (§5): one [`Manager`] per process, one
//! [`TorrentContext`] per active download. Every method here takes
//! `&mut self` and is meant to be called from behind a single lock (see
//! [`crate::handle::ManagerHandle`]) — nested calls within this module are
//! ordinary function calls, which is how Rust's ownership model satisfies
//! the reentrant-lock requirement without an actual recursive mutex.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use bitvec::vec::BitVec;
use tracing::{debug, info, instrument, warn};

use crate::atom::Provenance;
use crate::config::Config;
use crate::error::{LocalError, ManagerError, PeerFailure};
use crate::handshake::{self, Admission, Direction, Handshake};
use crate::integrity;
use crate::peer::{Event, Peer};
use crate::reconnect::{self, GlobalThrottle};
use crate::rng::Rng;
use crate::stats::TorrentStats;
use crate::torrent::TorrentContext;
use crate::traits::{Blocklist, ChannelId, IoReactor, Messages, NullBlocklist};

/// Hex-encoded info hash, for log lines. Grounded on the teacher's own
/// `hex::encode(&self.info_hash)` in `p2p/handshake.rs`'s `Debug` impl.
fn short_hash(info_hash: &[u8; 20]) -> String {
    hex::encode(&info_hash[..4])
}

/// Manager-wide bookkeeping (§3 "Handshake"): incoming handshakes not yet
/// matched to a torrent, and handshakes finished (in any direction) but
/// deferred to the next bandwidth pulse for destruction (§4.2 step 6, §5
/// "Destruction safety").
#[derive(Default)]
struct HandshakeBook {
    incoming: Vec<Handshake>,
    finished: Vec<Handshake>,
}

pub struct Manager {
    pub config: Config,
    torrents: HashMap<[u8; 20], TorrentContext>,
    handshakes: HandshakeBook,
    blocklist: Box<dyn Blocklist>,
    throttle: GlobalThrottle,
    rng: Rng,
}

impl Manager {
    pub fn new(config: Config, now: Instant) -> Self {
        Self {
            config,
            torrents: HashMap::new(),
            handshakes: HandshakeBook::default(),
            blocklist: Box::new(NullBlocklist),
            throttle: GlobalThrottle::new(now),
            rng: Rng::from_entropy(),
        }
    }

    pub fn set_blocklist(&mut self, blocklist: Box<dyn Blocklist>) {
        self.blocklist = blocklist;
    }

    pub fn add_torrent(&mut self, torrent: TorrentContext) -> Result<(), ManagerError> {
        if self.torrents.contains_key(&torrent.info_hash) {
            return Err(ManagerError::TorrentExists);
        }
        info!(hash = %short_hash(&torrent.info_hash), pieces = torrent.num_pieces, "torrent added");
        self.torrents.insert(torrent.info_hash, torrent);
        Ok(())
    }

    pub fn remove_torrent(&mut self, info_hash: [u8; 20]) -> Result<(), ManagerError> {
        let removed = self.torrents.remove(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        info!(hash = %short_hash(&removed.info_hash), "torrent removed");
        Ok(())
    }

    pub fn start_torrent(&mut self, info_hash: [u8; 20]) -> Result<(), ManagerError> {
        let t = self.torrents.get_mut(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        t.running = true;
        info!(hash = %short_hash(&info_hash), "torrent started");
        Ok(())
    }

    pub fn stop_torrent(&mut self, info_hash: [u8; 20]) -> Result<(), ManagerError> {
        let t = self.torrents.get_mut(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        t.stop();
        info!(hash = %short_hash(&info_hash), "torrent stopped");
        Ok(())
    }

    pub fn torrent(&self, info_hash: [u8; 20]) -> Option<&TorrentContext> {
        self.torrents.get(&info_hash)
    }

    pub fn torrent_mut(&mut self, info_hash: [u8; 20]) -> Option<&mut TorrentContext> {
        self.torrents.get_mut(&info_hash)
    }

    pub fn torrent_stats(&self, info_hash: [u8; 20]) -> Result<TorrentStats, ManagerError> {
        let t = self.torrents.get(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        Ok(crate::stats::torrent_stats(t))
    }

    /// §11 supplemented query, see [`crate::stats::piece_availability`].
    pub fn piece_availability(&self, info_hash: [u8; 20], width: usize) -> Result<Vec<i8>, ManagerError> {
        let t = self.torrents.get(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        Ok(crate::stats::piece_availability(t, width))
    }

    /// §11 supplemented query, see [`crate::stats::available_pieces`].
    pub fn available_pieces(&self, info_hash: [u8; 20]) -> Result<BitVec, ManagerError> {
        let t = self.torrents.get(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        Ok(crate::stats::available_pieces(t))
    }

    /// §11 supplemented query, see [`crate::stats::has_connections`].
    pub fn has_connections(&self, info_hash: [u8; 20]) -> Result<bool, ManagerError> {
        let t = self.torrents.get(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        Ok(crate::stats::has_connections(t))
    }

    /// §11 supplemented query, see [`crate::stats::web_speeds`].
    pub fn web_speeds(&self, info_hash: [u8; 20]) -> Result<Vec<Option<f64>>, ManagerError> {
        let t = self.torrents.get(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        Ok(crate::stats::web_speeds(t))
    }

    /// §11 supplemented query, see [`crate::stats::peer_is_seed`].
    pub fn peer_is_seed(&self, info_hash: [u8; 20], addr: Ipv4Addr) -> Result<bool, ManagerError> {
        let t = self.torrents.get(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        Ok(crate::stats::peer_is_seed(t, crate::addr::addr_key(addr)))
    }

    /// Reject blocked addresses at the entry point (§7 "Blocked address").
    pub fn add_incoming(&mut self, addr: Ipv4Addr, port: u16) -> Option<Handshake> {
        if self.blocklist.is_blocked(addr) {
            return None;
        }
        let handshake = Handshake { addr, port, direction: Direction::Incoming };
        self.handshakes.incoming.push(handshake.clone());
        Some(handshake)
    }

    /// §7 "Blocked address" and "Unknown torrent hash" both reject silently.
    pub fn add_pex(&mut self, info_hash: [u8; 20], addr: Ipv4Addr, port: u16, flags: u8) {
        if self.blocklist.is_blocked(addr) {
            return;
        }
        let Some(t) = self.torrents.get_mut(&info_hash) else { return };
        let now = Instant::now();
        let atom = t.registry.ensure_atom(addr, port, Provenance::Pex, now);
        atom.external = crate::atom::ExternalFlags::from_pex_byte(flags);
    }

    /// §4.2 `on_handshake_done`: resolve a finished handshake against the
    /// torrent it belongs to (if any) and apply the admission decision.
    #[instrument(skip(self, handshake, messages), fields(addr = %handshake.addr))]
    pub fn on_handshake_done(
        &mut self,
        info_hash: Option<[u8; 20]>,
        handshake: Handshake,
        connected: bool,
        channel: ChannelId,
        peer_id: Option<[u8; 20]>,
        encrypted: bool,
        messages: Box<dyn Messages>,
    ) -> Admission {
        let now = Instant::now();

        // Step 1: remove the handshake from its owning collection.
        match handshake.direction {
            Direction::Incoming => {
                self.handshakes.incoming.retain(|h| h.addr != handshake.addr);
            }
            Direction::Outgoing => {
                if let Some(hash) = info_hash {
                    if let Some(t) = self.torrents.get_mut(&hash) {
                        t.outgoing_handshakes.remove(handshake.addr);
                    }
                }
            }
        }

        let Some(hash) = info_hash else {
            self.handshakes.finished.push(handshake);
            return Admission::Failed;
        };
        let Some(t) = self.torrents.get_mut(&hash) else {
            self.handshakes.finished.push(handshake);
            return Admission::Failed;
        };

        if !connected || !t.running {
            if let Some(atom) = t.registry.find_atom_mut(handshake.addr) {
                atom.num_fails += 1;
            }
            debug!(connected, running = t.running, "handshake did not complete");
            self.handshakes.finished.push(handshake);
            return Admission::Failed;
        }

        let provenance = if handshake.direction == Direction::Incoming {
            handshake::provenance_for_incoming()
        } else {
            Provenance::Tracker
        };
        let atom = t.registry.ensure_atom(handshake.addr, handshake.port, provenance, now);
        handshake::touch_atom_on_success(atom, now);
        let banned = atom.banned;

        let incoming_pending: Vec<Ipv4Addr> = self.handshakes.incoming.iter().map(|h| h.addr).collect();
        let already_connected = t.is_addr_in_use(handshake.addr, &incoming_pending);
        let decision = handshake::admit(
            true,
            t.running,
            handshake.direction,
            already_connected,
            banned,
            t.registry.peer_count(),
            self.config.max_peers_per_torrent as usize,
        );

        match decision {
            Admission::Accept => {
                let addr_key = crate::addr::addr_key(handshake.addr);
                let incoming = handshake.direction == Direction::Incoming;
                let mut peer = Peer::new_at(addr_key, channel, incoming, t.num_pieces, messages, now);
                peer.encrypted = encrypted;
                if let Some(id) = peer_id {
                    peer.client_id = crate::peer::pretty_client_name(&id);
                    peer.same_client_family = crate::peer::same_client_family(&id, &self.config.client_tag);
                }
                info!(client = %peer.client_id, incoming, "peer admitted");
                t.registry.insert_peer(peer);
            }
            Admission::Banned => {
                debug!("rejected banned atom");
                self.handshakes.finished.push(handshake);
            }
            Admission::TorrentFull => {
                debug!(cap = self.config.max_peers_per_torrent, "torrent at peer cap, rejecting incoming");
                self.handshakes.finished.push(handshake);
            }
            Admission::AlreadyConnected | Admission::Failed => {
                self.handshakes.finished.push(handshake);
            }
        }

        decision
    }

    /// Drive one refill pass for a torrent (§4.3).
    pub fn refill(&mut self, info_hash: [u8; 20]) {
        if let Some(t) = self.torrents.get_mut(&info_hash) {
            t.refill_armed = false;
            if t.running {
                crate::scheduler::refill(t, &mut self.rng);
            }
        }
    }

    /// Drive one rechoke pass for a torrent (§4.4).
    pub fn rechoke(&mut self, info_hash: [u8; 20]) {
        if let Some(t) = self.torrents.get_mut(&info_hash) {
            if t.running {
                crate::rechoke::rechoke(t, &self.config, &mut self.rng);
            }
        }
    }

    /// Drive one reconnect pass for a torrent (§4.5). `io` is borrowed for
    /// the duration of the pass only, matching its trait-object seam nature.
    pub fn reconnect(&mut self, info_hash: [u8; 20], io: &mut dyn IoReactor) {
        let now = Instant::now();
        let incoming_pending: Vec<Ipv4Addr> = self.handshakes.incoming.iter().map(|h| h.addr).collect();
        if let Some(t) = self.torrents.get_mut(&info_hash) {
            if t.running {
                reconnect::reconnect_pulse(
                    t,
                    &self.config,
                    io,
                    self.blocklist.as_ref(),
                    &mut self.throttle,
                    now,
                    &incoming_pending,
                );
            }
        }
    }

    /// Drive the process-global bandwidth pulse (§4.6): flush every
    /// torrent's peers and drain manager-wide finished handshakes.
    pub fn bandwidth_pulse(&mut self) {
        for t in self.torrents.values_mut() {
            integrity::bandwidth_pulse(t, &self.config);
        }
        self.handshakes.finished.clear();
    }

    pub fn on_got_block(
        &mut self,
        info_hash: [u8; 20],
        from: crate::addr::AddrKey,
        piece: usize,
        offset: usize,
        length: usize,
    ) -> Result<integrity::PieceOutcome, ManagerError> {
        let t = self.torrents.get_mut(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        if !t.running {
            return Err(ManagerError::NotRunning);
        }
        let outcome = integrity::on_got_block(t, &self.config, from, piece, offset, length);
        Ok(outcome)
    }

    pub fn on_peer_error(
        &mut self,
        info_hash: [u8; 20],
        from: crate::addr::AddrKey,
        kind: PeerFailure,
    ) -> Result<(), ManagerError> {
        let t = self.torrents.get_mut(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        if !t.running {
            return Err(ManagerError::NotRunning);
        }
        warn!(?kind, "peer reported error");
        integrity::on_peer_error(t, from, kind);
        Ok(())
    }

    /// Record a local (disk) error against a torrent and stop it (§7 "Local I/O").
    pub fn on_local_error(&mut self, info_hash: [u8; 20], message: String) -> Result<(), ManagerError> {
        let t = self.torrents.get_mut(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        integrity::on_local_error(t, LocalError::from(message));
        Ok(())
    }

    /// Dispatch a wire-layer [`Event`] for one peer (§6). Returns whether the
    /// async harness should arm a one-shot refill timer (§4.3 trigger (a));
    /// see [`integrity::handle_event`].
    pub fn handle_event(
        &mut self,
        info_hash: [u8; 20],
        from: crate::addr::AddrKey,
        event: Event,
    ) -> Result<bool, ManagerError> {
        let t = self.torrents.get_mut(&info_hash).ok_or(ManagerError::UnknownTorrent)?;
        if !t.running {
            return Err(ManagerError::NotRunning);
        }
        Ok(integrity::handle_event(t, &self.config, from, event))
    }
}
