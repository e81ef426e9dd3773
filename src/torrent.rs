//! The per-download Torrent Context (§3): ties the registry, webseeds,
//! piece/priority state and outgoing handshakes together into the unit the
//! scheduler, choker, reconnect controller and integrity pass all operate
//! on.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use bitvec::vec::BitVec;

use crate::addr::AddrKey;
use crate::block::PartialPiece;
use crate::handshake::OutgoingHandshakes;
use crate::registry::PeerRegistry;
use crate::traits::{Storage, Webseed};

/// Per-piece user priority (§4.3 "user priority, higher first").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A named webseed plus its live connection object.
pub struct WebseedSlot {
    pub url: String,
    pub conn: Box<dyn Webseed>,
}

/// Error state recorded by the integrity pass (§7 "Local I/O").
#[derive(Debug, Clone)]
pub struct TorrentError {
    pub message: String,
}

/// One active download (§3 "Torrent Context"). Created by
/// [`crate::manager::Manager::add_torrent`]; a torrent is "running" iff its
/// three periodic timers (owned by the async harness, not this struct) are
/// live — here that's tracked with a single boolean the harness consults.
pub struct TorrentContext {
    pub info_hash: [u8; 20],
    pub piece_len: usize,
    pub last_piece_len: usize,
    pub num_pieces: usize,

    pub registry: PeerRegistry,
    pub outgoing_handshakes: OutgoingHandshakes,
    pub webseeds: Vec<WebseedSlot>,

    pub storage: Box<dyn Storage>,

    /// Per-piece: whether the client wants it at all (do-not-download).
    pub wanted: BitVec,
    pub priority: Vec<Priority>,
    /// Per-piece completion (whole piece acquired and verified).
    pub have: BitVec,
    /// Per-piece outstanding block requests (§4.3 "pending count invariant").
    pub pending_count: Vec<u32>,
    /// Partial-piece block bookkeeping, only present for touched pieces.
    pub partial: HashMap<usize, PartialPiece>,
    /// Per-piece blame: which peers (by address key) contributed a block to
    /// the piece currently being assembled (§4.6).
    pub blame: HashMap<usize, Vec<AddrKey>>,

    pub optimistic_peer: Option<AddrKey>,

    /// Peers flagged for removal, drained at the next bandwidth pulse
    /// (§4.6) so eviction logic never mutates the registry mid-iteration.
    pub purge_queue: Vec<AddrKey>,

    pub running: bool,
    pub seeding: bool,
    pub upload_allowed: bool,

    pub downloaded_ever: u64,
    pub corrupt_ever: u64,

    pub error: Option<TorrentError>,

    /// Throttle state for the coalescing refill timer (§4.3 trigger (a)):
    /// set by [`crate::integrity::handle_event`] the first time a
    /// `NeedRequests` event arrives with no timer already armed (later
    /// `NeedRequests` events in the same burst see this already `true` and
    /// are coalesced); cleared by [`crate::manager::Manager::refill`] when
    /// the one-shot timer the async harness scheduled actually fires.
    pub refill_armed: bool,
}

impl TorrentContext {
    pub fn new(
        info_hash: [u8; 20],
        piece_len: usize,
        last_piece_len: usize,
        num_pieces: usize,
        storage: Box<dyn Storage>,
    ) -> Self {
        Self {
            info_hash,
            piece_len,
            last_piece_len,
            num_pieces,
            registry: PeerRegistry::new(),
            outgoing_handshakes: OutgoingHandshakes::new(),
            webseeds: Vec::new(),
            storage,
            wanted: BitVec::repeat(true, num_pieces),
            priority: vec![Priority::default(); num_pieces],
            have: BitVec::repeat(false, num_pieces),
            pending_count: vec![0; num_pieces],
            partial: HashMap::new(),
            blame: HashMap::new(),
            optimistic_peer: None,
            purge_queue: Vec::new(),
            running: false,
            seeding: false,
            upload_allowed: true,
            downloaded_ever: 0,
            corrupt_ever: 0,
            error: None,
            refill_armed: false,
        }
    }

    pub fn piece_len_of(&self, piece: usize) -> usize {
        if piece + 1 == self.num_pieces {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    pub fn is_complete(&self) -> bool {
        self.have.all()
    }

    /// §4.1 "is-in-use": true iff a live peer, an outgoing handshake, or a
    /// pending incoming handshake exists for `addr`. Grounded on the
    /// originating core's `peerIsInUse`, which ORs exactly these three
    /// sources. Incoming handshakes aren't scoped to a torrent until they
    /// complete (they live on the manager, matched against a torrent only
    /// once the handshake finishes), so the caller threads the manager-wide
    /// set in as `incoming_pending`.
    pub fn is_addr_in_use(&self, addr: Ipv4Addr, incoming_pending: &[Ipv4Addr]) -> bool {
        self.registry.is_in_use(addr)
            || self.outgoing_handshakes.is_pending(addr)
            || incoming_pending.contains(&addr)
    }

    /// Stop the torrent: clear peers and drop the per-torrent handshake
    /// bookkeeping (§5 "stopping a torrent drains outgoing handshakes by
    /// repeatedly aborting the first element until empty" — the async
    /// harness performs the actual abort against the I/O layer; this just
    /// clears the set the rest of the core consults).
    pub fn stop(&mut self) {
        self.running = false;
        self.registry = PeerRegistry::new();
        self.outgoing_handshakes = OutgoingHandshakes::new();
        self.refill_armed = false;
    }
}
