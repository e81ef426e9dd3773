//! The live (connected) counterpart to a [`crate::atom::PeerAtom`] (§3).

use std::time::Instant;

use bitvec::vec::BitVec;

use crate::addr::AddrKey;
use crate::error::PeerFailure;
use crate::rate::RateCounter;
use crate::traits::{AddRequestResult, ChannelId, Messages, SubscriptionTag};

/// Decode a BEP 20 peer id into a short human-readable client name.
/// Grounded on the teacher's own `Debug` impl for its handshake type
/// (`p2p/handshake.rs`, `String::from_utf8_lossy(&self.peer_id)`), extended
/// here to recognize the common Azureus-style `-XX####-` prefix convention
/// (§3 Peer "a client-identifier string").
pub fn pretty_client_name(peer_id: &[u8; 20]) -> String {
    if peer_id.len() >= 8 && peer_id[0] == b'-' && peer_id[7] == b'-' {
        let tag = String::from_utf8_lossy(&peer_id[1..3]).into_owned();
        let version = String::from_utf8_lossy(&peer_id[3..7]).into_owned();
        let name = match tag.as_str() {
            "PM" => "peermgr",
            "TR" => "Transmission",
            "UT" => "uTorrent",
            "qB" => "qBittorrent",
            "lt" => "libtorrent",
            "DE" => "Deluge",
            "AZ" => "Azureus",
            _ => return format!("-{tag}{version}- ({})", String::from_utf8_lossy(peer_id)),
        };
        format!("{name} {version}")
    } else {
        String::from_utf8_lossy(peer_id).into_owned()
    }
}

/// Same-family check used by the optimistic-unchoke cooperation bias
/// (§4.4): true if `peer_id` carries our own two-letter Azureus-style tag.
pub fn same_client_family(peer_id: &[u8; 20], our_tag: &[u8; 2]) -> bool {
    peer_id.len() >= 3 && peer_id[0] == b'-' && &peer_id[1..3] == our_tag
}

/// Events the messages/I/O layer reports up to the core (§3, §6 "Events
/// (produced)"). The core reacts to each synchronously as it arrives; there
/// is no queueing inside this crate.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    /// The peer's outbound request queue has room; the scheduler should
    /// consider it during the next refill.
    NeedRequests,
    /// A previously issued request for this block was canceled (by us, via
    /// endgame, or reported dropped by the messages layer).
    CanceledRequest { piece: usize, offset: usize, len: usize },
    DataSentToPeer { length: usize, was_piece_data: bool },
    DataReceivedFromPeer { length: usize, was_piece_data: bool },
    /// The peer's overall completion fraction changed (used only for stats).
    PeerProgress(f64),
    /// A complete block arrived and passed basic framing checks (not yet
    /// hash-verified; that happens when the whole piece completes).
    PeerGotBlock { piece: usize, offset: usize, length: usize },
    PeerSuggestsPiece { piece: usize, fast_allowed: bool },
    PeerDeclaresUploadOnly(bool),
    PeerError(PeerFailure),
}

/// A connected remote peer (§3). Lives only as long as the connection does;
/// destroyed on disconnect while its [`crate::atom::PeerAtom`] persists.
pub struct Peer {
    pub addr_key: AddrKey,
    pub channel: ChannelId,
    pub client_choked: bool,
    pub client_interested: bool,
    pub peer_choked: bool,
    pub peer_interested: bool,
    pub is_seed: bool,
    pub upload_only: bool,
    pub incoming: bool,

    /// Overall completion fraction this peer last reported (§3 "the client
    /// progress 0..1"). `is_seed` latches once this reaches 1.0.
    pub progress: f64,

    /// Bitfield of pieces this peer claims to have.
    pub have: BitVec,

    /// Blocks we've requested from this peer and are still waiting on.
    pub pending: Vec<crate::block::BlockRequest>,

    /// Rolling recent rates, consumed by the rechoke sort (§4.4). Derived
    /// from `upload_counter`/`download_counter` once per bandwidth pulse.
    pub download_rate: f64,
    pub upload_rate: f64,
    pub(crate) upload_counter: RateCounter,
    pub(crate) download_counter: RateCounter,

    /// Number of pieces that failed their hash check while this peer was a
    /// contributor to them (§4.6 "strikes").
    pub strikes: u32,

    /// True once an optimistic-unchoke slot has been granted to this peer
    /// and not yet rotated away (§4.4).
    pub is_optimistic_unchoke: bool,

    /// Age in seconds since the handshake completed, refreshed by the I/O
    /// reactor; used by the optimistic-unchoke "new peer" bonus (§4.4).
    pub age_secs: u64,
    /// True if the client-id string (derived from `peer_id`) names the same
    /// client family as ours; used by the optimistic-unchoke cooperation
    /// bias (§4.4).
    pub same_client_family: bool,

    /// Pretty-printed client name derived from the handshake's `peer_id`
    /// (§3 "a client-identifier string"), e.g. `"Transmission 3420"`.
    pub client_id: String,

    /// When `peer_choked` last flipped (§3 "a timestamp of last choke change").
    pub last_choke_change: Instant,

    /// Whether this peer's connection negotiated/prefers protocol encryption
    /// (§3 "an encryption preference").
    pub encrypted: bool,

    /// The per-peer control surface (§6 "Messages layer (consumed)").
    pub messages: Box<dyn Messages>,

    /// Tag handed back by `messages.subscribe()`, passed to `unsubscribe`
    /// when this peer is dropped.
    messages_tag: SubscriptionTag,
}

impl Peer {
    pub fn new(
        addr_key: AddrKey,
        channel: ChannelId,
        incoming: bool,
        num_pieces: usize,
        messages: Box<dyn Messages>,
    ) -> Self {
        Self::new_at(addr_key, channel, incoming, num_pieces, messages, Instant::now())
    }

    pub fn new_at(
        addr_key: AddrKey,
        channel: ChannelId,
        incoming: bool,
        num_pieces: usize,
        mut messages: Box<dyn Messages>,
        now: Instant,
    ) -> Self {
        let messages_tag = messages.subscribe();
        Self {
            addr_key,
            channel,
            client_choked: true,
            client_interested: false,
            peer_choked: true,
            peer_interested: false,
            is_seed: false,
            upload_only: false,
            incoming,
            progress: 0.0,
            have: BitVec::repeat(false, num_pieces),
            pending: Vec::new(),
            download_rate: 0.0,
            upload_rate: 0.0,
            upload_counter: RateCounter::default(),
            download_counter: RateCounter::default(),
            strikes: 0,
            is_optimistic_unchoke: false,
            age_secs: 0,
            same_client_family: false,
            client_id: String::new(),
            last_choke_change: now,
            encrypted: false,
            messages,
            messages_tag,
        }
    }

    pub fn add_request(&mut self, piece: usize, offset: usize, len: usize) -> AddRequestResult {
        self.messages.add_request(piece, offset, len)
    }

    pub fn has_piece(&self, piece: usize) -> bool {
        self.have.get(piece).map(|b| *b).unwrap_or(false)
    }

    pub fn mark_have(&mut self, piece: usize) {
        if piece < self.have.len() {
            self.have.set(piece, true);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn remove_pending(&mut self, piece: usize, offset: usize) -> bool {
        let before = self.pending.len();
        self.pending.retain(|r| !(r.piece == piece && r.offset == offset));
        self.pending.len() != before
    }
}

impl Drop for Peer {
    /// Mirrors the originating core's destructor-time
    /// `tr_peerMsgsUnsubscribe`: a peer always unsubscribes from its own
    /// event stream when it goes away, regardless of which call site
    /// (eviction, ban, torrent stop) dropped it.
    fn drop(&mut self) {
        self.messages.unsubscribe(self.messages_tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_client_name_decodes_known_azureus_tags() {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(b"-TR3420-");
        assert_eq!(pretty_client_name(&id), "Transmission 3420");
    }

    #[test]
    fn pretty_client_name_falls_back_for_unknown_tags() {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(b"-ZZ0001-");
        assert!(pretty_client_name(&id).contains("ZZ0001"));
    }

    #[test]
    fn dropping_a_peer_unsubscribes_with_the_tag_subscribe_returned() {
        let shared = crate::mock::SharedMockMessages::new();
        let peer = Peer::new(1, ChannelId(0), false, 4, shared.boxed());
        assert!(shared.0.lock().unwrap().subscribed);
        drop(peer);
        assert!(shared.0.lock().unwrap().unsubscribed_with.is_some());
    }

    #[test]
    fn same_client_family_matches_our_tag_only() {
        let mut ours = [0u8; 20];
        ours[..8].copy_from_slice(b"-PM0001-");
        let mut theirs = [0u8; 20];
        theirs[..8].copy_from_slice(b"-TR3420-");
        assert!(same_client_family(&ours, b"PM"));
        assert!(!same_client_family(&theirs, b"PM"));
    }
}
