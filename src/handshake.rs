//! Handshake Admission (§4.2): turns a completed (or failed) handshake
//! attempt into either a live [`crate::peer::Peer`] or a rejection, and
//! tracks in-flight handshakes so the same address is never dialed twice.
//!
//! Grounded on `myHandshakeDoneCB` in the original peer manager: on success
//! the atom is touched (time/piece_data_time reset), a ban is checked first,
//! then (for incoming connections only) the per-torrent peer cap, then
//! whether a live peer already exists for the address.

use std::net::Ipv4Addr;
use std::time::Instant;

use crate::addr::{addr_key, AddrKey};
use crate::atom::Provenance;

/// Direction a handshake was initiated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// An in-flight handshake, tracked so that admission can dedup and so a
/// failure can be charged back to the right atom.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub direction: Direction,
}

/// Outcome of [`admit`], mirroring the branches of `myHandshakeDoneCB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new live peer should be created for this address.
    Accept,
    /// A peer for this address is already connected; the new connection is
    /// superfluous and should be dropped without penalizing the atom.
    AlreadyConnected,
    /// The atom is banned; drop the connection silently.
    Banned,
    /// This is an incoming connection and the torrent is already at its
    /// peer cap; drop it without penalizing the atom.
    TorrentFull,
    /// The handshake failed (crypto/protocol mismatch, or the torrent isn't
    /// running); the atom's failure count should be incremented.
    Failed,
}

/// Bookkeeping for in-flight handshakes attached to one torrent: outgoing
/// handshakes we initiated (sorted by address) and, manager-wide, incoming
/// handshakes not yet matched to a torrent. This type only models the
/// per-torrent half; the manager owns the incoming set (§4.2, §5).
#[derive(Default)]
pub struct OutgoingHandshakes {
    inner: std::collections::BTreeMap<AddrKey, Handshake>,
}

impl OutgoingHandshakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, addr: Ipv4Addr, port: u16) {
        self.inner.insert(
            addr_key(addr),
            Handshake { addr, port, direction: Direction::Outgoing },
        );
    }

    pub fn is_pending(&self, addr: Ipv4Addr) -> bool {
        self.inner.contains_key(&addr_key(addr))
    }

    pub fn remove(&mut self, addr: Ipv4Addr) -> Option<Handshake> {
        self.inner.remove(&addr_key(addr))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Decide how a just-finished handshake should be handled, given the
/// current state of the owning torrent. Does not mutate anything; callers
/// apply the returned [`Admission`] to the registry/peer set themselves.
#[allow(clippy::too_many_arguments)]
pub fn admit(
    ok: bool,
    torrent_running: bool,
    direction: Direction,
    already_connected: bool,
    banned: bool,
    peer_count: usize,
    max_peers: usize,
) -> Admission {
    if !ok || !torrent_running {
        return Admission::Failed;
    }
    if banned {
        return Admission::Banned;
    }
    if direction == Direction::Incoming && peer_count >= max_peers {
        return Admission::TorrentFull;
    }
    if already_connected {
        return Admission::AlreadyConnected;
    }
    Admission::Accept
}

/// Touch an atom's liveness timestamps on a successful handshake, matching
/// `atom->time = now; atom->piece_data_time = 0;`.
pub fn touch_atom_on_success(atom: &mut crate::atom::PeerAtom, now: Instant) {
    atom.time = now;
    atom.piece_data_time = None;
}

/// Ensure provenance defaults to `Incoming` for an atom created purely from
/// accepting a connection we didn't otherwise know about (§4.2).
pub fn provenance_for_incoming() -> Provenance {
    Provenance::Incoming
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banned_wins_over_everything_else() {
        let a = admit(true, true, Direction::Outgoing, false, true, 0, 50);
        assert_eq!(a, Admission::Banned);
    }

    #[test]
    fn incoming_respects_peer_cap() {
        let a = admit(true, true, Direction::Incoming, false, false, 50, 50);
        assert_eq!(a, Admission::TorrentFull);
        let b = admit(true, true, Direction::Outgoing, false, false, 50, 50);
        assert_eq!(b, Admission::Accept);
    }

    #[test]
    fn failed_handshake_or_stopped_torrent_is_failed() {
        assert_eq!(
            admit(false, true, Direction::Outgoing, false, false, 0, 50),
            Admission::Failed
        );
        assert_eq!(
            admit(true, false, Direction::Outgoing, false, false, 0, 50),
            Admission::Failed
        );
    }

    #[test]
    fn already_connected_is_reported_once_other_checks_pass() {
        let a = admit(true, true, Direction::Outgoing, true, false, 0, 50);
        assert_eq!(a, Admission::AlreadyConnected);
    }
}
