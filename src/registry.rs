//! Peer Registry (§4.1): the authoritative per-torrent set of known
//! addresses (atoms) and connected peers, kept sorted by address so the
//! rest of the core can iterate deterministically.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::addr::{addr_key, AddrKey};
use crate::atom::{PeerAtom, Provenance};
use crate::peer::Peer;

#[derive(Default)]
pub struct PeerRegistry {
    atoms: BTreeMap<AddrKey, PeerAtom>,
    peers: BTreeMap<AddrKey, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing atom for `addr`, or creates one with the given
    /// provenance (§4.1 "ensure atom exists"). An atom already on file keeps
    /// its original provenance; only a brand new atom takes the supplied one.
    pub fn ensure_atom(
        &mut self,
        addr: Ipv4Addr,
        port: u16,
        provenance: Provenance,
        now: Instant,
    ) -> &mut PeerAtom {
        let key = addr_key(addr);
        self.atoms
            .entry(key)
            .or_insert_with(|| PeerAtom::new(addr, port, provenance, now))
    }

    pub fn find_atom(&self, addr: Ipv4Addr) -> Option<&PeerAtom> {
        self.atoms.get(&addr_key(addr))
    }

    pub fn find_atom_mut(&mut self, addr: Ipv4Addr) -> Option<&mut PeerAtom> {
        self.atoms.get_mut(&addr_key(addr))
    }

    pub fn atoms(&self) -> impl Iterator<Item = (&AddrKey, &PeerAtom)> {
        self.atoms.iter()
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn insert_peer(&mut self, peer: Peer) {
        self.peers.insert(peer.addr_key, peer);
    }

    pub fn remove_peer(&mut self, key: AddrKey) -> Option<Peer> {
        self.peers.remove(&key)
    }

    pub fn find_peer(&self, key: AddrKey) -> Option<&Peer> {
        self.peers.get(&key)
    }

    pub fn find_peer_mut(&mut self, key: AddrKey) -> Option<&mut Peer> {
        self.peers.get_mut(&key)
    }

    pub fn peers(&self) -> impl Iterator<Item = (&AddrKey, &Peer)> {
        self.peers.iter()
    }

    pub fn peers_mut(&mut self) -> impl Iterator<Item = (&AddrKey, &mut Peer)> {
        self.peers.iter_mut()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// True if `addr` has a live connected peer. This is only one of the
    /// three sources the full §4.1 "is-in-use" check ORs together; see
    /// [`crate::torrent::TorrentContext::is_addr_in_use`] for the complete
    /// definition that also accounts for outgoing and pending incoming
    /// handshakes.
    pub fn is_in_use(&self, addr: Ipv4Addr) -> bool {
        self.peers.contains_key(&addr_key(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_atom_keeps_original_provenance() {
        let mut reg = PeerRegistry::new();
        let addr = Ipv4Addr::new(1, 2, 3, 4);
        let now = Instant::now();
        reg.ensure_atom(addr, 6881, Provenance::Tracker, now);
        reg.ensure_atom(addr, 6881, Provenance::Pex, now);
        assert_eq!(reg.find_atom(addr).unwrap().provenance, Provenance::Tracker);
    }

    #[test]
    fn atoms_iterate_in_address_order() {
        let mut reg = PeerRegistry::new();
        let now = Instant::now();
        reg.ensure_atom(Ipv4Addr::new(10, 0, 0, 5), 1, Provenance::Tracker, now);
        reg.ensure_atom(Ipv4Addr::new(10, 0, 0, 1), 1, Provenance::Tracker, now);
        let addrs: Vec<_> = reg.atoms().map(|(_, a)| a.addr).collect();
        assert_eq!(addrs, vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 5)]);
    }
}
