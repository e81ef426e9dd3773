use std::net::Ipv4Addr;
use std::time::Instant;

/// How a remote address was first learned about (§3). Ordered so that a
/// lower discriminant means "more trustworthy", matching the reconnect
/// candidate tie-break in §4.5 (`provenance tag ascending`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Provenance {
    Incoming = 0,
    Tracker = 1,
    Cache = 2,
    Pex = 3,
}

/// External flags on an atom, mirrored from the peer's own `added.f` PEX byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExternalFlags {
    pub seed: bool,
    pub encryption_capable: bool,
    pub upload_only: bool,
}

impl ExternalFlags {
    pub const ENCRYPTION_CAPABLE: u8 = 0x01;
    pub const SEED: u8 = 0x02;

    pub fn from_pex_byte(b: u8) -> Self {
        Self {
            seed: b & Self::SEED != 0,
            encryption_capable: b & Self::ENCRYPTION_CAPABLE != 0,
            upload_only: false,
        }
    }
}

/// The persistent record of a remote address (§3). Survives disconnects;
/// never destroyed while the torrent lives, so that a ban outlives the
/// connection that earned it.
#[derive(Debug, Clone)]
pub struct PeerAtom {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub provenance: Provenance,
    pub external: ExternalFlags,

    /// Sticky once set; never cleared.
    pub banned: bool,
    /// Sticky in the outgoing direction; does not block accepting an
    /// incoming connection from the same address.
    pub unreachable: bool,

    pub num_fails: u32,

    /// When this atom's connection status last changed.
    pub time: Instant,
    /// When we last observed piece data (not just protocol chatter) flow
    /// over a connection to this address. `None` means "never".
    pub piece_data_time: Option<Instant>,
}

impl PeerAtom {
    pub fn new(addr: Ipv4Addr, port: u16, provenance: Provenance, now: Instant) -> Self {
        Self {
            addr,
            port,
            provenance,
            external: ExternalFlags::default(),
            banned: false,
            unreachable: false,
            num_fails: 0,
            time: now,
            piece_data_time: None,
        }
    }

    pub fn is_seed(&self) -> bool {
        self.external.seed
    }
}
