//! Peer population, request scheduling, choking and integrity verification
//! core for a BitTorrent client.
//!
//! This crate implements the peer-manager subsystem only: it is driven by,
//! and drives, an external wire-protocol layer, handshake crypto, tracker
//! client, and disk layer, each represented here as a trait in
//! [`traits`]. See [`manager::Manager`] for the synchronous core and
//! [`handle::ManagerHandle`] for the async harness around it.

pub mod addr;
pub mod atom;
pub mod block;
pub mod config;
pub mod error;
pub mod handle;
pub mod handshake;
pub mod integrity;
pub mod manager;
pub mod peer;
pub mod pex;
pub mod rate;
pub mod rechoke;
pub mod reconnect;
pub mod registry;
pub mod rng;
pub mod scheduler;
pub mod stats;
pub mod torrent;
pub mod traits;

pub mod mock;

/// Size in bytes of a request block, fixed by the wire protocol convention.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// A piece/peer completion bitfield, `Msb0` bit order to match the wire
/// protocol's on-the-wire bitfield layout.
pub type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

pub use addr::{addr_key, AddrKey};
pub use atom::{ExternalFlags, PeerAtom, Provenance};
pub use block::{block_len, num_blocks, BlockRequest, PartialPiece};
pub use config::{reconnect_backoff_secs, Config};
pub use error::{LocalError, ManagerError, PeerFailure};
pub use handle::ManagerHandle;
pub use handshake::{admit, Admission, Direction, Handshake};
pub use manager::Manager;
pub use peer::{pretty_client_name, same_client_family, Event, Peer};
pub use pex::{compact_to_pex, pex_to_compact, PexEntry};
pub use stats::{peer_flags, TorrentStats};
pub use torrent::{Priority, TorrentContext};
pub use rate::RateCounter;
pub use traits::{
    AddRequestResult, Blocklist, ChannelId, IoReactor, Messages, NullBlocklist, Storage,
    SubscriptionTag, Webseed, WebseedAddResult,
};
