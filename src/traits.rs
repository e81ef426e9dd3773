//! External collaborators the core depends on but does not implement
//! (§6). A production client provides real implementations backed by the
//! wire codec, the handshake crypto state machine, and the disk layer; this
//! crate only depends on these seams and ships lightweight mocks of its own
//! for testing (see [`crate::mock`]).

use std::net::Ipv4Addr;

/// Opaque handle to an I/O-layer connection, minted and owned by the I/O
/// reactor. The core never inspects it, only passes it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Result of offering a block request to a peer or webseed (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddRequestResult {
    #[default]
    Ok,
    Full,
    Missing,
    Duplicate,
    ClientChoked,
}

/// Result of offering a block request to a webseed; webseeds have no notion
/// of choking or duplicate/missing requests (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebseedAddResult {
    Ok,
    Full,
}

/// Opaque handle returned by [`Messages::subscribe`] and handed back to
/// [`Messages::unsubscribe`] (§6 "Messages layer (consumed)... an event
/// subscription producing the event set in §3"). Grounded on the teacher's
/// originating C core's `tr_peerMsgsNew(..., &peer->msgsTag)` /
/// `tr_peerMsgsUnsubscribe(peer->msgs, peer->msgsTag)` pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionTag(pub u64);

/// Per-peer control surface the scheduler, choker and integrity components
/// drive (§6 "Messages layer (consumed)"). Implemented by the wire-protocol
/// session on the other side of the out-of-scope boundary.
pub trait Messages: Send {
    fn set_choke(&mut self, choke: bool);
    fn cancel(&mut self, piece: usize, offset: usize, len: usize);
    fn have(&mut self, piece: usize);
    fn add_request(&mut self, piece: usize, offset: usize, len: usize) -> AddRequestResult;
    fn flush(&mut self);

    /// Register this peer with the messages layer's event stream, returning
    /// a tag to pass back to [`Self::unsubscribe`]. Called once, at peer
    /// construction ([`crate::peer::Peer::new_at`]); the events delivered
    /// through this subscription are [`crate::peer::Event`] (§3).
    fn subscribe(&mut self) -> SubscriptionTag;

    /// Stop delivering events for `tag`. Called automatically when a
    /// [`crate::peer::Peer`] is dropped, mirroring the destructor-time
    /// unsubscribe in the originating core.
    fn unsubscribe(&mut self, tag: SubscriptionTag);
}

/// An HTTP(S) piece source, treated as an always-unchoked pseudo-peer (§6).
pub trait Webseed: Send {
    fn add_request(&mut self, piece: usize, offset: usize, len: usize) -> WebseedAddResult;
    fn speed(&self) -> Option<f64>;
    fn is_active(&self) -> bool;
}

/// The network I/O layer (§6 "I/O (consumed)"), reduced to the handful of
/// operations the reconnect controller and handshake admission need: dialing
/// an outgoing connection, querying its age/encryption, and attaching
/// bandwidth accounting. Handshake crypto and the wire codec live entirely on
/// the other side of this trait.
pub trait IoReactor: Send {
    /// Begin an outgoing connection attempt. `None` if the attempt could not
    /// even be started (the atom is marked unreachable in that case).
    fn new_outgoing(
        &mut self,
        addr: Ipv4Addr,
        port: u16,
        info_hash: [u8; 20],
    ) -> Option<ChannelId>;

    fn is_encrypted(&self, channel: ChannelId) -> bool;

    /// Age of the connection in seconds, used by the optimistic-unchoke
    /// "new peer" bonus (§4.4).
    fn age_secs(&self, channel: ChannelId) -> u64;
}

/// The disk/storage layer (§6 "Storage (consumed)").
pub trait Storage: Send {
    fn read_piece(&mut self, piece: usize, begin: usize, len: usize, buf: &mut [u8]) -> std::io::Result<()>;
    fn write_piece(&mut self, piece: usize, begin: usize, len: usize, buf: &[u8]) -> std::io::Result<()>;
    /// True iff the piece's bytes hash to the expected SHA-1.
    fn test_piece(&mut self, piece: usize) -> bool;
}

/// Blocklist membership test (§7 "Blocked address"). Parsing the blocklist
/// itself is out of scope; this crate only consumes the predicate.
pub trait Blocklist: Send + Sync {
    fn is_blocked(&self, addr: Ipv4Addr) -> bool;
}

/// A blocklist that blocks nothing, for callers that don't maintain one.
pub struct NullBlocklist;

impl Blocklist for NullBlocklist {
    fn is_blocked(&self, _addr: Ipv4Addr) -> bool {
        false
    }
}
