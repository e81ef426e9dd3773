/// Error kinds reported by a peer over the messages layer (§7).
///
/// Routing is entirely mechanical and lives in [`crate::integrity`]: this
/// type only classifies *what kind* of problem the peer caused, the handler
/// decides whether that means a strike, a purge, or stopping the torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PeerFailure {
    /// The peer sent a protocol-invalid request (e.g. malformed arguments).
    #[error("peer sent an invalid argument")]
    InvalidArgument,

    /// The peer referenced a piece/offset/length outside torrent bounds.
    #[error("peer request out of range")]
    OutOfRange,

    /// The peer sent a message larger than the protocol allows.
    #[error("peer message too large")]
    MessageTooLarge,

    /// The peer's connection dropped mid-message.
    #[error("peer not connected")]
    NotConnected,
}

/// Local (non-protocol) errors, e.g. surfaced through `read_piece`/`write_piece`.
///
/// These stop the torrent rather than just the offending peer (§7).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct LocalError(pub String);

impl From<std::io::Error> for LocalError {
    fn from(e: std::io::Error) -> Self {
        LocalError(e.to_string())
    }
}

impl From<String> for LocalError {
    fn from(message: String) -> Self {
        LocalError(message)
    }
}

/// Errors from the manager's own entry points (not peer-caused).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManagerError {
    #[error("unknown torrent")]
    UnknownTorrent,

    #[error("torrent already exists")]
    TorrentExists,

    #[error("torrent is not running")]
    NotRunning,
}
