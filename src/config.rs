use std::time::Duration;

/// Tunable constants for a single torrent's periodic controllers.
///
/// Mirrors the split the teacher draws between `TorrentConfig` (per-torrent
/// knobs) and `ClientConfig` (session-wide knobs) in `bittorrent/src/config.rs`;
/// this crate folds both into one struct since the peer manager core has no
/// other session-wide state to hang a second struct off of.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// How often a torrent's block-request scheduler re-runs (also the
    /// coalescing window for `NeedRequests` bursts).
    pub refill_period: Duration,

    /// How often the choking controller re-evaluates who to unchoke.
    pub rechoke_period: Duration,

    /// How often the reconnect/eviction controller runs.
    pub reconnect_period: Duration,

    /// How often the process-global bandwidth pulse runs.
    pub bandwidth_period: Duration,

    /// Floor of the eviction idle-time window (full swarm).
    pub min_upload_idle: Duration,

    /// Ceiling of the eviction idle-time window (starved swarm).
    pub max_upload_idle: Duration,

    /// Max outgoing dials a single torrent may start in one reconnect pulse.
    pub max_reconnections_per_pulse: u32,

    /// Max outgoing dials allowed process-wide within one wall-clock second.
    pub max_connections_per_second: u32,

    /// Max peers unchoked at once by the choking controller (the interested cap).
    pub max_unchoked_peers: u32,

    /// Strikes before a peer's atom is banned and the peer purged.
    pub max_bad_pieces_per_peer: u32,

    /// Reconnect backoff floor; also the "recently productive" fast-path window is
    /// twice this value.
    pub minimum_reconnect_interval: Duration,

    /// Max live peers a single torrent will keep.
    pub max_peers_per_torrent: u32,

    /// Whether PEX exchange is allowed for this torrent (gates the seed/seed
    /// disconnect rule in the reconnect controller).
    pub pex_enabled: bool,

    /// Our own two-letter Azureus-style client tag, used by the
    /// optimistic-unchoke cooperation bias (§4.4) to recognize peers
    /// running the same client family.
    pub client_tag: [u8; 2],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refill_period: Duration::from_millis(333),
            rechoke_period: Duration::from_secs(10),
            reconnect_period: Duration::from_secs(2),
            bandwidth_period: Duration::from_millis(500),
            min_upload_idle: Duration::from_secs(30),
            max_upload_idle: Duration::from_secs(300),
            max_reconnections_per_pulse: 4,
            max_connections_per_second: 8,
            max_unchoked_peers: 14,
            max_bad_pieces_per_peer: 5,
            minimum_reconnect_interval: Duration::from_secs(5),
            max_peers_per_torrent: 60,
            pex_enabled: true,
            client_tag: *b"PM",
        }
    }
}

/// Per-address-family-independent reconnect backoff table (§4.5).
///
/// `num_fails` is clamped at the table's last entry for anything at or beyond it.
pub fn reconnect_backoff_secs(num_fails: u32) -> u64 {
    match num_fails {
        0 => 0,
        1 => 5,
        2 => 120,
        3 => 900,
        4 => 1800,
        5 => 3600,
        _ => 7200,
    }
}
