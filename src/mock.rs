//! In-crate mocks of the external collaborator traits (§6), for use across
//! unit and integration tests.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::traits::{
    AddRequestResult, Blocklist, ChannelId, IoReactor, Messages, Storage, SubscriptionTag,
    WebseedAddResult,
};

/// Records every call made through it so tests can assert on them.
#[derive(Default)]
pub struct MockMessages {
    pub choked: Option<bool>,
    pub cancels: Vec<(usize, usize, usize)>,
    pub haves: Vec<usize>,
    pub flush_count: u32,
    pub next_result: AddRequestResult,
    pub requests: Vec<(usize, usize, usize)>,
    pub subscribed: bool,
    pub unsubscribed_with: Option<SubscriptionTag>,
}

impl Messages for MockMessages {
    fn set_choke(&mut self, choke: bool) {
        self.choked = Some(choke);
    }

    fn cancel(&mut self, piece: usize, offset: usize, len: usize) {
        self.cancels.push((piece, offset, len));
    }

    fn have(&mut self, piece: usize) {
        self.haves.push(piece);
    }

    fn add_request(&mut self, piece: usize, offset: usize, len: usize) -> AddRequestResult {
        self.requests.push((piece, offset, len));
        self.next_result
    }

    fn flush(&mut self) {
        self.flush_count += 1;
    }

    fn subscribe(&mut self) -> SubscriptionTag {
        self.subscribed = true;
        SubscriptionTag(1)
    }

    fn unsubscribe(&mut self, tag: SubscriptionTag) {
        self.unsubscribed_with = Some(tag);
    }
}

/// A handle to a [`MockMessages`] shared between a [`crate::peer::Peer`]
/// (which owns a `Box<dyn Messages>`) and the test that needs to inspect
/// what was called on it after the fact.
#[derive(Clone, Default)]
pub struct SharedMockMessages(pub Arc<Mutex<MockMessages>>);

impl SharedMockMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn Messages> {
        Box::new(self.clone())
    }
}

impl Messages for SharedMockMessages {
    fn set_choke(&mut self, choke: bool) {
        self.0.lock().unwrap().set_choke(choke);
    }

    fn cancel(&mut self, piece: usize, offset: usize, len: usize) {
        self.0.lock().unwrap().cancel(piece, offset, len);
    }

    fn have(&mut self, piece: usize) {
        self.0.lock().unwrap().have(piece);
    }

    fn add_request(&mut self, piece: usize, offset: usize, len: usize) -> AddRequestResult {
        self.0.lock().unwrap().add_request(piece, offset, len)
    }

    fn flush(&mut self) {
        self.0.lock().unwrap().flush();
    }

    fn subscribe(&mut self) -> SubscriptionTag {
        self.0.lock().unwrap().subscribe()
    }

    fn unsubscribe(&mut self, tag: SubscriptionTag) {
        self.0.lock().unwrap().unsubscribe(tag);
    }
}

/// A storage mock that, by default, hashes whatever bytes were actually
/// written to a piece with real SHA-1 and compares against an expected hash
/// (grounded on `PieceBuf::verify_hash` in the teacher's disk layer), so a
/// test exercising corruption can write bytes that genuinely don't match.
/// `set_verify` overrides this for tests that want to force an outcome
/// without bothering to construct matching piece bytes.
///
/// Reads go through a small LRU cache keyed by piece index, mirroring the
/// teacher's disk-layer `read_cache` (`disk/torrent.rs`): peers often read
/// several blocks out of the same piece in a row, so caching the whole
/// piece avoids repeating the "disk" lookup for each one.
pub struct MockStorage {
    pub writes: Vec<(usize, usize, Vec<u8>)>,
    pub piece_bytes: HashMap<usize, Vec<u8>>,
    pub expected_hash: HashMap<usize, [u8; 20]>,
    pub verify_result: HashMap<usize, bool>,
    read_cache: LruCache<usize, Vec<u8>>,
}

impl Default for MockStorage {
    fn default() -> Self {
        Self {
            writes: Vec::new(),
            piece_bytes: HashMap::new(),
            expected_hash: HashMap::new(),
            verify_result: HashMap::new(),
            read_cache: LruCache::new(NonZeroUsize::new(64).unwrap()),
        }
    }
}

impl MockStorage {
    /// Force `test_piece(piece)` to return `ok` regardless of written bytes.
    pub fn set_verify(&mut self, piece: usize, ok: bool) {
        self.verify_result.insert(piece, ok);
    }

    /// Set the expected SHA-1 hash a piece's written bytes must match.
    pub fn set_expected_hash(&mut self, piece: usize, hash: [u8; 20]) {
        self.expected_hash.insert(piece, hash);
    }
}

impl Storage for MockStorage {
    fn read_piece(&mut self, piece: usize, begin: usize, len: usize, buf: &mut [u8]) -> std::io::Result<()> {
        if !self.read_cache.contains(&piece) {
            let bytes = self.piece_bytes.get(&piece).cloned().unwrap_or_default();
            self.read_cache.put(piece, bytes);
        }
        let src = self.read_cache.get(&piece).map(|b| b.as_slice()).unwrap_or(&[]);
        for (i, b) in buf.iter_mut().take(len).enumerate() {
            *b = src.get(begin + i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_piece(&mut self, piece: usize, begin: usize, _len: usize, buf: &[u8]) -> std::io::Result<()> {
        self.writes.push((piece, begin, buf.to_vec()));
        let entry = self.piece_bytes.entry(piece).or_default();
        if entry.len() < begin + buf.len() {
            entry.resize(begin + buf.len(), 0);
        }
        entry[begin..begin + buf.len()].copy_from_slice(buf);
        self.read_cache.pop(&piece);
        Ok(())
    }

    fn test_piece(&mut self, piece: usize) -> bool {
        if let Some(ok) = self.verify_result.get(&piece) {
            return *ok;
        }
        let Some(expected) = self.expected_hash.get(&piece) else { return true };
        let bytes = self.piece_bytes.get(&piece).map(|b| b.as_slice()).unwrap_or(&[]);
        use sha1::Digest;
        let mut hasher = sha1::Sha1::new();
        hasher.update(bytes);
        hasher.finalize().as_slice() == expected
    }
}

/// A webseed mock that always accepts up to a fixed in-flight capacity.
pub struct MockWebseed {
    pub capacity: usize,
    pub in_flight: usize,
    pub speed: Option<f64>,
}

impl MockWebseed {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, in_flight: 0, speed: None }
    }
}

impl crate::traits::Webseed for MockWebseed {
    fn add_request(&mut self, _piece: usize, _offset: usize, _len: usize) -> WebseedAddResult {
        if self.in_flight >= self.capacity {
            WebseedAddResult::Full
        } else {
            self.in_flight += 1;
            WebseedAddResult::Ok
        }
    }

    fn speed(&self) -> Option<f64> {
        self.speed
    }

    fn is_active(&self) -> bool {
        self.in_flight > 0
    }
}

/// An I/O reactor mock: every dial succeeds unless the address is in
/// `refuse`, handing back monotonically increasing channel ids.
#[derive(Default)]
pub struct MockIoReactor {
    pub next_channel: u64,
    pub refuse: Vec<Ipv4Addr>,
    pub dialed: Vec<(Ipv4Addr, u16)>,
}

impl IoReactor for MockIoReactor {
    fn new_outgoing(&mut self, addr: Ipv4Addr, port: u16, _info_hash: [u8; 20]) -> Option<ChannelId> {
        self.dialed.push((addr, port));
        if self.refuse.contains(&addr) {
            return None;
        }
        let id = self.next_channel;
        self.next_channel += 1;
        Some(ChannelId(id))
    }

    fn is_encrypted(&self, _channel: ChannelId) -> bool {
        false
    }

    fn age_secs(&self, _channel: ChannelId) -> u64 {
        0
    }
}

/// A blocklist mock backed by an explicit address set.
#[derive(Default)]
pub struct MockBlocklist {
    pub blocked: std::collections::HashSet<Ipv4Addr>,
}

impl Blocklist for MockBlocklist {
    fn is_blocked(&self, addr: Ipv4Addr) -> bool {
        self.blocked.contains(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_hashes_written_bytes_against_expected_hash() {
        use sha1::Digest;
        let data = vec![7u8; 32];
        let mut hasher = sha1::Sha1::new();
        hasher.update(&data);
        let hash: [u8; 20] = hasher.finalize().into();

        let mut storage = MockStorage::default();
        storage.set_expected_hash(0, hash);
        storage.write_piece(0, 0, data.len(), &data).unwrap();
        assert!(storage.test_piece(0));

        storage.write_piece(0, 0, 4, &[0, 0, 0, 0]).unwrap();
        assert!(!storage.test_piece(0));
    }

    #[test]
    fn storage_defaults_to_valid_without_an_expected_hash() {
        let mut storage = MockStorage::default();
        assert!(storage.test_piece(3));
    }

    #[test]
    fn explicit_verify_override_wins_over_hashing() {
        let mut storage = MockStorage::default();
        storage.set_expected_hash(0, [0u8; 20]);
        storage.write_piece(0, 0, 4, &[1, 2, 3, 4]).unwrap();
        storage.set_verify(0, true);
        assert!(storage.test_piece(0));
    }

    #[test]
    fn read_cache_is_invalidated_by_a_later_write() {
        let mut storage = MockStorage::default();
        storage.write_piece(0, 0, 4, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        storage.read_piece(0, 0, 4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        storage.write_piece(0, 0, 4, &[9, 9, 9, 9]).unwrap();
        storage.read_piece(0, 0, 4, &mut buf).unwrap();
        assert_eq!(buf, [9, 9, 9, 9]);
    }
}
