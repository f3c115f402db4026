use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::checksum::Checksum;

/// how long an incomplete fragment set may linger before it is evicted
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fragments belong to the same logical message iff sender, route checksum and message
/// checksum all match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub sender: SocketAddr,
    pub route_checksum: Checksum,
    pub message_checksum: Checksum,
}

struct FragmentSet {
    expected: u32,
    parts: FxHashMap<u32, String>,
}

/// outcome of inserting one fragment
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// the set completed; the joined message is handed to the caller and the key is gone
    Completed(String),
    /// still waiting for fragments; `fresh` is true when this insert created the set, in
    /// which case the caller must schedule the eviction timeout for the key
    Pending { fresh: bool },
}

/// Per-sender buffer of fragments-by-sequence-number with timeout-based eviction of stale
/// partial messages.
///
/// All mutation goes through one coarse mutex: completion detection and eviction for the same
/// key are mutually exclusive by construction, so a completion can never race an eviction.
/// The critical sections only touch the map and never block.
pub struct FragmentStore {
    sets: Mutex<FxHashMap<FragmentKey, FragmentSet>>,
    timeout: Duration,
}

impl FragmentStore {
    pub fn new(timeout: Duration) -> FragmentStore {
        FragmentStore {
            sets: Mutex::new(Default::default()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Inserts one fragment, overwriting any previous payload at the same sequence number
    /// (last write wins, tolerating retransmitted duplicates). Completion is detected purely
    /// by `parts.len() == expected`; arrival order does not matter.
    pub fn insert(
        &self,
        key: FragmentKey,
        seq: u32,
        expected: u32,
        payload: String,
    ) -> InsertOutcome {
        let mut sets = self.sets.lock().unwrap();

        let mut fresh = false;
        let set = sets.entry(key).or_insert_with(|| {
            fresh = true;
            FragmentSet {
                expected,
                parts: Default::default(),
            }
        });

        set.parts.insert(seq, payload);
        trace!(
            "fragment {}/{} for {:?}: {} of {} buffered",
            seq, expected, key, set.parts.len(), set.expected
        );

        if set.parts.len() == set.expected as usize {
            let mut set = sets.remove(&key).expect("set was just inserted into");
            let mut message = String::new();
            for i in 1..=set.expected {
                if let Some(part) = set.parts.remove(&i) {
                    message.push_str(&part);
                }
            }
            return InsertOutcome::Completed(message);
        }

        InsertOutcome::Pending { fresh }
    }

    /// Fired by the eviction timer: drops the key's set if it is still present and incomplete.
    /// Silent data loss is the accepted failure mode for stalled reassembly - no error
    /// reaches any caller. Returns true if a set was evicted.
    pub fn evict_if_incomplete(&self, key: &FragmentKey) -> bool {
        let mut sets = self.sets.lock().unwrap();
        if sets.remove(key).is_some() {
            debug!("evicting stale partial message {:?}", key);
            true
        } else {
            false
        }
    }

    pub fn pending_count(&self) -> usize {
        self.sets.lock().unwrap().len()
    }
}

impl Default for FragmentStore {
    fn default() -> Self {
        FragmentStore::new(DEFAULT_REASSEMBLY_TIMEOUT)
    }
}
