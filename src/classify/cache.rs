use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use tokio::sync::watch;

use crate::models::Classification;

type FlightKey = (String, String);
type InFlight = Arc<Mutex<HashMap<FlightKey, Flight>>>;

/// A registered computation; `id` tells successive claims of one key apart.
struct Flight {
    id: u64,
    sender: watch::Sender<Option<Classification>>,
}

/// Session-scoped map from review fingerprint to its classification, with
/// LRU eviction and single-flight computation per (fingerprint, model version).
pub struct ClassificationCache {
    entries: Mutex<LruCache<String, Classification>>,
    in_flight: InFlight,
    next_flight: AtomicU64,
}

/// Outcome of claiming a fingerprint for classification.
pub enum Lookup {
    /// Already classified under this model version.
    Hit(Classification),
    /// The caller owns the computation and must `complete` the guard.
    Compute(ComputeGuard),
    /// Another task is computing it; wait on the handle.
    Wait(PendingClassification),
}

/// Held by the single task computing a key. Dropping it without completing
/// releases waiters, who then claim the key again.
pub struct ComputeGuard {
    key: FlightKey,
    id: u64,
    in_flight: InFlight,
}

pub struct PendingClassification {
    receiver: watch::Receiver<Option<Classification>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ClassificationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(0),
        }
    }

    pub fn get(&self, fingerprint: &str, model_version: &str) -> Option<Classification> {
        let mut entries = lock(&self.entries);
        entries
            .get(fingerprint)
            .filter(|c| c.model_version == model_version)
            .cloned()
    }

    /// Stores a classification. A result for a different model version is
    /// replaced; an existing result for the same version is kept as is.
    /// Returns whether the cache changed.
    pub fn put(&self, fingerprint: &str, model_version: &str, mut classification: Classification) -> bool {
        classification.fingerprint = fingerprint.to_string();
        classification.model_version = model_version.to_string();

        let mut entries = lock(&self.entries);
        let existing = entries
            .peek(fingerprint)
            .filter(|e| e.model_version == model_version)
            .map(|e| e.same_content(&classification));

        if let Some(identical) = existing {
            if !identical {
                tracing::debug!(
                    "Keeping existing classification for {} under {}",
                    fingerprint,
                    model_version
                );
            }
            entries.promote(fingerprint);
            return false;
        }

        if let Some((evicted, _)) = entries.push(fingerprint.to_string(), classification) {
            if evicted != fingerprint {
                tracing::debug!("Evicted classification {} from cache", evicted);
            }
        }
        true
    }

    /// Resolves a key to a hit, or registers the caller as its only computer,
    /// or hands back a handle on the computation already running.
    pub fn claim(&self, fingerprint: &str, model_version: &str) -> Lookup {
        let mut in_flight = lock(&self.in_flight);

        if let Some(hit) = self.get(fingerprint, model_version) {
            return Lookup::Hit(hit);
        }

        let key = (fingerprint.to_string(), model_version.to_string());
        if let Some(flight) = in_flight.get(&key) {
            return Lookup::Wait(PendingClassification {
                receiver: flight.sender.subscribe(),
            });
        }

        let (sender, _) = watch::channel(None);
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(key.clone(), Flight { id, sender });
        Lookup::Compute(ComputeGuard {
            key,
            id,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock(&self.entries).cap().get()
    }
}

impl ComputeGuard {
    /// Writes the result to the cache, then wakes every waiter with it.
    pub fn complete(self, cache: &ClassificationCache, classification: Classification) {
        let mut in_flight = lock(&self.in_flight);
        cache.put(&self.key.0, &self.key.1, classification);
        let stored = cache.get(&self.key.0, &self.key.1);
        if let Some(flight) = self.release(&mut in_flight) {
            flight.sender.send_replace(stored);
        }
    }

    /// Unregisters this guard's own flight; a later claim of the same key
    /// is left alone.
    fn release(&self, in_flight: &mut HashMap<FlightKey, Flight>) -> Option<Flight> {
        match in_flight.get(&self.key) {
            Some(flight) if flight.id == self.id => in_flight.remove(&self.key),
            _ => None,
        }
    }
}

impl Drop for ComputeGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.in_flight);
        self.release(&mut in_flight);
    }
}

impl PendingClassification {
    /// Waits for the computing task. `None` means it gave up without a result.
    pub async fn wait(mut self) -> Option<Classification> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sentiment;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn classification(fp: &str, version: &str, sentiment: Sentiment) -> Classification {
        Classification {
            fingerprint: fp.to_string(),
            sentiment,
            topics: BTreeSet::from(["performance".to_string()]),
            summary: "summary".to_string(),
            feature_request: None,
            model_version: version.to_string(),
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_get_respects_model_version() {
        let cache = ClassificationCache::new(10);
        cache.put("fp", "v1", classification("fp", "v1", Sentiment::Positive));

        assert!(cache.get("fp", "v1").is_some());
        assert!(cache.get("fp", "v2").is_none());
    }

    #[test]
    fn test_same_version_write_keeps_first() {
        let cache = ClassificationCache::new(10);
        assert!(cache.put("fp", "v1", classification("fp", "v1", Sentiment::Positive)));
        assert!(!cache.put("fp", "v1", classification("fp", "v1", Sentiment::Negative)));
        assert_eq!(cache.get("fp", "v1").unwrap().sentiment, Sentiment::Positive);
    }

    #[test]
    fn test_new_version_overwrites() {
        let cache = ClassificationCache::new(10);
        cache.put("fp", "v1", classification("fp", "v1", Sentiment::Positive));
        assert!(cache.put("fp", "v2", classification("fp", "v2", Sentiment::Negative)));
        assert_eq!(cache.get("fp", "v2").unwrap().sentiment, Sentiment::Negative);
        assert!(cache.get("fp", "v1").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ClassificationCache::new(2);
        cache.put("a", "v1", classification("a", "v1", Sentiment::Positive));
        cache.put("b", "v1", classification("b", "v1", Sentiment::Positive));
        // touch "a" so "b" is least recently used
        assert!(cache.get("a", "v1").is_some());
        cache.put("c", "v1", classification("c", "v1", Sentiment::Positive));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a", "v1").is_some());
        assert!(cache.get("b", "v1").is_none());
        assert!(cache.get("c", "v1").is_some());
    }

    #[test]
    fn test_second_claim_waits() {
        let cache = ClassificationCache::new(10);
        let first = cache.claim("fp", "v1");
        let second = cache.claim("fp", "v1");

        assert!(matches!(first, Lookup::Compute(_)));
        assert!(matches!(second, Lookup::Wait(_)));
    }

    #[tokio::test]
    async fn test_waiter_receives_completed_result() {
        let cache = Arc::new(ClassificationCache::new(10));
        let guard = match cache.claim("fp", "v1") {
            Lookup::Compute(g) => g,
            _ => panic!("expected to compute"),
        };
        let pending = match cache.claim("fp", "v1") {
            Lookup::Wait(p) => p,
            _ => panic!("expected to wait"),
        };

        let waiter = tokio::spawn(pending.wait());
        guard.complete(&cache, classification("fp", "v1", Sentiment::Negative));

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.sentiment, Sentiment::Negative);
        assert!(matches!(cache.claim("fp", "v1"), Lookup::Hit(_)));
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_waiters() {
        let cache = ClassificationCache::new(10);
        let guard = match cache.claim("fp", "v1") {
            Lookup::Compute(g) => g,
            _ => panic!("expected to compute"),
        };
        let pending = match cache.claim("fp", "v1") {
            Lookup::Wait(p) => p,
            _ => panic!("expected to wait"),
        };

        drop(guard);
        assert!(pending.wait().await.is_none());
        assert!(matches!(cache.claim("fp", "v1"), Lookup::Compute(_)));
    }

    #[test]
    fn test_stale_guard_leaves_newer_flight() {
        let cache = ClassificationCache::new(1);
        let first = match cache.claim("fp", "v1") {
            Lookup::Compute(g) => g,
            _ => panic!("expected to compute"),
        };
        // the first flight finished and its entry was evicted
        lock(&cache.in_flight).clear();
        let second = match cache.claim("fp", "v1") {
            Lookup::Compute(g) => g,
            _ => panic!("expected to compute"),
        };

        drop(first);
        assert!(matches!(cache.claim("fp", "v1"), Lookup::Wait(_)));

        second.complete(&cache, classification("fp", "v1", Sentiment::Positive));
        assert!(matches!(cache.claim("fp", "v1"), Lookup::Hit(_)));
    }
}
