//! Advisory distributed lock over the object store.
//!
//! The only atomicity primitive the backing store offers is
//! create-if-absent, so this is best-effort mutual exclusion for
//! background jobs, not a consensus-backed exclusive lock: under
//! adversarial timing (or an eventually-consistent read path) two
//! holders are possible. Read-back verification after the conditional
//! create narrows that window; it cannot close it. Callers must treat
//! `acquire` returning `true` as advisory.
//!
//! Lock state per key: Unlocked -> Held(owner, expiry) -> Unlocked,
//! where a Held entry older than its TTL is stale -- logically free,
//! but still physically present, so takeover is delete-then-create
//! rather than a plain conditional create.

pub mod store;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::errors::StoreError;
use crate::metrics::{LOCKS_REAPED_TOTAL, LOCK_ACQUISITIONS_TOTAL};

pub use store::{InMemoryLockStore, LockStore, ObjectLockStore, LOCK_KEY_PREFIX};

/// One lock record as stored at `locks/{key}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    /// Opaque identifier of the holding process.
    pub instance_id: String,
    /// Acquisition time, epoch milliseconds.
    pub acquired_at: i64,
    /// Human-readable label for the guarded operation.
    pub operation: String,
    /// Declared time-to-live in milliseconds.
    pub ttl_ms: u64,
}

impl LockEntry {
    /// Age of this entry at `now_ms`, clamped at zero for clock skew.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.acquired_at).max(0)
    }

    /// Whether this entry has outlived `ttl` at `now_ms`.
    pub fn is_stale(&self, now_ms: i64, ttl: Duration) -> bool {
        self.age_ms(now_ms) >= ttl.as_millis() as i64
    }
}

/// Generate an opaque holder identity for callers without a stable one.
pub fn generate_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Best-effort mutual exclusion over a [`LockStore`].
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Try to acquire `lock_key` for `instance_id`.
    ///
    /// Returns `false` when another live holder exists, when the
    /// conditional create loses a race, when read-back verification
    /// sees someone else's entry, or on any backend error -- acquisition
    /// fails safe and never propagates an error.
    pub async fn acquire(
        &self,
        lock_key: &str,
        instance_id: &str,
        operation: &str,
        ttl: Duration,
    ) -> bool {
        match self.try_acquire(lock_key, instance_id, operation, ttl).await {
            Ok(acquired) => {
                let outcome = if acquired { "acquired" } else { "contended" };
                metrics::counter!(LOCK_ACQUISITIONS_TOTAL, "outcome" => outcome).increment(1);
                acquired
            }
            Err(err) => {
                warn!("lock acquisition for {lock_key} failed: {err}");
                metrics::counter!(LOCK_ACQUISITIONS_TOTAL, "outcome" => "error").increment(1);
                false
            }
        }
    }

    async fn try_acquire(
        &self,
        lock_key: &str,
        instance_id: &str,
        operation: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        if let Some(existing) = self.store.read(lock_key).await? {
            if !existing.is_stale(self.clock.now_ms(), ttl) {
                debug!(
                    "lock {lock_key} held by {} for {}",
                    existing.instance_id, existing.operation
                );
                return Ok(false);
            }
            // Stale: clear it, ignoring failures -- a competitor may be
            // deleting or recreating it concurrently.
            debug!(
                "lock {lock_key} held by {} is stale ({}ms old), taking over",
                existing.instance_id,
                existing.age_ms(self.clock.now_ms())
            );
            if let Err(err) = self.store.delete(lock_key).await {
                debug!("ignoring stale-lock delete failure for {lock_key}: {err}");
            }
        }

        let entry = LockEntry {
            instance_id: instance_id.to_string(),
            acquired_at: self.clock.now_ms(),
            operation: operation.to_string(),
            ttl_ms: ttl.as_millis() as u64,
        };

        if !self.store.create_if_absent(lock_key, &entry).await? {
            debug!("lost conditional-create race for {lock_key}");
            return Ok(false);
        }

        // Read back and confirm the store kept *our* entry. Conditional
        // semantics on some backends are weaker than advertised.
        match self.store.read(lock_key).await? {
            Some(current)
                if current.instance_id == entry.instance_id
                    && current.acquired_at == entry.acquired_at =>
            {
                Ok(true)
            }
            other => {
                debug!(
                    "read-back for {lock_key} saw {:?}, not our entry; treating as lost",
                    other.map(|e| e.instance_id)
                );
                Ok(false)
            }
        }
    }

    /// Release `lock_key` if and only if `instance_id` still holds it.
    ///
    /// A mismatched or absent entry is a silent no-op so a process whose
    /// lock expired and was taken over cannot delete the new holder's
    /// entry. Errors are swallowed.
    pub async fn release(&self, lock_key: &str, instance_id: &str) {
        let existing = match self.store.read(lock_key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!("release of {lock_key} could not read entry: {err}");
                return;
            }
        };
        match existing {
            Some(entry) if entry.instance_id == instance_id => {
                if let Err(err) = self.store.delete(lock_key).await {
                    warn!("release of {lock_key} failed to delete entry: {err}");
                }
            }
            Some(entry) => {
                debug!(
                    "release of {lock_key} skipped: held by {} not {instance_id}",
                    entry.instance_id
                );
            }
            None => {
                debug!("release of {lock_key} skipped: no entry");
            }
        }
    }

    /// Sweep every stored lock and delete entries older than `ttl`.
    ///
    /// Returns the number of entries removed. Per-entry failures are
    /// swallowed so one bad record cannot abort the sweep.
    pub async fn cleanup_stale(&self, ttl: Duration) -> usize {
        let lock_keys = match self.store.list().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!("stale-lock sweep could not list locks: {err}");
                return 0;
            }
        };

        let mut removed = 0;
        for lock_key in lock_keys {
            let entry = match self.store.read(&lock_key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    debug!("stale-lock sweep skipping {lock_key}: {err}");
                    continue;
                }
            };
            if !entry.is_stale(self.clock.now_ms(), ttl) {
                continue;
            }
            match self.store.delete(&lock_key).await {
                Ok(()) => {
                    debug!(
                        "reaped stale lock {lock_key} held by {} ({}ms old)",
                        entry.instance_id,
                        entry.age_ms(self.clock.now_ms())
                    );
                    removed += 1;
                }
                Err(err) => debug!("stale-lock sweep failed to delete {lock_key}: {err}"),
            }
        }
        if removed > 0 {
            metrics::counter!(LOCKS_REAPED_TOTAL).increment(removed as u64);
        }
        removed
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const TTL: Duration = Duration::from_secs(30);

    fn lock_with_clock() -> (Arc<InMemoryLockStore>, Arc<ManualClock>, DistributedLock) {
        let store = Arc::new(InMemoryLockStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let lock = DistributedLock::with_clock(store.clone(), clock.clone());
        (store, clock, lock)
    }

    #[tokio::test]
    async fn test_acquire_on_free_key() {
        let (store, clock, lock) = lock_with_clock();
        assert!(lock.acquire("export-job", "p1", "nightly-export", TTL).await);

        let entry = store.entry("export-job").unwrap();
        assert_eq!(entry.instance_id, "p1");
        assert_eq!(entry.operation, "nightly-export");
        assert_eq!(entry.acquired_at, clock.now_ms());
        assert_eq!(entry.ttl_ms, TTL.as_millis() as u64);
    }

    #[tokio::test]
    async fn test_live_holder_blocks_acquisition() {
        let (_store, _clock, lock) = lock_with_clock();
        assert!(lock.acquire("export-job", "p1", "nightly-export", TTL).await);
        assert!(!lock.acquire("export-job", "p2", "nightly-export", TTL).await);
    }

    #[tokio::test]
    async fn test_stale_entry_is_taken_over() {
        let (store, clock, lock) = lock_with_clock();
        assert!(lock.acquire("export-job", "p1", "nightly-export", TTL).await);

        clock.advance(TTL + Duration::from_millis(1));
        assert!(lock.acquire("export-job", "p2", "nightly-export", TTL).await);
        assert_eq!(store.entry("export-job").unwrap().instance_id, "p2");
    }

    #[tokio::test]
    async fn test_exactly_one_concurrent_acquire_wins() {
        let store = Arc::new(InMemoryLockStore::new());
        let lock = Arc::new(DistributedLock::new(store.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let lock = lock.clone();
            tasks.spawn(async move {
                lock.acquire("export-job", &format!("p{i}"), "nightly-export", TTL)
                    .await
            });
        }
        let mut winners = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_release_requires_matching_instance() {
        let (store, _clock, lock) = lock_with_clock();
        assert!(lock.acquire("export-job", "p1", "nightly-export", TTL).await);

        lock.release("export-job", "p2").await;
        assert_eq!(store.entry("export-job").unwrap().instance_id, "p1");

        lock.release("export-job", "p1").await;
        assert!(store.entry("export-job").is_none());

        // Releasing an absent lock is a quiet no-op.
        lock.release("export-job", "p1").await;
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_stale_entries() {
        let (store, clock, lock) = lock_with_clock();
        let now = clock.now_ms();
        store.insert(
            "old-a",
            LockEntry {
                instance_id: "p1".into(),
                acquired_at: now - 60_000,
                operation: "sweep-a".into(),
                ttl_ms: 30_000,
            },
        );
        store.insert(
            "old-b",
            LockEntry {
                instance_id: "p2".into(),
                acquired_at: now - 31_000,
                operation: "sweep-b".into(),
                ttl_ms: 30_000,
            },
        );
        store.insert(
            "fresh",
            LockEntry {
                instance_id: "p3".into(),
                acquired_at: now - 1_000,
                operation: "sweep-c".into(),
                ttl_ms: 30_000,
            },
        );

        let removed = lock.cleanup_stale(Duration::from_secs(30)).await;
        assert_eq!(removed, 2);
        assert!(store.entry("old-a").is_none());
        assert!(store.entry("old-b").is_none());
        assert!(store.entry("fresh").is_some());
    }

    #[tokio::test]
    async fn test_backend_read_failure_fails_safe() {
        let (store, _clock, lock) = lock_with_clock();
        store.fail_reads(true);
        assert!(!lock.acquire("export-job", "p1", "nightly-export", TTL).await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_backend_create_failure_fails_safe() {
        let (store, _clock, lock) = lock_with_clock();
        store.fail_creates(true);
        assert!(!lock.acquire("export-job", "p1", "nightly-export", TTL).await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_read_back_mismatch_is_treated_as_lost() {
        // A store whose conditional create is weaker than advertised:
        // the competitor's entry lands between our create and the
        // read-back. The acquire must not claim victory.
        let (store, clock, lock) = lock_with_clock();
        store.overwrite_after_create(LockEntry {
            instance_id: "intruder".into(),
            acquired_at: clock.now_ms(),
            operation: "nightly-export".into(),
            ttl_ms: TTL.as_millis() as u64,
        });

        assert!(!lock.acquire("export-job", "p1", "nightly-export", TTL).await);
        assert_eq!(store.entry("export-job").unwrap().instance_id, "intruder");
    }

    #[tokio::test]
    async fn test_ttl_handoff_between_two_processes() {
        // Process P1 acquires with a 1s TTL; P2 is locked out until the
        // TTL lapses, then takes over.
        let (store, clock, lock) = lock_with_clock();
        let ttl = Duration::from_millis(1_000);

        assert!(lock.acquire("export-job", "p1", "nightly-export", ttl).await);
        assert!(!lock.acquire("export-job", "p2", "nightly-export", ttl).await);

        clock.advance(Duration::from_millis(1_100));
        assert!(lock.acquire("export-job", "p2", "nightly-export", ttl).await);
        assert_eq!(store.entry("export-job").unwrap().instance_id, "p2");
    }

    #[test]
    fn test_entry_staleness_math() {
        let entry = LockEntry {
            instance_id: "p1".into(),
            acquired_at: 10_000,
            operation: "x".into(),
            ttl_ms: 1_000,
        };
        assert_eq!(entry.age_ms(10_500), 500);
        // Clock skew clamps to zero rather than going negative.
        assert_eq!(entry.age_ms(9_000), 0);
        assert!(!entry.is_stale(10_999, Duration::from_millis(1_000)));
        assert!(entry.is_stale(11_000, Duration::from_millis(1_000)));
    }

    #[test]
    fn test_generated_instance_ids_are_unique() {
        assert_ne!(generate_instance_id(), generate_instance_id());
    }
}
