//! The `ObjectStore` service: a concurrency-safe client for the remote
//! object store.
//!
//! Reads degrade rather than fail: every read-side problem (transient
//! 404s, backend outages, memory pressure) eventually collapses to
//! `None` so callers can fall back. Writes surface their errors, since
//! a caller that believes a write succeeded when it did not would
//! corrupt durable state downstream.
//!
//! Read-after-write is best effort. The CDN path in particular may
//! serve stale content; JSON keys bypass the CDN to reduce that risk.
//! There is no caller-supplied cancellation -- each network call
//! carries its own fixed timeout.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::{BackendError, StoreError};
use crate::mem::{MemoryMonitor, ProcessMemoryMonitor};
use crate::metrics::{STORE_READS_TOTAL, STORE_WRITES_REJECTED_TOTAL, STORE_WRITES_TOTAL};
use crate::retry::{retry_async, RetryPolicy};

use super::backend::{AccessPolicy, ByteRange, ObjectBackend, ObjectMetadata, PutOptions};
use super::keys;
use super::s3::S3Backend;

/// Timeout for a CDN fetch attempt.
const CDN_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall timeout for one direct backend read, including body buffering.
const DIRECT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime knobs for [`ObjectStore`], distilled from [`Config`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// CDN base URL; `None` disables the read-through path.
    pub cdn_base_url: Option<String>,
    /// Suppress writes, logging intent instead.
    pub dry_run: bool,
    /// Silently no-op writes while reads keep working.
    pub read_only: bool,
    /// Bypass the soft write threshold (background updater only).
    pub privileged_updater: bool,
    /// Absolute binary-write ceiling; no caller can exceed it.
    pub max_binary_write_bytes: u64,
    /// Soft write threshold applied under memory pressure.
    pub soft_write_bytes: u64,
    /// Largest binary object read while the process lacks headroom.
    pub max_binary_read_bytes: u64,
    /// Backoff policy shared by all read sites.
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cdn_base_url: None,
            dry_run: false,
            read_only: false,
            privileged_updater: false,
            max_binary_write_bytes: 25 * 1024 * 1024,
            soft_write_bytes: 5 * 1024 * 1024,
            max_binary_read_bytes: 20 * 1024 * 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cdn_base_url: if config.cdn.base_url.is_empty() {
                None
            } else {
                Some(config.cdn.base_url.clone())
            },
            dry_run: config.runtime.dry_run,
            read_only: config.runtime.read_only,
            privileged_updater: config.runtime.privileged_updater,
            max_binary_write_bytes: config.limits.max_binary_write_bytes,
            soft_write_bytes: config.limits.soft_write_bytes,
            max_binary_read_bytes: config.limits.max_binary_read_bytes,
            retry: config.retry.policy(),
        }
    }
}

/// Concurrency-safe client for the remote object store.
pub struct ObjectStore {
    backend: Arc<dyn ObjectBackend>,
    memory: Arc<dyn MemoryMonitor>,
    options: StoreOptions,
    http: reqwest::Client,
    /// Coalescing map for in-flight non-range reads: key -> broadcaster
    /// of the settled result. Owned by the service, cleared on every
    /// exit path.
    inflight: Mutex<HashMap<String, broadcast::Sender<Option<Bytes>>>>,
    /// Latch so a dead backend is reported once, not once per call.
    backend_warned: AtomicBool,
}

impl ObjectStore {
    /// Build a store over an explicit backend and memory monitor.
    pub fn new(
        backend: Arc<dyn ObjectBackend>,
        memory: Arc<dyn MemoryMonitor>,
        options: StoreOptions,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CDN_FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            backend,
            memory,
            options,
            http,
            inflight: Mutex::new(HashMap::new()),
            backend_warned: AtomicBool::new(false),
        })
    }

    /// Build a store over the configured S3 backend and the process
    /// memory monitor.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let backend = Arc::new(S3Backend::new(&config.store).await?);
        let memory = Arc::new(ProcessMemoryMonitor::new(config.limits.memory_budget_bytes));
        Self::new(backend, memory, StoreOptions::from_config(config))
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Read the object at `key`, or a byte range of it.
    ///
    /// Returns `None` for absent keys, exhausted retries, declined
    /// oversized binary reads, and backend failures alike; callers are
    /// expected to fall back, not crash. Concurrent non-range reads of
    /// the same key share one underlying fetch.
    pub async fn read_object(&self, key: &str, range: Option<ByteRange>) -> Option<Bytes> {
        if let Some(range) = range {
            // Ranged reads are bounded by the range itself; no
            // coalescing or CDN for them.
            return self.fetch_direct(key, Some(range)).await;
        }

        enum Role {
            Leader,
            Follower(broadcast::Receiver<Option<Bytes>>),
        }

        let role = {
            let mut inflight = self.inflight.lock().expect("inflight map poisoned");
            match inflight.get(key) {
                Some(tx) => Role::Follower(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    inflight.insert(key.to_string(), tx);
                    Role::Leader
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                metrics::counter!(STORE_READS_TOTAL, "source" => "coalesced", "outcome" => "hit")
                    .increment(1);
                match rx.recv().await {
                    Ok(result) => result,
                    // The leader was cancelled before settling; fetch
                    // independently rather than hang.
                    Err(_) => self.fetch_uncoalesced(key).await,
                }
            }
            Role::Leader => {
                let guard = InflightGuard { store: self, key };
                let result = self.fetch_uncoalesced(key).await;
                guard.settle(result.clone());
                result
            }
        }
    }

    /// Read `key` without collapsing failures, distinguishing "not
    /// found" (`Ok(None)`) from "backend unreachable" (`Err`). The lock
    /// layer's read-back verification is the caller that needs this.
    pub async fn read_object_checked(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        match self.backend.get(key, None).await {
            Ok(data) => Ok(Some(data)),
            Err(BackendError::KeyNotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// One full (uncoalesced) read: memory gate, CDN attempt, then the
    /// direct retried path.
    async fn fetch_uncoalesced(&self, key: &str) -> Option<Bytes> {
        if keys::is_binary_key(key) && !self.memory.has_headroom() {
            match self.backend.head(key).await {
                Ok(meta) if meta.size > self.options.max_binary_read_bytes => {
                    warn!(
                        "declining read of {key}: {} bytes exceeds the {}-byte cap under memory pressure",
                        meta.size, self.options.max_binary_read_bytes
                    );
                    metrics::counter!(STORE_READS_TOTAL, "source" => "direct", "outcome" => "declined")
                        .increment(1);
                    return None;
                }
                Ok(_) => {}
                Err(BackendError::KeyNotFound) => return None,
                Err(err) => {
                    // Can't verify the size while under pressure; decline.
                    warn!("declining read of {key}: size probe failed under memory pressure ({err})");
                    return None;
                }
            }
        }

        if let Some(base) = &self.options.cdn_base_url {
            if !keys::is_json_key(key) {
                if let Some(data) = self.fetch_cdn(base, key).await {
                    metrics::counter!(STORE_READS_TOTAL, "source" => "cdn", "outcome" => "hit")
                        .increment(1);
                    return Some(data);
                }
            }
        }

        self.fetch_direct(key, None).await
    }

    /// One CDN attempt; any failure or non-2xx falls back to the
    /// direct path.
    async fn fetch_cdn(&self, base: &str, key: &str) -> Option<Bytes> {
        let url = cdn_url(base, key);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(data) => Some(data),
                Err(err) => {
                    debug!("CDN body read failed for {url}: {err}; falling back to store");
                    None
                }
            },
            Ok(resp) => {
                debug!(
                    "CDN returned {} for {url}; falling back to store",
                    resp.status()
                );
                None
            }
            Err(err) => {
                debug!("CDN fetch failed for {url}: {err}; falling back to store");
                None
            }
        }
    }

    /// Direct backend read under the shared retry policy.
    async fn fetch_direct(&self, key: &str, range: Option<ByteRange>) -> Option<Bytes> {
        let backend = &*self.backend;
        let result = retry_async(&self.options.retry, "read_object", move || async move {
            match tokio::time::timeout(DIRECT_FETCH_TIMEOUT, backend.get(key, range)).await {
                Ok(inner) => inner,
                Err(_) => Err(BackendError::other(
                    true,
                    anyhow::anyhow!("read of {key} timed out after {DIRECT_FETCH_TIMEOUT:?}"),
                )),
            }
        })
        .await;

        match result {
            Ok(data) => {
                metrics::counter!(STORE_READS_TOTAL, "source" => "direct", "outcome" => "hit")
                    .increment(1);
                Some(data)
            }
            Err(BackendError::KeyNotFound) => {
                // Absence after the retry budget is an expected outcome,
                // not an error.
                metrics::counter!(STORE_READS_TOTAL, "source" => "direct", "outcome" => "miss")
                    .increment(1);
                None
            }
            Err(err) => {
                self.warn_backend_once("read", key, &err);
                metrics::counter!(STORE_READS_TOTAL, "source" => "direct", "outcome" => "error")
                    .increment(1);
                None
            }
        }
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Write `payload` to `key`, replacing any existing object.
    pub async fn write_object(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        access: AccessPolicy,
    ) -> Result<(), StoreError> {
        self.write_inner(key, payload, content_type, access, false)
            .await
    }

    /// Atomic create-if-absent write (`If-None-Match: *`). Fails with
    /// [`StoreError::PreconditionFailed`] when the key already exists.
    /// Used by the distributed lock.
    pub async fn write_object_if_absent(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        access: AccessPolicy,
    ) -> Result<(), StoreError> {
        self.write_inner(key, payload, content_type, access, true)
            .await
    }

    async fn write_inner(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        access: AccessPolicy,
        if_none_match: bool,
    ) -> Result<(), StoreError> {
        let size = payload.len() as u64;

        // The absolute ceiling holds for every caller, before any
        // network traffic.
        if self.options.max_binary_write_bytes > 0 && size > self.options.max_binary_write_bytes {
            metrics::counter!(STORE_WRITES_REJECTED_TOTAL, "reason" => "too_large").increment(1);
            return Err(StoreError::PayloadTooLarge {
                size,
                limit: self.options.max_binary_write_bytes,
            });
        }

        if size > self.options.soft_write_bytes && !self.memory.has_headroom() {
            if self.options.privileged_updater {
                debug!("privileged updater bypassing soft write threshold for {key} ({size} bytes)");
            } else {
                metrics::counter!(STORE_WRITES_REJECTED_TOTAL, "reason" => "memory_pressure")
                    .increment(1);
                return Err(StoreError::MemoryPressure { size });
            }
        }

        if self.options.dry_run {
            info!("dry run: would write {size} bytes to {key} ({content_type})");
            metrics::counter!(STORE_WRITES_TOTAL, "outcome" => "suppressed").increment(1);
            return Ok(());
        }
        if self.options.read_only {
            debug!("read-only mode: write to {key} suppressed");
            metrics::counter!(STORE_WRITES_TOTAL, "outcome" => "suppressed").increment(1);
            return Ok(());
        }

        let opts = PutOptions {
            content_type: content_type.to_string(),
            access,
            if_none_match,
        };

        match self.backend.put(key, payload, opts).await {
            Ok(()) => {
                metrics::counter!(STORE_WRITES_TOTAL, "outcome" => "ok").increment(1);
                Ok(())
            }
            Err(BackendError::PreconditionFailed) => {
                // Expected control flow for conditional creates.
                debug!("conditional create of {key} lost the race");
                Err(StoreError::PreconditionFailed {
                    key: key.to_string(),
                })
            }
            Err(err) => {
                error!("write of {key} failed: {err}");
                metrics::counter!(STORE_WRITES_TOTAL, "outcome" => "error").increment(1);
                Err(err.into())
            }
        }
    }

    // ── Enumeration and best-effort operations ─────────────────────

    /// List every key under `prefix`. Returns an empty list (never an
    /// error) on enumeration failure.
    pub async fn list_objects(&self, prefix: &str) -> Vec<String> {
        match self.list_objects_checked(prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                self.warn_backend_once("list", prefix, &err);
                Vec::new()
            }
        }
    }

    pub(crate) async fn list_objects_checked(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.backend.list(prefix).await?)
    }

    /// Delete the object at `key`, best effort. Returns whether the
    /// delete went through.
    pub async fn delete_object(&self, key: &str) -> bool {
        match self.delete_object_checked(key).await {
            Ok(()) => true,
            Err(err) => {
                warn!("delete of {key} failed: {err}");
                false
            }
        }
    }

    pub(crate) async fn delete_object_checked(&self, key: &str) -> Result<(), StoreError> {
        if self.options.dry_run {
            info!("dry run: would delete {key}");
            return Ok(());
        }
        if self.options.read_only {
            debug!("read-only mode: delete of {key} suppressed");
            return Ok(());
        }
        match self.backend.delete(key).await {
            Ok(()) | Err(BackendError::KeyNotFound) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether an object exists at `key`. Backend failures read as
    /// "absent".
    pub async fn exists_object(&self, key: &str) -> bool {
        self.get_metadata(key).await.is_some()
    }

    /// Probe object metadata, best effort.
    pub async fn get_metadata(&self, key: &str) -> Option<ObjectMetadata> {
        match self.backend.head(key).await {
            Ok(meta) => Some(meta),
            Err(BackendError::KeyNotFound) => None,
            Err(err) => {
                self.warn_backend_once("head", key, &err);
                None
            }
        }
    }

    /// Report a degraded backend loudly once, then quietly.
    fn warn_backend_once(&self, op: &str, key: &str, err: &impl std::fmt::Display) {
        if !self.backend_warned.swap(true, Ordering::Relaxed) {
            warn!("object store backend degraded ({op} {key}): {err}");
        } else {
            debug!("backend {op} of {key} failed: {err}");
        }
    }
}

/// Removes a coalescing entry when the leader settles or is cancelled
/// mid-flight, so followers never wait on a dead broadcaster.
struct InflightGuard<'a> {
    store: &'a ObjectStore,
    key: &'a str,
}

impl InflightGuard<'_> {
    fn settle(self, result: Option<Bytes>) {
        if let Some(tx) = self.take() {
            // No receivers is fine; the result still returns to the leader.
            let _ = tx.send(result);
        }
        std::mem::forget(self);
    }

    fn take(&self) -> Option<broadcast::Sender<Option<Bytes>>> {
        self.store
            .inflight
            .lock()
            .expect("inflight map poisoned")
            .remove(self.key)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        // Cancellation path: dropping the sender wakes followers, which
        // then fetch independently.
        self.take();
    }
}

/// Join a CDN base URL and a key.
fn cdn_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::StaticMemoryMonitor;
    use crate::store::memory::MemoryBackend;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter_ratio: 0.0,
        }
    }

    fn store_over(
        backend: Arc<MemoryBackend>,
        headroom: bool,
        options: StoreOptions,
    ) -> ObjectStore {
        ObjectStore::new(
            backend,
            Arc::new(StaticMemoryMonitor::new(headroom)),
            StoreOptions {
                retry: fast_retry(),
                ..options
            },
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_coalesce_to_one_fetch() {
        let backend = Arc::new(MemoryBackend::with_get_delay(Duration::from_millis(50)));
        backend
            .insert("posts/a.md", Bytes::from_static(b"body"), "text/markdown")
            .await;
        let store = Arc::new(store_over(backend.clone(), true, StoreOptions::default()));

        let (a, b) = tokio::join!(
            store.read_object("posts/a.md", None),
            store.read_object("posts/a.md", None),
        );

        assert_eq!(a, Some(Bytes::from_static(b"body")));
        assert_eq!(b, Some(Bytes::from_static(b"body")));
        assert_eq!(backend.get_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_reads_fetch_independently() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("k.txt", Bytes::from_static(b"v"), "text/plain").await;
        let store = store_over(backend.clone(), true, StoreOptions::default());

        assert!(store.read_object("k.txt", None).await.is_some());
        assert!(store.read_object("k.txt", None).await.is_some());
        assert_eq!(backend.get_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("k.txt", Bytes::from_static(b"v"), "text/plain").await;
        backend.push_get_error(BackendError::other(true, anyhow::anyhow!("flaky")));
        backend.push_get_error(BackendError::KeyNotFound);
        let store = store_over(backend.clone(), true, StoreOptions::default());

        assert_eq!(
            store.read_object("k.txt", None).await,
            Some(Bytes::from_static(b"v"))
        );
        assert_eq!(backend.get_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_key_retries_then_resolves_none() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_over(backend.clone(), true, StoreOptions::default());

        assert_eq!(store.read_object("missing.txt", None).await, None);
        assert_eq!(backend.get_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_fails_fast_to_none() {
        let backend = Arc::new(MemoryBackend::new());
        backend.push_get_error(BackendError::other(false, anyhow::anyhow!("denied")));
        let store = store_over(backend.clone(), true, StoreOptions::default());

        assert_eq!(store.read_object("k.txt", None).await, None);
        assert_eq!(backend.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_oversized_binary_read_declined_under_pressure() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert("assets/huge.png", Bytes::from(vec![0u8; 64]), "image/png")
            .await;
        let store = store_over(
            backend.clone(),
            false,
            StoreOptions {
                max_binary_read_bytes: 16,
                ..StoreOptions::default()
            },
        );

        assert_eq!(store.read_object("assets/huge.png", None).await, None);
        // The size probe declined before any get was issued.
        assert_eq!(backend.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_binary_read_allowed_with_headroom() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert("assets/huge.png", Bytes::from(vec![0u8; 64]), "image/png")
            .await;
        let store = store_over(
            backend.clone(),
            true,
            StoreOptions {
                max_binary_read_bytes: 16,
                ..StoreOptions::default()
            },
        );

        assert!(store.read_object("assets/huge.png", None).await.is_some());
    }

    #[tokio::test]
    async fn test_write_above_absolute_cap_always_fails() {
        let backend = Arc::new(MemoryBackend::new());
        // Abundant headroom; the ceiling must hold anyway.
        let store = store_over(
            backend.clone(),
            true,
            StoreOptions {
                max_binary_write_bytes: 8,
                privileged_updater: true,
                ..StoreOptions::default()
            },
        );

        let result = store
            .write_object(
                "assets/big.bin",
                Bytes::from(vec![0u8; 9]),
                "application/octet-stream",
                AccessPolicy::Private,
            )
            .await;
        assert!(matches!(result, Err(StoreError::PayloadTooLarge { .. })));
        assert_eq!(backend.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_soft_threshold_rejects_under_pressure() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_over(
            backend.clone(),
            false,
            StoreOptions {
                soft_write_bytes: 8,
                ..StoreOptions::default()
            },
        );

        let result = store
            .write_object("a.txt", Bytes::from(vec![0u8; 9]), "text/plain", AccessPolicy::Private)
            .await;
        assert!(matches!(result, Err(StoreError::MemoryPressure { .. })));

        // Small payloads still go through.
        let small = store
            .write_object("b.txt", Bytes::from(vec![0u8; 4]), "text/plain", AccessPolicy::Private)
            .await;
        assert!(small.is_ok());
    }

    #[tokio::test]
    async fn test_privileged_updater_bypasses_soft_threshold_only() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_over(
            backend.clone(),
            false,
            StoreOptions {
                soft_write_bytes: 8,
                max_binary_write_bytes: 64,
                privileged_updater: true,
                ..StoreOptions::default()
            },
        );

        let soft = store
            .write_object("a.txt", Bytes::from(vec![0u8; 16]), "text/plain", AccessPolicy::Private)
            .await;
        assert!(soft.is_ok());

        let absolute = store
            .write_object("b.txt", Bytes::from(vec![0u8; 65]), "text/plain", AccessPolicy::Private)
            .await;
        assert!(matches!(absolute, Err(StoreError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_read_only_mode_suppresses_writes_silently() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("k.txt", Bytes::from_static(b"v"), "text/plain").await;
        let store = store_over(
            backend.clone(),
            true,
            StoreOptions {
                read_only: true,
                ..StoreOptions::default()
            },
        );

        let result = store
            .write_object("new.txt", Bytes::from_static(b"x"), "text/plain", AccessPolicy::Private)
            .await;
        assert!(result.is_ok());
        assert_eq!(backend.put_calls(), 0);
        assert!(!backend.contains("new.txt").await);

        // Reads keep working.
        assert!(store.read_object("k.txt", None).await.is_some());
    }

    #[tokio::test]
    async fn test_dry_run_suppresses_writes_and_deletes() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("k.txt", Bytes::from_static(b"v"), "text/plain").await;
        let store = store_over(
            backend.clone(),
            true,
            StoreOptions {
                dry_run: true,
                ..StoreOptions::default()
            },
        );

        assert!(store
            .write_object("new.txt", Bytes::from_static(b"x"), "text/plain", AccessPolicy::Private)
            .await
            .is_ok());
        assert!(store.delete_object("k.txt").await);
        assert!(backend.contains("k.txt").await);
        assert_eq!(backend.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_write_if_absent_reports_lost_race() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_over(backend.clone(), true, StoreOptions::default());

        assert!(store
            .write_object_if_absent("locks/a.json", Bytes::from_static(b"{}"), "application/json", AccessPolicy::Private)
            .await
            .is_ok());
        let second = store
            .write_object_if_absent("locks/a.json", Bytes::from_static(b"{}"), "application/json", AccessPolicy::Private)
            .await;
        assert!(matches!(second, Err(StoreError::PreconditionFailed { .. })));
    }

    #[tokio::test]
    async fn test_checked_read_distinguishes_absent_from_unreachable() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_over(backend.clone(), true, StoreOptions::default());

        assert!(matches!(store.read_object_checked("missing").await, Ok(None)));

        backend.push_get_error(BackendError::other(false, anyhow::anyhow!("unreachable")));
        assert!(store.read_object_checked("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_list_failure_collapses_to_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("locks/a.json", Bytes::new(), "application/json").await;
        let store = store_over(backend.clone(), true, StoreOptions::default());

        assert_eq!(store.list_objects("locks/").await, vec!["locks/a.json"]);

        backend.fail_lists(true);
        assert!(store.list_objects("locks/").await.is_empty());
    }

    #[tokio::test]
    async fn test_exists_and_metadata() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("k.txt", Bytes::from_static(b"12345"), "text/plain").await;
        let store = store_over(backend.clone(), true, StoreOptions::default());

        assert!(store.exists_object("k.txt").await);
        assert!(!store.exists_object("missing.txt").await);
        let meta = store.get_metadata("k.txt").await.unwrap();
        assert_eq!(meta.size, 5);
        assert!(meta.etag.is_some());
    }

    #[test]
    fn test_cdn_url_join() {
        assert_eq!(
            cdn_url("https://cdn.example.com/", "assets/logo.png"),
            "https://cdn.example.com/assets/logo.png"
        );
        assert_eq!(
            cdn_url("https://cdn.example.com", "assets/logo.png"),
            "https://cdn.example.com/assets/logo.png"
        );
    }
}
