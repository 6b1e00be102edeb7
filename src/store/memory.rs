//! In-memory object store backend.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>` map with
//! no persistence. Useful for tests and ephemeral deployments; the
//! instrumentation knobs (call counters, scripted failures, injectable
//! read latency) exist so the client's coalescing, retry, and gating
//! behavior can be asserted deterministically.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::BackendError;

use super::backend::{AccessPolicy, ByteRange, ObjectBackend, ObjectMetadata, PutOptions};

/// One stored object plus the metadata a head probe would report.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
    pub access: AccessPolicy,
    pub etag: String,
    pub last_modified_ms: i64,
}

/// In-memory backend with test instrumentation.
#[derive(Default)]
pub struct MemoryBackend {
    objects: tokio::sync::RwLock<HashMap<String, StoredBlob>>,
    get_calls: AtomicU64,
    put_calls: AtomicU64,
    etag_seq: AtomicU64,
    /// Artificial latency applied to every get, so concurrent readers
    /// actually overlap in tests.
    get_delay: Duration,
    /// Errors served by upcoming gets, oldest first, before the map is
    /// consulted.
    scripted_get_errors: Mutex<VecDeque<BackendError>>,
    /// When set, list calls fail with a backend error.
    fail_lists: std::sync::atomic::AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get_delay(get_delay: Duration) -> Self {
        Self {
            get_delay,
            ..Self::default()
        }
    }

    /// Queue an error to be returned by the next get call.
    pub fn push_get_error(&self, err: BackendError) {
        self.scripted_get_errors
            .lock()
            .expect("scripted error queue poisoned")
            .push_back(err);
    }

    /// Number of get calls issued against this backend.
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of put calls issued against this backend.
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent list calls fail.
    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Seed an object directly, bypassing the put path.
    pub async fn insert(&self, key: &str, data: Bytes, content_type: &str) {
        let blob = StoredBlob {
            data,
            content_type: content_type.to_string(),
            access: AccessPolicy::Private,
            etag: self.next_etag(),
            last_modified_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.objects.write().await.insert(key.to_string(), blob);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn blob(&self, key: &str) -> Option<StoredBlob> {
        self.objects.read().await.get(key).cloned()
    }

    fn next_etag(&self) -> String {
        format!("\"mem-{}\"", self.etag_seq.fetch_add(1, Ordering::SeqCst))
    }

    fn slice_range(data: &Bytes, range: ByteRange) -> Result<Bytes, BackendError> {
        let len = data.len() as u64;
        if range.start >= len || range.end < range.start {
            return Err(BackendError::other(
                false,
                anyhow::anyhow!("range {}-{} not satisfiable for {len} bytes", range.start, range.end),
            ));
        }
        let end = (range.end + 1).min(len);
        Ok(data.slice(range.start as usize..end as usize))
    }
}

impl ObjectBackend for MemoryBackend {
    fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, BackendError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if !self.get_delay.is_zero() {
                tokio::time::sleep(self.get_delay).await;
            }
            if let Some(err) = self
                .scripted_get_errors
                .lock()
                .expect("scripted error queue poisoned")
                .pop_front()
            {
                return Err(err);
            }
            let objects = self.objects.read().await;
            let blob = objects.get(&key).ok_or(BackendError::KeyNotFound)?;
            match range {
                Some(range) => Self::slice_range(&blob.data, range),
                None => Ok(blob.data.clone()),
            }
        })
    }

    fn put(
        &self,
        key: &str,
        data: Bytes,
        opts: PutOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            let mut objects = self.objects.write().await;
            if opts.if_none_match && objects.contains_key(&key) {
                return Err(BackendError::PreconditionFailed);
            }
            let blob = StoredBlob {
                data,
                content_type: opts.content_type,
                access: opts.access,
                etag: self.next_etag(),
                last_modified_ms: chrono::Utc::now().timestamp_millis(),
            };
            objects.insert(key, blob);
            Ok(())
        })
    }

    fn delete(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.objects.write().await.remove(&key);
            Ok(())
        })
    }

    fn head(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectMetadata, BackendError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            let blob = objects.get(&key).ok_or(BackendError::KeyNotFound)?;
            Ok(ObjectMetadata {
                size: blob.data.len() as u64,
                etag: Some(blob.etag.clone()),
                last_modified_ms: Some(blob.last_modified_ms),
            })
        })
    }

    fn list(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, BackendError>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            if self.fail_lists.load(Ordering::SeqCst) {
                return Err(BackendError::other(
                    false,
                    anyhow::anyhow!("injected list failure"),
                ));
            }
            let objects = self.objects.read().await;
            let mut keys: Vec<String> = objects
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .put(
                "posts/a.md",
                Bytes::from_static(b"hello"),
                PutOptions {
                    content_type: "text/markdown".into(),
                    ..PutOptions::default()
                },
            )
            .await
            .unwrap();
        let data = backend.get("posts/a.md", None).await.unwrap();
        assert_eq!(data, Bytes::from_static(b"hello"));
        assert_eq!(backend.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_get_absent_key_is_not_found() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.get("missing", None).await,
            Err(BackendError::KeyNotFound)
        ));
    }

    #[tokio::test]
    async fn test_if_none_match_rejects_existing() {
        let backend = MemoryBackend::new();
        let opts = PutOptions {
            if_none_match: true,
            ..PutOptions::default()
        };
        backend
            .put("locks/a.json", Bytes::from_static(b"{}"), opts.clone())
            .await
            .unwrap();
        let second = backend
            .put("locks/a.json", Bytes::from_static(b"{}"), opts)
            .await;
        assert!(matches!(second, Err(BackendError::PreconditionFailed)));
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let backend = MemoryBackend::new();
        backend
            .insert("assets/blob", Bytes::from_static(b"0123456789"), "application/octet-stream")
            .await;
        let chunk = backend
            .get("assets/blob", Some(ByteRange { start: 2, end: 4 }))
            .await
            .unwrap();
        assert_eq!(chunk, Bytes::from_static(b"234"));
        // End past the payload is clamped, as with HTTP range semantics.
        let tail = backend
            .get("assets/blob", Some(ByteRange { start: 8, end: 99 }))
            .await
            .unwrap();
        assert_eq!(tail, Bytes::from_static(b"89"));
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let backend = MemoryBackend::new();
        backend.insert("locks/b.json", Bytes::new(), "application/json").await;
        backend.insert("locks/a.json", Bytes::new(), "application/json").await;
        backend.insert("posts/x.md", Bytes::new(), "text/markdown").await;
        let keys = backend.list("locks/").await.unwrap();
        assert_eq!(keys, vec!["locks/a.json", "locks/b.json"]);
    }

    #[tokio::test]
    async fn test_scripted_errors_are_served_in_order() {
        let backend = MemoryBackend::new();
        backend.insert("k", Bytes::from_static(b"v"), "text/plain").await;
        backend.push_get_error(BackendError::KeyNotFound);
        assert!(backend.get("k", None).await.is_err());
        assert!(backend.get("k", None).await.is_ok());
    }
}
