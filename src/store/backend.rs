//! Abstract object store backend trait.
//!
//! Every backend must implement [`ObjectBackend`]. The trait works in
//! terms of opaque byte payloads so callers do not need to know the
//! underlying store, and its error type distinguishes the two outcomes
//! the layers above depend on: absent keys and lost conditional
//! creates.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

use crate::errors::BackendError;

/// Who may read an object once stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Only authenticated store credentials can read.
    #[default]
    Private,
    /// Anyone with the URL can read (e.g. CDN-fronted assets).
    PublicRead,
}

/// Options for a single put.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// MIME content type recorded on the object.
    pub content_type: String,
    /// Read access policy.
    pub access: AccessPolicy,
    /// Atomic create-if-absent (`If-None-Match: *`). The put fails with
    /// [`BackendError::PreconditionFailed`] if the key already exists.
    pub if_none_match: bool,
}

/// Inclusive byte range for a partial read (`bytes=start-end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Metadata from a head probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Declared size in bytes.
    pub size: u64,
    /// Quoted ETag, when the store reports one.
    pub etag: Option<String>,
    /// Last modification time as epoch milliseconds, when reported.
    pub last_modified_ms: Option<i64>,
}

/// Async object store contract.
pub trait ObjectBackend: Send + Sync + 'static {
    /// Read the object at `key`, optionally a byte range of it.
    fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, BackendError>> + Send + '_>>;

    /// Write `data` to `key`, replacing any existing object unless
    /// `opts.if_none_match` is set.
    fn put(
        &self,
        key: &str,
        data: Bytes,
        opts: PutOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;

    /// Delete the object at `key`. Deleting an absent key is not an error.
    fn delete(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;

    /// Probe metadata without transferring the payload.
    fn head(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectMetadata, BackendError>> + Send + '_>>;

    /// List every key under `prefix`, paging through continuation
    /// tokens until exhausted.
    fn list(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, BackendError>> + Send + '_>>;
}
