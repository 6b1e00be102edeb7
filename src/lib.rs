//! blobgate -- storage-coordination core.
//!
//! A concurrency-safe client for a remote, eventually-consistent object
//! store, plus two services built on it: an advisory distributed lock
//! (conditional creates with read-back verification) and an in-process
//! per-client rate limiter. The surrounding system calls into this
//! crate for durable state and cross-process serialization; everything
//! here degrades rather than crashes when the backend is away.

pub mod clock;
pub mod config;
pub mod errors;
pub mod lock;
pub mod mem;
pub mod metrics;
pub mod ratelimit;
pub mod retry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, Config, LoggingConfig};
pub use errors::{BackendError, RateLimitError, StoreError};
pub use lock::{DistributedLock, InMemoryLockStore, LockEntry, LockStore, ObjectLockStore};
pub use ratelimit::{
    RateLimitConfig, RateLimiter, GLOBAL_CLIENT_ID, INTERNAL_API_LIMIT, METADATA_SERVICE_LIMIT,
};
pub use retry::RetryPolicy;
pub use store::{
    AccessPolicy, ByteRange, ObjectBackend, ObjectMetadata, ObjectStore, PutOptions, StoreOptions,
};

/// Initialize tracing for a host process.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    if logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
