//! Object store layer: the abstract backend contract, its S3 and
//! in-memory implementations, key conventions, and the gating client.

pub mod backend;
pub mod client;
pub mod keys;
pub mod memory;
pub mod s3;

pub use backend::{AccessPolicy, ByteRange, ObjectBackend, ObjectMetadata, PutOptions};
pub use client::{ObjectStore, StoreOptions};
