//! Metric names recorded by this crate.
//!
//! Uses the `metrics` facade only; the host process installs whatever
//! recorder/exporter it wants. Call [`describe_metrics`] once after
//! installing the recorder.

use metrics::{describe_counter, describe_gauge};

/// Object reads (counter). Labels: source (cdn|direct|coalesced), outcome (hit|miss).
pub const STORE_READS_TOTAL: &str = "blobgate_store_reads_total";

/// Read attempts retried after a transient failure (counter). Labels: op.
pub const STORE_READ_RETRIES_TOTAL: &str = "blobgate_store_read_retries_total";

/// Object writes (counter). Labels: outcome (ok|error|suppressed).
pub const STORE_WRITES_TOTAL: &str = "blobgate_store_writes_total";

/// Writes rejected before reaching the backend (counter). Labels: reason.
pub const STORE_WRITES_REJECTED_TOTAL: &str = "blobgate_store_writes_rejected_total";

/// Lock acquisition attempts (counter). Labels: outcome (acquired|contended|error).
pub const LOCK_ACQUISITIONS_TOTAL: &str = "blobgate_lock_acquisitions_total";

/// Stale lock entries removed by the cleanup sweep (counter).
pub const LOCKS_REAPED_TOTAL: &str = "blobgate_locks_reaped_total";

/// Rate limiter denials (counter). Labels: store.
pub const RATE_LIMIT_DENIALS_TOTAL: &str = "blobgate_rate_limit_denials_total";

/// Live rate-limiter buckets after the last sweep (gauge).
pub const RATE_LIMIT_BUCKETS: &str = "blobgate_rate_limit_buckets";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(STORE_READS_TOTAL, "Object reads by source and outcome");
    describe_counter!(
        STORE_READ_RETRIES_TOTAL,
        "Read attempts retried after transient failures"
    );
    describe_counter!(STORE_WRITES_TOTAL, "Object writes by outcome");
    describe_counter!(
        STORE_WRITES_REJECTED_TOTAL,
        "Writes rejected before reaching the backend"
    );
    describe_counter!(LOCK_ACQUISITIONS_TOTAL, "Lock acquisition attempts by outcome");
    describe_counter!(LOCKS_REAPED_TOTAL, "Stale lock entries removed by cleanup");
    describe_counter!(RATE_LIMIT_DENIALS_TOTAL, "Rate limiter denials by store");
    describe_gauge!(RATE_LIMIT_BUCKETS, "Live rate-limiter buckets");
}
