//! Configuration loading and types for blobgate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Each subsection governs a different part of the
//! core: the remote store endpoint, the CDN read-through path, transfer
//! limits, retry behavior, and runtime switches. A handful of
//! deployment-level environment variables override the file after load
//! (see [`apply_env_overrides`]).

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Remote object store endpoint settings.
    #[serde(default)]
    pub store: StoreBackendConfig,

    /// CDN read-through settings.
    #[serde(default)]
    pub cdn: CdnConfig,

    /// Transfer size limits and the process memory budget.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Read retry/backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Runtime switches (dry-run, read-only, privileged updater).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote S3-compatible store configuration.
///
/// Credentials fall back to the standard AWS credential chain when not
/// set explicitly. Empty strings mean "unset".
#[derive(Debug, Clone, Deserialize)]
pub struct StoreBackendConfig {
    /// Backing bucket name.
    #[serde(default)]
    pub bucket: String,

    /// Region to sign for.
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom S3-compatible endpoint (e.g. R2, MinIO).
    #[serde(default)]
    pub endpoint_url: String,

    /// Key prefix for all objects in the backing bucket.
    #[serde(default)]
    pub prefix: String,

    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,

    /// Explicit access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,

    /// Explicit secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

impl Default for StoreBackendConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: String::new(),
            prefix: String::new(),
            use_path_style: false,
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

/// CDN read-through configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CdnConfig {
    /// Public base URL fronting the bucket. Empty disables the CDN path.
    #[serde(default)]
    pub base_url: String,
}

/// Transfer limits. All values in bytes; 0 means unlimited.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Absolute binary-write ceiling. Writes above this always fail.
    #[serde(default = "default_max_binary_write")]
    pub max_binary_write_bytes: u64,

    /// Soft write threshold applied under memory pressure.
    #[serde(default = "default_soft_write")]
    pub soft_write_bytes: u64,

    /// Largest binary object read while the process lacks headroom.
    #[serde(default = "default_max_binary_read")]
    pub max_binary_read_bytes: u64,

    /// RSS budget for the process memory monitor.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_binary_write_bytes: default_max_binary_write(),
            soft_write_bytes: default_soft_write(),
            max_binary_read_bytes: default_max_binary_read(),
            memory_budget_bytes: default_memory_budget(),
        }
    }
}

/// Read retry/backoff configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fractional jitter band, e.g. 0.2 for +/-20%.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetryConfig {
    /// Materialize the policy value object shared by all read sites.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
        }
    }
}

/// Runtime switches.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Suppress all writes and log intent instead.
    #[serde(default)]
    pub dry_run: bool,

    /// Silently no-op writes while reads keep working.
    #[serde(default)]
    pub read_only: bool,

    /// This process is the privileged background updater: it may bypass
    /// the soft write threshold (never the absolute ceiling).
    #[serde(default)]
    pub privileged_updater: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_binary_write() -> u64 {
    25 * 1024 * 1024 // 25 MiB
}

fn default_soft_write() -> u64 {
    5 * 1024 * 1024 // 5 MiB
}

fn default_max_binary_read() -> u64 {
    20 * 1024 * 1024 // 20 MiB
}

fn default_memory_budget() -> u64 {
    512 * 1024 * 1024 // 512 MiB RSS
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load configuration from a YAML file at `path` and apply environment
/// overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let mut config: Config = serde_yaml::from_str(&contents)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply deployment-level environment switches on top of file config.
///
/// `BLOBGATE_DRY_RUN` and `BLOBGATE_READ_ONLY` accept `1`/`true`;
/// `BLOBGATE_MAX_BINARY_WRITE_BYTES` overrides the absolute write
/// ceiling.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(flag) = env_flag("BLOBGATE_DRY_RUN") {
        config.runtime.dry_run = flag;
    }
    if let Some(flag) = env_flag("BLOBGATE_READ_ONLY") {
        config.runtime.read_only = flag;
    }
    if let Ok(raw) = std::env::var("BLOBGATE_MAX_BINARY_WRITE_BYTES") {
        match raw.parse::<u64>() {
            Ok(bytes) => config.limits.max_binary_write_bytes = bytes,
            Err(_) => tracing::warn!(
                "ignoring unparseable BLOBGATE_MAX_BINARY_WRITE_BYTES={raw:?}"
            ),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    Some(matches!(raw.as_str(), "1" | "true" | "TRUE" | "yes"))
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.store.region, "us-east-1");
        assert_eq!(config.limits.max_binary_write_bytes, 25 * 1024 * 1024);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.runtime.read_only);
        assert!(config.cdn.base_url.is_empty());
    }

    #[test]
    fn test_sections_parse() {
        let yaml = r#"
store:
  bucket: site-content
  endpoint_url: "https://abc.r2.cloudflarestorage.com"
  use_path_style: true
cdn:
  base_url: "https://cdn.example.com"
limits:
  max_binary_write_bytes: 1048576
runtime:
  read_only: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.store.bucket, "site-content");
        assert!(config.store.use_path_style);
        assert_eq!(config.cdn.base_url, "https://cdn.example.com");
        assert_eq!(config.limits.max_binary_write_bytes, 1048576);
        assert!(config.runtime.read_only);
    }

    #[test]
    fn test_retry_policy_materialization() {
        let retry = RetryConfig {
            max_attempts: 0,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            jitter_ratio: 0.1,
        };
        let policy = retry.policy();
        // A zero attempt budget would mean "never even try once".
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("BLOBGATE_DRY_RUN", "1");
        std::env::set_var("BLOBGATE_READ_ONLY", "false");
        std::env::set_var("BLOBGATE_MAX_BINARY_WRITE_BYTES", "4096");
        let mut config = Config::default();
        config.runtime.read_only = true;
        apply_env_overrides(&mut config);
        assert!(config.runtime.dry_run);
        assert!(!config.runtime.read_only);
        assert_eq!(config.limits.max_binary_write_bytes, 4096);
        std::env::remove_var("BLOBGATE_DRY_RUN");
        std::env::remove_var("BLOBGATE_READ_ONLY");
        std::env::remove_var("BLOBGATE_MAX_BINARY_WRITE_BYTES");
    }
}
