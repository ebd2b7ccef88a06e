//! Gateway configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML/JSON file,
//! then `JCS__*` environment variables (nested keys separated by `__`, for
//! example `JCS__BACKEND__ENDPOINT`). Command-line flags are applied on top
//! by the binary.

use jcs_core::{SyncMode, DEFAULT_PRIMARY_CLOUD};
use jcs_crypto::DEFAULT_REGION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for layered configuration
pub const ENV_PREFIX: &str = "JCS";

/// Primary backend the gateway forwards to
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Cloud name of the primary store
    pub name: String,
    /// Backend URL, e.g. `http://127.0.0.1:9000`
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Re-sign forwarded requests with the backend credentials
    pub sign_requests: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PRIMARY_CLOUD.to_string(),
            endpoint: "http://127.0.0.1:9000".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            region: DEFAULT_REGION.to_string(),
            sign_requests: true,
        }
    }
}

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Primary backend
    pub backend: BackendConfig,
    /// JSON seed for the metadata store (users, buckets, clouds)
    pub metadata_path: Option<PathBuf>,
    /// Parent directory of per-operation staging directories
    pub staging_dir: PathBuf,
    /// Whether writes wait for synchronization
    pub sync_mode: SyncMode,
    /// Restore on every read of a tracked object, even if the primary has it
    pub always_restore: bool,
    /// Concurrent cloud transfers per synchronization
    pub max_parallel_transfers: usize,
    /// Deadline for each secondary cloud call (seconds)
    pub cloud_timeout_secs: u64,
    /// Deadline for a forwarded request (seconds, 0 = none)
    pub proxy_timeout_secs: u64,
    /// Backend connect timeout (seconds)
    pub connect_timeout_secs: u64,
    /// Idle pooled connection lifetime (seconds)
    pub idle_timeout_secs: u64,
    /// TCP keep-alive interval (seconds)
    pub tcp_keepalive_secs: u64,
    /// Idle pooled connections kept per backend host
    pub pool_max_idle_per_host: usize,
    /// Tolerated clock skew for signed requests (seconds)
    pub max_skew_secs: u64,
    /// `Host` substring that marks the alternate writer front end
    pub alternate_writer_marker: String,
    /// Rate limit (requests per second per access key, 0 = disabled)
    pub rate_limit_rps: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5002,
            backend: BackendConfig::default(),
            metadata_path: None,
            staging_dir: std::env::temp_dir().join("jcs"),
            sync_mode: SyncMode::Synchronous,
            always_restore: false,
            max_parallel_transfers: 8,
            cloud_timeout_secs: 300,
            proxy_timeout_secs: 0,
            connect_timeout_secs: 10,
            idle_timeout_secs: 90,
            tcp_keepalive_secs: 100,
            pool_max_idle_per_host: 4096,
            max_skew_secs: 15 * 60,
            alternate_writer_marker: crate::classify::DEFAULT_ALTERNATE_WRITER_MARKER.to_string(),
            rate_limit_rps: 0,
        }
    }
}

impl GatewayConfig {
    /// Load defaults, then `path` if given, then `JCS__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cloud_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud_timeout_secs)
    }

    pub fn proxy_timeout(&self) -> Option<Duration> {
        (self.proxy_timeout_secs > 0).then(|| Duration::from_secs(self.proxy_timeout_secs))
    }
}
