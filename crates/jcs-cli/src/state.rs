//! Application state

use crate::auth::SignatureVerifier;
use crate::classify::Classifier;
use crate::config::GatewayConfig;
use crate::middleware::{create_rate_limiter, KeyedRateLimiter};
use crate::proxy::BackendProxy;
use jcs_cloudstore::{S3CloudStore, S3Config, DEFAULT_BUFFER_SIZE};
use jcs_core::{CloudRegistry, MemoryMetadataStore, MetadataStore, SyncConfig, SyncEngine};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared, read-only state of a running gateway
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Users, buckets, clouds and file records
    pub metadata: Arc<dyn MetadataStore>,
    /// Replica/erasure synchronization
    pub sync: Arc<SyncEngine>,
    /// Forwarding client for the primary backend
    pub proxy: BackendProxy,
    pub verifier: SignatureVerifier,
    pub classifier: Classifier,
    /// Per-access-key limiter (None when disabled)
    pub rate_limiter: Option<Arc<KeyedRateLimiter>>,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Loads the metadata seed, then registers the primary backend and an S3
    /// client for every cloud the metadata knows about.
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let metadata = match &config.metadata_path {
            Some(path) => {
                info!(path = %path.display(), "loading metadata seed");
                MemoryMetadataStore::from_json_file(path)?
            }
            None => {
                warn!("⚠️  No metadata seed configured - no user can authenticate");
                MemoryMetadataStore::new()
            }
        };
        let clouds = metadata.get_all_cloud_info().await?;

        let backend = &config.backend;
        let primary = S3CloudStore::new(
            S3Config::new(
                backend.name.clone(),
                backend.endpoint.clone(),
                backend.access_key.clone(),
                backend.secret_key.clone(),
            )
            .with_region(backend.region.clone())
            .with_timeout(config.cloud_timeout()),
        )?;
        let registry = CloudRegistry::builder(backend.name.clone())
            .with_cloud(Arc::new(primary))
            .with_s3_clouds(&clouds, Some(config.cloud_timeout()))?
            .build();
        info!(
            primary = %registry.primary_name(),
            clouds = registry.len(),
            "cloud registry ready"
        );

        Ok(Self::with_components(config, Arc::new(metadata), registry)?)
    }

    /// Assemble state around an existing metadata store and cloud registry
    pub fn with_components(
        config: GatewayConfig,
        metadata: Arc<dyn MetadataStore>,
        clouds: CloudRegistry,
    ) -> Result<Self, crate::ApiError> {
        let sync = SyncEngine::new(
            clouds,
            Arc::clone(&metadata),
            SyncConfig {
                staging_dir: config.staging_dir.clone(),
                max_parallel: config.max_parallel_transfers.max(1),
                cloud_timeout: config.cloud_timeout(),
                buffer_size: DEFAULT_BUFFER_SIZE,
            },
        );

        Ok(Self {
            proxy: BackendProxy::new(&config)?,
            verifier: SignatureVerifier::new(config.max_skew_secs),
            classifier: Classifier::new(config.alternate_writer_marker.clone()),
            rate_limiter: create_rate_limiter(config.rate_limit_rps),
            sync: Arc::new(sync),
            metadata,
            config,
        })
    }
}
