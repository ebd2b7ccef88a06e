//! Registry of cloud clients keyed by cloud name

use crate::model::{CloudInfo, DEFAULT_PRIMARY_CLOUD};
use crate::{CoreError, Result};
use jcs_cloudstore::{CloudStore, S3CloudStore, S3Config};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Prefix of bucket names on secondary clouds
pub const SECONDARY_BUCKET_PREFIX: &str = "jcs";

/// Bucket name used for `bucket` on `cloud`.
///
/// The primary store keeps the client-visible name; every other cloud holds
/// the bucket as `jcs-<cloud>-<bucket>`.
pub fn cloud_bucket_name(primary: &str, cloud: &str, bucket: &str) -> String {
    if cloud == primary {
        bucket.to_string()
    } else {
        format!("{}-{}-{}", SECONDARY_BUCKET_PREFIX, cloud, bucket)
    }
}

/// Immutable map of cloud clients, built once at startup
#[derive(Clone)]
pub struct CloudRegistry {
    clouds: Arc<HashMap<String, Arc<dyn CloudStore>>>,
    primary: String,
}

impl CloudRegistry {
    pub fn builder(primary: impl Into<String>) -> CloudRegistryBuilder {
        CloudRegistryBuilder {
            primary: primary.into(),
            clouds: HashMap::new(),
        }
    }

    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    pub fn get(&self, cloud: &str) -> Result<Arc<dyn CloudStore>> {
        self.clouds
            .get(cloud)
            .cloned()
            .ok_or_else(|| CoreError::UnknownCloud(cloud.to_string()))
    }

    pub fn primary(&self) -> Result<Arc<dyn CloudStore>> {
        self.get(&self.primary)
    }

    pub fn contains(&self, cloud: &str) -> bool {
        self.clouds.contains_key(cloud)
    }

    pub fn bucket_name_for(&self, cloud: &str, bucket: &str) -> String {
        cloud_bucket_name(&self.primary, cloud, bucket)
    }

    /// Registered cloud names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clouds.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clouds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clouds.is_empty()
    }
}

impl Default for CloudRegistry {
    fn default() -> Self {
        CloudRegistry::builder(DEFAULT_PRIMARY_CLOUD).build()
    }
}

/// Collects clients before freezing them into a `CloudRegistry`
pub struct CloudRegistryBuilder {
    primary: String,
    clouds: HashMap<String, Arc<dyn CloudStore>>,
}

impl CloudRegistryBuilder {
    /// Register a client under its own name, replacing any previous one
    pub fn with_cloud(mut self, store: Arc<dyn CloudStore>) -> Self {
        self.clouds.insert(store.name().to_string(), store);
        self
    }

    /// Create S3 clients for every cloud not registered yet
    pub fn with_s3_clouds(mut self, infos: &[CloudInfo], timeout: Option<Duration>) -> Result<Self> {
        for info in infos {
            if self.clouds.contains_key(&info.name) {
                continue;
            }
            let mut config = S3Config::new(
                info.name.clone(),
                info.endpoint.clone(),
                info.access_key.clone(),
                info.secret_key.clone(),
            );
            if let Some(region) = &info.region {
                config = config.with_region(region.clone());
            }
            if let Some(timeout) = timeout {
                config = config.with_timeout(timeout);
            }
            info!(cloud = %info.name, endpoint = %info.endpoint, "cloud client configured");
            let store = S3CloudStore::new(config)?;
            self.clouds.insert(info.name.clone(), Arc::new(store));
        }
        Ok(self)
    }

    pub fn build(self) -> CloudRegistry {
        CloudRegistry {
            clouds: Arc::new(self.clouds),
            primary: self.primary,
        }
    }
}
