//! Metadata store interface and the in-memory implementation

use crate::model::{Bucket, CloudInfo, CloudStatus, FileRecord, User};
use crate::{CoreError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Users, buckets, clouds and file records as seen by the gateway
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_user_by_access_key(&self, access_key: &str) -> Result<User>;

    async fn get_bucket(&self, name: &str) -> Result<Bucket>;

    /// Buckets owned by `username`, sorted by name
    async fn get_user_buckets(&self, username: &str) -> Result<Vec<Bucket>>;

    async fn get_all_cloud_info(&self) -> Result<Vec<CloudInfo>>;

    /// Insert or replace the record for `(bucket, key)`
    async fn insert_file_info(&self, record: FileRecord) -> Result<()>;

    async fn get_file_info(&self, bucket: &str, key: &str) -> Result<FileRecord>;

    async fn delete_file_info(&self, bucket: &str, key: &str) -> Result<()>;

    /// Up to `count` of `candidates` that are currently reachable, in
    /// candidate order
    async fn get_available_clouds(&self, candidates: &[String], count: usize)
        -> Result<Vec<String>>;
}

/// JSON document used to seed a `MemoryMetadataStore`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetadataSeed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
    #[serde(default)]
    pub clouds: Vec<CloudInfo>,
}

/// In-memory metadata store
#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    users: Arc<DashMap<String, User>>,
    buckets: Arc<DashMap<String, Bucket>>,
    clouds: Arc<RwLock<Vec<CloudInfo>>>,
    files: Arc<DashMap<(String, String), FileRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: MetadataSeed) -> Self {
        let store = Self::new();
        for user in seed.users {
            store.insert_user(user);
        }
        for bucket in seed.buckets {
            store.insert_bucket(bucket);
        }
        for cloud in seed.clouds {
            store.upsert_cloud(cloud);
        }
        store
    }

    /// Load a seed document from disk
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let seed: MetadataSeed = serde_json::from_str(&raw)?;
        debug!(
            path = %path.as_ref().display(),
            users = seed.users.len(),
            buckets = seed.buckets.len(),
            clouds = seed.clouds.len(),
            "metadata seed loaded"
        );
        Ok(Self::from_seed(seed))
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.access_key.clone(), user);
    }

    pub fn insert_bucket(&self, bucket: Bucket) {
        self.buckets.insert(bucket.name.clone(), bucket);
    }

    /// Insert a cloud or replace the one with the same name
    pub fn upsert_cloud(&self, cloud: CloudInfo) {
        let mut clouds = self.clouds.write();
        match clouds.iter_mut().find(|c| c.name == cloud.name) {
            Some(existing) => *existing = cloud,
            None => clouds.push(cloud),
        }
    }

    pub fn set_cloud_status(&self, name: &str, status: CloudStatus) {
        if let Some(cloud) = self.clouds.write().iter_mut().find(|c| c.name == name) {
            cloud.status = status;
        }
    }

    /// Number of file records held
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_user_by_access_key(&self, access_key: &str) -> Result<User> {
        self.users
            .get(access_key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::UserNotFound(access_key.to_string()))
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        self.buckets
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::BucketNotFound(name.to_string()))
    }

    async fn get_user_buckets(&self, username: &str) -> Result<Vec<Bucket>> {
        let mut buckets: Vec<Bucket> = self
            .buckets
            .iter()
            .filter(|entry| entry.value().is_owned_by(username))
            .map(|entry| entry.value().clone())
            .collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn get_all_cloud_info(&self) -> Result<Vec<CloudInfo>> {
        Ok(self.clouds.read().clone())
    }

    async fn insert_file_info(&self, record: FileRecord) -> Result<()> {
        self.files
            .insert((record.bucket.clone(), record.key.clone()), record);
        Ok(())
    }

    async fn get_file_info(&self, bucket: &str, key: &str) -> Result<FileRecord> {
        self.files
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::FileNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn delete_file_info(&self, bucket: &str, key: &str) -> Result<()> {
        self.files.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn get_available_clouds(
        &self,
        candidates: &[String],
        count: usize,
    ) -> Result<Vec<String>> {
        let clouds = self.clouds.read();
        // Clouds without a record have no health information and stay eligible
        Ok(candidates
            .iter()
            .filter(|name| {
                clouds
                    .iter()
                    .find(|c| &c.name == *name)
                    .map_or(true, CloudInfo::is_online)
            })
            .take(count)
            .cloned()
            .collect())
    }
}
