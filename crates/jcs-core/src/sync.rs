//! Multi-cloud synchronization engine
//!
//! Moves object bytes between the primary store and a bucket's secondary
//! clouds. Every operation stages its files in a fresh temporary directory
//! under the configured staging directory; the directory is removed when the
//! operation returns, whatever the outcome.

use crate::clouds::CloudRegistry;
use crate::erasure::StreamCodec;
use crate::metadata::MetadataStore;
use crate::model::{Bucket, FileRecord, RedundancyMode};
use crate::{CoreError, Result};
use futures::stream::{self, StreamExt};
use jcs_cloudstore::{copy_to_file, file_stream, BufferPool, DEFAULT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs::File;
use tracing::{debug, info, instrument, warn};

/// Name of the staged whole-object file inside an operation directory
const OBJECT_FILE: &str = "object";

/// Prefix of per-operation staging directories
const STAGING_PREFIX: &str = "jcs-sync-";

/// Whether the write path waits for synchronization before responding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Synchronous,
    Asynchronous,
}

/// Tunables for the sync engine
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Parent of the per-operation staging directories
    pub staging_dir: PathBuf,
    /// Concurrent cloud transfers per operation
    pub max_parallel: usize,
    /// Deadline for each individual cloud call
    pub cloud_timeout: Duration,
    /// Chunk size used when streaming staged files
    pub buffer_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("jcs"),
            max_parallel: 8,
            cloud_timeout: Duration::from_secs(300),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Result of one destination in a fan-out
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationOutcome {
    /// Position in the bucket's location list
    pub index: usize,
    pub cloud: String,
    /// `None` on success
    pub error: Option<String>,
}

impl DestinationOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-destination outcomes of a best-effort fan-out, in location order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub outcomes: Vec<DestinationOutcome>,
}

impl FanOutReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DestinationOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }
}

/// What the read path did before forwarding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The primary already holds the object
    Present,
    /// No file record, so there is nothing to restore from
    NotTracked,
    /// The object was rebuilt onto the primary
    Restored { size: u64 },
}

/// Replica/erasure synchronization between the primary and secondary clouds
pub struct SyncEngine {
    clouds: CloudRegistry,
    metadata: Arc<dyn MetadataStore>,
    config: SyncConfig,
    buffers: BufferPool,
}

impl SyncEngine {
    pub fn new(clouds: CloudRegistry, metadata: Arc<dyn MetadataStore>, config: SyncConfig) -> Self {
        let buffers = BufferPool::new(config.buffer_size, config.max_parallel.max(1) * 2);
        Self {
            clouds,
            metadata,
            config,
            buffers,
        }
    }

    pub fn clouds(&self) -> &CloudRegistry {
        &self.clouds
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Copy a freshly written object from the primary to the bucket's clouds
    /// and record its size.
    #[instrument(skip(self, bucket), fields(bucket = %bucket.name, mode = ?bucket.mode))]
    pub async fn upload(&self, bucket: &Bucket, key: &str) -> Result<FanOutReport> {
        let staging = self.staging_dir().await?;
        let object = staging.path().join(OBJECT_FILE);
        let primary = self.clouds.primary_name().to_string();
        let size = self
            .with_timeout(&primary, self.fetch_to_file(&primary, &bucket.name, key, &object))
            .await?;

        let report = match bucket.mode {
            RedundancyMode::Replica => {
                let report = self
                    .fan_out(&bucket.locations, |_, cloud| {
                        let object = object.clone();
                        async move { self.push_file(&cloud, &bucket.name, key, &object).await }
                    })
                    .await;
                if report.attempted() > 0 && report.succeeded() == 0 {
                    return Err(CoreError::ReplicationFailed {
                        bucket: bucket.name.clone(),
                        key: key.to_string(),
                        attempted: report.attempted(),
                    });
                }
                report
            }
            RedundancyMode::Erasure => {
                check_shard_layout(bucket)?;
                let shards = shard_paths(staging.path(), bucket.total_shards());
                let codec = StreamCodec::new(bucket.data_shards, bucket.parity_shards)?;
                let (input, outputs) = (object.clone(), shards.clone());
                tokio::task::spawn_blocking(move || codec.split(&input, &outputs)).await??;

                let report = self
                    .fan_out(&bucket.locations, |index, cloud| {
                        let shard = shards[index].clone();
                        async move { self.push_file(&cloud, &bucket.name, key, &shard).await }
                    })
                    .await;
                if report.succeeded() < bucket.data_shards {
                    return Err(CoreError::InsufficientShards {
                        have: report.succeeded(),
                        need: bucket.data_shards,
                    });
                }
                report
            }
        };

        self.metadata
            .insert_file_info(FileRecord::new(&bucket.owner, &bucket.name, key, size))
            .await?;
        info!(
            key,
            size,
            stored = report.succeeded(),
            failed = report.failed(),
            "object synchronized"
        );
        Ok(report)
    }

    /// Rebuild an object from the bucket's clouds onto the primary
    #[instrument(skip(self, bucket), fields(bucket = %bucket.name, mode = ?bucket.mode))]
    pub async fn download(&self, bucket: &Bucket, key: &str) -> Result<u64> {
        let staging = self.staging_dir().await?;
        let object = staging.path().join(OBJECT_FILE);

        let size = match bucket.mode {
            RedundancyMode::Replica => self.download_replica(bucket, key, &object).await?,
            RedundancyMode::Erasure => {
                self.download_erasure(bucket, key, staging.path(), &object)
                    .await?
            }
        };

        let primary = self.clouds.primary_name().to_string();
        self.with_timeout(&primary, self.push_file(&primary, &bucket.name, key, &object))
            .await?;
        info!(key, size, "object restored to primary");
        Ok(size)
    }

    /// Restore an object onto the primary before it is read.
    ///
    /// Objects the primary already holds are left alone unless `always` is
    /// set; objects without a file record are never restored.
    pub async fn restore(&self, bucket: &Bucket, key: &str, always: bool) -> Result<RestoreOutcome> {
        if !always && self.primary_has(&bucket.name, key).await? {
            return Ok(RestoreOutcome::Present);
        }

        match self.metadata.get_file_info(&bucket.name, key).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(RestoreOutcome::NotTracked),
            Err(e) => return Err(e),
        }

        let size = self.download(bucket, key).await?;
        Ok(RestoreOutcome::Restored { size })
    }

    /// Remove an object from every location and drop its file record
    #[instrument(skip(self, bucket), fields(bucket = %bucket.name))]
    pub async fn delete(&self, bucket: &Bucket, key: &str) -> Result<FanOutReport> {
        let report = self
            .fan_out(&bucket.locations, |_, cloud| async move {
                self.delete_from(&cloud, &bucket.name, key).await
            })
            .await;

        self.metadata.delete_file_info(&bucket.name, key).await?;
        debug!(
            key,
            deleted = report.succeeded(),
            failed = report.failed(),
            "object deleted from clouds"
        );
        Ok(report)
    }

    async fn download_replica(&self, bucket: &Bucket, key: &str, object: &Path) -> Result<u64> {
        let candidates = self
            .metadata
            .get_available_clouds(&bucket.locations, bucket.locations.len())
            .await?;

        let mut last_error = None;
        for cloud in &candidates {
            match self
                .with_timeout(cloud, self.fetch_to_file(cloud, &bucket.name, key, object))
                .await
            {
                Ok(size) => {
                    debug!(cloud = %cloud, size, "replica fetched");
                    return Ok(size);
                }
                Err(e) => {
                    warn!(cloud = %cloud, error = %e, "replica fetch failed, trying next cloud");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => e,
            None => CoreError::NoAvailableCloud {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
        })
    }

    async fn download_erasure(
        &self,
        bucket: &Bucket,
        key: &str,
        staging: &Path,
        object: &Path,
    ) -> Result<u64> {
        check_shard_layout(bucket)?;
        let record = self.metadata.get_file_info(&bucket.name, key).await?;
        let paths = shard_paths(staging, bucket.total_shards());

        let locations = bucket.locations.clone();
        let fetched: Vec<(usize, Result<u64>)> = stream::iter(locations.into_iter().enumerate())
            .map(|(index, cloud): (usize, String)| {
                let path = paths[index].clone();
                async move {
                    let result = self
                        .with_timeout(&cloud, self.fetch_to_file(&cloud, &bucket.name, key, &path))
                        .await;
                    (index, result)
                }
            })
            .buffer_unordered(self.config.max_parallel.max(1))
            .collect()
            .await;

        let mut shards: Vec<Option<PathBuf>> = vec![None; paths.len()];
        for (index, result) in fetched {
            match result {
                Ok(_) => shards[index] = Some(paths[index].clone()),
                Err(e) => warn!(
                    cloud = %bucket.locations[index],
                    shard = index,
                    error = %e,
                    "shard fetch failed"
                ),
            }
        }

        let have = shards.iter().filter(|s| s.is_some()).count();
        if have < bucket.data_shards {
            return Err(CoreError::InsufficientShards {
                have,
                need: bucket.data_shards,
            });
        }

        let codec = StreamCodec::new(bucket.data_shards, bucket.parity_shards)?;
        let output = object.to_path_buf();
        let size = record.size;
        tokio::task::spawn_blocking(move || codec.join(&shards, &output, size)).await??;
        Ok(size)
    }

    async fn primary_has(&self, bucket: &str, key: &str) -> Result<bool> {
        let primary = self.clouds.primary_name().to_string();
        let store = self.clouds.primary()?;
        let stat = async {
            store
                .stat_object(bucket, key)
                .await
                .map_err(CoreError::from)
        };
        match self.with_timeout(&primary, stat).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run `op` for every location with bounded parallelism, applying the
    /// per-cloud timeout and collecting outcomes in location order
    async fn fan_out<F, Fut>(&self, locations: &[String], op: F) -> FanOutReport
    where
        F: Fn(usize, String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let op = &op;
        let mut outcomes: Vec<DestinationOutcome> = stream::iter(locations.to_vec().into_iter().enumerate())
            .map(|(index, cloud): (usize, String)| async move {
                let result = self.with_timeout(&cloud, op(index, cloud.clone())).await;
                if let Err(e) = &result {
                    warn!(cloud = %cloud, index, error = %e, "cloud transfer failed");
                }
                DestinationOutcome {
                    index,
                    cloud,
                    error: result.err().map(|e| e.to_string()),
                }
            })
            .buffer_unordered(self.config.max_parallel.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.index);
        FanOutReport { outcomes }
    }

    async fn fetch_to_file(&self, cloud: &str, bucket: &str, key: &str, path: &Path) -> Result<u64> {
        let store = self.clouds.get(cloud)?;
        let remote_bucket = self.clouds.bucket_name_for(cloud, bucket);
        let body = store.get_object(&remote_bucket, key).await?;
        let mut file = File::create(path).await?;
        let written = copy_to_file(body, &mut file).await?;
        Ok(written)
    }

    async fn push_file(&self, cloud: &str, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let store = self.clouds.get(cloud)?;
        let remote_bucket = self.clouds.bucket_name_for(cloud, bucket);
        let file = File::open(path).await?;
        let length = file.metadata().await?.len();
        store
            .put_object(&remote_bucket, key, file_stream(file, self.buffers.clone()), length)
            .await?;
        Ok(())
    }

    async fn delete_from(&self, cloud: &str, bucket: &str, key: &str) -> Result<()> {
        let store = self.clouds.get(cloud)?;
        let remote_bucket = self.clouds.bucket_name_for(cloud, bucket);
        store.delete_object(&remote_bucket, key).await?;
        Ok(())
    }

    async fn with_timeout<T, F>(&self, cloud: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.cloud_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout {
                cloud: cloud.to_string(),
                seconds: self.config.cloud_timeout.as_secs(),
            }),
        }
    }

    async fn staging_dir(&self) -> Result<TempDir> {
        tokio::fs::create_dir_all(&self.config.staging_dir).await?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.config.staging_dir)?;
        Ok(dir)
    }
}

fn check_shard_layout(bucket: &Bucket) -> Result<()> {
    if bucket.locations.len() != bucket.total_shards() {
        return Err(CoreError::LocationMismatch {
            bucket: bucket.name.clone(),
            expected: bucket.total_shards(),
            actual: bucket.locations.len(),
        });
    }
    Ok(())
}

fn shard_paths(dir: &Path, count: usize) -> Vec<PathBuf> {
    (0..count).map(|i| dir.join(format!("shard.{}", i))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryMetadataStore;
    use bytes::Bytes;
    use jcs_cloudstore::MemoryCloudStore;

    struct Harness {
        engine: SyncEngine,
        metadata: Arc<MemoryMetadataStore>,
        primary: MemoryCloudStore,
        secondaries: Vec<MemoryCloudStore>,
        staging: TempDir,
    }

    fn harness(secondary_names: &[&str]) -> Harness {
        let staging = tempfile::tempdir().unwrap();
        let primary = MemoryCloudStore::new("minio");
        let secondaries: Vec<MemoryCloudStore> =
            secondary_names.iter().map(|n| MemoryCloudStore::new(*n)).collect();

        let mut builder = CloudRegistry::builder("minio").with_cloud(Arc::new(primary.clone()));
        for store in &secondaries {
            builder = builder.with_cloud(Arc::new(store.clone()));
        }

        let metadata = Arc::new(MemoryMetadataStore::new());
        let config = SyncConfig {
            staging_dir: staging.path().to_path_buf(),
            max_parallel: 4,
            cloud_timeout: Duration::from_secs(5),
            buffer_size: 64 * 1024,
        };
        let engine = SyncEngine::new(builder.build(), metadata.clone(), config);
        Harness {
            engine,
            metadata,
            primary,
            secondaries,
            staging,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sample(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i * 7 % 251) as u8).collect::<Vec<u8>>())
    }

    fn staging_is_empty(h: &Harness) -> bool {
        std::fs::read_dir(h.staging.path()).unwrap().next().is_none()
    }

    #[test_log::test(tokio::test)]
    async fn test_replica_upload_and_restore() {
        let h = harness(&["aws", "gcloud"]);
        let bucket = Bucket::replica("b1", "alice", names(&["aws", "gcloud"]));
        let data = sample(300_000);
        h.primary.insert("b1", "k", data.clone());

        let report = h.engine.upload(&bucket, "k").await.unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(h.secondaries[0].get("jcs-aws-b1", "k").unwrap(), data);
        assert_eq!(h.secondaries[1].get("jcs-gcloud-b1", "k").unwrap(), data);
        assert_eq!(h.metadata.get_file_info("b1", "k").await.unwrap().size, 300_000);

        h.primary.remove("b1", "k");
        let outcome = h.engine.restore(&bucket, "k", false).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored { size: 300_000 });
        assert_eq!(h.primary.get("b1", "k").unwrap(), data);
        assert!(staging_is_empty(&h));
    }

    #[test_log::test(tokio::test)]
    async fn test_replica_partial_failure() {
        let h = harness(&["aws", "gcloud", "azure"]);
        h.secondaries[1].set_offline(true);
        let bucket = Bucket::replica("b1", "alice", names(&["aws", "gcloud", "azure"]));
        h.primary.insert("b1", "k", sample(1000));

        let report = h.engine.upload(&bucket, "k").await.unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures().next().unwrap().cloud, "gcloud");
        assert!(h.secondaries[0].contains("jcs-aws-b1", "k"));
        assert!(!h.secondaries[1].contains("jcs-gcloud-b1", "k"));
        assert!(h.secondaries[2].contains("jcs-azure-b1", "k"));
        assert!(h.metadata.get_file_info("b1", "k").await.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn test_replica_all_destinations_fail() {
        let h = harness(&["aws"]);
        h.secondaries[0].set_offline(true);
        let bucket = Bucket::replica("b1", "alice", names(&["aws"]));
        h.primary.insert("b1", "k", sample(10));

        let err = h.engine.upload(&bucket, "k").await.unwrap_err();
        assert!(matches!(err, CoreError::ReplicationFailed { attempted: 1, .. }));
        assert!(h.metadata.get_file_info("b1", "k").await.is_err());
        assert!(staging_is_empty(&h));
    }

    #[test_log::test(tokio::test)]
    async fn test_replica_download_falls_back() {
        let h = harness(&["aws", "gcloud"]);
        let bucket = Bucket::replica("b1", "alice", names(&["aws", "gcloud"]));
        let data = sample(5000);
        h.secondaries[1].insert("jcs-gcloud-b1", "k", data.clone());

        assert_eq!(h.engine.download(&bucket, "k").await.unwrap(), 5000);
        assert_eq!(h.primary.get("b1", "k").unwrap(), data);
    }

    #[test_log::test(tokio::test)]
    async fn test_erasure_upload_and_degraded_restore() {
        let clouds = ["c0", "c1", "c2", "c3", "c4", "c5"];
        let h = harness(&clouds);
        let bucket = Bucket::erasure("b1", "alice", 4, 2, names(&clouds));
        let data = sample(1_000_001);
        h.primary.insert("b1", "obj", data.clone());

        let report = h.engine.upload(&bucket, "obj").await.unwrap();
        assert_eq!(report.succeeded(), 6);
        for (i, store) in h.secondaries.iter().enumerate() {
            let shard = store.get(&format!("jcs-c{}-b1", i), "obj").unwrap();
            assert_eq!(shard.len(), 250_001);
        }

        h.primary.remove("b1", "obj");
        h.secondaries[0].set_offline(true);
        h.secondaries[4].set_offline(true);

        let outcome = h.engine.restore(&bucket, "obj", false).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored { size: 1_000_001 });
        assert_eq!(h.primary.get("b1", "obj").unwrap(), data);
        assert!(staging_is_empty(&h));
    }

    #[test_log::test(tokio::test)]
    async fn test_erasure_sync_runs_on_spawned_tasks() {
        let clouds = ["c0", "c1", "c2", "c3", "c4", "c5"];
        let h = harness(&clouds);
        let engine = Arc::new(h.engine);
        let bucket = Bucket::erasure("b1", "alice", 4, 2, names(&clouds));
        h.primary.insert("b1", "obj", sample(4_096));

        let (task_engine, task_bucket) = (Arc::clone(&engine), bucket.clone());
        let report = tokio::spawn(async move { task_engine.upload(&task_bucket, "obj").await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.succeeded(), 6);

        h.primary.remove("b1", "obj");
        let outcome = tokio::spawn(async move { engine.restore(&bucket, "obj", false).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored { size: 4_096 });
    }

    #[test_log::test(tokio::test)]
    async fn test_erasure_too_few_shards() {
        let clouds = ["c0", "c1", "c2"];
        let h = harness(&clouds);
        let bucket = Bucket::erasure("b1", "alice", 2, 1, names(&clouds));
        h.primary.insert("b1", "obj", sample(999));
        h.engine.upload(&bucket, "obj").await.unwrap();

        h.secondaries[0].set_offline(true);
        h.secondaries[2].set_offline(true);
        let err = h.engine.download(&bucket, "obj").await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientShards { have: 1, need: 2 }));
    }

    #[test_log::test(tokio::test)]
    async fn test_erasure_location_mismatch() {
        let h = harness(&["c0", "c1"]);
        let bucket = Bucket::erasure("b1", "alice", 2, 1, names(&["c0", "c1"]));
        h.primary.insert("b1", "obj", sample(10));

        let err = h.engine.upload(&bucket, "obj").await.unwrap_err();
        assert!(matches!(err, CoreError::LocationMismatch { expected: 3, actual: 2, .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_restore_policy() {
        let h = harness(&["aws"]);
        let bucket = Bucket::replica("b1", "alice", names(&["aws"]));

        h.primary.insert("b1", "present", sample(3));
        assert_eq!(
            h.engine.restore(&bucket, "present", false).await.unwrap(),
            RestoreOutcome::Present
        );

        assert_eq!(
            h.engine.restore(&bucket, "untracked", false).await.unwrap(),
            RestoreOutcome::NotTracked
        );

        h.engine.upload(&bucket, "present").await.unwrap();
        h.secondaries[0].insert("jcs-aws-b1", "present", sample(4));
        assert_eq!(
            h.engine.restore(&bucket, "present", true).await.unwrap(),
            RestoreOutcome::Restored { size: 4 }
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_propagates() {
        let h = harness(&["aws", "gcloud"]);
        let bucket = Bucket::replica("b1", "alice", names(&["aws", "gcloud"]));
        h.primary.insert("b1", "k", sample(10));
        h.engine.upload(&bucket, "k").await.unwrap();

        let report = h.engine.delete(&bucket, "k").await.unwrap();
        assert_eq!(report.succeeded(), 2);
        assert!(h.secondaries.iter().all(|s| s.is_empty()));
        assert!(h.metadata.get_file_info("b1", "k").await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_primary_object_fails_upload() {
        let h = harness(&["aws"]);
        let bucket = Bucket::replica("b1", "alice", names(&["aws"]));
        let err = h.engine.upload(&bucket, "nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(staging_is_empty(&h));
    }
}
