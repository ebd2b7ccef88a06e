//! In-memory cloud store for testing

use crate::{CloudError, CloudStore, ObjectStream, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Chunk size used when streaming stored objects back out
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// An in-memory cloud keyed by `(bucket, key)`
#[derive(Clone)]
pub struct MemoryCloudStore {
    name: String,
    objects: Arc<DashMap<(String, String), Bytes>>,
    offline: Arc<AtomicBool>,
}

impl MemoryCloudStore {
    /// Create a new empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Arc::new(DashMap::new()),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every call fail with `CloudError::Offline` until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Get the number of objects stored
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    /// Read an object directly, bypassing the offline switch
    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Store an object directly, bypassing the offline switch
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.objects
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    /// Remove an object directly, bypassing the offline switch
    pub fn remove(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|(_, data)| data)
    }

    /// All `(bucket, key)` pairs currently stored
    pub fn list(&self) -> Vec<(String, String)> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.is_offline() {
            return Err(CloudError::Offline(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudStore for MemoryCloudStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectStream> {
        self.ensure_online()?;
        let data = self
            .get(bucket, key)
            .ok_or_else(|| CloudError::not_found(bucket, key))?;

        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..data.len().min(start + READ_CHUNK_SIZE))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectStream,
        length: u64,
    ) -> Result<()> {
        self.ensure_online()?;
        let data = body
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;

        if data.len() as u64 != length {
            return Err(CloudError::LengthMismatch {
                expected: length,
                actual: data.len() as u64,
            });
        }
        self.insert(bucket, key, data.freeze());
        Ok(())
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<u64> {
        self.ensure_online()?;
        self.get(bucket, key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| CloudError::not_found(bucket, key))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.ensure_online()?;
        self.remove(bucket, key);
        Ok(())
    }
}
