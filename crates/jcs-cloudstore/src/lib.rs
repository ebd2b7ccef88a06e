//! # JCS Cloudstore
//!
//! Object storage clients used by the JCS gateway to move object bytes
//! between the primary backend and the secondary clouds.
//!
//! This crate provides:
//! - **CloudStore trait**: streaming get/put plus stat and delete
//! - **S3 client**: SigV4-signed S3 REST calls over a pooled `reqwest` client
//! - **Memory store**: an in-process store with an offline switch for tests
//! - **Buffer pool**: recycled `BytesMut` buffers for streaming staged files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Sync Engine (core)           │
//! ├─────────────────────────────────────────┤
//! │            CloudStore Trait             │
//! ├────────────────────┬────────────────────┤
//! │   S3CloudStore     │  MemoryCloudStore  │
//! ├────────────────────┴────────────────────┤
//! │     S3-compatible clouds / in-memory    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use jcs_cloudstore::{CloudStore, S3CloudStore, S3Config};
//!
//! let store = S3CloudStore::new(S3Config::new("aws", endpoint, access_key, secret_key))?;
//! store.put_object("bucket", "key", body, length).await?;
//! let stream = store.get_object("bucket", "key").await?;
//! ```

pub mod buffer;
pub mod error;
pub mod memory;
pub mod s3;

pub use buffer::{copy_to_file, file_stream, BufferPool};
pub use error::{CloudError, Result};
pub use memory::MemoryCloudStore;
pub use s3::{Addressing, S3CloudStore, S3Config};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

/// Default size of a streaming buffer (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// A stream of object bytes
pub type ObjectStream = BoxStream<'static, Result<Bytes>>;

/// Trait for cloud object storage backends
#[async_trait]
pub trait CloudStore: Send + Sync {
    /// Name of the cloud this client talks to
    fn name(&self) -> &str;

    /// Open an object for streaming reads
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectStream>;

    /// Store an object of exactly `length` bytes
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectStream,
        length: u64,
    ) -> Result<()>;

    /// Size of an object, or `CloudError::NotFound`
    async fn stat_object(&self, bucket: &str, key: &str) -> Result<u64>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Wrap an in-memory buffer as an object stream
pub fn bytes_stream(data: Bytes) -> ObjectStream {
    stream::once(async move { Ok(data) }).boxed()
}
