//! # JCS Core
//!
//! Redundancy engine of the JCS multi-cloud gateway.
//!
//! This crate provides:
//! - **Model**: users, buckets with their redundancy strategy, clouds and
//!   file records
//! - **Metadata**: the `MetadataStore` interface and an in-memory store
//!   seeded from JSON
//! - **Cloud registry**: immutable name → client map and secondary bucket
//!   naming
//! - **Erasure coding**: a streaming Reed-Solomon codec over shard files
//! - **Sync engine**: replica and erasure fan-out, restore and delete
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            S3 Gateway (cli)             │
//! ├─────────────────────────────────────────┤
//! │              Sync Engine                │
//! ├───────────────┬─────────────────────────┤
//! │ StreamCodec   │ CloudRegistry │Metadata │
//! ├───────────────┴─────────────────────────┤
//! │          CloudStore (cloudstore)        │
//! └─────────────────────────────────────────┘
//! ```

pub mod clouds;
pub mod erasure;
pub mod error;
pub mod metadata;
pub mod model;
pub mod sync;

pub use clouds::{cloud_bucket_name, CloudRegistry, CloudRegistryBuilder};
pub use erasure::StreamCodec;
pub use error::{CoreError, Result};
pub use metadata::{MemoryMetadataStore, MetadataSeed, MetadataStore};
pub use model::{
    Bucket, CloudInfo, CloudStatus, FileRecord, RedundancyMode, User, DEFAULT_PRIMARY_CLOUD,
};
pub use sync::{
    DestinationOutcome, FanOutReport, RestoreOutcome, SyncConfig, SyncEngine, SyncMode,
};
