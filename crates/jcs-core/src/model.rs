//! Users, buckets, clouds and file records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the primary object store unless configured otherwise
pub const DEFAULT_PRIMARY_CLOUD: &str = "minio";

/// A gateway user and their S3 credentials
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub access_key: String,
    pub secret_key: String,
}

/// How a bucket's objects are spread across clouds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedundancyMode {
    /// Full copies on every location
    #[default]
    Replica,
    /// Reed-Solomon shards, one per location
    #[serde(alias = "ec")]
    Erasure,
}

/// Bucket ownership and storage strategy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub mode: RedundancyMode,
    /// Cloud names; for erasure buckets shard `i` lives on `locations[i]`
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub replica: usize,
    #[serde(default, alias = "n")]
    pub data_shards: usize,
    #[serde(default, alias = "k")]
    pub parity_shards: usize,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Bucket {
    /// A replica bucket copying to every location
    pub fn replica(
        name: impl Into<String>,
        owner: impl Into<String>,
        locations: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            mode: RedundancyMode::Replica,
            replica: locations.len(),
            locations,
            data_shards: 0,
            parity_shards: 0,
            created_at: Utc::now(),
        }
    }

    /// An erasure-coded bucket with `data_shards + parity_shards` locations
    pub fn erasure(
        name: impl Into<String>,
        owner: impl Into<String>,
        data_shards: usize,
        parity_shards: usize,
        locations: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            mode: RedundancyMode::Erasure,
            replica: 0,
            locations,
            data_shards,
            parity_shards,
            created_at: Utc::now(),
        }
    }

    pub fn is_owned_by(&self, username: &str) -> bool {
        self.owner == username
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }
}

/// Reachability of a secondary cloud
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudStatus {
    #[default]
    #[serde(alias = "Online")]
    Online,
    #[serde(alias = "Offline")]
    Offline,
}

/// Connection details for one cloud backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloudInfo {
    pub name: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub status: CloudStatus,
}

impl CloudInfo {
    pub fn is_online(&self) -> bool {
        self.status == CloudStatus::Online
    }
}

/// Written after a successful fan-out, read before reconstruction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub owner: String,
    pub bucket: String,
    pub key: String,
    pub size: u64,
    #[serde(default = "Utc::now")]
    pub last_modified: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(
        owner: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            owner: owner.into(),
            bucket: bucket.into(),
            key: key.into(),
            size,
            last_modified: Utc::now(),
        }
    }
}
