//! S3 API handlers

pub mod gateway;
pub mod service;

pub use gateway::handle;
pub use service::list_buckets;
