//! # JCS Gateway
//!
//! S3-compatible gateway that spreads every object over several clouds.
//!
//! This crate provides:
//! - **S3 front end**: request classification and SigV4 verification
//! - **Authorization**: bucket ownership checks against the metadata store
//! - **Reverse proxy**: re-signing, streaming forwarder to the primary backend
//! - **Synchronization**: replica and erasure fan-out after writes, restore
//!   before reads
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP Clients                      │
//! │           (boto3, AWS SDK, s3cmd, etc.)             │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                    JCS Gateway                      │
//! ├─────────────────────────────────────────────────────┤
//! │  Rate Limiter │ Classifier │ SigV4 Verifier         │
//! ├─────────────────────────────────────────────────────┤
//! │        Orchestrator (authorize, forward)            │
//! ├──────────────────────────┬──────────────────────────┤
//! │   Primary backend proxy  │   jcs-core sync engine   │
//! │   (minio, radosgw)       │   (replica, erasure)     │
//! └──────────────────────────┴──────────────────────────┘
//! ```

pub mod auth;
pub mod classify;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod state;
pub mod xml;

pub use config::{BackendConfig, GatewayConfig};
pub use error::{ApiError, S3ErrorCode};
pub use server::{run_server, run_server_with_shutdown, serve};
pub use state::AppState;
