//! JCS Gateway - S3-compatible multi-cloud storage gateway

use clap::Parser;
use jcs_cli::{run_server_with_shutdown, GatewayConfig};
use jcs_core::SyncMode;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "jcs-gateway")]
#[command(about = "S3-compatible gateway replicating objects across clouds")]
#[command(version)]
struct Args {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, env = "JCS_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'H', long, env = "JCS_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "JCS_PORT")]
    port: Option<u16>,

    /// JSON seed with users, buckets and clouds
    #[arg(long, env = "JCS_METADATA")]
    metadata: Option<PathBuf>,

    /// Primary backend URL
    #[arg(long, env = "JCS_BACKEND_ENDPOINT")]
    backend_endpoint: Option<String>,

    /// Primary backend access key
    #[arg(long, env = "JCS_BACKEND_ACCESS_KEY")]
    backend_access_key: Option<String>,

    /// Primary backend secret key
    #[arg(long, env = "JCS_BACKEND_SECRET_KEY", hide_env_values = true)]
    backend_secret_key: Option<String>,

    /// Forward client signatures instead of re-signing
    #[arg(long, env = "JCS_NO_RESIGN")]
    no_resign: bool,

    /// Respond to writes before synchronization finishes
    #[arg(long, env = "JCS_ASYNC_SYNC")]
    async_sync: bool,

    /// Staging directory for synchronization
    #[arg(long, env = "JCS_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Requests per second per access key (0 disables limiting)
    #[arg(long, env = "JCS_RATE_LIMIT")]
    rate_limit: Option<u32>,

    /// Enable debug logging
    #[arg(short, long, env = "JCS_DEBUG")]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "JCS_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = self.metadata {
            config.metadata_path = Some(path);
        }
        if let Some(endpoint) = self.backend_endpoint {
            config.backend.endpoint = endpoint;
        }
        if let Some(access_key) = self.backend_access_key {
            config.backend.access_key = access_key;
        }
        if let Some(secret_key) = self.backend_secret_key {
            config.backend.secret_key = secret_key;
        }
        if self.no_resign {
            config.backend.sign_requests = false;
        }
        if self.async_sync {
            config.sync_mode = SyncMode::Asynchronous;
        }
        if let Some(dir) = self.staging_dir {
            config.staging_dir = dir;
        }
        if let Some(rps) = self.rate_limit {
            config.rate_limit_rps = rps;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("jcs_cli={0},jcs_core={0},jcs_cloudstore={0},tower_http=debug", log_level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    tracing::info!("Starting JCS Gateway on {}", config.bind_addr());
    tracing::info!("Primary backend: {} ({})", config.backend.name, config.backend.endpoint);
    if !config.backend.sign_requests {
        tracing::warn!("⚠️  Re-signing is DISABLED - client signatures are forwarded as-is");
    }

    run_server_with_shutdown(config, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
