use anyhow::{Context, bail};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use converge_api::{build, create_router};
use converge_engine::ControllerConfig;
use converge_gcp::client::{DEFAULT_COMPUTE_ENDPOINT, DEFAULT_DNS_ENDPOINT};
use converge_gcp::{ComputeApi, DnsApi, GcpHttpClient, InMemoryCloud, OperationPolling};

#[derive(Parser)]
#[command(name = "converge-api")]
#[command(about = "converge API Server - declarative cloud resources reconciled by controllers")]
struct Args {
    /// Listen address for REST API
    #[arg(short, long, default_value = "[::]:8080")]
    listen: String,

    /// Seconds between drift scans
    #[arg(long, default_value_t = 30)]
    poll_interval_secs: u64,

    /// Reconcile workers per kind
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Maximum number of pending keys per kind
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// Deadline for one reconcile pass (0 disables it)
    #[arg(long, default_value_t = 300)]
    reconcile_timeout_secs: u64,

    /// Run in development mode (in-memory cloud instead of Google Cloud)
    #[arg(long)]
    dev: bool,

    /// OAuth2 access token for the Google Cloud APIs
    #[arg(long, env = "GCP_ACCESS_TOKEN", hide_env_values = true)]
    gcp_access_token: Option<String>,

    /// Cloud DNS API base URL
    #[arg(long, default_value = DEFAULT_DNS_ENDPOINT)]
    dns_endpoint: String,

    /// Compute Engine API base URL
    #[arg(long, default_value = DEFAULT_COMPUTE_ENDPOINT)]
    compute_endpoint: String,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            reconcile_timeout: (self.reconcile_timeout_secs > 0)
                .then(|| Duration::from_secs(self.reconcile_timeout_secs)),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("converge_api=info,converge_engine=info,converge_gcp=info,tower_http=warn")
        }))
        .init();

    let args = Args::parse();

    let (dns, compute): (Arc<dyn DnsApi>, Arc<dyn ComputeApi>) = if args.dev {
        info!("Development mode: using in-memory cloud");
        let cloud = Arc::new(InMemoryCloud::new());
        let dns: Arc<dyn DnsApi> = cloud.clone();
        (dns, cloud)
    } else {
        let Some(token) = args.gcp_access_token.as_deref() else {
            bail!("--gcp-access-token (or GCP_ACCESS_TOKEN) is required unless --dev is set");
        };
        let client = Arc::new(GcpHttpClient::with_endpoints(
            token,
            &args.dns_endpoint,
            &args.compute_endpoint,
        ));
        let dns: Arc<dyn DnsApi> = client.clone();
        (dns, client)
    };

    let config = args.controller_config();
    info!(
        "Starting converge-api - REST: {}, poll interval: {:?}, workers: {}",
        args.listen, config.poll_interval, config.workers
    );

    let (state, controllers) = build(dns, compute, config, OperationPolling::default());
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("REST API listening on {}", args.listen);

    // Create shutdown signal channel
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

    let controllers_handle = tokio::spawn(controllers.run(shutdown_tx.subscribe()));

    let rest_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await
    });

    // Wait for shutdown signal
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);

    rest_handle.await??;
    controllers_handle.await?;

    info!("Shutdown complete");
    Ok(())
}
