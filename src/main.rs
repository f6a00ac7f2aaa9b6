//! Filesystem Replicator
//!
//! Polls the request service for filesystem requests, materializes them as
//! StandardStorage / GeneralPurposeStorage resources, and reports their
//! status back.

use anyhow::Context;
use clap::Parser;
use kube::CustomResourceExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use filesystem_replicator::{
    run_ops_server, FinalizerReleaser, GeneralPurposeStorage, HttpRequestService,
    KubeObjectStore, MemoryObjectStore, MemoryRequestService, ObjectStoreRef, Readiness,
    ReplicatorConfig, ReplicatorMetrics, RequestDispatcher, RequestServiceRef, RetryExecutor,
    StandardStorage, StatusWatcher, StorageKind, WatermarkPoller,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Filesystem Replicator - request service to Kubernetes storage resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "REPLICATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the request service
    #[arg(long, env = "REQUEST_SERVICE_URL")]
    request_service_url: Option<String>,

    /// Availability zone to replicate
    #[arg(long, env = "AVAILABILITY_ZONE")]
    availability_zone: Option<String>,

    /// Seconds between poll cycles
    #[arg(long, env = "POLL_INTERVAL")]
    poll_interval_secs: Option<u64>,

    /// Replicate general-purpose (NFS) filesystems
    #[arg(long, env = "GENERAL_PURPOSE_ENABLED")]
    general_purpose_enabled: bool,

    /// Health, readiness and metrics bind address
    #[arg(long, env = "OPS_ADDR", default_value = "0.0.0.0:8080")]
    ops_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes, in-memory request service)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// YAML list of filesystem requests served in standalone mode
    #[arg(long, env = "SEED_REQUESTS", requires = "standalone")]
    seed_requests: Option<PathBuf>,

    /// Print the CustomResourceDefinitions as YAML and exit
    #[arg(long)]
    print_crds: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!("{}", serde_yaml::to_string(&StandardStorage::crd())?);
        println!("---");
        print!("{}", serde_yaml::to_string(&GeneralPurposeStorage::crd())?);
        return Ok(());
    }

    init_logging(&args);

    let config = load_config(&args)?;
    let ops_addr: SocketAddr = args
        .ops_addr
        .parse()
        .with_context(|| format!("invalid ops address {}", args.ops_addr))?;

    info!(
        version = filesystem_replicator::VERSION,
        availability_zone = %config.availability_zone,
        poll_interval_secs = config.poll_interval_secs,
        general_purpose_enabled = config.general_purpose_enabled,
        standalone = args.standalone,
        "starting filesystem replicator"
    );

    let (store, requests) = connect(&args, &config).await?;

    tokio::time::timeout(config.ping_timeout(), requests.ping())
        .await
        .context("request service did not answer the startup ping in time")?
        .context("request service startup ping failed")?;
    info!("request service reachable");

    let metrics = Arc::new(ReplicatorMetrics::new()?);
    let retry = RetryExecutor::new(config.retry, metrics.clone());
    let finalizer = FinalizerReleaser::new(requests.clone(), retry.clone(), metrics.clone());

    let shutdown = CancellationToken::new();
    let readiness = Readiness::new();
    let mut tasks = Vec::new();

    let dispatcher = RequestDispatcher::new(
        store.clone(),
        retry.clone(),
        finalizer.clone(),
        metrics.clone(),
        config.general_purpose_enabled,
        config.ip_filter_policy,
    );
    let poller = WatermarkPoller::new(
        requests.clone(),
        dispatcher,
        metrics.clone(),
        config.availability_zone.clone(),
        config.poll_interval(),
    );
    tasks.push(tokio::spawn(poller.run(shutdown.clone())));

    let mut kinds = vec![StorageKind::Standard];
    if config.general_purpose_enabled {
        kinds.push(StorageKind::GeneralPurpose);
    }
    for kind in kinds {
        let watcher = StatusWatcher::new(
            kind,
            store.clone(),
            requests.clone(),
            retry.clone(),
            finalizer.clone(),
            metrics.clone(),
        );
        tasks.push(tokio::spawn(watcher.run(shutdown.clone())));
    }

    {
        let metrics = metrics.clone();
        let readiness = readiness.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_ops_server(ops_addr, metrics, readiness, shutdown.clone()).await {
                error!(error = %e, "ops server failed");
                shutdown.cancel();
            }
        }));
    }

    readiness.set_ready(true);
    info!("replicator running");

    wait_for_signal(shutdown.clone()).await;
    readiness.set_ready(false);

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "replicator task panicked");
        }
    }

    info!("replicator shutdown complete");
    Ok(())
}

/// Merge the config file with command-line overrides and validate the result
fn load_config(args: &Args) -> anyhow::Result<ReplicatorConfig> {
    let mut config = match &args.config {
        Some(path) => ReplicatorConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ReplicatorConfig::default(),
    };

    if let Some(url) = &args.request_service_url {
        config.request_service_url = url.clone();
    }
    if let Some(zone) = &args.availability_zone {
        config.availability_zone = zone.clone();
    }
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval_secs = secs;
    }
    if args.general_purpose_enabled {
        config.general_purpose_enabled = true;
    }

    config
        .validate(!args.standalone)
        .context("invalid configuration")?;
    Ok(config)
}

/// Build the object store and request service for this run
async fn connect(
    args: &Args,
    config: &ReplicatorConfig,
) -> anyhow::Result<(ObjectStoreRef, RequestServiceRef)> {
    if args.standalone {
        warn!("standalone mode: using in-memory object store and request service");
        let store: ObjectStoreRef = Arc::new(MemoryObjectStore::new());
        let requests = match &args.seed_requests {
            Some(path) => MemoryRequestService::from_file(path)
                .with_context(|| format!("failed to seed requests from {}", path.display()))?,
            None => MemoryRequestService::new(),
        };
        let requests: RequestServiceRef = Arc::new(requests);
        return Ok((store, requests));
    }

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let store: ObjectStoreRef = Arc::new(KubeObjectStore::new(client));
    let requests: RequestServiceRef = Arc::new(
        HttpRequestService::new(
            config.request_service_url.clone(),
            config.request_timeout(),
        )
            .context("failed to create request service client")?,
    );
    Ok((store, requests))
}

/// Cancel `shutdown` on SIGINT or SIGTERM, or return early if it is
/// cancelled elsewhere
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received interrupt, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "tower_http=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "filesystem-replicator",
            "--request-service-url",
            "http://requests:8443",
            "--availability-zone",
            "az3",
            "--general-purpose-enabled",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.request_service_url, "http://requests:8443");
        assert_eq!(config.availability_zone, "az3");
        assert!(config.general_purpose_enabled);
        assert_eq!(config.poll_interval_secs, 10);
    }

    #[test]
    fn test_endpoint_required_unless_standalone() {
        let args = Args::parse_from(["filesystem-replicator"]);
        assert!(load_config(&args).is_err());

        let args = Args::parse_from(["filesystem-replicator", "--standalone"]);
        assert!(load_config(&args).is_ok());
    }

    #[test]
    fn test_seed_requests_needs_standalone() {
        let parsed = Args::try_parse_from(["filesystem-replicator", "--seed-requests", "r.yaml"]);
        assert!(parsed.is_err());

        let args = Args::parse_from([
            "filesystem-replicator",
            "--standalone",
            "--seed-requests",
            "r.yaml",
        ]);
        assert_eq!(args.seed_requests, Some(PathBuf::from("r.yaml")));
    }

    #[tokio::test]
    async fn test_standalone_serves_seeded_requests() {
        use filesystem_replicator::RequestService;
        use futures::StreamExt;
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "- metadata:\n    cloudAccountId: t1\n    name: fs-1\n    resourceVersion: \"5\"\n  \
             spec:\n    availabilityZone: az1\n    request:\n      storage: 1TB"
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let args = Args::parse_from(["filesystem-replicator", "--standalone", "--seed-requests", &path]);
        let config = load_config(&args).unwrap();
        let (_, requests) = connect(&args, &config).await.unwrap();

        let items: Vec<_> = requests
            .search_filesystem_requests("az1", 0)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().name(), "fs-1");
    }
}
