use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use rayscan::app::{CacheService, Evaluator};
use rayscan::geo::GeoIp;
use rayscan::publish::Publisher;
use rayscan::store::KvStore;

#[derive(Parser)]
#[command(
    name = "rayscan",
    version,
    about = "Batched proxy-fleet evaluator: fetch, probe, rank and republish proxy servers"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true, default_value = "rayscan.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the refresh loop and the HTTP API (default)
    Run,

    /// Validate configuration and report the runtime environment
    Check,

    /// Run a single evaluation round and print the ranked head
    Once {
        /// Number of servers to print
        #[arg(short = 'n', long, default_value_t = 25)]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check) => cmd_check(&cli.config),
        Some(Commands::Once { top }) => cmd_once(&cli.config, top).await,
        Some(Commands::Run) | None => cmd_run(&cli.config).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

async fn cmd_run(config_path: &str) -> Result<()> {
    init_tracing();
    info!("rayscan starting...");

    let settings = Arc::new(rayscan::config::load_settings(config_path)?);
    if !Path::new(&settings.xray_path).exists() {
        warn!(
            path = settings.xray_path,
            "xray executable not found, probes will fail until it is installed"
        );
    }

    let geoip = Arc::new(GeoIp::init(&settings).await);
    let store = KvStore::connect(&settings).await;
    let publisher = Publisher::from_settings(&settings);

    let evaluator = Evaluator::new(settings.clone(), geoip);
    let cache = Arc::new(CacheService::new(
        settings.clone(),
        evaluator,
        store,
        publisher,
    ));

    tokio::spawn(cache.clone().run_periodic());

    rayscan::api::serve(&settings, cache).await
}

fn cmd_check(config_path: &str) -> Result<()> {
    match rayscan::config::load_settings(config_path) {
        Ok(settings) => {
            println!("config '{}' is valid", config_path);
            println!("  subscription feeds: {}", settings.sub_urls.len());
            println!(
                "  probe ports:        {}..{}",
                settings.base_port,
                settings.base_port as usize + settings.batch_size
            );
            println!("  latency target:     {}", settings.latency_test_url);
            println!(
                "  xray binary:        {} ({})",
                settings.xray_path,
                if Path::new(&settings.xray_path).exists() {
                    "found"
                } else {
                    "missing"
                }
            );
            println!(
                "  geoip database:     {} ({})",
                settings.geoip_db_path,
                if Path::new(&settings.geoip_db_path).exists() {
                    "found"
                } else {
                    "missing"
                }
            );
            println!("  precheck sites:     {}", settings.precheck_sites.len());
            println!(
                "  publishing:         {}",
                if settings.publish.enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("config '{}' has errors:", config_path);
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

async fn cmd_once(config_path: &str, top: usize) -> Result<()> {
    init_tracing();

    let settings = Arc::new(rayscan::config::load_settings(config_path)?);
    let geoip = Arc::new(GeoIp::init(&settings).await);
    let evaluator = Evaluator::new(settings, geoip);

    let servers = evaluator.compute_top_servers().await;
    if servers.is_empty() {
        eprintln!("no working servers found");
        std::process::exit(1);
    }

    for server in servers.iter().take(top) {
        println!("{}", server.raw_uri);
    }
    Ok(())
}
