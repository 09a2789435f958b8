use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use hastream_server::{run, Settings};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "hastream-server", version, about = "Clustered mock matching engine on an in-memory broker")]
struct Args {
    /// YAML configuration file; HASTREAM_<SECTION>__<KEY> variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    app_id: Option<String>,

    /// Number of cluster members
    #[arg(long)]
    instances: Option<u32>,

    /// Orders to send
    #[arg(long)]
    orders: Option<u64>,

    /// Destroy the active member after this many orders
    #[arg(long)]
    failover_after: Option<u64>,

    /// Disable the mid-run failover
    #[arg(long, conflicts_with = "failover_after")]
    no_failover: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize logging")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(app_id) = &args.app_id {
        settings.set_app_id(app_id);
    }
    if let Some(instances) = args.instances {
        settings.demo.instances = instances;
    }
    if let Some(orders) = args.orders {
        settings.demo.orders = orders;
    }
    if let Some(after) = args.failover_after {
        settings.demo.failover_after = Some(after);
    }
    if args.no_failover {
        settings.demo.failover_after = None;
    }
    if args.seed.is_some() {
        settings.demo.seed = args.seed;
    }
    settings.validate()?;

    if args.print_config {
        print!("{}", settings.to_yaml()?);
        return Ok(());
    }

    if let Some(port) = args.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    info!(
        "Starting demo: app={}, instances={}, orders={}",
        settings.cluster.app_id, settings.demo.instances, settings.demo.orders
    );
    let report = run(&settings).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
