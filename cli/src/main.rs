//! chainbridge — turn blockchain log events into job runs.
//!
//! Usage:
//! ```bash
//! # Run the bridge
//! chainbridge run --config bridge.yaml
//!
//! # Validate a config file and list its subscriptions
//! chainbridge check --config bridge.yaml
//!
//! # List supported chains
//! chainbridge chains
//! ```

mod logging;

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use chainbridge_chains::{ChainRegistry, DefaultTransports};
use chainbridge_service::{Bridge, BridgeConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "check" => cmd_check(&args[2..]),
        "chains" => {
            cmd_chains();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainbridge {}", env!("CARGO_PKG_VERSION"));
    println!("Trigger job runs from blockchain log events\n");
    println!("USAGE:");
    println!("    chainbridge <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run        Start every stored subscription and dispatch events");
    println!("    check      Validate a config file and print its subscriptions");
    println!("    chains     List supported chains");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("RUN / CHECK FLAGS:");
    println!("    --config <FILE>   YAML configuration  [required]\n");
    println!("ENVIRONMENT:");
    println!("    CHAINBRIDGE_CHAINLINK_URL, CHAINBRIDGE_ACCESS_KEY,");
    println!("    CHAINBRIDGE_SECRET, CHAINBRIDGE_DATABASE_PATH override the file");
}

fn load_config(args: &[String]) -> Result<BridgeConfig> {
    let path = parse_flag(args, "--config").context("--config is required")?;
    BridgeConfig::load(&path).with_context(|| format!("loading {path}"))
}

async fn cmd_run(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    logging::init_tracing(&config.log);

    let bridge = Bridge::from_config(&config).await.context("building bridge")?;
    let report = bridge.boot().await.context("loading subscriptions")?;
    info!(
        started = report.started.len(),
        failed = report.failed.len(),
        "chainbridge running"
    );
    if report.started.is_empty() && !report.failed.is_empty() {
        warn!("no subscription started");
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    let metrics = bridge.shutdown().await;
    info!(
        received = metrics.received,
        delivered = metrics.delivered,
        failed = metrics.failed,
        skipped = metrics.skipped,
        "dispatch totals"
    );
    Ok(())
}

fn cmd_check(args: &[String]) -> Result<()> {
    let config = load_config(args)?;
    let chains = registry().names();

    println!("Job runner:  {}", config.chainlink.url);
    println!("Storage:     {:?}", config.storage.backend);
    println!("Subscriptions ({}):\n", config.subscriptions.len());

    let mut unknown = Vec::new();
    for record in &config.subscriptions {
        println!(
            "  {:<20} {:<20} {:<4} {}",
            record.id,
            record.endpoint.chain,
            record.endpoint.protocol.to_string(),
            record.endpoint.url
        );
        println!("  {:<20} job {}", "", record.job_reference);
        if !chains.contains(&record.endpoint.chain) {
            unknown.push(record.id.clone());
        }
    }

    if !unknown.is_empty() {
        bail!("unknown chain in subscriptions: {}", unknown.join(", "));
    }
    println!("\nOK");
    Ok(())
}

fn cmd_chains() {
    println!("Supported chains:\n");
    for name in registry().names() {
        println!("  {name}");
    }
}

fn registry() -> ChainRegistry {
    ChainRegistry::with_log_chains(Arc::new(DefaultTransports::default()))
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
