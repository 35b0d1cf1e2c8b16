use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use webhook_router::driver::{Driver, HookOutcome};
use webhook_router::filter::{Configuration, ReqwestInterpreter};
use webhook_router::runtime::{Runtime, StdoutConsole};
use webhook_router::spool::SpoolManager;

/// Routes webhook records through a directive file.
///
/// With only `--config`, the parsed directives are printed back.
#[derive(Parser, Debug)]
#[command(name = "webhook-router", version, about)]
struct Cli {
    /// Directive file.
    #[arg(short, long, env = "WEBHOOK_ROUTER_CONFIG")]
    config: PathBuf,

    /// Webhook record file, or a directory of them, to run against the default queue.
    #[arg(long)]
    hook: Option<PathBuf>,

    /// Spool root directory.
    #[arg(long, env = "WEBHOOK_ROUTER_SPOOL")]
    spool: Option<PathBuf>,

    /// Record file to enqueue into the spool before draining.
    #[arg(long, requires = "spool")]
    enqueue: Vec<PathBuf>,

    /// Evaluate without sending requests, deleting or moving anything.
    #[arg(long)]
    dry: bool,

    /// Apply RETENTION policies after draining.
    #[arg(long, requires = "spool")]
    prune: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "webhook_router=info",
        1 => "webhook_router=debug",
        _ => "webhook_router=trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let text = fs::read_to_string(&cli.config)
        .with_context(|| format!("failed to read {}", cli.config.display()))?;
    let config = Configuration::parse(&text)
        .with_context(|| format!("failed to parse {}", cli.config.display()))?;

    if cli.hook.is_none() && cli.spool.is_none() {
        println!("{config}");
        return Ok(());
    }

    let http = ReqwestInterpreter::new().context("failed to build HTTP client")?;
    let mut runtime = Runtime::new(Rc::new(http), Rc::new(StdoutConsole));
    if let Some(root) = &cli.spool {
        let spool = SpoolManager::new(root);
        for record in &cli.enqueue {
            let enqueued = spool
                .enqueue(record)
                .with_context(|| format!("failed to enqueue {}", record.display()))?;
            if enqueued {
                info!(record = %record.display(), "enqueued");
            } else {
                warn!(record = %record.display(), "already in the spool, not enqueued");
            }
        }
        runtime = runtime.with_spool(spool);
    }
    let driver = Driver::new(config, Rc::new(runtime), cli.dry);

    if let Some(path) = &cli.hook {
        let outcomes = driver.process_hook_path(path)?;
        let consumed = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == HookOutcome::Consumed)
            .count();
        info!(files = outcomes.len(), consumed, "hook files processed");
    }

    if cli.spool.is_some() {
        let report = driver.drain_spool()?;
        println!("{}", serde_json::to_string(&report)?);
        if cli.prune && !cli.dry {
            let removed = driver.prune(Utc::now())?;
            info!(removed, "processed jobs pruned");
        }
    }
    Ok(())
}
