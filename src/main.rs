use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tellor_supply_analytics::drivers::{log_summary, CollectionDriver};
use tellor_supply_analytics::{CollectorConfig, SnapshotStore, UnifiedReconciler};

const USAGE: &str = "\
Usage: supply-collector <mode> [args]

Modes:
  collect                       collect snapshots over the recent window
  latest                        collect one snapshot at the chain head
  block <number>                collect one snapshot at a specific block
  backfill                      re-attempt incomplete snapshots
  gap                           fill the largest hole in layer coverage
  monitor                       run the periodic collection loop
  summary                       print collection status
  remove-layer-block <height>   delete snapshots at one layer height
  remove-range <start> <end>    delete snapshots in a layer height range

Pass --yes to removal modes to skip the confirmation prompt.";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = match args.first() {
        Some(mode) => mode.as_str(),
        None => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    info!("🚀 Starting Tellor supply collector");

    let config = CollectorConfig::from_env()?;
    let store = SnapshotStore::open(&config.db_path)?;
    let reconciler = UnifiedReconciler::new(config, store)?;
    let driver = CollectionDriver::new(reconciler);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Shutdown signal received");
            signal_token.cancel();
        }
    });

    match mode {
        "collect" => {
            let outcome = driver.collect_range(&cancel).await?;
            info!(
                succeeded = outcome.succeeded,
                attempted = outcome.attempted,
                "✅ Collection run finished"
            );
        }
        "latest" => {
            if !driver.collect_latest(&cancel).await? {
                bail!("head snapshot collection failed");
            }
        }
        "block" => {
            let number: u64 = args
                .get(1)
                .context("block mode requires a block number")?
                .parse()
                .context("block number must be an integer")?;
            if !driver.collect_at_block(number, &cancel).await? {
                bail!("snapshot collection at block {number} failed");
            }
        }
        "backfill" => {
            let outcome = driver.backfill_incomplete(&cancel).await?;
            info!(
                succeeded = outcome.succeeded,
                attempted = outcome.attempted,
                "✅ Backfill run finished"
            );
        }
        "gap" => {
            if driver.collect_largest_gap(&cancel).await? {
                info!("✅ Gap snapshot collected");
            } else {
                info!("No gap snapshot was collected");
            }
        }
        "monitor" => {
            driver.monitor(&cancel).await?;
        }
        "summary" => {
            let summary = driver.reconciler().store().summary()?;
            log_summary(&summary);
            println!(
                "{} snapshots ({} complete, {} incomplete), {:.1}% complete, {:.1}h coverage",
                summary.total_snapshots,
                summary.complete_snapshots,
                summary.incomplete_snapshots,
                summary.completion_rate * 100.0,
                summary.coverage_hours
            );
        }
        "remove-layer-block" => {
            let height: u64 = args
                .get(1)
                .context("remove-layer-block requires a height")?
                .parse()
                .context("height must be an integer")?;
            let assume_yes = args.iter().any(|a| a == "--yes");
            driver.remove_layer_block(height, assume_yes)?;
        }
        "remove-range" => {
            let start: u64 = args
                .get(1)
                .context("remove-range requires a start height")?
                .parse()
                .context("start height must be an integer")?;
            let end: u64 = args
                .get(2)
                .context("remove-range requires an end height")?
                .parse()
                .context("end height must be an integer")?;
            if end < start {
                bail!("end height precedes start height");
            }
            let assume_yes = args.iter().any(|a| a == "--yes");
            driver.remove_layer_range(start, end, assume_yes)?;
        }
        other => {
            eprintln!("Unknown mode: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    info!("👋 Done");
    Ok(())
}
