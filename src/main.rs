use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::sync::mpsc;

use straddlebot::config::Settings;
use straddlebot::engine::{Engine, EngineEvent};
use straddlebot::execution::{BackoffPolicy, ExecutionCoordinator, SimExecutionClient};
use straddlebot::feed::{new_watchlist, ClobPriceSource, PriceFeedAdapter};
use straddlebot::ledger::PositionLedger;
use straddlebot::persistence::{rebuild_ledger, EventJournal, InMemoryJournal, PostgresJournal};
use straddlebot::scanner::MarketScanner;
use straddlebot::thresholds::ThresholdTable;
use straddlebot::Result;

const ENGINE_QUEUE_DEPTH: usize = 256;
const SUBMIT_DEADLINE_SECONDS: u64 = 10;
const ENTRY_SWEEP_INTERVAL_SECONDS: u64 = 30;

#[derive(Parser)]
#[command(name = "straddlebot", about = "Passive straddle bot for binary-outcome markets")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot with simulated (paper) execution
    Run,
    /// Load and validate configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    let table = settings.threshold_table()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => {
            tracing::info!("Configuration OK");
            tracing::info!("  Bankroll: ${:.2}", settings.risk.bankroll);
            tracing::info!(
                "  Exposure cap: ${:.2}",
                settings.risk.bankroll * settings.risk.max_total_exposure
            );
            tracing::info!("  Tags: {}", settings.market_tags.join(", "));
            for rule in table.rules() {
                tracing::info!(
                    "  Threshold {:.2} -> {:.0}% cumulative",
                    rule.level,
                    rule.cumulative_fraction * 100.0
                );
            }
            Ok(())
        }
        Command::Run => run(settings, table).await,
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("straddlebot=info,straddlebot::monitor=debug")
        .init();
}

async fn run(settings: Settings, table: ThresholdTable) -> Result<()> {
    tracing::info!("🚀 straddlebot starting");

    // Journal-backed recovery when Postgres is reachable, fresh in-memory
    // state otherwise
    match connect_journal().await {
        Some(journal) => {
            let events = journal.replay().await?;
            let ledger = rebuild_ledger(
                settings.risk.bankroll,
                settings.entry.min_fill_ratio,
                &events,
            )?;
            tracing::info!(
                "📂 Replayed {} journal events, {} open positions",
                events.len(),
                ledger.snapshot().open_positions
            );
            run_loops(settings, table, ledger, journal).await
        }
        None => {
            let ledger = PositionLedger::new(settings.risk.bankroll);
            run_loops(settings, table, ledger, InMemoryJournal::new()).await
        }
    }
}

async fn connect_journal() -> Option<PostgresJournal> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    match PostgresJournal::new(&database_url).await {
        Ok(journal) => {
            tracing::info!("Postgres journal enabled");
            Some(journal)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing without persistence",
                e
            );
            None
        }
    }
}

async fn run_loops<J: EventJournal + 'static>(
    settings: Settings,
    table: ThresholdTable,
    ledger: PositionLedger,
    journal: J,
) -> Result<()> {
    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(ENGINE_QUEUE_DEPTH);
    let watchlist = new_watchlist();
    let backoff = BackoffPolicy::from(settings.backoff);

    // Paper execution: fills loop straight back into the engine queue. A
    // real exchange client slots in behind the same trait.
    let client = SimExecutionClient::new(settings.fees, engine_tx.clone());
    let coordinator = ExecutionCoordinator::new(
        client,
        backoff,
        Duration::from_secs(SUBMIT_DEADLINE_SECONDS),
    );

    let engine = Engine::new(
        settings.clone(),
        table,
        ledger,
        coordinator,
        journal,
        watchlist.clone(),
    );

    tracing::info!("🔄 Spawning loops");

    // Loop 1: market discovery
    let scanner_task = {
        let tx = engine_tx.clone();
        let mut scanner = MarketScanner::new(&settings);
        let interval = Duration::from_secs(settings.scan_interval_seconds);
        tokio::spawn(async move {
            loop {
                match scanner.scan().await {
                    Ok(candidates) => {
                        for candidate in candidates {
                            if tx.send(EngineEvent::Candidate(candidate)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => tracing::warn!("Market scan failed: {}", e),
                }
                tokio::time::sleep(interval).await;
            }
        })
    };

    // Loop 2: price polling for watched markets
    let (price_tx, mut price_rx) = mpsc::channel(ENGINE_QUEUE_DEPTH);
    let feed_task = {
        let adapter = PriceFeedAdapter::new(
            ClobPriceSource::new(&settings.clob_base_url),
            watchlist.clone(),
            price_tx,
            Duration::from_secs(settings.poll_interval_seconds),
            backoff,
        );
        tokio::spawn(adapter.run())
    };
    let price_forward_task = {
        let tx = engine_tx.clone();
        tokio::spawn(async move {
            while let Some(update) = price_rx.recv().await {
                if tx.send(EngineEvent::Price(update)).await.is_err() {
                    break;
                }
            }
        })
    };

    // Loop 3: settlement checks for watched markets
    let resolution_task = {
        let tx = engine_tx.clone();
        let watchlist = watchlist.clone();
        let scanner = MarketScanner::new(&settings);
        let interval = Duration::from_secs(settings.scan_interval_seconds);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let markets: Vec<String> = {
                    let guard = watchlist.read().unwrap();
                    guard.iter().cloned().collect()
                };
                for resolution in scanner.check_resolutions(&markets).await {
                    if tx.send(EngineEvent::Resolution(resolution)).await.is_err() {
                        return;
                    }
                }
            }
        })
    };

    // Loop 4: entry timeout sweep
    let sweep_task = {
        let tx = engine_tx.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(ENTRY_SWEEP_INTERVAL_SECONDS));
            loop {
                ticker.tick().await;
                if tx.send(EngineEvent::EntryTimeoutSweep).await.is_err() {
                    break;
                }
            }
        })
    };

    // The engine owns the ledger; everything above only feeds its queue
    let engine_task = tokio::spawn(engine.run(engine_rx));

    tracing::info!("✅ All loops running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    let _ = engine_tx.send(EngineEvent::Shutdown).await;
    engine_task.await??;

    scanner_task.abort();
    feed_task.abort();
    price_forward_task.abort();
    resolution_task.abort();
    sweep_task.abort();

    tracing::info!("👋 straddlebot stopped");
    Ok(())
}
