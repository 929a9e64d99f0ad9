/// Journal replay report
///
/// Rebuilds ledger state from the Postgres event journal and prints a
/// per-position summary. Useful for checking what a restarted bot would
/// recover to.
use clap::Parser;

use straddlebot::config::Settings;
use straddlebot::persistence::{rebuild_ledger, EventJournal, PostgresJournal};
use straddlebot::Result;

#[derive(Parser)]
#[command(name = "replay", about = "Rebuild ledger state from the event journal")]
struct Args {
    /// Postgres connection string; falls back to DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let database_url = args
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .ok_or("DATABASE_URL not set")?;

    let settings = Settings::load()?;
    let journal = PostgresJournal::new(&database_url).await?;
    let events = journal.replay().await?;
    let ledger = rebuild_ledger(
        settings.risk.bankroll,
        settings.entry.min_fill_ratio,
        &events,
    )?;

    println!("\n📊 Journal replay: {} events", events.len());
    println!("{:-<72}", "");
    for position in ledger.positions() {
        println!(
            "{:<28} {:<18} sold {:>6.1}% pnl {:>10.2}",
            position.market_id,
            position.state.as_str(),
            position.cheap_leg().sold_fraction() * 100.0,
            position.realized_pnl.unwrap_or(0.0)
        );
    }
    println!("{:-<72}", "");
    println!("Total realized P&L: {:.2}", ledger.total_realized_pnl());

    Ok(())
}
