use std::sync::Mutex;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::ledger::PositionLedger;
use crate::models::{LedgerEvent, OrderSide};

/// Append-only event log. Sufficient to reconstruct full ledger state on
/// restart; nothing here is ever updated in place.
pub trait EventJournal: Send + Sync {
    fn append(
        &self,
        event: &LedgerEvent,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    /// All events in append order.
    fn replay(&self) -> impl std::future::Future<Output = anyhow::Result<Vec<LedgerEvent>>> + Send;
}

/// In-memory journal for tests and dry runs.
#[derive(Default)]
pub struct InMemoryJournal {
    events: Mutex<Vec<LedgerEvent>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventJournal for InMemoryJournal {
    async fn append(&self, event: &LedgerEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn replay(&self) -> anyhow::Result<Vec<LedgerEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }
}

/// Postgres journal
pub struct PostgresJournal {
    pool: PgPool,
}

impl PostgresJournal {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);
        Ok(Self { pool })
    }

    /// Total realized P&L over resolved and failed positions, for reporting
    pub async fn realized_pnl_total(&self) -> anyhow::Result<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(realized_pnl), 0) AS total FROM ledger_events
             WHERE realized_pnl IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let total: Decimal = row.get("total");
        Ok(total.to_f64().unwrap_or(0.0))
    }
}

fn event_kind(event: &LedgerEvent) -> &'static str {
    match event {
        LedgerEvent::PositionOpened { .. } => "position_opened",
        LedgerEvent::ThresholdCrossed { .. } => "threshold_crossed",
        LedgerEvent::ExitSubmitted { .. } => "exit_submitted",
        LedgerEvent::FillRecorded { .. } => "fill_recorded",
        LedgerEvent::PositionResolved { .. } => "position_resolved",
        LedgerEvent::PositionFailed { .. } => "position_failed",
    }
}

impl EventJournal for PostgresJournal {
    async fn append(&self, event: &LedgerEvent) -> anyhow::Result<()> {
        let realized_pnl = match event {
            LedgerEvent::PositionResolved { realized_pnl, .. } => Decimal::from_f64(*realized_pnl),
            _ => None,
        };

        sqlx::query(
            r#"
            INSERT INTO ledger_events (market_id, kind, payload, realized_pnl)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.market_id())
        .bind(event_kind(event))
        .bind(serde_json::to_value(event)?)
        .bind(realized_pnl)
        .execute(&self.pool)
        .await?;

        tracing::debug!(kind = event_kind(event), market = event.market_id(), "Journaled event");
        Ok(())
    }

    async fn replay(&self) -> anyhow::Result<Vec<LedgerEvent>> {
        let rows = sqlx::query("SELECT payload FROM ledger_events ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: serde_json::Value = row.get("payload");
            events.push(serde_json::from_value(payload)?);
        }

        tracing::info!("Replayed {} journal events from Postgres", events.len());
        Ok(events)
    }
}

/// Rebuild the in-memory ledger from a journal replay.
///
/// `ExitSubmitted` is order book-keeping only; ledger state moves on
/// confirmed fills, so it is skipped here just as it is live.
pub fn rebuild_ledger(
    bankroll: f64,
    min_fill_ratio: f64,
    events: &[LedgerEvent],
) -> anyhow::Result<PositionLedger> {
    let mut ledger = PositionLedger::new(bankroll);

    for event in events {
        match event {
            LedgerEvent::PositionOpened {
                market_id,
                yes_price,
                yes_size,
                no_price,
                no_size,
                opened_at,
            } => {
                ledger.open_position(
                    market_id, *yes_price, *yes_size, *no_price, *no_size, *opened_at,
                )?;
            }
            LedgerEvent::ThresholdCrossed {
                market_id,
                side,
                level,
                ..
            } => {
                ledger.mark_threshold_hit(market_id, *side, *level)?;
            }
            LedgerEvent::ExitSubmitted { .. } => {}
            LedgerEvent::FillRecorded {
                market_id,
                side,
                order_side,
                price,
                size,
                fee,
                filled_at,
            } => match order_side {
                OrderSide::Buy => {
                    ledger.record_entry_fill(
                        market_id,
                        *side,
                        *size,
                        *fee,
                        min_fill_ratio,
                        *filled_at,
                    )?;
                }
                OrderSide::Sell => {
                    ledger.record_exit_fill(market_id, *side, *price, *size, *fee)?;
                }
            },
            LedgerEvent::PositionResolved {
                market_id,
                winning_side,
                ..
            } => {
                ledger.resolve(market_id, *winning_side)?;
            }
            LedgerEvent::PositionFailed {
                market_id, reason, ..
            } => {
                ledger.fail(market_id, reason)?;
            }
        }
    }

    Ok(ledger)
}
