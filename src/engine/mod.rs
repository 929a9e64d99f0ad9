use chrono::Utc;
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::execution::{ExecutionClient, ExecutionCoordinator, SubmitOutcome};
use crate::feed::Watchlist;
use crate::ledger::{PositionLedger, PositionState};
use crate::models::{
    Candidate, ExitIntent, FillEvent, LedgerEvent, OrderSide, PriceUpdate, Resolution,
};
use crate::monitor::ThresholdMonitor;
use crate::persistence::EventJournal;
use crate::risk::{ProposedEntry, RiskDecision, RiskGate};
use crate::thresholds::ThresholdTable;

/// Everything the engine reacts to, in one ordered queue.
///
/// This is the serialization discipline: price updates, fills and
/// resolutions for all positions flow through a single channel into a
/// single owning task, so per-position events apply in arrival order and
/// the risk gate always reads fully applied state.
#[derive(Debug)]
pub enum EngineEvent {
    Candidate(Candidate),
    Price(PriceUpdate),
    Fill(FillEvent),
    Resolution(Resolution),
    /// Periodic tick that fails straddles whose entries never completed
    EntryTimeoutSweep,
    Shutdown,
}

/// The position lifecycle engine. Owns the ledger exclusively; every
/// mutation happens inside `run`'s event loop.
pub struct Engine<C: ExecutionClient, J: EventJournal> {
    settings: Settings,
    table: ThresholdTable,
    ledger: PositionLedger,
    monitor: ThresholdMonitor,
    coordinator: ExecutionCoordinator<C>,
    journal: J,
    watchlist: Watchlist,
}

impl<C: ExecutionClient, J: EventJournal> Engine<C, J> {
    pub fn new(
        settings: Settings,
        table: ThresholdTable,
        ledger: PositionLedger,
        coordinator: ExecutionCoordinator<C>,
        journal: J,
        watchlist: Watchlist,
    ) -> Self {
        Self {
            monitor: ThresholdMonitor::new(table.clone()),
            settings,
            table,
            ledger,
            coordinator,
            journal,
            watchlist,
        }
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn journal(&self) -> &J {
        &self.journal
    }

    /// Process events until shutdown, then drain in-flight orders so no
    /// outcome is left unobserved before the journal closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineEvent>) -> anyhow::Result<()> {
        tracing::info!("Engine event loop started");

        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::Candidate(candidate) => self.on_candidate(candidate).await,
                EngineEvent::Price(update) => self.on_price(update).await,
                EngineEvent::Fill(fill) => self.on_fill(fill).await,
                EngineEvent::Resolution(resolution) => self.on_resolution(resolution).await,
                EngineEvent::EntryTimeoutSweep => self.sweep_entry_timeouts().await,
                EngineEvent::Shutdown => break,
            }
        }

        let cancelled = self.coordinator.drain().await;
        tracing::info!(cancelled, "Engine shut down cleanly");
        tracing::info!(
            total_realized_pnl = self.ledger.total_realized_pnl(),
            "Final ledger state"
        );
        Ok(())
    }

    /// A scanned market qualifies when both sides sit near 0.50; the risk
    /// gate then sizes or rejects the entry.
    pub async fn on_candidate(&mut self, candidate: Candidate) {
        if self.ledger.contains(&candidate.market_id) {
            return;
        }

        let band = self.settings.entry.entry_band;
        if (candidate.price_yes - 0.5).abs() > band || (candidate.price_no - 0.5).abs() > band {
            tracing::debug!(
                market = candidate.market_id,
                yes = candidate.price_yes,
                no = candidate.price_no,
                "Candidate outside entry band"
            );
            return;
        }

        let proposed = ProposedEntry {
            market_id: candidate.market_id.clone(),
            yes_price: candidate.price_yes,
            no_price: candidate.price_no,
            size: self.settings.entry.entry_size,
        };

        let size = match RiskGate::approve(&proposed, &self.ledger.snapshot(), &self.settings.risk)
        {
            RiskDecision::Approve => proposed.size,
            RiskDecision::Shrink(size) => {
                tracing::info!(market = candidate.market_id, size, "Entry shrunk by risk gate");
                size
            }
            RiskDecision::Reject(reason) => {
                tracing::info!(market = candidate.market_id, %reason, "Entry rejected by risk gate");
                return;
            }
        };

        if let Err(err) = self.enter(&candidate, size).await {
            tracing::error!(market = candidate.market_id, error = %err, "Entry failed");
            // The first leg's buy may already be resting; a terminal position
            // cannot book its fill
            if let Err(cancel_err) = self.coordinator.cancel_entries(&candidate.market_id).await {
                tracing::error!(
                    market = candidate.market_id,
                    error = %cancel_err,
                    "Entry cancellation failed"
                );
            }
            self.fail_position(&candidate.market_id, &format!("entry error: {err}"))
                .await;
        }
    }

    async fn enter(&mut self, candidate: &Candidate, size: f64) -> anyhow::Result<()> {
        let opened_at = Utc::now();
        self.ledger.open_position(
            &candidate.market_id,
            candidate.price_yes,
            size,
            candidate.price_no,
            size,
            opened_at,
        )?;
        self.record(LedgerEvent::PositionOpened {
            market_id: candidate.market_id.clone(),
            yes_price: candidate.price_yes,
            yes_size: size,
            no_price: candidate.price_no,
            no_size: size,
            opened_at,
        })
        .await;
        self.watchlist
            .write()
            .unwrap()
            .insert(candidate.market_id.clone());

        let ttl = self.settings.entry.order_ttl_seconds;
        for (side, price) in [
            (crate::models::Side::Yes, candidate.price_yes),
            (crate::models::Side::No, candidate.price_no),
        ] {
            self.coordinator
                .submit_entry(&candidate.market_id, side, price, size, ttl)
                .await?;
        }
        Ok(())
    }

    /// Price tick: may produce threshold crossings, each of which becomes at
    /// most one exit order. A failed exit submission leaves that size unsold
    /// and eligible for the next lower threshold's sweep; it never fails the
    /// position.
    pub async fn on_price(&mut self, update: PriceUpdate) {
        let intents = self.monitor.on_price_update(&mut self.ledger, &update);

        if let Some(upnl) = self
            .ledger
            .get(&update.market_id)
            .and_then(|p| p.unrealized_pnl())
        {
            tracing::debug!(market = update.market_id, unrealized_pnl = upnl, "Marked position");
        }

        for intent in intents {
            self.record(LedgerEvent::ThresholdCrossed {
                market_id: intent.market_id.clone(),
                side: intent.side,
                level: intent.level,
                fraction: intent.fraction,
                crossed_at: update.observed_at,
            })
            .await;
            self.submit_exit(&intent).await;
        }
    }

    async fn submit_exit(&mut self, intent: &ExitIntent) {
        let ttl = self.settings.entry.order_ttl_seconds;
        match self
            .coordinator
            .submit_exit(&self.ledger, &self.table, intent, ttl)
            .await
        {
            Ok(SubmitOutcome::Submitted { order_ref, size }) => {
                self.record(LedgerEvent::ExitSubmitted {
                    market_id: intent.market_id.clone(),
                    side: intent.side,
                    level: intent.level,
                    size,
                    order_ref,
                    submitted_at: Utc::now(),
                })
                .await;
            }
            Ok(SubmitOutcome::Duplicate) | Ok(SubmitOutcome::NothingToSell) => {}
            Err(err) => {
                // Per-intent failure only; the unsold size stays eligible
                tracing::warn!(
                    market = intent.market_id,
                    level = intent.level,
                    error = %err,
                    "Exit submission failed, size remains unsold"
                );
            }
        }
    }

    /// Fold a fill confirmation into order tracking and the ledger.
    pub async fn on_fill(&mut self, fill: FillEvent) {
        let Some(order) = self.coordinator.reconcile_fill(&fill) else {
            return;
        };

        let applied = match order.order_side {
            OrderSide::Buy => self.ledger.record_entry_fill(
                &order.market_id,
                order.side,
                fill.filled_size,
                fill.fee,
                self.settings.entry.min_fill_ratio,
                fill.observed_at,
            ),
            OrderSide::Sell => self.ledger.record_exit_fill(
                &order.market_id,
                order.side,
                fill.price,
                fill.filled_size,
                fill.fee,
            ),
        };

        match applied {
            Ok(_state) => {
                self.record(LedgerEvent::FillRecorded {
                    market_id: order.market_id.clone(),
                    side: order.side,
                    order_side: order.order_side,
                    price: fill.price,
                    size: fill.filled_size,
                    fee: fill.fee,
                    filled_at: fill.observed_at,
                })
                .await;
            }
            Err(err) => {
                tracing::warn!(
                    market = order.market_id,
                    error = %err,
                    "Fill not applicable to ledger state"
                );
            }
        }
    }

    /// Market settled. No synthetic exits are invented for unsold size.
    pub async fn on_resolution(&mut self, resolution: Resolution) {
        let Some(position) = self.ledger.get(&resolution.market_id) else {
            tracing::debug!(market = resolution.market_id, "Resolution for unknown market");
            return;
        };
        if position.state.is_terminal() {
            return;
        }

        match self.ledger.resolve(&resolution.market_id, resolution.winning_side) {
            Ok(pnl) => {
                self.record(LedgerEvent::PositionResolved {
                    market_id: resolution.market_id.clone(),
                    winning_side: resolution.winning_side,
                    realized_pnl: pnl,
                    resolved_at: resolution.resolved_at,
                })
                .await;
                self.watchlist.write().unwrap().remove(&resolution.market_id);
            }
            Err(err) => {
                tracing::error!(market = resolution.market_id, error = %err, "Resolution failed");
            }
        }
    }

    /// Entry timeout: cancel resting entry orders and fail the straddle.
    pub async fn sweep_entry_timeouts(&mut self) {
        let timeout = self.settings.entry.entry_timeout_seconds as i64;
        let cutoff = Utc::now() - chrono::Duration::seconds(timeout);

        for market_id in self.ledger.entries_older_than(cutoff) {
            if let Err(err) = self.coordinator.cancel_entries(&market_id).await {
                // Cancellation beyond retry budget still fails the position;
                // drain at shutdown observes whatever is left
                tracing::error!(market = market_id, error = %err, "Entry cancellation failed");
            }
            self.fail_position(&market_id, "entry timeout").await;
        }
    }

    async fn fail_position(&mut self, market_id: &str, reason: &str) {
        if let Err(err) = self.ledger.fail(market_id, reason) {
            tracing::error!(market = market_id, error = %err, "Could not fail position");
            return;
        }
        self.record(LedgerEvent::PositionFailed {
            market_id: market_id.to_string(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        })
        .await;
        self.watchlist.write().unwrap().remove(market_id);
    }

    async fn record(&self, event: LedgerEvent) {
        if let Err(err) = self.journal.append(&event).await {
            tracing::error!(error = %err, "Journal append failed");
        }
    }
}
