use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::models::Side;
use crate::thresholds::level_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    AwaitingEntry,
    Entered,
    PartiallyExited,
    FullyExitedCheap,
    Resolved,
    Failed,
}

impl PositionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Resolved | PositionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::AwaitingEntry => "AwaitingEntry",
            PositionState::Entered => "Entered",
            PositionState::PartiallyExited => "PartiallyExited",
            PositionState::FullyExitedCheap => "FullyExitedCheap",
            PositionState::Resolved => "Resolved",
            PositionState::Failed => "Failed",
        }
    }
}

/// One leg of a straddle.
#[derive(Debug, Clone)]
pub struct Leg {
    pub entry_price: f64,
    /// Size requested at entry
    pub entry_size: f64,
    /// Entry size confirmed filled by the exchange
    pub filled_size: f64,
    /// Exit size confirmed filled by the exchange
    pub sold_size: f64,
    /// Exit proceeds net of fees
    pub sale_proceeds: f64,
    /// Levels already acted on for this leg. Monotonic: entries are never
    /// removed, so a rebound can never un-cross a threshold.
    pub thresholds_hit: BTreeSet<u32>,
    pub last_price: Option<f64>,
    pub last_observed_at: Option<DateTime<Utc>>,
}

impl Leg {
    fn new(entry_price: f64, entry_size: f64) -> Self {
        Self {
            entry_price,
            entry_size,
            filled_size: 0.0,
            sold_size: 0.0,
            sale_proceeds: 0.0,
            thresholds_hit: BTreeSet::new(),
            last_price: None,
            last_observed_at: None,
        }
    }

    pub fn remaining_size(&self) -> f64 {
        self.filled_size - self.sold_size
    }

    /// Confirmed sold fraction of the leg's filled entry size
    pub fn sold_fraction(&self) -> f64 {
        if self.filled_size <= 0.0 {
            0.0
        } else {
            self.sold_size / self.filled_size
        }
    }

    fn entry_cost(&self) -> f64 {
        self.entry_price * self.filled_size
    }

    fn committed_cost(&self) -> f64 {
        self.entry_price * self.entry_size
    }
}

/// One straddle on one market. Created when entry orders are submitted,
/// terminal at Resolved or Failed.
#[derive(Debug, Clone)]
pub struct Position {
    pub market_id: String,
    pub yes: Leg,
    pub no: Leg,
    /// Current cheap-side designation; re-derived on price ticks with
    /// tie-keep, frozen per threshold evaluation
    pub cheap_side: Side,
    pub state: PositionState,
    pub opened_at: DateTime<Utc>,
    pub entered_at: Option<DateTime<Utc>>,
    pub entry_fees: f64,
    pub realized_pnl: Option<f64>,
    pub fail_reason: Option<String>,
    /// Out-of-order feed deliveries dropped for this position
    pub stale_drops: u64,
}

impl Position {
    pub fn leg(&self, side: Side) -> &Leg {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }

    pub fn leg_mut(&mut self, side: Side) -> &mut Leg {
        match side {
            Side::Yes => &mut self.yes,
            Side::No => &mut self.no,
        }
    }

    pub fn favorite_side(&self) -> Side {
        self.cheap_side.opposite()
    }

    pub fn cheap_leg(&self) -> &Leg {
        self.leg(self.cheap_side)
    }

    /// Total entry cost of confirmed fills, fees included
    pub fn entry_cost(&self) -> f64 {
        self.yes.entry_cost() + self.no.entry_cost() + self.entry_fees
    }

    /// Unrealized P&L from the most recent observed prices; None until both
    /// legs have been priced
    pub fn unrealized_pnl(&self) -> Option<f64> {
        let yes_price = self.yes.last_price?;
        let no_price = self.no.last_price?;
        let value = yes_price * self.yes.remaining_size() + no_price * self.no.remaining_size();
        let proceeds = self.yes.sale_proceeds + self.no.sale_proceeds;
        Some(value + proceeds - self.entry_cost())
    }
}

/// Consistent cross-position view for the risk gate. Taken between event
/// applications, never mid-update.
#[derive(Debug, Clone, Copy)]
pub struct LedgerSnapshot {
    pub open_positions: usize,
    pub committed_exposure: f64,
    pub equity: f64,
    pub peak_equity: f64,
}

/// In-memory authoritative record of every position. The single
/// serialization point: all mutation happens through the engine's event
/// loop.
pub struct PositionLedger {
    positions: HashMap<String, Position>,
    bankroll: f64,
    total_realized_pnl: f64,
    peak_equity: f64,
}

impl PositionLedger {
    pub fn new(bankroll: f64) -> Self {
        Self {
            positions: HashMap::new(),
            bankroll,
            peak_equity: bankroll,
            total_realized_pnl: 0.0,
        }
    }

    pub fn get(&self, market_id: &str) -> Option<&Position> {
        self.positions.get(market_id)
    }

    pub fn get_mut(&mut self, market_id: &str) -> Option<&mut Position> {
        self.positions.get_mut(market_id)
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.positions.contains_key(market_id)
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.total_realized_pnl
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| !p.state.is_terminal())
    }

    /// Open a position awaiting entry fills. One position per market, ever.
    pub fn open_position(
        &mut self,
        market_id: &str,
        yes_price: f64,
        yes_size: f64,
        no_price: f64,
        no_size: f64,
        opened_at: DateTime<Utc>,
    ) -> anyhow::Result<&Position> {
        if self.positions.contains_key(market_id) {
            anyhow::bail!("already have position for market {}", market_id);
        }

        // Entry-price designation; the original convention keeps NO cheap on
        // an exact tie
        let cheap_side = if yes_price < no_price { Side::Yes } else { Side::No };

        let position = Position {
            market_id: market_id.to_string(),
            yes: Leg::new(yes_price, yes_size),
            no: Leg::new(no_price, no_size),
            cheap_side,
            state: PositionState::AwaitingEntry,
            opened_at,
            entered_at: None,
            entry_fees: 0.0,
            realized_pnl: None,
            fail_reason: None,
            stale_drops: 0,
        };

        tracing::info!(
            market = market_id,
            yes_price,
            no_price,
            cheap = %cheap_side,
            "Opened straddle position (awaiting entry)"
        );

        self.positions.insert(market_id.to_string(), position);
        Ok(&self.positions[market_id])
    }

    /// Record a confirmed entry fill. Returns the new state: the position
    /// becomes Entered once both legs reach `min_fill_ratio`.
    pub fn record_entry_fill(
        &mut self,
        market_id: &str,
        side: Side,
        size: f64,
        fee: f64,
        min_fill_ratio: f64,
        filled_at: DateTime<Utc>,
    ) -> anyhow::Result<PositionState> {
        let position = self
            .positions
            .get_mut(market_id)
            .ok_or_else(|| anyhow::anyhow!("no position for market {}", market_id))?;

        if position.state != PositionState::AwaitingEntry {
            anyhow::bail!(
                "entry fill for {} in state {}",
                market_id,
                position.state.as_str()
            );
        }

        let leg = position.leg_mut(side);
        leg.filled_size = (leg.filled_size + size).min(leg.entry_size);
        position.entry_fees += fee;

        let yes_ratio = position.yes.filled_size / position.yes.entry_size;
        let no_ratio = position.no.filled_size / position.no.entry_size;
        if yes_ratio >= min_fill_ratio && no_ratio >= min_fill_ratio {
            position.state = PositionState::Entered;
            position.entered_at = Some(filled_at);
            tracing::info!(market = market_id, "Straddle entered (both legs filled)");
        }

        Ok(position.state)
    }

    /// Mark a threshold level acted upon for one side. Monotonic by
    /// construction: a repeat insert is a no-op and returns false.
    pub fn mark_threshold_hit(
        &mut self,
        market_id: &str,
        side: Side,
        level: f64,
    ) -> anyhow::Result<bool> {
        let position = self
            .positions
            .get_mut(market_id)
            .ok_or_else(|| anyhow::anyhow!("no position for market {}", market_id))?;
        Ok(position.leg_mut(side).thresholds_hit.insert(level_key(level)))
    }

    /// Record a confirmed exit fill on a leg and advance the lifecycle.
    pub fn record_exit_fill(
        &mut self,
        market_id: &str,
        side: Side,
        price: f64,
        size: f64,
        fee: f64,
    ) -> anyhow::Result<PositionState> {
        let position = self
            .positions
            .get_mut(market_id)
            .ok_or_else(|| anyhow::anyhow!("no position for market {}", market_id))?;

        if position.state.is_terminal() || position.state == PositionState::AwaitingEntry {
            anyhow::bail!(
                "exit fill for {} in state {}",
                market_id,
                position.state.as_str()
            );
        }

        if size <= 0.0 {
            anyhow::bail!("exit fill for {} has non-positive size {}", market_id, size);
        }

        // A fill that raced a cancel-and-replace can confirm more than the
        // leg still holds; book only the remaining size, fee prorated
        let leg = position.leg_mut(side);
        let remaining = (leg.filled_size - leg.sold_size).max(0.0);
        let applied = size.min(remaining);
        if applied + 1e-9 < size {
            tracing::warn!(
                market = market_id,
                side = %side,
                fill = size,
                remaining,
                "Exit fill exceeds remaining leg size, clamping"
            );
        }
        leg.sold_size += applied;
        leg.sale_proceeds += price * applied - fee * (applied / size);

        let cheap_fraction = position.cheap_leg().sold_fraction();
        position.state = if cheap_fraction >= 1.0 - 1e-9 {
            PositionState::FullyExitedCheap
        } else {
            PositionState::PartiallyExited
        };

        tracing::info!(
            market = market_id,
            side = %side,
            price,
            size,
            sold_fraction = cheap_fraction,
            state = position.state.as_str(),
            "Recorded exit fill"
        );

        Ok(position.state)
    }

    /// Settle a position. No synthetic exits: whatever remains of each leg is
    /// paid 1 per share on the winning side and 0 on the losing side.
    pub fn resolve(
        &mut self,
        market_id: &str,
        winning_side: Side,
    ) -> anyhow::Result<f64> {
        let position = self
            .positions
            .get_mut(market_id)
            .ok_or_else(|| anyhow::anyhow!("no position for market {}", market_id))?;

        if position.state.is_terminal() {
            anyhow::bail!(
                "resolution for {} in terminal state {}",
                market_id,
                position.state.as_str()
            );
        }

        let mut pnl = -position.entry_cost();
        for side in [Side::Yes, Side::No] {
            let leg = position.leg(side);
            pnl += leg.sale_proceeds;
            if side == winning_side {
                pnl += leg.remaining_size();
            }
        }

        position.state = PositionState::Resolved;
        position.realized_pnl = Some(pnl);
        self.total_realized_pnl += pnl;

        let equity = self.bankroll + self.total_realized_pnl;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        tracing::info!(
            market = market_id,
            winner = %winning_side,
            realized_pnl = pnl,
            "Position resolved"
        );

        Ok(pnl)
    }

    /// Fail a position (entry never completed, or unrecoverable execution
    /// error). Terminal.
    pub fn fail(&mut self, market_id: &str, reason: &str) -> anyhow::Result<()> {
        let position = self
            .positions
            .get_mut(market_id)
            .ok_or_else(|| anyhow::anyhow!("no position for market {}", market_id))?;

        if position.state.is_terminal() {
            anyhow::bail!("fail for {} already terminal", market_id);
        }

        // Whatever was actually filled and sold still counts against equity
        let mut pnl = -position.entry_cost();
        pnl += position.yes.sale_proceeds + position.no.sale_proceeds;

        position.state = PositionState::Failed;
        position.fail_reason = Some(reason.to_string());
        position.realized_pnl = Some(pnl);
        self.total_realized_pnl += pnl;

        tracing::warn!(market = market_id, reason, "Position failed");
        Ok(())
    }

    /// Markets still awaiting entry whose orders were opened before `cutoff`
    pub fn entries_older_than(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.positions
            .values()
            .filter(|p| p.state == PositionState::AwaitingEntry && p.opened_at < cutoff)
            .map(|p| p.market_id.clone())
            .collect()
    }

    /// Consistent snapshot for risk evaluation
    pub fn snapshot(&self) -> LedgerSnapshot {
        let committed_exposure = self
            .open_positions()
            .map(|p| p.yes.committed_cost() + p.no.committed_cost())
            .sum();

        LedgerSnapshot {
            open_positions: self.open_positions().count(),
            committed_exposure,
            equity: self.bankroll + self.total_realized_pnl,
            peak_equity: self.peak_equity,
        }
    }
}
