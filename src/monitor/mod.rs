use crate::ledger::{PositionLedger, PositionState};
use crate::models::{ExitIntent, PriceUpdate, Side};
use crate::thresholds::ThresholdTable;

/// Consumes the normalized price feed and turns cheap-side threshold
/// crossings into exit intents.
///
/// Pure price-to-intent transduction over ledger state: it never talks to
/// the exchange. The feed is at-least-once and possibly reordered, so the
/// per-leg timestamp check and the monotonic hit sets are the correctness
/// backstop, not transport ordering.
///
/// Each leg carries its own hit set. On a full cheap/favorite reversal the
/// new cheap side starts from an empty set while the old side's hits stay
/// frozen; whether those frozen hits should ever transfer is a product
/// decision, not one this module takes.
pub struct ThresholdMonitor {
    table: ThresholdTable,
    stale_drops: u64,
}

impl ThresholdMonitor {
    pub fn new(table: ThresholdTable) -> Self {
        Self {
            table,
            stale_drops: 0,
        }
    }

    pub fn table(&self) -> &ThresholdTable {
        &self.table
    }

    /// Total out-of-order deliveries dropped, for observability
    pub fn stale_drops(&self) -> u64 {
        self.stale_drops
    }

    /// Apply one price update. Returns zero or more exit intents, in
    /// descending level order. Never errors: unknown and terminal positions
    /// are logged no-ops.
    pub fn on_price_update(
        &mut self,
        ledger: &mut PositionLedger,
        update: &PriceUpdate,
    ) -> Vec<ExitIntent> {
        let Some(position) = ledger.get_mut(&update.market_id) else {
            tracing::debug!(market = update.market_id, "Price update for unknown market");
            return Vec::new();
        };

        if position.state.is_terminal() {
            tracing::debug!(
                market = update.market_id,
                state = position.state.as_str(),
                "Price update for terminal position"
            );
            return Vec::new();
        }

        // Stale delivery: an older observation can never un-cross anything
        let leg = position.leg_mut(update.side);
        if let Some(last) = leg.last_observed_at {
            if update.observed_at < last {
                position.stale_drops += 1;
                self.stale_drops += 1;
                tracing::debug!(
                    market = update.market_id,
                    side = %update.side,
                    "Dropped stale price update"
                );
                return Vec::new();
            }
        }
        let leg = position.leg_mut(update.side);
        leg.last_price = Some(update.price);
        leg.last_observed_at = Some(update.observed_at);

        // Re-derive cheap/favorite; an exact tie keeps the previous
        // designation to avoid thrashing
        let yes_price = position.yes.last_price.unwrap_or(position.yes.entry_price);
        let no_price = position.no.last_price.unwrap_or(position.no.entry_price);
        if yes_price < no_price {
            position.cheap_side = Side::Yes;
        } else if no_price < yes_price {
            position.cheap_side = Side::No;
        }

        // Thresholds only apply to the cheap side of a live straddle
        if update.side != position.cheap_side {
            return Vec::new();
        }
        if !matches!(
            position.state,
            PositionState::Entered | PositionState::PartiallyExited
        ) {
            return Vec::new();
        }

        let side = position.cheap_side;
        let hits = position.leg(side).thresholds_hit.clone();
        let crossed = self.table.crossings(update.price, &hits);
        if crossed.is_empty() {
            return Vec::new();
        }

        // Gap jumps: one intent per newly crossed level, most conservative
        // price first, each sized against the cumulative schedule
        let mut intents = Vec::new();
        let mut prev_cumulative = self.table.cumulative_for_hits(&hits);
        for rule in crossed {
            let fraction = rule.cumulative_fraction - prev_cumulative;
            prev_cumulative = rule.cumulative_fraction;
            position
                .leg_mut(side)
                .thresholds_hit
                .insert(crate::thresholds::level_key(rule.level));

            if fraction <= 0.0 {
                continue;
            }

            tracing::info!(
                market = update.market_id,
                side = %side,
                level = rule.level,
                fraction,
                "Threshold crossed"
            );
            intents.push(ExitIntent {
                market_id: update.market_id.clone(),
                side,
                level: rule.level,
                fraction,
            });
        }

        intents
    }
}
