use crate::config::RiskSettings;
use crate::ledger::LedgerSnapshot;

/// Entry the engine wants to make, before sizing
#[derive(Debug, Clone)]
pub struct ProposedEntry {
    pub market_id: String,
    pub yes_price: f64,
    pub no_price: f64,
    /// Shares per leg
    pub size: f64,
}

impl ProposedEntry {
    /// Combined entry cost of both legs at the proposed size
    pub fn cost(&self) -> f64 {
        (self.yes_price + self.no_price) * self.size
    }

    fn cost_per_share(&self) -> f64 {
        self.yes_price + self.no_price
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approve,
    /// Approved at a reduced per-leg size
    Shrink(f64),
    Reject(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MaxConcurrentPositions,
    BelowMinSize,
    DrawdownPause,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::MaxConcurrentPositions => "max concurrent positions reached",
            RejectReason::BelowMinSize => "shrunk size below minimum",
            RejectReason::DrawdownPause => "drawdown stop-loss active",
        };
        f.write_str(s)
    }
}

/// Pure exposure check consulted before every entry. No side effects: the
/// decision is a function of (proposal, ledger snapshot, settings) only,
/// and the snapshot is taken between event applications so committed sizes
/// are never observed mid-update.
pub struct RiskGate;

impl RiskGate {
    pub fn approve(
        proposed: &ProposedEntry,
        snapshot: &LedgerSnapshot,
        settings: &RiskSettings,
    ) -> RiskDecision {
        // Trading paused under drawdown; open positions are still managed
        // to exit or resolution elsewhere
        let drawdown = if snapshot.peak_equity > 0.0 {
            (snapshot.peak_equity - snapshot.equity) / snapshot.peak_equity
        } else {
            0.0
        };
        if drawdown >= settings.stop_loss_drawdown {
            return RiskDecision::Reject(RejectReason::DrawdownPause);
        }

        if snapshot.open_positions >= settings.max_concurrent_positions {
            return RiskDecision::Reject(RejectReason::MaxConcurrentPositions);
        }

        if proposed.size < settings.min_position_size {
            return RiskDecision::Reject(RejectReason::BelowMinSize);
        }

        let cap = settings.max_total_exposure * settings.bankroll;
        let headroom = cap - snapshot.committed_exposure;
        if proposed.cost() <= headroom {
            return RiskDecision::Approve;
        }

        if headroom <= 0.0 {
            return RiskDecision::Reject(RejectReason::BelowMinSize);
        }

        let shrunk = headroom / proposed.cost_per_share();
        if shrunk < settings.min_position_size {
            RiskDecision::Reject(RejectReason::BelowMinSize)
        } else {
            RiskDecision::Shrink(shrunk)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RiskSettings {
        RiskSettings {
            bankroll: 1000.0,
            max_total_exposure: 0.20,
            max_concurrent_positions: 5,
            min_position_size: 10.0,
            stop_loss_drawdown: 0.15,
        }
    }

    fn snapshot(open: usize, committed: f64) -> LedgerSnapshot {
        LedgerSnapshot {
            open_positions: open,
            committed_exposure: committed,
            equity: 1000.0,
            peak_equity: 1000.0,
        }
    }

    fn proposal(size: f64) -> ProposedEntry {
        ProposedEntry {
            market_id: "mkt".to_string(),
            yes_price: 0.50,
            no_price: 0.50,
            size,
        }
    }

    #[test]
    fn test_approve_within_headroom() {
        // Cap 200, 150 committed: a 40-unit straddle (cost 40) fits
        let decision = RiskGate::approve(&proposal(40.0), &snapshot(1, 150.0), &settings());
        assert_eq!(decision, RiskDecision::Approve);
    }

    #[test]
    fn test_shrink_to_headroom() {
        // Cap 200, 150 committed, proposed cost 250: shrunk so cost = 50
        let decision = RiskGate::approve(&proposal(250.0), &snapshot(1, 150.0), &settings());
        assert_eq!(decision, RiskDecision::Shrink(50.0));
    }

    #[test]
    fn test_reject_when_shrunk_below_minimum() {
        let mut s = settings();
        s.min_position_size = 60.0;
        let decision = RiskGate::approve(&proposal(250.0), &snapshot(1, 150.0), &s);
        assert_eq!(decision, RiskDecision::Reject(RejectReason::BelowMinSize));
    }

    #[test]
    fn test_reject_at_max_concurrent_positions() {
        let decision = RiskGate::approve(&proposal(40.0), &snapshot(5, 0.0), &settings());
        assert_eq!(
            decision,
            RiskDecision::Reject(RejectReason::MaxConcurrentPositions)
        );
    }

    #[test]
    fn test_reject_under_drawdown_pause() {
        let snap = LedgerSnapshot {
            open_positions: 0,
            committed_exposure: 0.0,
            equity: 800.0,
            peak_equity: 1000.0,
        };
        let decision = RiskGate::approve(&proposal(40.0), &snap, &settings());
        assert_eq!(decision, RiskDecision::Reject(RejectReason::DrawdownPause));
    }

    #[test]
    fn test_reject_with_no_headroom_at_all() {
        let decision = RiskGate::approve(&proposal(40.0), &snapshot(1, 200.0), &settings());
        assert_eq!(decision, RiskDecision::Reject(RejectReason::BelowMinSize));
    }

    #[test]
    fn test_reject_proposal_below_minimum() {
        let decision = RiskGate::approve(&proposal(5.0), &snapshot(0, 0.0), &settings());
        assert_eq!(decision, RiskDecision::Reject(RejectReason::BelowMinSize));
    }
}
