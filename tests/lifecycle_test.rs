use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;

use straddlebot::config::{RiskSettings, Settings};
use straddlebot::engine::{Engine, EngineEvent};
use straddlebot::execution::{BackoffPolicy, ExecutionCoordinator, SimExecutionClient};
use straddlebot::feed::new_watchlist;
use straddlebot::ledger::{PositionLedger, PositionState};
use straddlebot::models::{Candidate, PriceUpdate, Resolution, Side};
use straddlebot::persistence::{rebuild_ledger, EventJournal, InMemoryJournal};

/// Drain every fill the simulated exchange has queued back into the engine.
async fn pump_fills(
    engine: &mut Engine<SimExecutionClient, InMemoryJournal>,
    rx: &mut mpsc::Receiver<EngineEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::Fill(fill) = event {
            engine.on_fill(fill).await;
        }
    }
}

fn price(market_id: &str, side: Side, value: f64) -> PriceUpdate {
    PriceUpdate {
        market_id: market_id.to_string(),
        side,
        price: value,
        observed_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let _ = tracing_subscriber::fmt::try_init();

    println!("=== Starting Lifecycle Test ===\n");

    let settings = Settings {
        risk: RiskSettings {
            bankroll: 1000.0,
            max_total_exposure: 0.20,
            ..Default::default()
        },
        ..Default::default()
    };
    let table = settings.threshold_table().unwrap();

    let (tx, mut rx) = mpsc::channel::<EngineEvent>(64);
    let client = SimExecutionClient::new(settings.fees, tx);
    let coordinator = ExecutionCoordinator::new(
        client,
        BackoffPolicy::from(settings.backoff),
        Duration::from_secs(5),
    );
    let mut engine = Engine::new(
        settings.clone(),
        table,
        PositionLedger::new(settings.risk.bankroll),
        coordinator,
        InMemoryJournal::new(),
        new_watchlist(),
    );

    // 1. Candidate discovered near 0.50 both sides
    println!("1. Entering straddle...");
    engine
        .on_candidate(Candidate {
            market_id: "match-1".to_string(),
            question: "Will Team A win the match?".to_string(),
            price_yes: 0.48,
            price_no: 0.52,
            discovered_at: Utc::now(),
        })
        .await;
    pump_fills(&mut engine, &mut rx).await;

    let position = engine.ledger().get("match-1").unwrap();
    assert_eq!(position.state, PositionState::Entered);
    assert_eq!(position.cheap_side, Side::Yes);
    assert_eq!(position.yes.filled_size, 100.0);
    assert_eq!(position.no.filled_size, 100.0);
    println!("   ✓ Both legs filled, cheap side = YES");

    // 2. Cheap side drops through the schedule one level at a time
    println!("\n2. Walking the exit schedule...");
    for (level, expected_sold) in [(0.19, 33.0), (0.18, 66.0), (0.17, 100.0)] {
        engine.on_price(price("match-1", Side::Yes, level)).await;
        pump_fills(&mut engine, &mut rx).await;

        let sold = engine.ledger().get("match-1").unwrap().yes.sold_size;
        assert!(
            (sold - expected_sold).abs() < 1e-9,
            "at level {level}: sold {sold}, expected {expected_sold}"
        );
        println!("   ✓ Level {level}: cumulative sold {sold}");
    }
    assert_eq!(
        engine.ledger().get("match-1").unwrap().state,
        PositionState::FullyExitedCheap
    );

    // 3. Rebound above the lowest level changes nothing
    println!("\n3. Rebound is ignored...");
    engine.on_price(price("match-1", Side::Yes, 0.25)).await;
    engine.on_price(price("match-1", Side::Yes, 0.18)).await;
    pump_fills(&mut engine, &mut rx).await;
    assert_eq!(engine.ledger().get("match-1").unwrap().yes.sold_size, 100.0);
    println!("   ✓ No re-triggered exits");

    // 4. Market settles for the favorite
    println!("\n4. Resolving...");
    engine
        .on_resolution(Resolution {
            market_id: "match-1".to_string(),
            winning_side: Side::No,
            resolved_at: Utc::now(),
        })
        .await;

    let position = engine.ledger().get("match-1").unwrap();
    assert_eq!(position.state, PositionState::Resolved);

    // Entry: 48 + 52 plus 10 bps maker on each leg = 100.10
    // Exits: 33 @ 0.19 + 33 @ 0.18 + 34 @ 0.17 = 17.99 gross, taker fees 0.03598
    // Settlement: 100 NO shares pay 1.00
    let expected_pnl = 17.99 - 0.03598 + 100.0 - 100.10;
    let pnl = position.realized_pnl.unwrap();
    assert!(
        (pnl - expected_pnl).abs() < 1e-9,
        "pnl {pnl}, expected {expected_pnl}"
    );
    println!("   ✓ Realized P&L: {pnl:.4}");

    // 5. The journal alone reconstructs the same terminal state
    println!("\n5. Replaying journal...");
    let events = engine.journal().replay().await.unwrap();
    let rebuilt = rebuild_ledger(
        settings.risk.bankroll,
        settings.entry.min_fill_ratio,
        &events,
    )
    .unwrap();

    let replayed = rebuilt.get("match-1").unwrap();
    assert_eq!(replayed.state, PositionState::Resolved);
    assert!((replayed.yes.sold_size - 100.0).abs() < 1e-9);
    assert!((replayed.realized_pnl.unwrap() - pnl).abs() < 1e-9);
    assert!((rebuilt.total_realized_pnl() - engine.ledger().total_realized_pnl()).abs() < 1e-9);
    println!("   ✓ Rebuilt ledger matches: {} events", events.len());

    println!("\n=== Lifecycle Test Passed ===");
}

#[tokio::test]
async fn test_risk_gate_blocks_overexposure() {
    let _ = tracing_subscriber::fmt::try_init();

    let settings = Settings {
        risk: RiskSettings {
            bankroll: 1000.0,
            max_total_exposure: 0.20,
            max_concurrent_positions: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let table = settings.threshold_table().unwrap();

    let (tx, mut rx) = mpsc::channel::<EngineEvent>(64);
    let client = SimExecutionClient::new(settings.fees, tx);
    let coordinator = ExecutionCoordinator::new(
        client,
        BackoffPolicy::from(settings.backoff),
        Duration::from_secs(5),
    );
    let mut engine = Engine::new(
        settings.clone(),
        table,
        PositionLedger::new(settings.risk.bankroll),
        coordinator,
        InMemoryJournal::new(),
        new_watchlist(),
    );

    // First straddle commits 100 of the 200 cap
    engine
        .on_candidate(Candidate {
            market_id: "match-1".to_string(),
            question: "Will Team A win?".to_string(),
            price_yes: 0.50,
            price_no: 0.50,
            discovered_at: Utc::now(),
        })
        .await;
    pump_fills(&mut engine, &mut rx).await;
    assert!(engine.ledger().contains("match-1"));

    // Second fits exactly into the remaining headroom
    engine
        .on_candidate(Candidate {
            market_id: "match-2".to_string(),
            question: "Will Team B win?".to_string(),
            price_yes: 0.50,
            price_no: 0.50,
            discovered_at: Utc::now(),
        })
        .await;
    pump_fills(&mut engine, &mut rx).await;

    let second = engine.ledger().get("match-2").unwrap();
    assert!((second.yes.entry_size - 100.0).abs() < 1e-9);

    // Third finds no headroom at all and is rejected
    engine
        .on_candidate(Candidate {
            market_id: "match-3".to_string(),
            question: "Will Team C win?".to_string(),
            price_yes: 0.50,
            price_no: 0.50,
            discovered_at: Utc::now(),
        })
        .await;
    assert!(!engine.ledger().contains("match-3"));
}
