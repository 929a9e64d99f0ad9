use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::config::FeeModel;
use crate::engine::EngineEvent;
use crate::execution::{ExecutionClient, ExecutionError};
use crate::models::{FillEvent, OrderIntent, OrderSide, OrderStatus};

/// Paper-trading client: every order fills immediately at its limit price.
/// Resting entry buys pay the maker fee; exit sells fire with the market
/// already through the limit and pay the taker fee. Fills are pushed back
/// into the engine queue like real confirmations, so the full lifecycle runs
/// end to end without touching an exchange.
pub struct SimExecutionClient {
    fees: FeeModel,
    fills: mpsc::Sender<EngineEvent>,
    counter: AtomicU64,
}

impl SimExecutionClient {
    pub fn new(fees: FeeModel, fills: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            fees,
            fills,
            counter: AtomicU64::new(0),
        }
    }
}

impl ExecutionClient for SimExecutionClient {
    async fn submit_order(
        &self,
        intent: &OrderIntent,
        _idempotency_key: &str,
    ) -> Result<String, ExecutionError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let order_ref = format!("sim-{n}");

        let notional = intent.price * intent.size;
        let fee = match intent.order_side {
            OrderSide::Buy => self.fees.maker_fee(notional),
            OrderSide::Sell => self.fees.taker_fee(notional),
        };
        let fill = FillEvent {
            order_ref: order_ref.clone(),
            market_id: intent.market_id.clone(),
            side: intent.side,
            order_side: intent.order_side,
            price: intent.price,
            filled_size: intent.size,
            fee,
            observed_at: Utc::now(),
        };
        self.fills
            .send(EngineEvent::Fill(fill))
            .await
            .map_err(|_| ExecutionError::Permanent("engine queue closed".to_string()))?;

        tracing::info!(
            order_ref,
            market = intent.market_id,
            side = %intent.side,
            price = intent.price,
            size = intent.size,
            "Simulated fill"
        );
        Ok(order_ref)
    }

    async fn cancel_order(&self, _order_ref: &str) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn order_status(&self, _order_ref: &str) -> Result<OrderStatus, ExecutionError> {
        Ok(OrderStatus::Filled)
    }

    async fn find_order(
        &self,
        _idempotency_key: &str,
    ) -> Result<Option<(String, OrderStatus)>, ExecutionError> {
        Ok(None)
    }
}
