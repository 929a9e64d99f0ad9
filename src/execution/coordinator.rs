use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::execution::{BackoffPolicy, ExecutionClient, ExecutionError};
use crate::ledger::PositionLedger;
use crate::models::{
    new_client_order_id, ExitIntent, FillEvent, OrderIntent, OrderSide, OrderStatus, Side,
};
use crate::thresholds::ThresholdTable;

/// Order book-keeping the core tracks; signing and transport stay external.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub idempotency_key: String,
    pub market_id: String,
    pub side: Side,
    pub order_side: OrderSide,
    pub level: Option<f64>,
    pub submitted_size: f64,
    pub filled_size: f64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted { order_ref: String, size: f64 },
    /// An order for this idempotency key is in flight or already done
    Duplicate,
    /// The schedule target is already covered by confirmed fills
    NothingToSell,
}

/// Turns intents into idempotent order submissions and reconciles fills.
///
/// Every submission carries an idempotency key, so a retry after an
/// unobserved outcome can never double-sell: the key is looked up on the
/// exchange before any resubmit. At most one exit order is in flight per
/// (position, side, level).
pub struct ExecutionCoordinator<C: ExecutionClient> {
    client: C,
    backoff: BackoffPolicy,
    submit_deadline: Duration,
    /// idempotency key -> order_ref for orders not yet terminal
    in_flight: HashMap<String, String>,
    orders: HashMap<String, TrackedOrder>,
    /// Keys whose orders reached a terminal status; never reused
    completed_keys: HashSet<String>,
}

impl<C: ExecutionClient> ExecutionCoordinator<C> {
    pub fn new(client: C, backoff: BackoffPolicy, submit_deadline: Duration) -> Self {
        Self {
            client,
            backoff,
            submit_deadline,
            in_flight: HashMap::new(),
            orders: HashMap::new(),
            completed_keys: HashSet::new(),
        }
    }

    pub fn order(&self, order_ref: &str) -> Option<&TrackedOrder> {
        self.orders.get(order_ref)
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Submit one entry leg. The client order id doubles as the idempotency
    /// key.
    pub async fn submit_entry(
        &mut self,
        market_id: &str,
        side: Side,
        price: f64,
        size: f64,
        ttl_seconds: u64,
    ) -> Result<SubmitOutcome, ExecutionError> {
        let key = new_client_order_id(market_id, side);
        let intent = OrderIntent {
            market_id: market_id.to_string(),
            side,
            order_side: OrderSide::Buy,
            price,
            size,
            ttl_seconds,
            client_order_id: key.clone(),
        };

        let order_ref = self.submit_with_retry(&intent, &key).await?;
        self.track(&intent, &key, &order_ref, None);
        Ok(SubmitOutcome::Submitted { order_ref, size })
    }

    /// Submit the exit order for a threshold crossing.
    ///
    /// Cancel-and-replace: any sell still resting on this leg from a higher
    /// level is cancelled first, and sizing then reads the ledger's confirmed
    /// sold amount. The target is cumulative(level) x filled cheap size, so a
    /// partially filled earlier exit leaves its remainder to be swept here
    /// without ever double-selling.
    pub async fn submit_exit(
        &mut self,
        ledger: &PositionLedger,
        table: &ThresholdTable,
        intent: &ExitIntent,
        ttl_seconds: u64,
    ) -> Result<SubmitOutcome, ExecutionError> {
        let key = intent.idempotency_key();
        if self.in_flight.contains_key(&key) || self.completed_keys.contains(&key) {
            tracing::debug!(key, "Discarding duplicate exit intent");
            return Ok(SubmitOutcome::Duplicate);
        }

        self.cancel_resting_exits(&intent.market_id, intent.side)
            .await?;

        let position = ledger.get(&intent.market_id).ok_or_else(|| {
            ExecutionError::Permanent(format!("no position for market {}", intent.market_id))
        })?;
        let leg = position.leg(intent.side);
        let target = table.cumulative_at(intent.level).ok_or_else(|| {
            ExecutionError::Permanent(format!("level {} not in threshold table", intent.level))
        })?;

        let size = target * leg.filled_size - leg.sold_size;
        if size <= 1e-9 {
            self.completed_keys.insert(key);
            return Ok(SubmitOutcome::NothingToSell);
        }

        let order = OrderIntent {
            market_id: intent.market_id.clone(),
            side: intent.side,
            order_side: OrderSide::Sell,
            price: intent.level,
            size,
            ttl_seconds,
            client_order_id: key.clone(),
        };

        let order_ref = self.submit_with_retry(&order, &key).await?;
        tracing::info!(
            market = intent.market_id,
            side = %intent.side,
            level = intent.level,
            size,
            order_ref,
            "Submitted exit order"
        );
        self.track(&order, &key, &order_ref, Some(intent.level));
        Ok(SubmitOutcome::Submitted { order_ref, size })
    }

    fn track(&mut self, intent: &OrderIntent, key: &str, order_ref: &str, level: Option<f64>) {
        self.in_flight.insert(key.to_string(), order_ref.to_string());
        self.orders.insert(
            order_ref.to_string(),
            TrackedOrder {
                idempotency_key: key.to_string(),
                market_id: intent.market_id.clone(),
                side: intent.side,
                order_side: intent.order_side,
                level,
                submitted_size: intent.size,
                filled_size: 0.0,
                status: OrderStatus::Open,
            },
        );
    }

    /// Submit with capped exponential backoff. A deadline expiry or transport
    /// timeout is NOT a presumed-failed order: the idempotency key is looked
    /// up on the exchange before any resubmission.
    async fn submit_with_retry(
        &mut self,
        intent: &OrderIntent,
        key: &str,
    ) -> Result<String, ExecutionError> {
        let mut attempt = 0u32;
        let mut last_error = String::new();

        loop {
            attempt += 1;
            let result = match timeout(self.submit_deadline, self.client.submit_order(intent, key))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::DeadlineExpired),
            };

            match result {
                Ok(order_ref) => return Ok(order_ref),
                Err(err) if err.is_transient() => {
                    last_error = err.to_string();
                    tracing::warn!(key, attempt, error = %err, "Transient submit failure");

                    // The unobserved submission may have landed
                    if let Ok(Some((order_ref, _status))) = self.client.find_order(key).await {
                        tracing::info!(key, order_ref, "Recovered in-flight order by key");
                        return Ok(order_ref);
                    }

                    match self.backoff.jittered_delay_for(attempt) {
                        Some(delay) => sleep(delay).await,
                        None => {
                            return Err(ExecutionError::RetriesExhausted {
                                attempts: attempt,
                                last: last_error,
                            })
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fold a fill confirmation into order tracking. Returns the tracked
    /// order view after the update, or None for an unknown order ref.
    pub fn reconcile_fill(&mut self, fill: &FillEvent) -> Option<TrackedOrder> {
        let order = match self.orders.get_mut(&fill.order_ref) {
            Some(order) => order,
            None => {
                tracing::warn!(order_ref = fill.order_ref, "Fill for unknown order");
                return None;
            }
        };

        order.filled_size += fill.filled_size;
        order.status = if order.filled_size >= order.submitted_size - 1e-9 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        if order.status == OrderStatus::Filled {
            self.in_flight.remove(&order.idempotency_key);
            self.completed_keys.insert(order.idempotency_key.clone());
        }

        Some(order.clone())
    }

    /// Cancel resting entry orders for a market (entry timeout path).
    pub async fn cancel_entries(&mut self, market_id: &str) -> Result<usize, ExecutionError> {
        let refs: Vec<String> = self
            .orders
            .values()
            .filter(|o| {
                o.market_id == market_id
                    && o.order_side == OrderSide::Buy
                    && matches!(o.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
            })
            .map(|o| o.idempotency_key.clone())
            .collect();

        let mut cancelled = 0;
        for key in refs {
            if let Some(order_ref) = self.in_flight.get(&key).cloned() {
                self.cancel_with_retry(&order_ref).await?;
                if let Some(order) = self.orders.get_mut(&order_ref) {
                    order.status = OrderStatus::Cancelled;
                }
                self.in_flight.remove(&key);
                self.completed_keys.insert(key);
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Cancel in-flight sells on a leg; their uncovered remainder folds into
    /// the next order's sweep sizing. A fill that races the cancellation is
    /// still applied when its confirmation arrives, clamped by the ledger to
    /// the size the leg still holds.
    async fn cancel_resting_exits(
        &mut self,
        market_id: &str,
        side: Side,
    ) -> Result<(), ExecutionError> {
        let resting: Vec<(String, String)> = self
            .in_flight
            .iter()
            .filter(|(_, order_ref)| {
                self.orders.get(*order_ref).is_some_and(|o| {
                    o.market_id == market_id
                        && o.side == side
                        && o.order_side == OrderSide::Sell
                })
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, order_ref) in resting {
            self.cancel_with_retry(&order_ref).await?;
            if let Some(order) = self.orders.get_mut(&order_ref) {
                order.status = OrderStatus::Cancelled;
            }
            self.in_flight.remove(&key);
            self.completed_keys.insert(key);
            tracing::info!(order_ref, "Cancelled superseded exit order");
        }
        Ok(())
    }

    async fn cancel_with_retry(&self, order_ref: &str) -> Result<(), ExecutionError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.cancel_order(order_ref).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() => match self.backoff.jittered_delay_for(attempt) {
                    Some(delay) => sleep(delay).await,
                    None => {
                        return Err(ExecutionError::RetriesExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        })
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Operator shutdown: observe or cancel every outstanding order so no
    /// position is left with an unobserved outcome. A failure on one order
    /// leaves it in flight and moves on to the rest. Returns the number of
    /// orders that had to be cancelled.
    pub async fn drain(&mut self) -> usize {
        let outstanding: Vec<(String, String)> = self
            .in_flight
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut cancelled = 0;
        for (key, order_ref) in outstanding {
            let status = match self.status_with_retry(&order_ref).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::error!(order_ref, error = %err, "Could not observe order at drain");
                    continue;
                }
            };
            match status {
                OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => {
                    if let Some(order) = self.orders.get_mut(&order_ref) {
                        order.status = status;
                    }
                }
                _ => {
                    if let Err(err) = self.cancel_with_retry(&order_ref).await {
                        tracing::error!(order_ref, error = %err, "Could not cancel order at drain");
                        continue;
                    }
                    if let Some(order) = self.orders.get_mut(&order_ref) {
                        order.status = OrderStatus::Cancelled;
                    }
                    cancelled += 1;
                }
            }
            self.in_flight.remove(&key);
            self.completed_keys.insert(key);
        }

        tracing::info!(
            cancelled,
            unobserved = self.in_flight.len(),
            "Execution coordinator drained"
        );
        cancelled
    }

    async fn status_with_retry(&self, order_ref: &str) -> Result<OrderStatus, ExecutionError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.order_status(order_ref).await {
                Ok(status) => return Ok(status),
                Err(err) if err.is_transient() => match self.backoff.jittered_delay_for(attempt) {
                    Some(delay) => sleep(delay).await,
                    None => {
                        return Err(ExecutionError::RetriesExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        })
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::ThresholdRule;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted execution service for coordinator tests
    struct MockClient {
        submit_results: Mutex<VecDeque<Result<String, ExecutionError>>>,
        find_results: Mutex<VecDeque<Option<(String, OrderStatus)>>>,
        statuses: Mutex<HashMap<String, OrderStatus>>,
        status_failures: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn new() -> Self {
            Self {
                submit_results: Mutex::new(VecDeque::new()),
                find_results: Mutex::new(VecDeque::new()),
                statuses: Mutex::new(HashMap::new()),
                status_failures: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
            }
        }

        fn script_submit(self, result: Result<&str, ExecutionError>) -> Self {
            self.submit_results
                .lock()
                .unwrap()
                .push_back(result.map(String::from));
            self
        }

        fn script_find(self, result: Option<(&str, OrderStatus)>) -> Self {
            self.find_results
                .lock()
                .unwrap()
                .push_back(result.map(|(r, s)| (r.to_string(), s)));
            self
        }
    }

    impl ExecutionClient for MockClient {
        async fn submit_order(
            &self,
            _intent: &OrderIntent,
            _key: &str,
        ) -> Result<String, ExecutionError> {
            self.submit_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ExecutionError::Permanent("unscripted submit".into())))
        }

        async fn cancel_order(&self, order_ref: &str) -> Result<(), ExecutionError> {
            self.cancelled.lock().unwrap().push(order_ref.to_string());
            Ok(())
        }

        async fn order_status(&self, order_ref: &str) -> Result<OrderStatus, ExecutionError> {
            if self
                .status_failures
                .lock()
                .unwrap()
                .contains(&order_ref.to_string())
            {
                return Err(ExecutionError::Transient("status unavailable".into()));
            }
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .get(order_ref)
                .cloned()
                .unwrap_or(OrderStatus::Open))
        }

        async fn find_order(
            &self,
            _key: &str,
        ) -> Result<Option<(String, OrderStatus)>, ExecutionError> {
            Ok(self
                .find_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(None))
        }
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(2),
            jitter: Duration::ZERO,
        }
    }

    fn coordinator(client: MockClient) -> ExecutionCoordinator<MockClient> {
        ExecutionCoordinator::new(client, fast_backoff(), Duration::from_secs(1))
    }

    fn table() -> ThresholdTable {
        ThresholdTable::new(vec![
            ThresholdRule { level: 0.19, cumulative_fraction: 0.33 },
            ThresholdRule { level: 0.18, cumulative_fraction: 0.66 },
            ThresholdRule { level: 0.17, cumulative_fraction: 1.0 },
        ])
        .unwrap()
    }

    fn entered_ledger() -> PositionLedger {
        let mut ledger = PositionLedger::new(1000.0);
        ledger
            .open_position("mkt", 0.48, 100.0, 0.52, 100.0, Utc::now())
            .unwrap();
        ledger
            .record_entry_fill("mkt", Side::Yes, 100.0, 0.0, 1.0, Utc::now())
            .unwrap();
        ledger
            .record_entry_fill("mkt", Side::No, 100.0, 0.0, 1.0, Utc::now())
            .unwrap();
        ledger
    }

    fn exit_intent(level: f64, fraction: f64) -> ExitIntent {
        ExitIntent {
            market_id: "mkt".to_string(),
            side: Side::Yes,
            level,
            fraction,
        }
    }

    fn fill(order_ref: &str, size: f64) -> FillEvent {
        FillEvent {
            order_ref: order_ref.to_string(),
            market_id: "mkt".to_string(),
            side: Side::Yes,
            order_side: OrderSide::Sell,
            price: 0.19,
            filled_size: size,
            fee: 0.0,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_exit_submission_sized_from_schedule() {
        let client = MockClient::new().script_submit(Ok("ord-1"));
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        let outcome = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();

        match outcome {
            SubmitOutcome::Submitted { size, .. } => assert!((size - 33.0).abs() < 1e-9),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_intent_discarded_while_in_flight() {
        let client = MockClient::new().script_submit(Ok("ord-1"));
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();

        let outcome = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Duplicate);
        assert_eq!(coordinator.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_completed_key_never_resubmitted() {
        let client = MockClient::new().script_submit(Ok("ord-1"));
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();
        coordinator.reconcile_fill(&fill("ord-1", 33.0)).unwrap();
        assert_eq!(coordinator.in_flight_count(), 0);

        // Same level again after the fill: still a duplicate, forever
        let outcome = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_partial_exit_fill_swept_by_next_level() {
        let client = MockClient::new()
            .script_submit(Ok("ord-1"))
            .script_submit(Ok("ord-2"));
        let mut coordinator = coordinator(client);
        let mut ledger = entered_ledger();

        coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();

        // Only 20 of 33 filled before the next threshold fires
        coordinator.reconcile_fill(&fill("ord-1", 20.0));
        ledger
            .record_exit_fill("mkt", Side::Yes, 0.19, 20.0, 0.0)
            .unwrap();

        let outcome = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.18, 0.33), 120)
            .await
            .unwrap();

        // 0.66 * 100 target minus 20 confirmed sold = 46, no double-count
        match outcome {
            SubmitOutcome::Submitted { size, .. } => assert!((size - 46.0).abs() < 1e-9),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gap_jump_cancels_superseded_order() {
        let client = MockClient::new()
            .script_submit(Ok("ord-1"))
            .script_submit(Ok("ord-2"));
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();

        // Next level fires before anything filled: the resting order is
        // cancelled and the new one carries the whole cumulative target
        let outcome = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.18, 0.33), 120)
            .await
            .unwrap();

        match outcome {
            SubmitOutcome::Submitted { size, .. } => assert!((size - 66.0).abs() < 1e-9),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            coordinator.client().cancelled.lock().unwrap().as_slice(),
            &["ord-1".to_string()]
        );
        assert_eq!(coordinator.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retried_to_success() {
        let client = MockClient::new()
            .script_submit(Err(ExecutionError::Transient("503".into())))
            .script_find(None)
            .script_submit(Ok("ord-1"));
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        let outcome = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Submitted { .. }));
    }

    #[tokio::test]
    async fn test_unobserved_submission_recovered_by_key() {
        // First submit times out server-side but actually landed
        let client = MockClient::new()
            .script_submit(Err(ExecutionError::DeadlineExpired))
            .script_find(Some(("ord-recovered", OrderStatus::Open)));
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        let outcome = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();

        match outcome {
            SubmitOutcome::Submitted { order_ref, .. } => assert_eq!(order_ref, "ord-recovered"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_rejection_not_retried() {
        let client = MockClient::new()
            .script_submit(Err(ExecutionError::Permanent("market closed".into())))
            .script_submit(Ok("never-used"));
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        let err = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Permanent(_)));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let client = MockClient::new()
            .script_submit(Err(ExecutionError::Transient("t1".into())))
            .script_find(None)
            .script_submit(Err(ExecutionError::Transient("t2".into())))
            .script_find(None)
            .script_submit(Err(ExecutionError::Transient("t3".into())))
            .script_find(None);
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        let err = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::RetriesExhausted { .. }));
    }

    #[tokio::test]
    async fn test_nothing_to_sell_when_schedule_covered() {
        let client = MockClient::new();
        let mut coordinator = coordinator(client);
        let mut ledger = entered_ledger();

        // 33 already confirmed sold covers the 0.19 target entirely
        ledger
            .record_exit_fill("mkt", Side::Yes, 0.19, 33.0, 0.0)
            .unwrap();

        let outcome = coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::NothingToSell);
    }

    #[tokio::test]
    async fn test_cancel_entries_on_timeout() {
        let client = MockClient::new()
            .script_submit(Ok("entry-yes"))
            .script_submit(Ok("entry-no"));
        let mut coordinator = coordinator(client);

        coordinator
            .submit_entry("mkt", Side::Yes, 0.48, 100.0, 120)
            .await
            .unwrap();
        coordinator
            .submit_entry("mkt", Side::No, 0.52, 100.0, 120)
            .await
            .unwrap();

        let cancelled = coordinator.cancel_entries("mkt").await.unwrap();
        assert_eq!(cancelled, 2);
        assert_eq!(coordinator.in_flight_count(), 0);

        let log = coordinator.client.cancelled.lock().unwrap();
        assert!(log.contains(&"entry-yes".to_string()));
        assert!(log.contains(&"entry-no".to_string()));
    }

    #[tokio::test]
    async fn test_drain_cancels_open_orders() {
        let client = MockClient::new().script_submit(Ok("ord-1"));
        client
            .statuses
            .lock()
            .unwrap()
            .insert("ord-1".to_string(), OrderStatus::Open);
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();

        let cancelled = coordinator.drain().await;
        assert_eq!(cancelled, 1);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_keeps_filled_orders() {
        let client = MockClient::new().script_submit(Ok("ord-1"));
        client
            .statuses
            .lock()
            .unwrap()
            .insert("ord-1".to_string(), OrderStatus::Filled);
        let mut coordinator = coordinator(client);
        let ledger = entered_ledger();

        coordinator
            .submit_exit(&ledger, &table(), &exit_intent(0.19, 0.33), 120)
            .await
            .unwrap();

        let cancelled = coordinator.drain().await;
        assert_eq!(cancelled, 0);
        assert!(coordinator.client.cancelled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_continues_past_unobservable_order() {
        let client = MockClient::new()
            .script_submit(Ok("entry-yes"))
            .script_submit(Ok("entry-no"));
        client
            .status_failures
            .lock()
            .unwrap()
            .push("entry-yes".to_string());
        let mut coordinator = coordinator(client);

        coordinator
            .submit_entry("mkt", Side::Yes, 0.48, 100.0, 120)
            .await
            .unwrap();
        coordinator
            .submit_entry("mkt", Side::No, 0.52, 100.0, 120)
            .await
            .unwrap();

        // The YES order's status stays unknown; the NO order is still
        // observed and cancelled
        let cancelled = coordinator.drain().await;
        assert_eq!(cancelled, 1);
        assert_eq!(coordinator.in_flight_count(), 1);

        let log = coordinator.client.cancelled.lock().unwrap();
        assert_eq!(log.as_slice(), ["entry-no".to_string()]);
    }
}
