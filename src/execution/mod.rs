mod backoff;
mod coordinator;
mod sim;

pub use backoff::BackoffPolicy;
pub use coordinator::{ExecutionCoordinator, SubmitOutcome, TrackedOrder};
pub use sim::SimExecutionClient;

use thiserror::Error;

use crate::models::{OrderIntent, OrderStatus};

/// How an execution failure should be handled.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    /// Worth retrying: timeouts, disconnects, 5xx-equivalents
    #[error("transient execution error: {0}")]
    Transient(String),
    /// Not worth retrying: rejected order, closed market, bad size
    #[error("permanent execution error: {0}")]
    Permanent(String),
    /// Submission deadline expired with the outcome unobserved. The order may
    /// still exist; reconcile before resubmitting.
    #[error("submission deadline expired")]
    DeadlineExpired,
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionError::Transient(_) | ExecutionError::DeadlineExpired
        )
    }
}

/// The external execution service, as the core sees it. Signing, transport,
/// auth and rate limiting all live behind this seam.
pub trait ExecutionClient: Send + Sync {
    fn submit_order(
        &self,
        intent: &OrderIntent,
        idempotency_key: &str,
    ) -> impl std::future::Future<Output = Result<String, ExecutionError>> + Send;

    fn cancel_order(
        &self,
        order_ref: &str,
    ) -> impl std::future::Future<Output = Result<(), ExecutionError>> + Send;

    fn order_status(
        &self,
        order_ref: &str,
    ) -> impl std::future::Future<Output = Result<OrderStatus, ExecutionError>> + Send;

    /// Look up an order by idempotency key, for reconciling a submission
    /// whose response was never observed.
    fn find_order(
        &self,
        idempotency_key: &str,
    ) -> impl std::future::Future<Output = Result<Option<(String, OrderStatus)>, ExecutionError>> + Send;
}
