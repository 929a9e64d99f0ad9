use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::execution::BackoffPolicy;
use crate::models::{PriceUpdate, Side};

/// Two-sided quote as observed at the exchange
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub yes: f64,
    pub no: f64,
    pub observed_at: DateTime<Utc>,
}

/// Transport-level price source. The adapter hides whether quotes arrive by
/// poll or push; reconnects and auth live behind this seam.
pub trait PriceSource: Send + Sync {
    fn fetch_quote(
        &self,
        market_id: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<Quote>> + Send;
}

/// REST polling source against the CLOB midpoint endpoint
pub struct ClobPriceSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MidpointResponse {
    yes: f64,
    no: f64,
    timestamp: DateTime<Utc>,
}

impl ClobPriceSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
        }
    }
}

impl PriceSource for ClobPriceSource {
    async fn fetch_quote(&self, market_id: &str) -> anyhow::Result<Quote> {
        let url = format!("{}/midpoint/{}", self.base_url, market_id);
        let response: MidpointResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(Quote {
            yes: response.yes,
            no: response.no,
            observed_at: response.timestamp,
        })
    }
}

/// Markets the feed should watch; shared with the engine, which adds a
/// market on entry and removes it when the position goes terminal.
pub type Watchlist = Arc<RwLock<HashSet<String>>>;

pub fn new_watchlist() -> Watchlist {
    Arc::new(RwLock::new(HashSet::new()))
}

/// Normalizes exchange quotes into a uniform per-side `PriceUpdate` stream.
///
/// Delivery downstream is at-least-once: a fetch retried after an ambiguous
/// failure may emit the same observation twice. The monitor is idempotent
/// against that by design.
pub struct PriceFeedAdapter<S: PriceSource> {
    source: S,
    watchlist: Watchlist,
    tx: mpsc::Sender<PriceUpdate>,
    poll_interval: Duration,
    backoff: BackoffPolicy,
}

impl<S: PriceSource> PriceFeedAdapter<S> {
    pub fn new(
        source: S,
        watchlist: Watchlist,
        tx: mpsc::Sender<PriceUpdate>,
        poll_interval: Duration,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            source,
            watchlist,
            tx,
            poll_interval,
            backoff,
        }
    }

    /// Poll every watched market forever. Returns when the engine side of
    /// the channel closes (shutdown).
    pub async fn run(self) {
        loop {
            let markets: Vec<String> = {
                let guard = self.watchlist.read().unwrap();
                guard.iter().cloned().collect()
            };

            for market_id in markets {
                if self.poll_market(&market_id).await.is_err() {
                    // Channel closed: engine is shutting down
                    return;
                }
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Fetch one quote with retry and push both side updates. `Err` only on
    /// a closed channel.
    async fn poll_market(&self, market_id: &str) -> Result<(), ()> {
        let mut attempt = 0u32;
        let quote = loop {
            attempt += 1;
            match self.source.fetch_quote(market_id).await {
                Ok(quote) => break quote,
                Err(err) => match self.backoff.jittered_delay_for(attempt) {
                    Some(delay) => {
                        tracing::warn!(market = market_id, attempt, error = %err, "Quote fetch failed, retrying");
                        sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(market = market_id, error = %err, "Quote fetch abandoned this cycle");
                        return Ok(());
                    }
                },
            }
        };

        for (side, price) in [(Side::Yes, quote.yes), (Side::No, quote.no)] {
            let update = PriceUpdate {
                market_id: market_id.to_string(),
                side,
                price,
                observed_at: quote.observed_at,
            };
            if self.tx.send(update).await.is_err() {
                return Err(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedSource {
        quotes: Mutex<VecDeque<anyhow::Result<Quote>>>,
    }

    impl ScriptedSource {
        fn new(quotes: Vec<anyhow::Result<Quote>>) -> Self {
            Self {
                quotes: Mutex::new(quotes.into_iter().collect()),
            }
        }
    }

    impl PriceSource for ScriptedSource {
        async fn fetch_quote(&self, _market_id: &str) -> anyhow::Result<Quote> {
            self.quotes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("exhausted")))
        }
    }

    fn quote(yes: f64, no: f64) -> Quote {
        Quote {
            yes,
            no,
            observed_at: Utc::now(),
        }
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
        }
    }

    fn adapter(
        source: ScriptedSource,
    ) -> (PriceFeedAdapter<ScriptedSource>, mpsc::Receiver<PriceUpdate>) {
        let (tx, rx) = mpsc::channel(16);
        let watchlist = new_watchlist();
        watchlist.write().unwrap().insert("mkt".to_string());
        let adapter = PriceFeedAdapter::new(
            source,
            watchlist,
            tx,
            Duration::from_millis(1),
            fast_backoff(),
        );
        (adapter, rx)
    }

    #[tokio::test]
    async fn test_quote_becomes_two_side_updates() {
        let (adapter, mut rx) = adapter(ScriptedSource::new(vec![Ok(quote(0.18, 0.82))]));
        adapter.poll_market("mkt").await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.side, Side::Yes);
        assert_eq!(first.price, 0.18);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.side, Side::No);
        assert_eq!(second.price, 0.82);
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_retried() {
        let (adapter, mut rx) = adapter(ScriptedSource::new(vec![
            Err(anyhow::anyhow!("disconnect")),
            Ok(quote(0.30, 0.70)),
        ]));
        adapter.poll_market("mkt").await.unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.price, 0.30);
    }

    #[tokio::test]
    async fn test_exhausted_retries_skip_cycle_without_updates() {
        let (adapter, mut rx) = adapter(ScriptedSource::new(vec![
            Err(anyhow::anyhow!("down")),
            Err(anyhow::anyhow!("down")),
        ]));
        adapter.poll_market("mkt").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_stops_adapter() {
        let (adapter, rx) = adapter(ScriptedSource::new(vec![Ok(quote(0.5, 0.5))]));
        drop(rx);
        assert!(adapter.poll_market("mkt").await.is_err());
    }
}
