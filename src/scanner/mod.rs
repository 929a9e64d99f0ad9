use std::collections::HashSet;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::sleep;

use crate::config::Settings;
use crate::execution::BackoffPolicy;
use crate::models::{Candidate, Resolution, Side};

/// Polls the Gamma markets API for two-outcome match-winner markets and
/// emits entry candidates. Markets are only emitted once.
pub struct MarketScanner {
    client: Client,
    base_url: String,
    tags: Vec<String>,
    min_market_age_seconds: i64,
    backoff: BackoffPolicy,
    seen: HashSet<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    id: Option<String>,
    #[serde(default)]
    question: String,
    #[serde(default)]
    outcomes: Vec<String>,
    /// Gamma returns prices as a stringified JSON array, e.g. "[\"0.48\",\"0.52\"]"
    #[serde(default)]
    outcome_prices: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
    created_at: Option<String>,
}

impl GammaMarket {
    fn prices(&self) -> Option<(f64, f64)> {
        let raw = self.outcome_prices.as_deref()?;
        let parsed: Vec<String> = serde_json::from_str(raw).ok()?;
        if parsed.len() != 2 {
            return None;
        }
        let yes = parsed[0].parse().ok()?;
        let no = parsed[1].parse().ok()?;
        Some((yes, no))
    }

    fn age_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        let created = self.created_at.as_deref()?;
        let created: DateTime<Utc> = created.parse().ok()?;
        Some((now - created).num_seconds())
    }
}

impl MarketScanner {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.gamma_base_url.clone(),
            tags: settings.market_tags.clone(),
            min_market_age_seconds: settings.entry.min_market_age_seconds,
            backoff: settings.backoff.into(),
            seen: HashSet::new(),
        }
    }

    /// One scan pass. Transport failures are retried with backoff; an
    /// exhausted budget returns the error to the caller's loop.
    pub async fn scan(&mut self) -> anyhow::Result<Vec<Candidate>> {
        let mut attempt = 0u32;
        let markets = loop {
            attempt += 1;
            match self.fetch_markets().await {
                Ok(markets) => break markets,
                Err(err) => match self.backoff.jittered_delay_for(attempt) {
                    Some(delay) => {
                        tracing::warn!(attempt, error = %err, "Market scan failed, retrying");
                        sleep(delay).await;
                    }
                    None => return Err(err),
                },
            }
        };

        let now = Utc::now();
        let mut candidates = Vec::new();

        for market in markets {
            let Some(id) = market.id.clone() else { continue };
            if self.seen.contains(&id) {
                continue;
            }

            if !self.qualifies(&market, now) {
                continue;
            }
            let Some((price_yes, price_no)) = market.prices() else {
                continue;
            };

            self.seen.insert(id.clone());
            candidates.push(Candidate {
                market_id: id,
                question: market.question.clone(),
                price_yes,
                price_no,
                discovered_at: now,
            });
        }

        tracing::info!(count = candidates.len(), "Market scan complete");
        Ok(candidates)
    }

    fn qualifies(&self, market: &GammaMarket, now: DateTime<Utc>) -> bool {
        if !market.active {
            return false;
        }

        // Match-winner binary markets only
        let question = market.question.to_lowercase();
        if !question.contains("winner") && !question.contains("win") {
            return false;
        }
        if market.outcomes.len() != 2 {
            return false;
        }

        // Freshly created markets have unreliable books
        match market.age_seconds(now) {
            Some(age) if age < self.min_market_age_seconds => false,
            _ => true,
        }
    }

    /// Check watched markets for settlement. A closed market resolves to the
    /// side its book settled at.
    pub async fn check_resolutions(&self, market_ids: &[String]) -> Vec<Resolution> {
        let mut resolved = Vec::new();
        for market_id in market_ids {
            match self.fetch_market(market_id).await {
                Ok(market) if market.closed => {
                    let Some((yes, _)) = market.prices() else { continue };
                    let winning_side = if yes >= 0.5 { Side::Yes } else { Side::No };
                    resolved.push(Resolution {
                        market_id: market_id.clone(),
                        winning_side,
                        resolved_at: Utc::now(),
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(market = market_id, error = %err, "Resolution check failed");
                }
            }
        }
        resolved
    }

    async fn fetch_market(&self, market_id: &str) -> anyhow::Result<GammaMarket> {
        let url = format!("{}/markets/{}", self.base_url, market_id);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn fetch_markets(&self) -> anyhow::Result<Vec<GammaMarket>> {
        let url = format!("{}/markets", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("active", "true"), ("tags", &self.tags.join(","))])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
