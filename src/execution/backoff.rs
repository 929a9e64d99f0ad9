use std::time::Duration;

use rand::Rng;

use crate::config::BackoffSettings;

/// Capped exponential backoff with jitter, injected into the coordinator and
/// the feed adapter so retry behavior is test-plannable without a live
/// clock.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl From<BackoffSettings> for BackoffPolicy {
    fn from(s: BackoffSettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            base_delay: Duration::from_millis(s.base_delay_ms),
            multiplier: s.multiplier,
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter: Duration::from_millis(s.jitter_ms),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffSettings::default().into()
    }
}

impl BackoffPolicy {
    /// Deterministic delay before retry number `attempt` (1-based), capped at
    /// `max_delay`. None once the budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let scaled = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// `delay_for` plus uniform jitter, for live use.
    pub fn jittered_delay_for(&self, attempt: u32) -> Option<Duration> {
        let base = self.delay_for(attempt)?;
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Some(base);
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        Some(base + Duration::from_millis(extra))
    }
}
