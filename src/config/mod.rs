use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::thresholds::{ThresholdRule, ThresholdTable, ThresholdTableError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config load failed: {0}")]
    Load(#[from] config::ConfigError),
    #[error("threshold table file {path}: {source}")]
    ThresholdFile {
        path: String,
        source: std::io::Error,
    },
    #[error("threshold table parse: {0}")]
    ThresholdParse(#[from] serde_json::Error),
    #[error(transparent)]
    ThresholdTable(#[from] ThresholdTableError),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Exposure limits consulted by the risk gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub bankroll: f64,
    /// Fraction of bankroll that may be committed across all open positions
    pub max_total_exposure: f64,
    pub max_concurrent_positions: usize,
    /// Entries below this size (units of cheap-side shares) are rejected
    /// rather than shrunk
    pub min_position_size: f64,
    /// Drawdown fraction at which new entries pause
    pub stop_loss_drawdown: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            bankroll: 1000.0,
            max_total_exposure: 0.20,
            max_concurrent_positions: 5,
            min_position_size: 10.0,
            stop_loss_drawdown: 0.15,
        }
    }
}

/// When a scanned market qualifies for entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrySettings {
    /// Both sides must be within this distance of 0.50
    pub entry_band: f64,
    /// Entry leg size in shares before risk-gate sizing
    pub entry_size: f64,
    /// Minimum fill ratio on each leg before the straddle counts as entered
    pub min_fill_ratio: f64,
    /// Resting entry orders older than this are cancelled and the position
    /// failed
    pub entry_timeout_seconds: u64,
    pub order_ttl_seconds: u64,
    pub min_market_age_seconds: i64,
}

impl Default for EntrySettings {
    fn default() -> Self {
        Self {
            entry_band: 0.05,
            entry_size: 100.0,
            min_fill_ratio: 1.0,
            entry_timeout_seconds: 120,
            order_ttl_seconds: 120,
            min_market_age_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeModel {
    pub maker_fee_bps: f64,
    pub taker_fee_bps: f64,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            maker_fee_bps: 10.0,
            taker_fee_bps: 20.0,
        }
    }
}

impl FeeModel {
    pub fn maker_fee(&self, notional: f64) -> f64 {
        notional * self.maker_fee_bps / 10_000.0
    }

    pub fn taker_fee(&self, notional: f64) -> f64 {
        notional * self.taker_fee_bps / 10_000.0
    }
}

/// Retry policy knobs shared by the coordinator and the feed adapter
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gamma_base_url: String,
    pub clob_base_url: String,
    pub market_tags: Vec<String>,
    pub scan_interval_seconds: u64,
    pub poll_interval_seconds: u64,
    pub risk: RiskSettings,
    pub entry: EntrySettings,
    pub fees: FeeModel,
    pub backoff: BackoffSettings,
    /// JSON file holding the threshold schedule; empty means built-in default
    pub thresholds_path: String,
    pub thresholds: Vec<ThresholdRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gamma_base_url: "https://gamma-api.polymarket.com".to_string(),
            clob_base_url: "https://clob.polymarket.com".to_string(),
            market_tags: vec!["valorant".to_string(), "esports".to_string()],
            scan_interval_seconds: 60,
            poll_interval_seconds: 2,
            risk: RiskSettings::default(),
            entry: EntrySettings::default(),
            fees: FeeModel::default(),
            backoff: BackoffSettings::default(),
            thresholds_path: String::new(),
            thresholds: vec![
                ThresholdRule { level: 0.19, cumulative_fraction: 0.33 },
                ThresholdRule { level: 0.18, cumulative_fraction: 0.66 },
                ThresholdRule { level: 0.17, cumulative_fraction: 1.0 },
            ],
        }
    }
}

impl Settings {
    /// Load settings from the environment (prefix `STRADDLEBOT`, `__` as the
    /// section separator) on top of defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let settings: Settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("STRADDLEBOT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.risk.bankroll <= 0.0 {
            return Err(ConfigError::Invalid("bankroll must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.risk.max_total_exposure) {
            return Err(ConfigError::Invalid(
                "max_total_exposure must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.entry.min_fill_ratio) {
            return Err(ConfigError::Invalid(
                "min_fill_ratio must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Build the validated threshold table, from file if configured.
    pub fn threshold_table(&self) -> Result<ThresholdTable, ConfigError> {
        let rules = if self.thresholds_path.is_empty() {
            self.thresholds.clone()
        } else {
            let raw = std::fs::read_to_string(&self.thresholds_path).map_err(|source| {
                ConfigError::ThresholdFile {
                    path: self.thresholds_path.clone(),
                    source,
                }
            })?;
            serde_json::from_str(&raw)?
        };

        Ok(ThresholdTable::new(rules)?)
    }
}
