use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of the exit schedule: by the time the cheap side trades at or
/// below `level`, `cumulative_fraction` of the original cheap-side size
/// should have been sold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdRule {
    pub level: f64,
    pub cumulative_fraction: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdTableError {
    #[error("threshold table is empty")]
    Empty,
    #[error("threshold level {0} outside (0, 1)")]
    LevelOutOfRange(f64),
    #[error("cumulative fraction {0} outside (0, 1]")]
    FractionOutOfRange(f64),
    #[error("levels must be strictly descending ({prev} then {next})")]
    LevelsNotDescending { prev: f64, next: f64 },
    #[error("cumulative fractions must be non-decreasing ({prev} then {next})")]
    FractionsDecreasing { prev: f64, next: f64 },
    #[error("final cumulative fraction is {0}, must be 1.0")]
    IncompleteSchedule(f64),
}

/// Integer key for a price level (tenths of a cent), so hit-set membership
/// does not depend on f64 equality.
pub fn level_key(level: f64) -> u32 {
    (level * 1000.0).round() as u32
}

/// Immutable, validated exit schedule, ordered by descending level.
///
/// Validated once at config load; the monitor only ever reads it.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    rules: Vec<ThresholdRule>,
}

impl ThresholdTable {
    pub fn new(rules: Vec<ThresholdRule>) -> Result<Self, ThresholdTableError> {
        if rules.is_empty() {
            return Err(ThresholdTableError::Empty);
        }

        for rule in &rules {
            if rule.level <= 0.0 || rule.level >= 1.0 {
                return Err(ThresholdTableError::LevelOutOfRange(rule.level));
            }
            if rule.cumulative_fraction <= 0.0 || rule.cumulative_fraction > 1.0 {
                return Err(ThresholdTableError::FractionOutOfRange(
                    rule.cumulative_fraction,
                ));
            }
        }

        for pair in rules.windows(2) {
            if pair[1].level >= pair[0].level {
                return Err(ThresholdTableError::LevelsNotDescending {
                    prev: pair[0].level,
                    next: pair[1].level,
                });
            }
            if pair[1].cumulative_fraction < pair[0].cumulative_fraction {
                return Err(ThresholdTableError::FractionsDecreasing {
                    prev: pair[0].cumulative_fraction,
                    next: pair[1].cumulative_fraction,
                });
            }
        }

        let last = rules.last().unwrap().cumulative_fraction;
        if (last - 1.0).abs() > f64::EPSILON {
            return Err(ThresholdTableError::IncompleteSchedule(last));
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    pub fn lowest_level(&self) -> f64 {
        self.rules.last().unwrap().level
    }

    /// Cumulative fraction scheduled by the given set of hit levels.
    ///
    /// The schedule is cumulative, so this is the largest cumulative_fraction
    /// among the hit rules, not their sum.
    pub fn cumulative_for_hits(&self, hits: &BTreeSet<u32>) -> f64 {
        self.rules
            .iter()
            .filter(|r| hits.contains(&level_key(r.level)))
            .map(|r| r.cumulative_fraction)
            .fold(0.0, f64::max)
    }

    /// Cumulative fraction scheduled at a given level
    pub fn cumulative_at(&self, level: f64) -> Option<f64> {
        let key = level_key(level);
        self.rules
            .iter()
            .find(|r| level_key(r.level) == key)
            .map(|r| r.cumulative_fraction)
    }

    /// Pure crossing computation: which rules does `price` newly cross, given
    /// the levels already hit?
    ///
    /// Walks descending, so a gap jump (0.20 straight to 0.16 against levels
    /// 0.19/0.18/0.17) yields all three rules in table order, most
    /// conservative price first. Levels already in `hits` are never returned
    /// again, which is what makes a rebound-and-redrop a no-op.
    pub fn crossings(&self, price: f64, hits: &BTreeSet<u32>) -> Vec<ThresholdRule> {
        self.rules
            .iter()
            .filter(|r| price <= r.level && !hits.contains(&level_key(r.level)))
            .copied()
            .collect()
    }
}
