// Core modules
pub mod config;
pub mod engine;
pub mod execution;
pub mod feed;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod persistence;
pub mod risk;
pub mod scanner;
pub mod thresholds;

// Re-export commonly used types
pub use engine::{Engine, EngineEvent};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
