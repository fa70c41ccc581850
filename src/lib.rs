// Library crate - value-area sweep engine and its replay support

pub mod config;
pub mod data;
pub mod execution;
pub mod trading_core;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use trading_core::{BarOutcome, Engine};
pub use types::*;
