use chrono::{DateTime, Utc};
use thiserror::Error;

use super::indicators::IndicatorKind;
use crate::types::Price;

/// Faults that abandon processing of a single bar
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("bar at {time} is not after previous bar at {previous}")]
    OutOfOrder {
        time: DateTime<Utc>,
        previous: DateTime<Utc>,
    },
    #[error("malformed bar: high {high} below low {low}")]
    MalformedBar { high: Price, low: Price },
    #[error("{kind} unavailable for bar {index}")]
    MissingIndicator { kind: IndicatorKind, index: usize },
    #[error("price {0} cannot be quantized to a tick level")]
    PriceOutOfRange(Price),
}

/// Stage of per-bar processing, reported alongside failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validation,
    Profile,
    Filters,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Validation => write!(f, "validation"),
            Phase::Profile => write!(f, "profile"),
            Phase::Filters => write!(f, "filters"),
        }
    }
}

/// An [`EngineError`] tagged with the phase it came from
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{phase} phase failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: EngineError,
}

pub(crate) trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseError>;
}

impl<T> InPhase<T> for Result<T, EngineError> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseError> {
        self.map_err(|source| PhaseError { phase, source })
    }
}
