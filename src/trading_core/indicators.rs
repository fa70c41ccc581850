//! Externally computed indicator values
//!
//! The engine never computes VWAP, EMAs or ATR itself. It pulls the value for a
//! bar index from whatever [`IndicatorSource`] it was built with.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorKind {
    Vwap,
    FastEma,
    SlowEma,
    Atr,
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorKind::Vwap => write!(f, "VWAP"),
            IndicatorKind::FastEma => write!(f, "fast EMA"),
            IndicatorKind::SlowEma => write!(f, "slow EMA"),
            IndicatorKind::Atr => write!(f, "ATR"),
        }
    }
}

/// Pull interface for per-bar indicator values
pub trait IndicatorSource {
    fn value(&self, kind: IndicatorKind, index: usize) -> Option<Decimal>;
}

/// Indicator values for one bar
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorValues {
    pub vwap: Decimal,
    pub fast_ema: Decimal,
    pub slow_ema: Decimal,
    pub atr: Decimal,
}

/// Column store of indicator values indexed by bar
#[derive(Debug, Clone, Default)]
pub struct SeriesIndicators {
    /// `None` marks an index that was skipped over by `set`
    rows: Vec<Option<IndicatorValues>>,
}

impl SeriesIndicators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, values: IndicatorValues) -> usize {
        self.rows.push(Some(values));
        self.rows.len() - 1
    }

    /// Overwrite (or extend to) a specific bar index. Indices skipped over
    /// stay unavailable until set.
    pub fn set(&mut self, index: usize, values: IndicatorValues) {
        if index >= self.rows.len() {
            self.rows.resize(index + 1, None);
        }
        self.rows[index] = Some(values);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FromIterator<IndicatorValues> for SeriesIndicators {
    fn from_iter<T: IntoIterator<Item = IndicatorValues>>(iter: T) -> Self {
        Self { rows: iter.into_iter().map(Some).collect() }
    }
}

impl IndicatorSource for SeriesIndicators {
    fn value(&self, kind: IndicatorKind, index: usize) -> Option<Decimal> {
        let row = self.rows.get(index)?.as_ref()?;
        Some(match kind {
            IndicatorKind::Vwap => row.vwap,
            IndicatorKind::FastEma => row.fast_ema,
            IndicatorKind::SlowEma => row.slow_ema,
            IndicatorKind::Atr => row.atr,
        })
    }
}
