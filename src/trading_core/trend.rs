use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::Direction;

/// Directions the slow trend allows on this bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPermission {
    pub bullish: bool,
    pub bearish: bool,
}

impl TrendPermission {
    pub const BOTH: Self = Self { bullish: true, bearish: true };

    pub fn permits(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => self.bullish,
            Direction::Short => self.bearish,
        }
    }
}

/// Slope of the slow EMA as a direction gate
#[derive(Debug, Clone, Copy)]
pub struct TrendFilter {
    enabled: bool,
    /// Bars of history required before the slope is trusted
    min_history: usize,
}

impl TrendFilter {
    pub fn new(enabled: bool, min_history: usize) -> Self {
        Self { enabled, min_history }
    }

    /// Whether the filter needs the slow EMA for bar `index`
    pub fn is_active(&self, index: usize) -> bool {
        self.enabled && index >= self.min_history && index > 0
    }

    /// Rising slope permits longs, falling permits shorts, flat permits neither
    pub fn evaluate(&self, index: usize, current: Decimal, prior: Decimal) -> TrendPermission {
        if !self.is_active(index) {
            return TrendPermission::BOTH;
        }
        TrendPermission {
            bullish: current > prior,
            bearish: current < prior,
        }
    }
}
