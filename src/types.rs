use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::execution::OrderSide;

/// Fixed-point price
pub type Price = Decimal;

/// Tick size used when the instrument reports none (NQ/ES = 0.25)
pub const DEFAULT_TICK_SIZE: Decimal = dec!(0.25);

/// Completed bar delivered by the candle aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: u64,
    /// Aggressive buy volume minus aggressive sell volume
    pub delta: i64,
}

impl Bar {
    pub fn range(&self) -> Price {
        self.high - self.low
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Side of the order that opens a position in this direction
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    pub fn from_net_position(net: i64) -> Option<Self> {
        match net.signum() {
            1 => Some(Direction::Long),
            -1 => Some(Direction::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Instrument tick size with a guaranteed positive value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSize(Decimal);

impl TickSize {
    /// Falls back to [`DEFAULT_TICK_SIZE`] when the reported size is missing or not positive
    pub fn new(reported: Option<Decimal>) -> Self {
        match reported {
            Some(tick) if tick > Decimal::ZERO => Self(tick),
            Some(tick) => {
                warn!("Tick size {} is not positive, using default {}", tick, DEFAULT_TICK_SIZE);
                Self(DEFAULT_TICK_SIZE)
            }
            None => Self(DEFAULT_TICK_SIZE),
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Nearest tick index for a price, rounding half away from zero
    pub fn level_of(&self, price: Price) -> Option<i64> {
        price
            .checked_div(self.0)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }

    /// Price of a tick index
    pub fn price_of(&self, level: i64) -> Price {
        Decimal::from(level) * self.0
    }

    /// Distance expressed in ticks
    pub fn ticks_in(&self, distance: Decimal) -> Decimal {
        distance / self.0
    }

    /// `count` ticks expressed as a price distance
    pub fn distance(&self, count: u32) -> Decimal {
        Decimal::from(count) * self.0
    }
}

impl Default for TickSize {
    fn default() -> Self {
        Self(DEFAULT_TICK_SIZE)
    }
}
