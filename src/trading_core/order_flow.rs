//! Order-flow confirmations
//!
//! Absorption and delta flip gate entries. Everything else here (failed
//! continuation, thin liquidity, poor extremes, delta efficiency, VWAP zone,
//! EMA alignment) only feeds the confirmation count.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::VecDeque;

use super::profile::VolumeProfile;
use super::swings::SwingPointTracker;
use crate::config::EngineConfig;
use crate::types::{Bar, Direction, Price, TickSize};

/// Levels scanned either side of the close for thin liquidity
const LVN_SCAN_LEVELS: i64 = 5;

/// Direction of a delta flip on the current bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeltaFlip {
    /// Recent selling, current bar net buying
    pub bullish: bool,
    /// Recent buying, current bar net selling
    pub bearish: bool,
}

impl DeltaFlip {
    pub fn favours(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => self.bullish,
            Direction::Short => self.bearish,
        }
    }
}

/// Non-gating confirmations gathered for one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OrderFlowSnapshot {
    pub failed_continuation: Option<Price>,
    pub thin_liquidity: bool,
    pub poor_extreme: bool,
    /// |delta| / volume in percent
    pub delta_efficiency: Decimal,
    pub efficient_delta: bool,
    pub near_vwap: bool,
    pub ema_aligned: bool,
}

impl OrderFlowSnapshot {
    pub fn count(&self) -> u32 {
        [
            self.failed_continuation.is_some(),
            self.thin_liquidity,
            self.poor_extreme,
            self.efficient_delta,
            self.near_vwap,
            self.ema_aligned,
        ]
        .iter()
        .filter(|c| **c)
        .count() as u32
    }
}

/// Bar-level order-flow detectors
#[derive(Debug, Clone)]
pub struct OrderFlowConfirmation {
    absorption_min_volume: u64,
    absorption_max_range_ticks: Decimal,
    delta_flip_lookback: usize,
    use_failed_continuation: bool,
    failed_continuation_lookback: usize,
    lvn_threshold_pct: Decimal,
    delta_efficiency_pct: Decimal,
    vwap_zone_mult: Decimal,
}

impl OrderFlowConfirmation {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            absorption_min_volume: config.absorption_min_volume,
            absorption_max_range_ticks: Decimal::from(config.absorption_max_range_ticks),
            delta_flip_lookback: config.delta_flip_lookback_bars,
            use_failed_continuation: config.use_failed_continuation,
            failed_continuation_lookback: config.failed_continuation_lookback_bars,
            lvn_threshold_pct: config.lvn_threshold_pct,
            delta_efficiency_pct: config.delta_efficiency_pct,
            vwap_zone_mult: config.vwap_zone_mult,
        }
    }

    /// Heavy volume with little displacement
    pub fn absorption(&self, bar: &Bar, tick: TickSize) -> bool {
        bar.volume >= self.absorption_min_volume
            && tick.ticks_in(bar.range()) <= self.absorption_max_range_ticks
    }

    /// Compare the current delta sign against the last N prior bars
    pub fn delta_flip(&self, prior: &VecDeque<Bar>, current: &Bar) -> DeltaFlip {
        let recent = prior.iter().rev().take(self.delta_flip_lookback);
        let (mut was_bearish, mut was_bullish) = (false, false);
        for bar in recent {
            was_bearish |= bar.delta < 0;
            was_bullish |= bar.delta > 0;
        }

        DeltaFlip {
            bullish: was_bearish && current.delta > 0,
            bearish: was_bullish && current.delta < 0,
        }
    }

    /// Swing level a recent bar closed through before price came back.
    ///
    /// Bullish: a prior close below a swing low with the current close above
    /// it. Bars are scanned oldest first, levels in insertion order.
    pub fn failed_continuation(
        &self,
        direction: Direction,
        prior: &VecDeque<Bar>,
        current: &Bar,
        swings: &SwingPointTracker,
    ) -> Option<Price> {
        if !self.use_failed_continuation {
            return None;
        }

        let skip = prior.len().saturating_sub(self.failed_continuation_lookback);
        for bar in prior.iter().skip(skip) {
            let hit = match direction {
                Direction::Long => swings
                    .lows()
                    .iter()
                    .find(|&&s| bar.close < s && current.close > s),
                Direction::Short => swings
                    .highs()
                    .iter()
                    .find(|&&s| bar.close > s && current.close < s),
            };
            if let Some(level) = hit {
                return Some(*level);
            }
        }
        None
    }

    /// Low-volume node within five ticks of `price` in the reference profile.
    /// Levels the reference never traded count as thin.
    pub fn thin_liquidity_near(&self, reference: &VolumeProfile, price: Price, tick: TickSize) -> bool {
        let Some(center) = tick.level_of(price) else {
            return false;
        };
        let threshold = reference.average_volume() * self.lvn_threshold_pct / dec!(100);

        (center - LVN_SCAN_LEVELS..=center + LVN_SCAN_LEVELS).any(|level| match reference.volume_at(level) {
            None => true,
            Some(volume) => Decimal::from(volume) < threshold,
        })
    }

    /// |delta| / volume in percent; zero volume yields zero
    pub fn delta_efficiency(bar: &Bar) -> Decimal {
        if bar.volume == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(bar.delta.unsigned_abs()) / Decimal::from(bar.volume) * dec!(100)
    }

    /// Efficient bar whose delta sign agrees with `direction`
    pub fn efficient_delta(&self, bar: &Bar, direction: Direction) -> bool {
        let signed = match direction {
            Direction::Long => bar.delta > 0,
            Direction::Short => bar.delta < 0,
        };
        signed && Self::delta_efficiency(bar) >= self.delta_efficiency_pct
    }

    pub fn near_vwap(&self, close: Price, vwap: Price, atr: Decimal) -> bool {
        (close - vwap).abs() <= atr * self.vwap_zone_mult
    }

    /// Fast EMA on the trade side of VWAP
    pub fn ema_aligned(direction: Direction, fast_ema: Price, vwap: Price) -> bool {
        match direction {
            Direction::Long => fast_ema > vwap,
            Direction::Short => fast_ema < vwap,
        }
    }
}
