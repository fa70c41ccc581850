//! Signal composition
//!
//! Gate order: session window, risk limits, value area, sweep, absorption,
//! delta flip, trend. Every failed gate becomes a [`SkipReason`]; a bar that
//! passes both long and short gates is suppressed.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

use super::indicators::IndicatorValues;
use super::order_flow::{OrderFlowConfirmation, OrderFlowSnapshot};
use super::profile::{ValueArea, VolumeProfileEngine};
use super::session::{ClockReading, SessionState};
use super::swings::{LiquiditySweepDetector, SwingPointTracker};
use super::trend::{TrendFilter, TrendPermission};
use crate::config::EngineConfig;
use crate::types::{Bar, Direction, Price, TickSize};

/// Why a bar produced no signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    OutsideTradingWindow,
    NewsWindow,
    LowVolume,
    LowAtr,
    PositionOpen,
    OrderPending,
    MaxTrades,
    DailyLossHalt,
    NoValueArea,
    InsideValueArea,
    NoSweep(Direction),
    NoAbsorption,
    NoDeltaFlip(Direction),
    TrendBlocked(Direction),
    ConflictingSignals,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::OutsideTradingWindow => write!(f, "outside trading window"),
            SkipReason::NewsWindow => write!(f, "news blackout"),
            SkipReason::LowVolume => write!(f, "volume below minimum"),
            SkipReason::LowAtr => write!(f, "ATR below minimum"),
            SkipReason::PositionOpen => write!(f, "position open"),
            SkipReason::OrderPending => write!(f, "order pending"),
            SkipReason::MaxTrades => write!(f, "daily trade cap reached"),
            SkipReason::DailyLossHalt => write!(f, "daily loss limit hit"),
            SkipReason::NoValueArea => write!(f, "no reference value area"),
            SkipReason::InsideValueArea => write!(f, "close inside value area"),
            SkipReason::NoSweep(d) => write!(f, "no {} sweep", d),
            SkipReason::NoAbsorption => write!(f, "no absorption"),
            SkipReason::NoDeltaFlip(d) => write!(f, "no {} delta flip", d),
            SkipReason::TrendBlocked(d) => write!(f, "trend blocks {}", d),
            SkipReason::ConflictingSignals => write!(f, "long and short both qualified"),
        }
    }
}

/// A qualified entry signal
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub direction: Direction,
    /// Signal bar close, used as the limit entry
    pub entry: Price,
    pub atr: Decimal,
    pub swept_level: Price,
    pub value_area: ValueArea,
    pub confirmations: OrderFlowSnapshot,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} @ {} | swept {} | VAL={} VAH={} | ATR={} | {} confirmations",
            self.direction,
            self.entry,
            self.swept_level,
            self.value_area.val,
            self.value_area.vah,
            self.atr,
            self.confirmations.count()
        )
    }
}

/// Everything the composer reads for one bar
pub struct SignalContext<'a> {
    pub index: usize,
    pub bar: &'a Bar,
    pub indicators: IndicatorValues,
    /// Slow EMA of the previous bar, present only while the trend filter is active
    pub prior_slow_ema: Option<Decimal>,
    /// Bars before `bar`, oldest first
    pub history: &'a VecDeque<Bar>,
    pub profile: &'a VolumeProfileEngine,
    pub swings: &'a SwingPointTracker,
    pub session: &'a SessionState,
}

pub struct SignalComposer {
    min_volume: u64,
    min_atr: Decimal,
    max_trades_day: u32,
    daily_loss_floor: Decimal,
    use_news_filter: bool,
    tick: TickSize,
    sweeps: LiquiditySweepDetector,
    order_flow: OrderFlowConfirmation,
    trend: TrendFilter,
}

impl SignalComposer {
    pub fn new(config: &EngineConfig, tick: TickSize) -> Self {
        Self {
            min_volume: config.min_volume,
            min_atr: config.min_atr,
            max_trades_day: config.max_trades_day,
            daily_loss_floor: config.daily_loss_floor(),
            use_news_filter: config.use_news_filter,
            tick,
            sweeps: LiquiditySweepDetector::new(tick.distance(config.sweep_threshold_ticks)),
            order_flow: OrderFlowConfirmation::new(config),
            trend: TrendFilter::new(config.use_multi_timeframe_filter, config.slow_trend_period),
        }
    }

    pub fn trend(&self) -> &TrendFilter {
        &self.trend
    }

    /// Time-of-day gate
    pub fn session_gate(&self, reading: &ClockReading) -> Result<(), SkipReason> {
        if !reading.in_trading_window {
            return Err(SkipReason::OutsideTradingWindow);
        }
        if self.use_news_filter && reading.in_news_window {
            return Err(SkipReason::NewsWindow);
        }
        Ok(())
    }

    /// Activity thresholds and per-session risk limits
    pub fn risk_gate(
        &self,
        bar: &Bar,
        atr: Decimal,
        session: &SessionState,
        position_open: bool,
    ) -> Result<(), SkipReason> {
        if bar.volume < self.min_volume {
            return Err(SkipReason::LowVolume);
        }
        if atr < self.min_atr {
            return Err(SkipReason::LowAtr);
        }
        if position_open {
            return Err(SkipReason::PositionOpen);
        }
        if session.order_pending {
            return Err(SkipReason::OrderPending);
        }
        if session.trades_today >= self.max_trades_day {
            return Err(SkipReason::MaxTrades);
        }
        if session.halted || session.daily_pnl <= self.daily_loss_floor {
            return Err(SkipReason::DailyLossHalt);
        }
        Ok(())
    }

    /// Directional gates (value area through trend) for both sides
    pub fn compose(&self, ctx: &SignalContext<'_>) -> Result<Signal, SkipReason> {
        let va = *ctx.profile.value_area().ok_or(SkipReason::NoValueArea)?;

        let trend = match ctx.prior_slow_ema {
            Some(prior) => self.trend.evaluate(ctx.index, ctx.indicators.slow_ema, prior),
            None => TrendPermission::BOTH,
        };

        let long = self.directional_gate(Direction::Long, &va, trend, ctx);
        let short = self.directional_gate(Direction::Short, &va, trend, ctx);

        let (direction, swept_level) = match (long, short) {
            (Ok(_), Ok(_)) => return Err(SkipReason::ConflictingSignals),
            (Ok(level), Err(_)) => (Direction::Long, level),
            (Err(_), Ok(level)) => (Direction::Short, level),
            (Err(long_reason), Err(short_reason)) => {
                return Err(if ctx.bar.close < va.val {
                    long_reason
                } else if ctx.bar.close > va.vah {
                    short_reason
                } else {
                    SkipReason::InsideValueArea
                });
            }
        };

        Ok(Signal {
            direction,
            entry: ctx.bar.close,
            atr: ctx.indicators.atr,
            swept_level,
            value_area: va,
            confirmations: self.confirmations(direction, ctx),
        })
    }

    fn directional_gate(
        &self,
        direction: Direction,
        va: &ValueArea,
        trend: TrendPermission,
        ctx: &SignalContext<'_>,
    ) -> Result<Price, SkipReason> {
        let bar = ctx.bar;
        let outside = match direction {
            Direction::Long => bar.close < va.val,
            Direction::Short => bar.close > va.vah,
        };
        if !outside {
            return Err(SkipReason::InsideValueArea);
        }

        let swept = self
            .sweeps
            .detect(bar, direction, ctx.swings)
            .ok_or(SkipReason::NoSweep(direction))?;
        debug!("{} sweep of swing level {}", direction, swept);

        if !self.order_flow.absorption(bar, self.tick) {
            return Err(SkipReason::NoAbsorption);
        }
        debug!("Absorption: vol={} range={}", bar.volume, bar.range());

        if !self.order_flow.delta_flip(ctx.history, bar).favours(direction) {
            return Err(SkipReason::NoDeltaFlip(direction));
        }
        debug!("{} delta flip: delta={}", direction, bar.delta);

        if !trend.permits(direction) {
            return Err(SkipReason::TrendBlocked(direction));
        }

        Ok(swept)
    }

    fn confirmations(&self, direction: Direction, ctx: &SignalContext<'_>) -> OrderFlowSnapshot {
        let bar = ctx.bar;
        let values = &ctx.indicators;
        let extremes = &ctx.session.extremes;

        OrderFlowSnapshot {
            failed_continuation: self
                .order_flow
                .failed_continuation(direction, ctx.history, bar, ctx.swings),
            thin_liquidity: self
                .order_flow
                .thin_liquidity_near(ctx.profile.reference(), bar.close, self.tick),
            poor_extreme: match direction {
                Direction::Long => extremes.poor_low(),
                Direction::Short => extremes.poor_high(),
            },
            delta_efficiency: OrderFlowConfirmation::delta_efficiency(bar),
            efficient_delta: self.order_flow.efficient_delta(bar, direction),
            near_vwap: self.order_flow.near_vwap(bar.close, values.vwap, values.atr),
            ema_aligned: OrderFlowConfirmation::ema_aligned(direction, values.fast_ema, values.vwap),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::{bar, flat_bar, minute};
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal_macros::dec;

    fn config() -> EngineConfig {
        EngineConfig {
            sweep_threshold_ticks: 1,
            ..Default::default()
        }
    }

    fn reading(hour: u32, minute: u32) -> ClockReading {
        let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
        ClockReading {
            local_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            local_time: time,
            in_trading_window: crate::trading_core::SessionClock::in_trading_window(time),
            in_news_window: crate::trading_core::SessionClock::in_news_window(time),
            in_initial_balance: false,
            new_day: false,
            first_bar: false,
        }
    }

    fn values() -> IndicatorValues {
        IndicatorValues {
            vwap: dec!(100),
            fast_ema: dec!(99),
            slow_ema: dec!(100),
            atr: dec!(2),
        }
    }

    /// Reference VA 101..102 and a recorded swing low at 98
    fn fixture() -> (VolumeProfileEngine, SwingPointTracker, VecDeque<Bar>) {
        let mut profile = VolumeProfileEngine::new(TickSize::default(), dec!(70));
        for (i, (price, volume)) in [(dec!(100), 50), (dec!(101), 200), (dec!(102), 100), (dec!(103), 30)]
            .iter()
            .enumerate()
        {
            profile.accumulate(&flat_bar(minute(4, i as i64), *price, *volume)).unwrap();
        }
        profile.rotate();

        let history: VecDeque<Bar> = vec![
            bar(minute(5, 0), dec!(100), dec!(99), dec!(99.5), 400, -100),
            bar(minute(5, 1), dec!(99.75), dec!(98), dec!(98.5), 400, -80),
            bar(minute(5, 2), dec!(99.5), dec!(98.75), dec!(99), 400, -20),
        ]
        .into();
        let mut swings = SwingPointTracker::new(20);
        for b in &history {
            swings.update(b);
        }
        assert_eq!(swings.lows().back(), Some(&dec!(98)));

        (profile, swings, history)
    }

    fn sweep_bar() -> Bar {
        bar(minute(5, 3), dec!(98.25), dec!(97.5), dec!(98.25), 600, 150)
    }

    fn session() -> SessionState {
        SessionState::new(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
    }

    #[test]
    fn test_session_gate() {
        let composer = SignalComposer::new(&config(), TickSize::default());
        assert_eq!(composer.session_gate(&reading(15, 29)), Err(SkipReason::OutsideTradingWindow));
        assert_eq!(composer.session_gate(&reading(16, 0)), Ok(()));

        // News windows sit outside the trading window with the fixed schedule
        assert_eq!(composer.session_gate(&reading(8, 30)), Err(SkipReason::OutsideTradingWindow));
        let mut news = reading(16, 0);
        news.in_news_window = true;
        assert_eq!(composer.session_gate(&news), Err(SkipReason::NewsWindow));

        let unfiltered = SignalComposer::new(
            &EngineConfig { use_news_filter: false, ..config() },
            TickSize::default(),
        );
        assert_eq!(unfiltered.session_gate(&news), Ok(()));
    }

    #[test]
    fn test_risk_gate_order() {
        let composer = SignalComposer::new(&config(), TickSize::default());
        let b = sweep_bar();
        let mut state = session();

        assert_eq!(composer.risk_gate(&b, dec!(2), &state, false), Ok(()));
        assert_eq!(
            composer.risk_gate(&flat_bar(b.timestamp, dec!(100), 299), dec!(2), &state, false),
            Err(SkipReason::LowVolume)
        );
        assert_eq!(composer.risk_gate(&b, dec!(0.5), &state, false), Err(SkipReason::LowAtr));
        assert_eq!(composer.risk_gate(&b, dec!(2), &state, true), Err(SkipReason::PositionOpen));

        state.order_pending = true;
        assert_eq!(composer.risk_gate(&b, dec!(2), &state, false), Err(SkipReason::OrderPending));
        state.order_pending = false;

        state.trades_today = 5;
        assert_eq!(composer.risk_gate(&b, dec!(2), &state, false), Err(SkipReason::MaxTrades));
        state.trades_today = 1;

        state.daily_pnl = dec!(-500);
        assert_eq!(composer.risk_gate(&b, dec!(2), &state, false), Err(SkipReason::DailyLossHalt));
    }

    #[test]
    fn test_long_signal_below_value_area() {
        let composer = SignalComposer::new(&config(), TickSize::default());
        let (profile, swings, history) = fixture();
        let state = session();
        let b = sweep_bar();

        let ctx = SignalContext {
            index: 10,
            bar: &b,
            indicators: values(),
            prior_slow_ema: None,
            history: &history,
            profile: &profile,
            swings: &swings,
            session: &state,
        };
        let signal = composer.compose(&ctx).unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entry, dec!(98.25));
        assert_eq!(signal.swept_level, dec!(98));
        assert_eq!(signal.value_area.val, dec!(101));
        // Within 1.6 of VWAP? |98.25 - 100| = 1.75: no. Thin liquidity: yes.
        assert!(signal.confirmations.thin_liquidity);
        assert!(!signal.confirmations.near_vwap);
    }

    #[test]
    fn test_gate_failures_name_the_long_side() {
        let composer = SignalComposer::new(&config(), TickSize::default());
        let (profile, swings, history) = fixture();
        let state = session();

        let check = |b: &Bar, prior_slow: Option<Decimal>| {
            composer.compose(&SignalContext {
                index: 60,
                bar: b,
                indicators: values(),
                prior_slow_ema: prior_slow,
                history: &history,
                profile: &profile,
                swings: &swings,
                session: &state,
            })
        };

        // No pierce beyond 97.75
        let shallow = bar(minute(5, 3), dec!(98.25), dec!(97.75), dec!(98.25), 600, 150);
        assert_eq!(check(&shallow, None).unwrap_err(), SkipReason::NoSweep(Direction::Long));

        // Too much range for absorption
        let wide = bar(minute(5, 3), dec!(98.75), dec!(97.5), dec!(98.25), 600, 150);
        assert_eq!(check(&wide, None).unwrap_err(), SkipReason::NoAbsorption);

        // Sellers still in control
        let selling = bar(minute(5, 3), dec!(98.25), dec!(97.5), dec!(98.25), 600, -10);
        assert_eq!(check(&selling, None).unwrap_err(), SkipReason::NoDeltaFlip(Direction::Long));

        // Slow EMA falling from 101 to 100
        assert_eq!(
            check(&sweep_bar(), Some(dec!(101))).unwrap_err(),
            SkipReason::TrendBlocked(Direction::Long)
        );

        let inside = flat_bar(minute(5, 3), dec!(101.5), 600);
        assert_eq!(check(&inside, None).unwrap_err(), SkipReason::InsideValueArea);
    }

    #[test]
    fn test_no_value_area_before_first_rotation() {
        let composer = SignalComposer::new(&config(), TickSize::default());
        let profile = VolumeProfileEngine::new(TickSize::default(), dec!(70));
        let swings = SwingPointTracker::new(20);
        let history = VecDeque::new();
        let state = session();
        let b = sweep_bar();

        let result = composer.compose(&SignalContext {
            index: 0,
            bar: &b,
            indicators: values(),
            prior_slow_ema: None,
            history: &history,
            profile: &profile,
            swings: &swings,
            session: &state,
        });
        assert_eq!(result.unwrap_err(), SkipReason::NoValueArea);
    }
}
