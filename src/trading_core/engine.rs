//! Per-instrument signal engine
//!
//! Every bar runs, in order:
//! 1. Validation (strictly increasing time, high >= low)
//! 2. Session clock; on a new calendar day the profile rotates, an unfilled
//!    entry is cancelled and a fresh `SessionState` replaces the old one
//! 3. Profile accumulation, session extremes, swing tracking
//! 4. Trailing-stop ratchet
//! 5. Filter cascade and trade lifecycle, for the most recent bar only.
//!    A trailing exit is reported for any bar that sends one.
//!
//! A failing phase abandons the bar and is logged; the next bar starts clean.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

use super::error::{EngineError, InPhase, Phase, PhaseError};
use super::indicators::{IndicatorKind, IndicatorSource, IndicatorValues};
use super::lifecycle::{RiskPlan, RiskRejection, TradeLifecycleController, TrailUpdate};
use super::profile::VolumeProfileEngine;
use super::session::{ClockReading, SessionClock, SessionState};
use super::signal::{SignalComposer, SignalContext, SkipReason};
use super::swings::SwingPointTracker;
use crate::config::{ConfigError, EngineConfig};
use crate::execution::OrderSink;
use crate::types::{Bar, Price, TickSize};

/// What the engine did with one bar
#[derive(Debug, Clone, PartialEq)]
pub enum BarOutcome {
    /// State updated, no evaluation (historical bar)
    Observed,
    Skipped(SkipReason),
    Rejected(RiskRejection),
    Entered(RiskPlan),
    TrailingExit(Price),
    Failed(PhaseError),
}

pub struct Engine<S: OrderSink, I: IndicatorSource> {
    config: EngineConfig,
    tick: TickSize,
    clock: SessionClock,
    session: SessionState,
    profile: VolumeProfileEngine,
    swings: SwingPointTracker,
    composer: SignalComposer,
    lifecycle: TradeLifecycleController,
    /// Prior bars for delta-flip and failed-continuation lookbacks
    history: VecDeque<Bar>,
    history_len: usize,
    last_timestamp: Option<DateTime<Utc>>,
    sink: S,
    indicators: I,
}

impl<S: OrderSink, I: IndicatorSource> Engine<S, I> {
    pub fn new(
        config: EngineConfig,
        tick_size: Option<Decimal>,
        sink: S,
        indicators: I,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tick = TickSize::new(tick_size);
        let history_len = config
            .delta_flip_lookback_bars
            .max(config.failed_continuation_lookback_bars)
            .max(1);

        info!(
            "Engine ready: tick={} tz={} VA={}% sweep={}t trailing={}",
            tick.value(),
            config.session_timezone,
            config.va_percent,
            config.sweep_threshold_ticks,
            config.use_trailing_stop
        );

        Ok(Self {
            clock: SessionClock::new(config.timezone()?, config.initial_balance_minutes),
            session: SessionState::new(NaiveDate::MIN),
            profile: VolumeProfileEngine::new(tick, config.va_percent),
            swings: SwingPointTracker::new(config.sweep_lookback),
            composer: SignalComposer::new(&config, tick),
            lifecycle: TradeLifecycleController::new(&config, tick),
            history: VecDeque::with_capacity(history_len + 1),
            history_len,
            last_timestamp: None,
            tick,
            config,
            sink,
            indicators,
        })
    }

    /// Process one completed bar. Only `is_latest` bars may trade.
    pub fn on_bar(&mut self, index: usize, bar: &Bar, is_latest: bool) -> BarOutcome {
        match self.process(index, bar, is_latest) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    "Bar {} @ {} abandoned in {} phase: {}",
                    index, bar.timestamp, err.phase, err.source
                );
                BarOutcome::Failed(err)
            }
        }
    }

    fn process(&mut self, index: usize, bar: &Bar, is_latest: bool) -> Result<BarOutcome, PhaseError> {
        self.validate(bar).in_phase(Phase::Validation)?;
        self.last_timestamp = Some(bar.timestamp);

        let reading = self.clock.update(bar.timestamp);
        if reading.new_day {
            self.start_session(&reading);
        }

        self.profile.accumulate(bar).in_phase(Phase::Profile)?;
        self.session.record_bar(bar, self.tick, &reading);
        self.swings.update(bar);

        self.lifecycle.set_last_close(bar.close);
        let trail = self
            .lifecycle
            .ratchet(bar.high, bar.low, bar.timestamp, &mut self.sink);

        let outcome = match (trail, is_latest) {
            (TrailUpdate::Triggered(level), _) => BarOutcome::TrailingExit(level),
            (_, false) => BarOutcome::Observed,
            (_, true) => self.evaluate(index, bar, &reading)?,
        };

        self.history.push_back(bar.clone());
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
        Ok(outcome)
    }

    fn validate(&self, bar: &Bar) -> Result<(), EngineError> {
        if let Some(previous) = self.last_timestamp {
            if bar.timestamp <= previous {
                return Err(EngineError::OutOfOrder { time: bar.timestamp, previous });
            }
        }
        if bar.high < bar.low {
            return Err(EngineError::MalformedBar { high: bar.high, low: bar.low });
        }
        Ok(())
    }

    fn start_session(&mut self, reading: &ClockReading) {
        if !reading.first_bar {
            info!(
                "SESSION END {}: trades={} P&L=${}{}",
                self.session.date,
                self.session.trades_today,
                self.session.daily_pnl.round_dp(2),
                if self.session.halted { " (halted)" } else { "" }
            );
            self.profile.rotate();
            self.lifecycle.expire_pending(&mut self.sink);
        }
        self.session = SessionState::new(reading.local_date);
        info!("NEW SESSION: {}", reading.local_date);
    }

    fn evaluate(&mut self, index: usize, bar: &Bar, reading: &ClockReading) -> Result<BarOutcome, PhaseError> {
        if let Err(reason) = self.composer.session_gate(reading) {
            return Ok(Self::skip(index, reason));
        }

        let values = self.indicator_values(index).in_phase(Phase::Filters)?;

        if let Err(reason) = self.composer.risk_gate(
            bar,
            values.atr,
            &self.session,
            self.lifecycle.has_position(),
        ) {
            if reason == SkipReason::DailyLossHalt && !self.session.halted {
                self.session.halted = true;
                warn!("AUTO-STOP: daily P&L ${} at loss limit", self.session.daily_pnl.round_dp(2));
            }
            return Ok(Self::skip(index, reason));
        }

        let prior_slow_ema = if self.composer.trend().is_active(index) {
            Some(self.indicator(IndicatorKind::SlowEma, index - 1).in_phase(Phase::Filters)?)
        } else {
            None
        };

        let ctx = SignalContext {
            index,
            bar,
            indicators: values,
            prior_slow_ema,
            history: &self.history,
            profile: &self.profile,
            swings: &self.swings,
            session: &self.session,
        };
        let signal = match self.composer.compose(&ctx) {
            Ok(signal) => signal,
            Err(reason) => return Ok(Self::skip(index, reason)),
        };
        info!("SIGNAL: {}", signal);

        match self.lifecycle.plan(signal.direction, signal.entry, signal.atr) {
            Ok(plan) => {
                self.lifecycle
                    .submit(plan.clone(), bar.timestamp, &mut self.session, &mut self.sink);
                Ok(BarOutcome::Entered(plan))
            }
            Err(rejection) => {
                info!("SKIP bar {}: {} rejected, {}", index, signal.direction, rejection);
                Ok(BarOutcome::Rejected(rejection))
            }
        }
    }

    fn skip(index: usize, reason: SkipReason) -> BarOutcome {
        debug!("SKIP bar {}: {}", index, reason);
        BarOutcome::Skipped(reason)
    }

    fn indicator(&self, kind: IndicatorKind, index: usize) -> Result<Decimal, EngineError> {
        self.indicators
            .value(kind, index)
            .ok_or(EngineError::MissingIndicator { kind, index })
    }

    fn indicator_values(&self, index: usize) -> Result<IndicatorValues, EngineError> {
        Ok(IndicatorValues {
            vwap: self.indicator(IndicatorKind::Vwap, index)?,
            fast_ema: self.indicator(IndicatorKind::FastEma, index)?,
            slow_ema: self.indicator(IndicatorKind::SlowEma, index)?,
            atr: self.indicator(IndicatorKind::Atr, index)?,
        })
    }

    /// Broker reported a new net position (signed contracts)
    pub fn on_position_changed(&mut self, net: i64) -> Option<Decimal> {
        self.lifecycle
            .on_position_changed(net, &mut self.session, &mut self.sink)
    }

    /// External stop signal: cancel everything still resting
    pub fn stop(&mut self) -> bool {
        info!("STOP requested");
        self.lifecycle.cancel_all(&mut self.sink)
    }

    /// Cancel resting orders and close any open position at market
    pub fn flatten(&mut self, reason: &str) -> bool {
        let at = self.last_timestamp.unwrap_or_else(Utc::now);
        self.lifecycle.flatten(reason, at, &mut self.sink)
    }

    /// One-line summary for periodic logging
    pub fn status(&self) -> String {
        let position = match (self.lifecycle.position(), &self.lifecycle.state().pending) {
            (Some(p), _) => format!(
                "{} {} @ {}{}",
                p.direction,
                p.quantity,
                p.entry,
                p.trailing_stop.map(|t| format!(" trail={}", t)).unwrap_or_default()
            ),
            (None, Some(plan)) => format!("PENDING {} @ {}", plan.direction, plan.entry),
            (None, None) => "FLAT".to_string(),
        };
        let va = self
            .profile
            .value_area()
            .map(|va| format!("VAL={} VPOC={} VAH={}", va.val, va.vpoc, va.vah))
            .unwrap_or_else(|| "no VA".to_string());

        format!(
            "{} | Day P&L: ${} | Trades: {}/{} | {} | {}{}",
            self.session.date,
            self.session.daily_pnl.round_dp(2),
            self.session.trades_today,
            self.config.max_trades_day,
            position,
            va,
            if self.session.halted { " | HALTED" } else { "" }
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tick(&self) -> TickSize {
        self.tick
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn profile(&self) -> &VolumeProfileEngine {
        &self.profile
    }

    pub fn swings(&self) -> &SwingPointTracker {
        &self.swings
    }

    pub fn lifecycle(&self) -> &TradeLifecycleController {
        &self.lifecycle
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Live feeds append indicator values as bars complete
    pub fn indicators_mut(&mut self) -> &mut I {
        &mut self.indicators
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
