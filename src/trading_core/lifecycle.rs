//! Trade lifecycle: risk gate, bracket submission, fills, trailing exit
//!
//! State machine per instrument:
//! - Flat: no plan, no position
//! - Pending: bracket submitted, waiting for the entry fill
//! - Open: position reported by the broker, stop/target resting, optional trail
//! - Exiting: trailing exit sent, waiting for the flat report
//!
//! Fills are never assumed. The position only opens or closes when
//! `on_position_changed` reports a new net quantity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::session::SessionState;
use crate::config::EngineConfig;
use crate::execution::{BracketOrder, OrderIntent, OrderRole, OrderSink};
use crate::types::{Direction, Price, TickSize};

/// Minimum protective stop distance in ticks
const MIN_STOP_TICKS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RiskRejection {
    #[error("stop distance {0} is not positive")]
    NonPositiveStop(Decimal),
    #[error("reward:risk {ratio} below minimum {min}")]
    RewardRisk { ratio: Decimal, min: Decimal },
}

/// Sized bracket for one signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskPlan {
    pub direction: Direction,
    pub entry: Price,
    pub stop_price: Price,
    pub target_price: Price,
    pub stop_distance: Decimal,
    pub target_distance: Decimal,
    pub reward_risk: Decimal,
    /// Initial trailing stop when trailing is enabled
    pub trailing_stop: Option<Price>,
    pub trailing_distance: Option<Decimal>,
    pub quantity: u32,
}

/// Open position as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub direction: Direction,
    pub entry: Price,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub trailing_stop: Option<Price>,
    trailing_distance: Option<Decimal>,
    pub quantity: u32,
    /// Market exit already sent
    pub exit_requested: bool,
}

/// Result of the per-bar trailing ratchet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrailUpdate {
    Inactive,
    Unchanged(Price),
    Moved { from: Price, to: Price },
    Triggered(Price),
}

/// Position-related state owned by the controller
#[derive(Debug, Clone, Default)]
pub struct PositionState {
    pub pending: Option<RiskPlan>,
    pub position: Option<Position>,
    /// Orders believed to be resting at the broker
    resting: Vec<Uuid>,
    last_close: Option<Price>,
}

pub struct TradeLifecycleController {
    tick: TickSize,
    atr_mult_sl: Decimal,
    atr_mult_tp: Decimal,
    min_rr: Decimal,
    quantity: u32,
    trailing_mult: Option<Decimal>,
    tick_value: Decimal,
    loss_floor: Decimal,
    state: PositionState,
}

impl TradeLifecycleController {
    pub fn new(config: &EngineConfig, tick: TickSize) -> Self {
        Self {
            tick,
            atr_mult_sl: config.atr_mult_sl,
            atr_mult_tp: config.atr_mult_tp,
            min_rr: config.min_rr,
            quantity: config.quantity,
            trailing_mult: config.use_trailing_stop.then_some(config.trailing_stop_atr_mult),
            tick_value: config.tick_value_usd,
            loss_floor: config.daily_loss_floor(),
            state: PositionState::default(),
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.state.position.as_ref()
    }

    pub fn has_position(&self) -> bool {
        self.state.position.is_some()
    }

    pub fn resting_orders(&self) -> &[Uuid] {
        &self.state.resting
    }

    pub fn set_last_close(&mut self, close: Price) {
        self.state.last_close = Some(close);
    }

    /// Size stop and target from ATR, rejecting poor reward:risk
    pub fn plan(&self, direction: Direction, entry: Price, atr: Decimal) -> Result<RiskPlan, RiskRejection> {
        let stop_distance = self.tick.distance(MIN_STOP_TICKS).max(atr * self.atr_mult_sl);
        if stop_distance <= Decimal::ZERO {
            return Err(RiskRejection::NonPositiveStop(stop_distance));
        }
        let target_distance = atr * self.atr_mult_tp;

        let reward_risk = target_distance / stop_distance;
        if reward_risk < self.min_rr {
            return Err(RiskRejection::RewardRisk { ratio: reward_risk.round_dp(2), min: self.min_rr });
        }

        let sign = direction.sign();
        let trailing_distance = self.trailing_mult.map(|mult| atr * mult);

        Ok(RiskPlan {
            direction,
            entry,
            stop_price: entry - sign * stop_distance,
            target_price: entry + sign * target_distance,
            stop_distance,
            target_distance,
            reward_risk,
            trailing_stop: trailing_distance.map(|d| entry - sign * d),
            trailing_distance,
            quantity: self.quantity,
        })
    }

    /// Send entry, stop and target, in that order
    pub fn submit<S: OrderSink>(
        &mut self,
        plan: RiskPlan,
        at: DateTime<Utc>,
        session: &mut SessionState,
        sink: &mut S,
    ) -> BracketOrder {
        let bracket = BracketOrder::new(
            plan.direction,
            plan.quantity,
            plan.entry,
            plan.stop_price,
            plan.target_price,
            at,
        );

        for intent in bracket.intents() {
            match sink.submit(intent) {
                Ok(()) => self.state.resting.push(intent.id),
                Err(e) => warn!("Order submit failed ({:?} {}): {}", intent.role, intent.side, e),
            }
        }

        session.order_pending = true;
        session.trades_today += 1;

        info!(
            "TRADE #{}: {} {} @ {} | SL={} TP={} | R:R={} | trail={:?}",
            session.trades_today,
            plan.direction,
            plan.quantity,
            plan.entry,
            plan.stop_price,
            plan.target_price,
            plan.reward_risk.round_dp(2),
            plan.trailing_stop
        );

        self.state.pending = Some(plan);
        bracket
    }

    /// Apply a broker net-position report. Returns realized P&L on a flat transition.
    pub fn on_position_changed<S: OrderSink>(
        &mut self,
        net: i64,
        session: &mut SessionState,
        sink: &mut S,
    ) -> Option<Decimal> {
        let Some(direction) = Direction::from_net_position(net) else {
            return self.close_position(session, sink);
        };
        let quantity = u32::try_from(net.unsigned_abs()).unwrap_or(u32::MAX);

        let flipped_from = match self.state.position.as_mut() {
            Some(position) if position.direction == direction => {
                position.quantity = quantity;
                debug!("Position size now {}", quantity);
                return None;
            }
            Some(position) => Some(position.direction),
            None => None,
        };

        // A flip is booked as flat at the last close, then a fresh open
        let mut realized = None;
        if let Some(previous) = flipped_from {
            warn!("Position flipped {} -> {} without a flat report", previous, direction);
            realized = self.close_position(session, sink);
        }

        let position = match self.state.pending.take() {
            Some(plan) if plan.direction == direction => Position {
                direction,
                entry: plan.entry,
                stop_loss: Some(plan.stop_price),
                take_profit: Some(plan.target_price),
                trailing_stop: plan.trailing_stop,
                trailing_distance: plan.trailing_distance,
                quantity,
                exit_requested: false,
            },
            other => {
                if other.is_some() {
                    warn!("Fill direction {} does not match pending plan", direction);
                }
                Position {
                    direction,
                    entry: self.state.last_close.unwrap_or_default(),
                    stop_loss: None,
                    take_profit: None,
                    trailing_stop: None,
                    trailing_distance: None,
                    quantity,
                    exit_requested: false,
                }
            }
        };

        info!("FILLED: {} {} @ {}", position.direction, position.quantity, position.entry);
        self.state.position = Some(position);
        realized
    }

    /// Flat report: unfilled orders are cancelled and the pending gate clears
    /// whether or not a position was open.
    fn close_position<S: OrderSink>(&mut self, session: &mut SessionState, sink: &mut S) -> Option<Decimal> {
        let closed = self.state.position.take();
        if let Some(plan) = self.state.pending.take() {
            if closed.is_none() {
                info!("FLAT: {} entry @ {} never filled", plan.direction, plan.entry);
            }
        }
        session.order_pending = false;
        self.cancel_all(sink);

        let position = closed?;
        let exit = self.state.last_close.unwrap_or(position.entry);

        let ticks = self.tick.ticks_in((exit - position.entry) * position.direction.sign());
        let pnl = ticks * self.tick_value * Decimal::from(position.quantity);
        session.daily_pnl += pnl;

        info!(
            "FLAT: {} {} @ {} -> {} | P&L ${} | day ${}",
            position.direction,
            position.quantity,
            position.entry,
            exit,
            pnl.round_dp(2),
            session.daily_pnl.round_dp(2)
        );

        if session.daily_pnl <= self.loss_floor && !session.halted {
            session.halted = true;
            warn!(
                "AUTO-STOP: daily P&L ${} at or below ${}, no entries until next session",
                session.daily_pnl.round_dp(2),
                self.loss_floor
            );
        }

        Some(pnl)
    }

    /// Tighten the trailing stop from this bar and exit on a cross
    pub fn ratchet<S: OrderSink>(
        &mut self,
        high: Price,
        low: Price,
        at: DateTime<Utc>,
        sink: &mut S,
    ) -> TrailUpdate {
        let Some(position) = self.state.position.as_mut() else {
            return TrailUpdate::Inactive;
        };
        if position.exit_requested {
            return TrailUpdate::Inactive;
        }
        let (Some(current), Some(distance)) = (position.trailing_stop, position.trailing_distance) else {
            return TrailUpdate::Inactive;
        };

        let (candidate, tighter) = match position.direction {
            Direction::Long => {
                let c = high - distance;
                (c, c > current)
            }
            Direction::Short => {
                let c = low + distance;
                (c, c < current)
            }
        };

        let mut update = TrailUpdate::Unchanged(current);
        let mut trail = current;
        if tighter {
            info!("TRAIL: {} stop {} -> {}", position.direction, current, candidate);
            position.trailing_stop = Some(candidate);
            trail = candidate;
            update = TrailUpdate::Moved { from: current, to: candidate };
        }

        let crossed = match position.direction {
            Direction::Long => low <= trail,
            Direction::Short => high >= trail,
        };
        if !crossed {
            return update;
        }

        info!("EXIT: trailing stop {} hit", trail);
        self.cancel_all(sink);
        self.send_exit(at, sink);
        TrailUpdate::Triggered(trail)
    }

    /// Cancel resting orders and close any open position at market
    pub fn flatten<S: OrderSink>(&mut self, reason: &str, at: DateTime<Utc>, sink: &mut S) -> bool {
        info!("FLATTEN: {}", reason);
        let cancelled = self.cancel_all(sink);
        let exited = self.send_exit(at, sink);
        cancelled || exited
    }

    fn send_exit<S: OrderSink>(&mut self, at: DateTime<Utc>, sink: &mut S) -> bool {
        let Some(position) = self.state.position.as_mut() else {
            return false;
        };
        if position.exit_requested {
            return false;
        }

        let side = position.direction.entry_side().opposite();
        let intent = OrderIntent::market(OrderRole::Exit, side, position.quantity, at);
        if let Err(e) = sink.submit(&intent) {
            warn!("Market exit submit failed: {}", e);
        }
        position.exit_requested = true;
        true
    }

    /// Day boundary while flat: an unfilled entry does not carry into the new
    /// session. An open position keeps its stop and target.
    pub fn expire_pending<S: OrderSink>(&mut self, sink: &mut S) -> bool {
        if self.state.position.is_some() {
            return false;
        }
        if let Some(plan) = self.state.pending.take() {
            info!("EXPIRED: unfilled {} entry @ {}", plan.direction, plan.entry);
        }
        self.cancel_all(sink)
    }

    /// Request cancellation of every resting order; no-op when nothing rests
    pub fn cancel_all<S: OrderSink>(&mut self, sink: &mut S) -> bool {
        if self.state.resting.is_empty() {
            return false;
        }
        let ids = std::mem::take(&mut self.state.resting);
        match sink.cancel_all(&ids) {
            Ok(()) => debug!("Cancel requested for {} resting orders", ids.len()),
            Err(e) => warn!("Cancel-all failed for {} orders: {}", ids.len(), e),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{OrderEvent, OrderSide, OrderType, RecordingSink};
    use crate::types::test_support::minute;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal_macros::dec;

    fn session() -> SessionState {
        SessionState::new(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
    }

    fn trailing_config() -> EngineConfig {
        EngineConfig {
            use_trailing_stop: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_long_defaults() {
        let controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        let plan = controller.plan(Direction::Long, dec!(100), dec!(4)).unwrap();

        assert_eq!(plan.stop_distance, dec!(4));
        assert_eq!(plan.target_distance, dec!(8));
        assert_eq!(plan.stop_price, dec!(96));
        assert_eq!(plan.target_price, dec!(108));
        assert_eq!(plan.trailing_stop, None);
    }

    #[test]
    fn test_plan_stop_floored_at_eight_ticks() {
        let controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        // ATR 1 -> raw stop 1.0 < 2.0 floor; target 2.0 -> R:R 1.0 rejected
        let rejected = controller.plan(Direction::Short, dec!(100), dec!(1)).unwrap_err();
        assert_eq!(rejected, RiskRejection::RewardRisk { ratio: dec!(1), min: dec!(1.5) });

        // ATR 1.5 -> stop 2.0 (floor), target 3.0, R:R exactly 1.5
        let plan = controller.plan(Direction::Short, dec!(100), dec!(1.5)).unwrap();
        assert_eq!(plan.stop_price, dec!(102));
        assert_eq!(plan.target_price, dec!(97));
    }

    #[test]
    fn test_accepted_plans_meet_min_rr() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..300 {
            let config = EngineConfig {
                atr_mult_sl: Decimal::new(rng.gen_range(1..40), 1),
                atr_mult_tp: Decimal::new(rng.gen_range(1..60), 1),
                ..Default::default()
            };
            let controller = TradeLifecycleController::new(&config, TickSize::default());
            let atr = Decimal::new(rng.gen_range(1..2000), 2);
            if let Ok(plan) = controller.plan(Direction::Long, dec!(18000), atr) {
                assert!(plan.target_distance / plan.stop_distance >= config.min_rr);
                assert!(plan.stop_distance >= dec!(2));
            }
        }
    }

    #[test]
    fn test_submit_sends_bracket_in_order() {
        let mut controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();

        let plan = controller.plan(Direction::Short, dec!(100), dec!(2)).unwrap();
        controller.submit(plan, minute(5, 0), &mut state, &mut sink);

        let sent = sink.submitted();
        assert_eq!(sent.len(), 3);
        assert_eq!((sent[0].role, sent[0].side, sent[0].order_type), (OrderRole::Entry, OrderSide::Sell, OrderType::Limit));
        assert_eq!((sent[1].role, sent[1].order_type), (OrderRole::ProtectiveStop, OrderType::Stop));
        assert_eq!(sent[1].stop_price, Some(dec!(102)));
        assert_eq!(sent[2].limit_price, Some(dec!(96)));
        assert!(state.order_pending);
        assert_eq!(state.trades_today, 1);
        assert_eq!(controller.resting_orders().len(), 3);
    }

    #[test]
    fn test_trailing_ratchet_and_exit() {
        let mut controller = TradeLifecycleController::new(&trailing_config(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();

        let plan = controller.plan(Direction::Long, dec!(100), dec!(2)).unwrap();
        assert_eq!(plan.trailing_stop, Some(dec!(97)));
        controller.submit(plan, minute(5, 0), &mut state, &mut sink);
        controller.on_position_changed(1, &mut state, &mut sink);
        sink.clear();

        // Distance stays at entry ATR * 1.5 = 3
        let update = controller.ratchet(dec!(105), dec!(103), minute(5, 1), &mut sink);
        assert_eq!(update, TrailUpdate::Moved { from: dec!(97), to: dec!(102) });

        // Lower high never loosens the stop
        let update = controller.ratchet(dec!(104), dec!(103), minute(5, 2), &mut sink);
        assert_eq!(update, TrailUpdate::Unchanged(dec!(102)));
        assert!(sink.events().is_empty());

        let update = controller.ratchet(dec!(103.5), dec!(102), minute(5, 3), &mut sink);
        assert_eq!(update, TrailUpdate::Triggered(dec!(102)));

        let events = sink.events();
        assert!(matches!(events[0], OrderEvent::CancelAll { ref order_ids } if order_ids.len() == 3));
        match &events[1] {
            OrderEvent::Submit(exit) => {
                assert_eq!(exit.order_type, OrderType::Market);
                assert_eq!(exit.side, OrderSide::Sell);
                assert_eq!(exit.quantity, 1);
            }
            other => panic!("expected market exit, got {:?}", other),
        }

        // Inert until the flat report arrives
        assert_eq!(controller.ratchet(dec!(90), dec!(80), minute(5, 4), &mut sink), TrailUpdate::Inactive);
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn test_short_trailing_only_moves_down() {
        let mut controller = TradeLifecycleController::new(&trailing_config(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();

        let plan = controller.plan(Direction::Short, dec!(100), dec!(2)).unwrap();
        controller.submit(plan, minute(5, 0), &mut state, &mut sink);
        controller.on_position_changed(-1, &mut state, &mut sink);

        assert_eq!(
            controller.ratchet(dec!(99), dec!(98), minute(5, 1), &mut sink),
            TrailUpdate::Moved { from: dec!(103), to: dec!(101) }
        );
        assert_eq!(
            controller.ratchet(dec!(100.5), dec!(99.5), minute(5, 2), &mut sink),
            TrailUpdate::Unchanged(dec!(101))
        );
    }

    #[test]
    fn test_flat_transition_books_pnl_and_auto_stops() {
        let mut controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();
        state.daily_pnl = dec!(-400);

        let plan = controller.plan(Direction::Long, dec!(100), dec!(2)).unwrap();
        controller.submit(plan, minute(5, 0), &mut state, &mut sink);
        controller.on_position_changed(1, &mut state, &mut sink);

        // Stopped out: 96 from 100 is 16 ticks * $5 = -$80; day -480
        controller.set_last_close(dec!(96));
        assert_eq!(controller.on_position_changed(0, &mut state, &mut sink), Some(dec!(-80)));
        assert_eq!(state.daily_pnl, dec!(-480));
        assert!(!state.order_pending);
        assert!(!state.halted);
        assert!(controller.position().is_none());
        assert!(controller.resting_orders().is_empty());

        let plan = controller.plan(Direction::Long, dec!(100), dec!(2)).unwrap();
        controller.submit(plan, minute(5, 10), &mut state, &mut sink);
        controller.on_position_changed(1, &mut state, &mut sink);
        controller.set_last_close(dec!(99));
        controller.on_position_changed(0, &mut state, &mut sink);

        assert_eq!(state.daily_pnl, dec!(-500));
        assert!(state.halted);
    }

    #[test]
    fn test_cancel_all_is_idempotent() {
        let mut controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();

        assert!(!controller.cancel_all(&mut sink));
        let plan = controller.plan(Direction::Long, dec!(100), dec!(2)).unwrap();
        controller.submit(plan, minute(5, 0), &mut state, &mut sink);
        sink.clear();

        assert!(controller.cancel_all(&mut sink));
        assert!(!controller.cancel_all(&mut sink));
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_flatten_sends_single_exit() {
        let mut controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();

        controller.set_last_close(dec!(100));
        controller.on_position_changed(-2, &mut state, &mut sink);
        assert_eq!(controller.position().map(|p| p.entry), Some(dec!(100)));

        assert!(controller.flatten("session end", minute(5, 0), &mut sink));
        assert!(!controller.flatten("again", minute(5, 1), &mut sink));

        let sent = sink.submitted();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].side, OrderSide::Buy);
        assert_eq!(sent[0].quantity, 2);
    }

    #[test]
    fn test_flat_report_before_fill_clears_pending() {
        let mut controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();

        let plan = controller.plan(Direction::Long, dec!(100), dec!(2)).unwrap();
        controller.submit(plan, minute(5, 0), &mut state, &mut sink);
        sink.clear();

        // Entry limit cancelled or expired at the broker
        assert_eq!(controller.on_position_changed(0, &mut state, &mut sink), None);
        assert!(!state.order_pending);
        assert!(controller.state().pending.is_none());
        assert!(controller.resting_orders().is_empty());
        assert_eq!(state.daily_pnl, Decimal::ZERO);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], OrderEvent::CancelAll { ref order_ids } if order_ids.len() == 3));

        // A repeated flat report sends nothing
        controller.on_position_changed(0, &mut state, &mut sink);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_expire_pending_only_while_flat() {
        let mut controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();

        let plan = controller.plan(Direction::Short, dec!(100), dec!(2)).unwrap();
        controller.submit(plan, minute(5, 0), &mut state, &mut sink);
        sink.clear();

        assert!(controller.expire_pending(&mut sink));
        assert!(controller.state().pending.is_none());
        assert!(controller.resting_orders().is_empty());
        assert!(!controller.expire_pending(&mut sink));
        assert_eq!(sink.events().len(), 1);

        // Open position keeps its protective orders
        let plan = controller.plan(Direction::Short, dec!(100), dec!(2)).unwrap();
        controller.submit(plan, minute(5, 5), &mut state, &mut sink);
        controller.on_position_changed(-1, &mut state, &mut sink);
        sink.clear();

        assert!(!controller.expire_pending(&mut sink));
        assert_eq!(controller.resting_orders().len(), 3);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_flip_books_old_side_and_reopens() {
        let mut controller = TradeLifecycleController::new(&EngineConfig::default(), TickSize::default());
        let mut sink = RecordingSink::new();
        let mut state = session();

        controller.set_last_close(dec!(100));
        controller.on_position_changed(1, &mut state, &mut sink);

        // Long 100 -> 102 is 8 ticks * $5
        controller.set_last_close(dec!(102));
        assert_eq!(controller.on_position_changed(-1, &mut state, &mut sink), Some(dec!(40)));
        let position = controller.position().unwrap();
        assert_eq!(position.direction, Direction::Short);
        assert_eq!(position.entry, dec!(102));

        // Short 102 -> 101 is 4 ticks in favour
        controller.set_last_close(dec!(101));
        assert_eq!(controller.on_position_changed(0, &mut state, &mut sink), Some(dec!(20)));
        assert_eq!(state.daily_pnl, dec!(60));
    }
}
