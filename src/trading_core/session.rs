//! Session clock and per-day session state
//!
//! All windows are expressed in the configured session timezone. Boundaries
//! are inclusive on both ends.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::types::{Bar, Price, TickSize};

/// Trading window (session-local time)
const TRADING_START_HOUR: u32 = 15;
const TRADING_START_MIN: u32 = 30;
const TRADING_END_HOUR: u32 = 21;
const TRADING_END_MIN: u32 = 0;

/// News blackout windows: (start h, start m, end h, end m)
const NEWS_WINDOWS: [(u32, u32, u32, u32); 2] = [(8, 0, 8, 45), (14, 0, 14, 45)];

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Classification of one bar timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub local_date: NaiveDate,
    pub local_time: NaiveTime,
    pub in_trading_window: bool,
    pub in_news_window: bool,
    pub in_initial_balance: bool,
    /// Local date moved past the previous session date
    pub new_day: bool,
    /// First bar the clock has ever seen
    pub first_bar: bool,
}

/// Classifies timestamps and detects calendar-day rollover
#[derive(Debug, Clone)]
pub struct SessionClock {
    tz: Tz,
    initial_balance: Duration,
    current_date: Option<NaiveDate>,
}

impl SessionClock {
    pub fn new(tz: Tz, initial_balance_minutes: u32) -> Self {
        Self {
            tz,
            initial_balance: Duration::minutes(initial_balance_minutes as i64),
            current_date: None,
        }
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.current_date
    }

    /// Classify `timestamp` and advance the session date if it rolled over
    pub fn update(&mut self, timestamp: DateTime<Utc>) -> ClockReading {
        let local = timestamp.with_timezone(&self.tz);
        let local_date = local.date_naive();
        let local_time = local.time();

        let first_bar = self.current_date.is_none();
        let new_day = match self.current_date {
            None => true,
            Some(date) => local_date > date,
        };
        if new_day {
            self.current_date = Some(local_date);
        }

        ClockReading {
            local_date,
            local_time,
            in_trading_window: Self::in_trading_window(local_time),
            in_news_window: Self::in_news_window(local_time),
            in_initial_balance: self.in_initial_balance(local_time),
            new_day,
            first_bar,
        }
    }

    pub fn in_trading_window(time: NaiveTime) -> bool {
        time >= hm(TRADING_START_HOUR, TRADING_START_MIN) && time <= hm(TRADING_END_HOUR, TRADING_END_MIN)
    }

    pub fn in_news_window(time: NaiveTime) -> bool {
        NEWS_WINDOWS
            .iter()
            .any(|&(sh, sm, eh, em)| time >= hm(sh, sm) && time <= hm(eh, em))
    }

    fn in_initial_balance(&self, time: NaiveTime) -> bool {
        let start = hm(TRADING_START_HOUR, TRADING_START_MIN);
        time >= start && time < start + self.initial_balance
    }
}

/// Session high/low and how often each was revisited
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionExtremes {
    pub high: Option<Price>,
    pub low: Option<Price>,
    /// Revisits of the high within one tick since it was set
    pub high_touches: u32,
    pub low_touches: u32,
}

impl SessionExtremes {
    pub fn update(&mut self, bar: &Bar, tick: TickSize) {
        let tolerance = tick.value();

        match self.high {
            Some(high) if bar.high > high => {
                self.high = Some(bar.high);
                self.high_touches = 0;
            }
            Some(high) if bar.high >= high - tolerance => self.high_touches += 1,
            Some(_) => {}
            None => {
                self.high = Some(bar.high);
                self.high_touches = 0;
            }
        }

        match self.low {
            Some(low) if bar.low < low => {
                self.low = Some(bar.low);
                self.low_touches = 0;
            }
            Some(low) if bar.low <= low + tolerance => self.low_touches += 1,
            Some(_) => {}
            None => {
                self.low = Some(bar.low);
                self.low_touches = 0;
            }
        }
    }

    /// Single-print high: revisited at most once
    pub fn poor_high(&self) -> bool {
        self.high.is_some() && self.high_touches <= 1
    }

    pub fn poor_low(&self) -> bool {
        self.low.is_some() && self.low_touches <= 1
    }
}

/// Opening range of the trading window
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitialBalance {
    pub high: Option<Price>,
    pub low: Option<Price>,
    pub complete: bool,
}

impl InitialBalance {
    fn update(&mut self, bar: &Bar, reading: &ClockReading) {
        if self.complete {
            return;
        }
        if reading.in_initial_balance {
            self.high = Some(self.high.map_or(bar.high, |h| h.max(bar.high)));
            self.low = Some(self.low.map_or(bar.low, |l| l.min(bar.low)));
        } else if reading.in_trading_window {
            self.complete = true;
            info!(
                "INITIAL BALANCE complete: high={:?} low={:?}",
                self.high, self.low
            );
        }
    }

    pub fn range(&self) -> Option<Price> {
        Some(self.high? - self.low?)
    }
}

/// Everything that resets at the calendar-day boundary
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub date: NaiveDate,
    pub trades_today: u32,
    /// Realized P&L in USD
    pub daily_pnl: Decimal,
    pub order_pending: bool,
    /// Entries disabled until the next session (daily loss cut-off)
    pub halted: bool,
    pub extremes: SessionExtremes,
    pub initial_balance: InitialBalance,
}

impl SessionState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            trades_today: 0,
            daily_pnl: Decimal::ZERO,
            order_pending: false,
            halted: false,
            extremes: SessionExtremes::default(),
            initial_balance: InitialBalance::default(),
        }
    }

    /// Fold a bar into session extremes and the initial balance
    pub fn record_bar(&mut self, bar: &Bar, tick: TickSize, reading: &ClockReading) {
        self.extremes.update(bar, tick);
        self.initial_balance.update(bar, reading);
    }
}
