//! Swing points and liquidity sweeps
//!
//! A swing high is the middle bar of three whose high beats both neighbours;
//! swing lows mirror it. Each list keeps at most `lookback` levels, oldest
//! evicted first.
//!
//! A sweep is a bar that pierces a recorded swing level by more than the
//! threshold and closes back on the near side of it.

use std::collections::VecDeque;
use tracing::debug;

use crate::types::{Bar, Direction, Price};

/// Swing levels confirmed by the latest bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwingUpdate {
    pub high: Option<Price>,
    pub low: Option<Price>,
}

/// Bounded rolling lists of 3-bar pivot highs and lows
#[derive(Debug, Clone)]
pub struct SwingPointTracker {
    lookback: usize,
    /// (high, low) of the last three bars
    window: VecDeque<(Price, Price)>,
    highs: VecDeque<Price>,
    lows: VecDeque<Price>,
}

impl SwingPointTracker {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback,
            window: VecDeque::with_capacity(3),
            highs: VecDeque::with_capacity(lookback + 1),
            lows: VecDeque::with_capacity(lookback + 1),
        }
    }

    /// Feed the next bar; reports any swing confirmed at the previous bar
    pub fn update(&mut self, bar: &Bar) -> SwingUpdate {
        self.window.push_back((bar.high, bar.low));
        if self.window.len() > 3 {
            self.window.pop_front();
        }
        if self.window.len() < 3 {
            return SwingUpdate::default();
        }

        let (h0, l0) = self.window[0];
        let (h1, l1) = self.window[1];
        let (h2, l2) = self.window[2];
        let mut update = SwingUpdate::default();

        if h1 > h0 && h1 > h2 {
            Self::push_bounded(&mut self.highs, h1, self.lookback);
            update.high = Some(h1);
            debug!("Swing high @ {}", h1);
        }
        if l1 < l0 && l1 < l2 {
            Self::push_bounded(&mut self.lows, l1, self.lookback);
            update.low = Some(l1);
            debug!("Swing low @ {}", l1);
        }

        update
    }

    fn push_bounded(list: &mut VecDeque<Price>, level: Price, lookback: usize) {
        list.push_back(level);
        while list.len() > lookback {
            list.pop_front();
        }
    }

    /// Swing highs, oldest first
    pub fn highs(&self) -> &VecDeque<Price> {
        &self.highs
    }

    /// Swing lows, oldest first
    pub fn lows(&self) -> &VecDeque<Price> {
        &self.lows
    }
}

/// Pierce-and-reclaim test against recorded swing levels
#[derive(Debug, Clone, Copy)]
pub struct LiquiditySweepDetector {
    /// Minimum pierce beyond the swing level, in price units
    threshold: Price,
}

impl LiquiditySweepDetector {
    pub fn new(threshold: Price) -> Self {
        Self { threshold }
    }

    /// Swing level swept in favour of `direction`, if any.
    ///
    /// Long looks for a swept swing low (sell-side liquidity taken, close back
    /// above); short looks for a swept swing high. First match in insertion
    /// order wins.
    pub fn detect(&self, bar: &Bar, direction: Direction, swings: &SwingPointTracker) -> Option<Price> {
        match direction {
            Direction::Long => swings
                .lows()
                .iter()
                .copied()
                .find(|&level| bar.low < level - self.threshold && bar.close > level),
            Direction::Short => swings
                .highs()
                .iter()
                .copied()
                .find(|&level| bar.high > level + self.threshold && bar.close < level),
        }
    }
}
