//! Session volume profile and Value Area
//!
//! Volume is bucketed by tick index in a `BTreeMap`, so price ordering and
//! adjacent-level lookups come for free when the Value Area is expanded.
//!
//! Value Area expansion (greedy, from the VPOC outward):
//! 1. VPOC = level with the most volume, ties resolved to the lowest price
//! 2. Compare the next level above the window with the next level below
//! 3. Take the larger; ties extend upward; an exhausted side yields to the other
//! 4. Stop once the window holds `va_percent` of total volume

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::error::EngineError;
use crate::types::{Bar, Price, TickSize};

/// Volume at each tick index for one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeProfile {
    levels: BTreeMap<i64, u64>,
}

impl VolumeProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, level: i64, volume: u64) {
        let bucket = self.levels.entry(level).or_insert(0);
        *bucket = bucket.saturating_add(volume);
    }

    pub fn volume_at(&self, level: i64) -> Option<u64> {
        self.levels.get(&level).copied()
    }

    pub fn total_volume(&self) -> u64 {
        self.levels.values().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Mean volume per populated level (zero for an empty profile)
    pub fn average_volume(&self) -> Decimal {
        if self.levels.is_empty() {
            return Decimal::ZERO;
        }
        Decimal::from(self.total_volume()) / Decimal::from(self.levels.len() as u64)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Levels in ascending price order
    pub fn iter(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.levels.iter().map(|(level, volume)| (*level, *volume))
    }

    /// Value Area over this profile, `None` when empty
    pub fn value_area(&self, va_percent: Decimal, tick: TickSize) -> Option<ValueArea> {
        let levels: Vec<(i64, u64)> = self.iter().collect();
        if levels.is_empty() {
            return None;
        }

        // Strictly greater keeps the lowest price on ties
        let mut poc_idx = 0;
        for (i, (_, volume)) in levels.iter().enumerate() {
            if *volume > levels[poc_idx].1 {
                poc_idx = i;
            }
        }

        let total_volume = self.total_volume();
        let target = Decimal::from(total_volume) * va_percent / dec!(100);

        let mut val_idx = poc_idx;
        let mut vah_idx = poc_idx;
        let mut accumulated = levels[poc_idx].1;

        while Decimal::from(accumulated) < target {
            let above = levels.get(vah_idx + 1).map(|(_, v)| *v);
            let below = val_idx.checked_sub(1).map(|i| levels[i].1);

            match (above, below) {
                (None, None) => break,
                (Some(up), Some(down)) if up >= down => {
                    vah_idx += 1;
                    accumulated = accumulated.saturating_add(up);
                }
                (_, Some(down)) => {
                    val_idx -= 1;
                    accumulated = accumulated.saturating_add(down);
                }
                (Some(up), None) => {
                    vah_idx += 1;
                    accumulated = accumulated.saturating_add(up);
                }
            }
        }

        Some(ValueArea {
            vpoc: tick.price_of(levels[poc_idx].0),
            vah: tick.price_of(levels[vah_idx].0),
            val: tick.price_of(levels[val_idx].0),
            vpoc_volume: levels[poc_idx].1,
            volume_inside: accumulated,
            total_volume,
        })
    }
}

/// Value Area of a frozen reference profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueArea {
    pub vpoc: Price,
    pub vah: Price,
    pub val: Price,
    pub vpoc_volume: u64,
    /// Volume between VAL and VAH inclusive
    pub volume_inside: u64,
    pub total_volume: u64,
}

impl ValueArea {
    pub fn contains(&self, price: Price) -> bool {
        price >= self.val && price <= self.vah
    }
}

/// Current-session accumulation plus the previous session's frozen profile
#[derive(Debug, Clone)]
pub struct VolumeProfileEngine {
    tick: TickSize,
    va_percent: Decimal,
    current: VolumeProfile,
    reference: VolumeProfile,
    value_area: Option<ValueArea>,
}

impl VolumeProfileEngine {
    pub fn new(tick: TickSize, va_percent: Decimal) -> Self {
        Self {
            tick,
            va_percent,
            current: VolumeProfile::new(),
            reference: VolumeProfile::new(),
            value_area: None,
        }
    }

    /// Add the bar's volume at its quantized close
    pub fn accumulate(&mut self, bar: &Bar) -> Result<i64, EngineError> {
        let level = self
            .tick
            .level_of(bar.close)
            .ok_or(EngineError::PriceOutOfRange(bar.close))?;
        self.current.add(level, bar.volume);
        Ok(level)
    }

    /// Freeze the current session as the reference and recompute the Value Area
    pub fn rotate(&mut self) -> Option<ValueArea> {
        self.reference = std::mem::take(&mut self.current);
        self.value_area = self.reference.value_area(self.va_percent, self.tick);

        match &self.value_area {
            Some(va) => info!(
                "VALUE AREA: VAH={} VPOC={} VAL={} | {} levels | {}/{} vol inside",
                va.vah,
                va.vpoc,
                va.val,
                self.reference.len(),
                va.volume_inside,
                va.total_volume
            ),
            None => debug!("VALUE AREA: reference profile empty"),
        }

        self.value_area
    }

    pub fn value_area(&self) -> Option<&ValueArea> {
        self.value_area.as_ref()
    }

    pub fn reference(&self) -> &VolumeProfile {
        &self.reference
    }

    pub fn current(&self) -> &VolumeProfile {
        &self.current
    }

    pub fn tick(&self) -> TickSize {
        self.tick
    }
}
