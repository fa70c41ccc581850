//! Engine configuration
//!
//! Flat set of named thresholds. Field aliases accept the parameter names used
//! by the charting platform (`MinVolume`, `VA_Percent`, ...), so a settings
//! export can be loaded unchanged.

use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown session timezone: {0}")]
    UnknownTimezone(String),
    #[error("{name} must be positive")]
    NotPositive { name: &'static str },
    #[error("va_percent must be in (0, 100], got {0}")]
    ValueAreaPercent(Decimal),
}

/// Configuration for the signal engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum bar volume for any entry
    #[serde(alias = "MinVolume")]
    pub min_volume: u64,
    /// Minimum ATR (points) for any entry
    #[serde(alias = "MinAtr")]
    pub min_atr: Decimal,
    /// Target distance = ATR * this
    #[serde(alias = "AtrMultTP")]
    pub atr_mult_tp: Decimal,
    /// Stop distance = max(8 ticks, ATR * this)
    #[serde(alias = "AtrMultSL")]
    pub atr_mult_sl: Decimal,
    #[serde(alias = "MaxTradesDay")]
    pub max_trades_day: u32,
    /// Daily loss floor in USD; entries halt once daily P&L <= -this
    #[serde(alias = "MaxDailyLossUSD")]
    pub max_daily_loss_usd: Decimal,
    /// Contracts per trade
    #[serde(alias = "Quantity")]
    pub quantity: u32,
    #[serde(alias = "UseNewsFilter")]
    pub use_news_filter: bool,
    /// Minimum reward:risk of a bracket
    #[serde(alias = "MinRR")]
    pub min_rr: Decimal,
    /// Share of reference volume inside the value area
    #[serde(alias = "VA_Percent")]
    pub va_percent: Decimal,
    #[serde(alias = "InitialBalanceMinutes")]
    pub initial_balance_minutes: u32,
    /// Capacity of each swing list
    #[serde(alias = "SweepLookback")]
    pub sweep_lookback: usize,
    /// Ticks beyond a swing level required for a sweep
    #[serde(alias = "SweepThresholdTicks")]
    pub sweep_threshold_ticks: u32,
    /// Level is thin below average reference volume * this / 100
    #[serde(alias = "LVN_Threshold%", alias = "LVN_Threshold")]
    pub lvn_threshold_pct: Decimal,
    #[serde(alias = "AbsorptionMinVolume")]
    pub absorption_min_volume: u64,
    #[serde(alias = "AbsorptionMaxRangeTicks")]
    pub absorption_max_range_ticks: u32,
    #[serde(alias = "DeltaFlipLookbackBars")]
    pub delta_flip_lookback_bars: usize,
    #[serde(alias = "UseTrailingStop")]
    pub use_trailing_stop: bool,
    #[serde(alias = "TrailingStopAtrMult")]
    pub trailing_stop_atr_mult: Decimal,
    #[serde(alias = "UseFailedContinuation")]
    pub use_failed_continuation: bool,
    #[serde(alias = "FailedContinuationLookbackBars")]
    pub failed_continuation_lookback_bars: usize,
    /// Gate direction on the slow EMA slope
    #[serde(alias = "UseMultiTimeframeFilter")]
    pub use_multi_timeframe_filter: bool,
    /// Bars of history before the trend filter activates
    #[serde(alias = "SlowTrendPeriod")]
    pub slow_trend_period: usize,
    /// USD per tick per contract (NQ = $5)
    pub tick_value_usd: Decimal,
    /// IANA zone the session windows are expressed in
    pub session_timezone: String,
    /// |delta| / volume percentage counted as an efficient bar
    pub delta_efficiency_pct: Decimal,
    /// Close within ATR * this of VWAP counts as near VWAP
    pub vwap_zone_mult: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_volume: 300,
            min_atr: dec!(0.6),
            atr_mult_tp: dec!(2.0),
            atr_mult_sl: dec!(1.0),
            max_trades_day: 5,
            max_daily_loss_usd: dec!(500),
            quantity: 1,
            use_news_filter: true,
            min_rr: dec!(1.5),
            va_percent: dec!(70),
            initial_balance_minutes: 30,
            sweep_lookback: 20,
            sweep_threshold_ticks: 4,
            lvn_threshold_pct: dec!(20),
            absorption_min_volume: 500,
            absorption_max_range_ticks: 3,
            delta_flip_lookback_bars: 3,
            use_trailing_stop: false,
            trailing_stop_atr_mult: dec!(1.5),
            use_failed_continuation: true,
            failed_continuation_lookback_bars: 3,
            use_multi_timeframe_filter: true,
            slow_trend_period: 50,
            tick_value_usd: dec!(5),
            session_timezone: "Europe/Berlin".to_string(),
            delta_efficiency_pct: dec!(10),
            vwap_zone_mult: dec!(0.8),
        }
    }
}

impl EngineConfig {
    /// Parse the session timezone
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.session_timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.session_timezone.clone()))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.va_percent <= Decimal::ZERO || self.va_percent > dec!(100) {
            return Err(ConfigError::ValueAreaPercent(self.va_percent));
        }
        if self.sweep_lookback == 0 {
            return Err(ConfigError::NotPositive { name: "sweep_lookback" });
        }
        if self.quantity == 0 {
            return Err(ConfigError::NotPositive { name: "quantity" });
        }
        if self.tick_value_usd <= Decimal::ZERO {
            return Err(ConfigError::NotPositive { name: "tick_value_usd" });
        }
        if self.use_trailing_stop && self.trailing_stop_atr_mult <= Decimal::ZERO {
            return Err(ConfigError::NotPositive { name: "trailing_stop_atr_mult" });
        }
        self.timezone()?;
        Ok(())
    }

    /// Daily P&L at or below which entries stop for the session
    pub fn daily_loss_floor(&self) -> Decimal {
        -self.max_daily_loss_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(config.daily_loss_floor(), dec!(-500));
    }

    #[test]
    fn test_platform_names_deserialize() {
        let json = r#"{
            "MinVolume": 450,
            "VA_Percent": 68,
            "LVN_Threshold%": 15,
            "UseTrailingStop": true,
            "SweepThresholdTicks": 2
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.min_volume, 450);
        assert_eq!(config.va_percent, dec!(68));
        assert_eq!(config.lvn_threshold_pct, dec!(15));
        assert!(config.use_trailing_stop);
        assert_eq!(config.sweep_threshold_ticks, 2);
        // Untouched fields keep their defaults
        assert_eq!(config.max_trades_day, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EngineConfig { va_percent: dec!(0), ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::ValueAreaPercent(dec!(0))));

        let config = EngineConfig { sweep_lookback: 0, ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive { name: "sweep_lookback" })
        );

        let config = EngineConfig { session_timezone: "Mars/Olympus".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::UnknownTimezone(_))));
    }
}
