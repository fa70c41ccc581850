//! Bar file loading for replay
//!
//! CSV with one row per completed bar plus its precomputed indicators.
//! Files ending in `.zst` are decompressed on the fly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::trading_core::{IndicatorValues, SeriesIndicators};
use crate::types::Bar;

#[derive(Debug, Deserialize)]
struct BarRow {
    time: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    close: Decimal,
    volume: u64,
    delta: i64,
    #[serde(with = "rust_decimal::serde::str")]
    vwap: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    ema_fast: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    ema_slow: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    atr: Decimal,
    /// Broker net position after this bar, when recorded
    #[serde(default)]
    position: Option<i64>,
}

/// Bars with their indicator columns, index-aligned
#[derive(Debug, Default)]
pub struct ReplaySeries {
    pub bars: Vec<Bar>,
    pub indicators: SeriesIndicators,
    pub positions: Vec<Option<i64>>,
}

impl ReplaySeries {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Parse bar rows from any CSV reader
pub fn read_bars<R: Read>(reader: R) -> Result<ReplaySeries> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut series = ReplaySeries::default();

    for (line, result) in csv_reader.deserialize().enumerate() {
        let row: BarRow = result.with_context(|| format!("Failed to parse bar row {}", line + 1))?;

        series.bars.push(Bar {
            timestamp: row.time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            delta: row.delta,
        });
        series.indicators.push(IndicatorValues {
            vwap: row.vwap,
            fast_ema: row.ema_fast,
            slow_ema: row.ema_slow,
            atr: row.atr,
        });
        series.positions.push(row.position);
    }

    Ok(series)
}

/// Load a bar file, zstd-compressed if the name ends in `.zst`
pub fn load_bar_file(path: &Path) -> Result<ReplaySeries> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    let series = if path.extension().is_some_and(|ext| ext == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        read_bars(BufReader::new(decoder))?
    } else {
        read_bars(BufReader::new(file))?
    };

    tracing::debug!("Loaded {} bars from {:?}", series.len(), path);
    Ok(series)
}
