//! OHLCV bar types, CSV ingestion, and timeframe resampling.
//!
//! Bars are stored with UTC timestamps and converted to America/New_York
//! only where session logic needs local time.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Single OHLCV bar (1-minute resolution at ingest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub symbol: String,
}

impl Bar {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Typical price (H+L+C)/3, used by the VWAP-style proxies.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Raw CSV row: timestamp,open,high,low,close,volume (ISO-8601 UTC timestamp).
#[derive(Debug, Deserialize)]
struct CsvBarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

/// Load 1-minute bars from a CSV file, sorted and de-duplicated by timestamp.
///
/// Rows with unparseable timestamps are skipped with a warning rather than
/// aborting the load — historical exports routinely contain a few bad rows.
pub fn load_bars_csv(path: &Path, symbol: &str) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open bar data at {:?}", path))?;

    let mut bars = Vec::new();
    let mut skipped = 0usize;

    for row in reader.deserialize::<CsvBarRow>() {
        let row = match row {
            Ok(r) => r,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        // ISO-8601 with offset, falling back to naive UTC exports.
        let timestamp = match DateTime::parse_from_rfc3339(&row.timestamp) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(_) => match chrono::NaiveDateTime::parse_from_str(&row.timestamp, "%Y-%m-%d %H:%M:%S")
            {
                Ok(naive) => naive.and_utc(),
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            },
        };

        bars.push(Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            symbol: symbol.to_string(),
        });
    }

    if skipped > 0 {
        warn!("Skipped {} unparseable rows in {:?}", skipped, path);
    }

    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);

    Ok(bars)
}

/// Aggregate 1-minute bars into a higher timeframe.
///
/// Buckets are right-labeled: a bucket's timestamp is its end, so filtering
/// "bars at or before t" never includes a bucket still being formed at t.
/// Gaps (overnight, weekends) simply produce no bucket — callers never need
/// to pre-filter non-trading hours.
pub fn resample(bars: &[Bar], period: Duration) -> Vec<Bar> {
    let mut out: Vec<Bar> = Vec::new();

    for bar in bars {
        let bucket = match bar.timestamp.duration_trunc(period) {
            Ok(ts) => ts + period,
            Err(_) => bar.timestamp,
        };

        match out.last_mut() {
            Some(current) if current.timestamp == bucket => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
                current.volume += bar.volume;
            }
            _ => {
                out.push(Bar {
                    timestamp: bucket,
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                    symbol: bar.symbol.clone(),
                });
            }
        }
    }

    out
}

/// Convenience wrappers for the timeframes the confluence scorer consumes.
pub fn resample_4h(bars: &[Bar]) -> Vec<Bar> {
    resample(bars, Duration::hours(4))
}

pub fn resample_daily(bars: &[Bar]) -> Vec<Bar> {
    resample(bars, Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(minute: i64, open: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap()
                + Duration::minutes(minute),
            open,
            high: open.max(close) + 0.5,
            low: open.min(close) - 0.5,
            close,
            volume: 100,
            symbol: "QQQ".to_string(),
        }
    }

    #[test]
    fn resample_aggregates_ohlcv() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 100.0 + i as f64, 100.5 + i as f64)).collect();
        let out = resample(&bars, Duration::minutes(5));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].open, 100.0);
        assert_eq!(out[0].close, 104.5);
        assert_eq!(out[0].volume, 500);
        assert_eq!(out[1].open, 105.0);
    }

    #[test]
    fn resample_tolerates_gaps() {
        let mut bars = vec![bar(0, 100.0, 101.0)];
        bars.push(bar(120, 102.0, 103.0)); // two hours later
        let out = resample(&bars, Duration::minutes(5));

        assert_eq!(out.len(), 2);
        assert!(out[1].timestamp > out[0].timestamp);
    }
}
