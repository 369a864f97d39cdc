//! Renko brick construction from time bars.
//!
//! Bricks re-sample a series by fixed price increments instead of time: one
//! bar may complete zero, one, or several bricks. Brick size is either fixed
//! or derived from the median ATR of the whole series (median is stable
//! against the undefined early-series ATR values).

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bars::Bar;
use crate::indicators;

/// Minimum brick size guard for ATR-derived sizing.
const MIN_BRICK_SIZE: f64 = 0.01;

/// A single completed Renko brick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RenkoBrick {
    /// Timestamp of the bar that completed this brick.
    pub timestamp: DateTime<Utc>,
    pub brick_close: f64,
    /// +1 for an up brick, -1 for a down brick.
    pub direction: i8,
}

/// Brick sizing mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BrickSizing {
    Fixed(f64),
    /// `k * median(ATR(period))` over the whole series.
    AtrMultiple { k: f64, period: usize },
}

/// A built Renko series with the brick size shared by every brick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenkoSeries {
    pub bricks: Vec<RenkoBrick>,
    pub brick_size: f64,
}

impl RenkoSeries {
    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }
}

/// Build a Renko series from time bars.
///
/// Tracks a running brick close starting at the first bar's close and emits
/// bricks while each subsequent close moves a full brick beyond it.
pub fn build_renko(bars: &[Bar], sizing: BrickSizing) -> Result<RenkoSeries> {
    let brick_size = match sizing {
        BrickSizing::Fixed(size) => {
            if size <= 0.0 {
                bail!("fixed brick size must be positive, got {}", size);
            }
            size
        }
        BrickSizing::AtrMultiple { k, period } => {
            if k <= 0.0 {
                bail!("renko ATR multiple must be positive, got {}", k);
            }
            let atr = indicators::atr(bars, period);
            match indicators::median_atr(&atr) {
                Some(median) => (k * median).max(MIN_BRICK_SIZE),
                // Too few bars for any ATR value: fall back to the floor so
                // short series still build (and produce few/no bricks).
                None => MIN_BRICK_SIZE,
            }
        }
    };

    let mut bricks = Vec::new();
    let Some(first) = bars.first() else {
        return Ok(RenkoSeries { bricks, brick_size });
    };

    let mut current = first.close;

    for bar in bars {
        while bar.close >= current + brick_size {
            current += brick_size;
            bricks.push(RenkoBrick {
                timestamp: bar.timestamp,
                brick_close: current,
                direction: 1,
            });
        }
        while bar.close <= current - brick_size {
            current -= brick_size;
            bricks.push(RenkoBrick {
                timestamp: bar.timestamp,
                brick_close: current,
                direction: -1,
            });
        }
    }

    Ok(RenkoSeries { bricks, brick_size })
}

/// Back-project brick directions onto the original bar index: for each bar,
/// the direction of the most recently completed brick at or before it
/// (0 before any brick exists). Linear merge over both sequences.
pub fn direction_series(bars: &[Bar], renko: &RenkoSeries) -> Vec<i8> {
    let mut out = vec![0i8; bars.len()];
    let mut brick_idx = 0usize;
    let mut last_direction = 0i8;

    for (i, bar) in bars.iter().enumerate() {
        while brick_idx < renko.bricks.len() && renko.bricks[brick_idx].timestamp <= bar.timestamp {
            last_direction = renko.bricks[brick_idx].direction;
            brick_idx += 1;
        }
        out[i] = last_direction;
    }

    out
}

/// Rolling trend strength over the brick sequence: mean of the last
/// `lookback` directions, in [-1, 1], with min-periods 1.
pub fn trend_strength(renko: &RenkoSeries, lookback: usize) -> Vec<f64> {
    let directions: Vec<i8> = renko.bricks.iter().map(|b| b.direction).collect();
    indicators::rolling_mean_i8(&directions, lookback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: Utc.with_ymd_and_hms(2025, 3, 11, 14, 30, 0).unwrap()
                    + Duration::minutes(i as i64),
                open: c,
                high: c + 0.1,
                low: c - 0.1,
                close: c,
                volume: 100,
                symbol: "QQQ".to_string(),
            })
            .collect()
    }

    #[test]
    fn single_bar_can_emit_multiple_bricks() {
        let bars = bars_from_closes(&[100.0, 103.2]);
        let renko = build_renko(&bars, BrickSizing::Fixed(1.0)).unwrap();

        assert_eq!(renko.bricks.len(), 3);
        assert_eq!(renko.bricks[0].brick_close, 101.0);
        assert_eq!(renko.bricks[2].brick_close, 103.0);
        assert!(renko.bricks.iter().all(|b| b.direction == 1));
        // All three bricks completed by the second bar.
        assert_eq!(renko.bricks[0].timestamp, bars[1].timestamp);
    }

    #[test]
    fn reversal_emits_down_bricks() {
        let bars = bars_from_closes(&[100.0, 102.0, 99.5]);
        let renko = build_renko(&bars, BrickSizing::Fixed(1.0)).unwrap();

        let directions: Vec<i8> = renko.bricks.iter().map(|b| b.direction).collect();
        assert_eq!(directions, vec![1, 1, -1, -1]);
        assert_eq!(renko.bricks.last().unwrap().brick_close, 100.0);
    }

    #[test]
    fn small_moves_emit_nothing() {
        let bars = bars_from_closes(&[100.0, 100.4, 100.8, 100.3]);
        let renko = build_renko(&bars, BrickSizing::Fixed(1.0)).unwrap();
        assert!(renko.is_empty());
    }

    #[test]
    fn direction_series_back_projects() {
        let bars = bars_from_closes(&[100.0, 100.4, 101.2, 101.5, 99.9]);
        let renko = build_renko(&bars, BrickSizing::Fixed(1.0)).unwrap();
        let dirs = direction_series(&bars, &renko);

        // No brick yet at the first two bars.
        assert_eq!(dirs[0], 0);
        assert_eq!(dirs[1], 0);
        // Up brick completed at bar 2 carries forward.
        assert_eq!(dirs[2], 1);
        assert_eq!(dirs[3], 1);
        // Down brick at bar 4.
        assert_eq!(dirs[4], -1);
    }

    #[test]
    fn invalid_sizing_is_rejected() {
        let bars = bars_from_closes(&[100.0]);
        assert!(build_renko(&bars, BrickSizing::Fixed(-1.0)).is_err());
        assert!(build_renko(&bars, BrickSizing::AtrMultiple { k: 0.0, period: 14 }).is_err());
    }
}
