//! Multi-timeframe confluence scoring and ICT structure confluence.
//!
//! The directional bias blends a tanh-scaled daily slope with positional
//! proxies (typical-price average on 4H, rounded-close mode on daily), then
//! gets a multiplicative boost from ICT structure presence near the signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bars::Bar;
use crate::sessions::SessionLevels;
use crate::signals::Direction;
use crate::structures::{BarStructures, SweepSource};

/// Daily trend direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Unknown,
}

/// Position of the last close relative to a reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricePosition {
    Above,
    Below,
    At,
}

/// Multi-timeframe confluence result for one evaluation instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MtfConfluence {
    pub daily_direction: TrendDirection,
    pub daily_slope: f64,
    pub slope_confidence: f64,
    pub vwap_position: PricePosition,
    pub value_position: PricePosition,
    pub total_confidence: f64,
}

/// Baseline confidence when the daily trend cannot be measured.
const BASELINE_CONFIDENCE: f64 = 0.4;
/// Slope normalization constant for tanh scaling.
const SLOPE_SCALE: f64 = 0.02;
/// Confidence added per agreeing positional proxy.
const PROXY_BOOST: f64 = 0.05;

/// Daily trend from the slope of close over the last `lookback` daily bars
/// at or before `current_time`. Confidence is `0.4 + 0.4*tanh(|slope|/0.02)`,
/// leaving headroom for the proxy boosts.
pub fn daily_trend(
    df_daily: &[Bar],
    current_time: DateTime<Utc>,
    lookback: usize,
) -> (TrendDirection, f64, f64) {
    let visible: Vec<&Bar> = df_daily
        .iter()
        .filter(|b| b.timestamp <= current_time)
        .collect();

    if visible.len() < lookback || lookback < 2 {
        return (TrendDirection::Unknown, 0.0, BASELINE_CONFIDENCE);
    }

    let recent = &visible[visible.len() - lookback..];
    let start = recent[0].close;
    let end = recent[recent.len() - 1].close;
    let slope = if start > 0.0 { (end - start) / start } else { 0.0 };

    let direction = if slope > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };

    let confidence = (BASELINE_CONFIDENCE + 0.4 * (slope.abs() / SLOPE_SCALE).tanh()).clamp(0.0, 1.0);

    (direction, slope, confidence)
}

fn position_vs_average(bars: &[&Bar], tail: usize, dead_band: f64) -> PricePosition {
    let recent = &bars[bars.len().saturating_sub(tail)..];
    let avg_tp: f64 =
        recent.iter().map(|b| b.typical_price()).sum::<f64>() / recent.len() as f64;
    let last_close = recent[recent.len() - 1].close;

    if last_close > avg_tp * (1.0 + dead_band) {
        PricePosition::Above
    } else if last_close < avg_tp * (1.0 - dead_band) {
        PricePosition::Below
    } else {
        PricePosition::At
    }
}

/// VWAP-style positional proxy: last close vs the mean typical price of the
/// last ten 4H bars (0.1% dead band), falling back to daily bars when the
/// 4H series is too short.
pub fn vwap_position(
    df_4h: &[Bar],
    current_time: DateTime<Utc>,
    fallback_daily: &[Bar],
) -> PricePosition {
    let visible_4h: Vec<&Bar> = df_4h
        .iter()
        .filter(|b| b.timestamp <= current_time)
        .collect();

    if visible_4h.len() >= 3 {
        return position_vs_average(&visible_4h, 10, 0.001);
    }

    let visible_daily: Vec<&Bar> = fallback_daily
        .iter()
        .filter(|b| b.timestamp <= current_time)
        .collect();
    if visible_daily.len() >= 3 {
        return position_vs_average(&visible_daily, 5, 0.001);
    }

    PricePosition::At
}

/// Point-of-control proxy: last close vs the mode of closes rounded to 0.1
/// over the last `lookback` daily bars (0.2% dead band). Ties resolve to the
/// lowest price, matching mode semantics.
pub fn value_position(
    df_daily: &[Bar],
    current_time: DateTime<Utc>,
    lookback: usize,
) -> PricePosition {
    let visible: Vec<&Bar> = df_daily
        .iter()
        .filter(|b| b.timestamp <= current_time)
        .collect();

    if visible.len() < lookback {
        return PricePosition::At;
    }

    let recent = &visible[visible.len() - lookback..];

    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for bar in recent {
        *counts.entry((bar.close * 10.0).round() as i64).or_insert(0) += 1;
    }

    let mut poc_key = 0i64;
    let mut poc_count = 0usize;
    for (&key, &count) in &counts {
        if count > poc_count {
            poc_key = key;
            poc_count = count;
        }
    }
    let poc = poc_key as f64 / 10.0;

    let last_close = recent[recent.len() - 1].close;
    if last_close > poc * 1.002 {
        PricePosition::Above
    } else if last_close < poc * 0.998 {
        PricePosition::Below
    } else {
        PricePosition::At
    }
}

/// Full multi-timeframe confluence: daily trend confidence plus +0.05 for
/// each positional proxy agreeing with the trend, capped at 1.0.
pub fn calculate_confluence(
    df_4h: &[Bar],
    df_daily: &[Bar],
    current_time: DateTime<Utc>,
) -> MtfConfluence {
    let (direction, slope, slope_confidence) = daily_trend(df_daily, current_time, 5);
    let vwap_pos = vwap_position(df_4h, current_time, df_daily);
    let value_pos = value_position(df_daily, current_time, 20);

    let mut total = slope_confidence;
    match direction {
        TrendDirection::Up => {
            if vwap_pos == PricePosition::Above {
                total += PROXY_BOOST;
            }
            if value_pos == PricePosition::Above {
                total += PROXY_BOOST;
            }
        }
        TrendDirection::Down => {
            if vwap_pos == PricePosition::Below {
                total += PROXY_BOOST;
            }
            if value_pos == PricePosition::Below {
                total += PROXY_BOOST;
            }
        }
        TrendDirection::Unknown => {}
    }

    MtfConfluence {
        daily_direction: direction,
        daily_slope: slope,
        slope_confidence,
        vwap_position: vwap_pos,
        value_position: value_pos,
        total_confidence: total.clamp(0.0, 1.0),
    }
}

/// Whether a signal direction is backed by the confluence, and the score to
/// attach either way.
pub fn check_alignment(
    confluence: &MtfConfluence,
    direction: Direction,
    min_confidence: f64,
) -> (bool, f64) {
    let aligned = matches!(
        (direction, confluence.daily_direction),
        (Direction::Long, TrendDirection::Up) | (Direction::Short, TrendDirection::Down)
    );

    if !aligned || confluence.total_confidence < min_confidence {
        return (false, confluence.total_confidence);
    }

    (true, confluence.total_confidence)
}

/// ICT structure presence near a signal, weighted by structure importance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IctConfluence {
    pub has_sweep: bool,
    pub has_displacement: bool,
    pub has_fvg: bool,
    pub has_mss: bool,
    pub has_order_block: bool,
    pub score: f64,
    pub sweep_source: Option<SweepSource>,
}

/// Weighted sum of direction-aligned structures within `lookback` bars at or
/// before the signal bar. Sweeps and displacement carry the most weight.
pub fn ict_confluence(
    structures: &[BarStructures],
    signal_idx: usize,
    direction: Direction,
    lookback: usize,
) -> IctConfluence {
    if structures.is_empty() {
        return IctConfluence {
            has_sweep: false,
            has_displacement: false,
            has_fvg: false,
            has_mss: false,
            has_order_block: false,
            score: 0.0,
            sweep_source: None,
        };
    }

    let end = signal_idx.min(structures.len() - 1);
    let start = end.saturating_sub(lookback);
    let window = &structures[start..=end];

    let long = direction == Direction::Long;
    let has_sweep = window.iter().any(|s| if long { s.sweep_bullish } else { s.sweep_bearish });
    let has_displacement = window
        .iter()
        .any(|s| if long { s.displacement_bullish } else { s.displacement_bearish });
    let has_fvg = window.iter().any(|s| if long { s.fvg_bullish } else { s.fvg_bearish });
    let has_mss = window.iter().any(|s| if long { s.mss_bullish } else { s.mss_bearish });
    let has_order_block = window.iter().any(|s| if long { s.ob_bullish } else { s.ob_bearish });

    let sweep_source = window
        .iter()
        .rev()
        .find(|s| if long { s.sweep_bullish } else { s.sweep_bearish })
        .and_then(|s| s.sweep_source);

    let mut score = 0.0;
    if has_sweep {
        score += 0.25;
    }
    if has_displacement {
        score += 0.25;
    }
    if has_mss {
        score += 0.20;
    }
    if has_fvg {
        score += 0.15;
    }
    if has_order_block {
        score += 0.15;
    }

    IctConfluence {
        has_sweep,
        has_displacement,
        has_fvg,
        has_mss,
        has_order_block,
        score,
        sweep_source,
    }
}

/// Multiplicative blend keeping the wave/MTF confidence as the primary
/// driver with ICT as a 0-50% boost: `wave_conf * (0.5 + 0.5*ict_score)`.
pub fn blend_confidence(wave_confidence: f64, ict_score: f64) -> f64 {
    (wave_confidence * (0.5 + 0.5 * ict_score)).clamp(0.0, 1.0)
}

/// Structure-based targets: tp1 at the nearest session extreme beyond entry
/// within the lookback (fallback 0.5% beyond entry), tp2 at the 1.618x
/// extension of that move.
pub fn ict_targets(
    levels: &[SessionLevels],
    signal_idx: usize,
    direction: Direction,
    entry_price: f64,
    lookback: usize,
) -> Option<(f64, f64)> {
    if levels.is_empty() {
        return None;
    }

    let end = signal_idx.min(levels.len() - 1);
    let start = end.saturating_sub(lookback);
    let window = &levels[start..=end];

    match direction {
        Direction::Long => {
            let swing_target = window
                .iter()
                .flat_map(|l| [l.asia_high, l.london_high])
                .flatten()
                .fold(f64::NEG_INFINITY, f64::max);

            let tp1 = if swing_target > entry_price {
                swing_target
            } else {
                entry_price * 1.005
            };
            let tp2 = entry_price + (tp1 - entry_price) * 1.618;
            Some((tp1, tp2))
        }
        Direction::Short => {
            let swing_target = window
                .iter()
                .flat_map(|l| [l.asia_low, l.london_low])
                .flatten()
                .fold(f64::INFINITY, f64::min);

            let tp1 = if swing_target < entry_price {
                swing_target
            } else {
                entry_price * 0.995
            };
            let tp2 = entry_price - (entry_price - tp1) * 1.618;
            Some((tp1, tp2))
        }
    }
}

/// Pick the closer tp1 (win rate) and the farther tp2 (payoff) between
/// wave-based and ICT-based targets. ICT targets on the wrong side of entry
/// are discarded entirely.
pub fn combine_targets(
    wave_tp1: f64,
    wave_tp2: f64,
    ict: Option<(f64, f64)>,
    entry_price: f64,
    direction: Direction,
) -> (f64, f64) {
    let Some((ict_tp1, ict_tp2)) = ict else {
        return (wave_tp1, wave_tp2);
    };

    match direction {
        Direction::Long => {
            if ict_tp1 <= entry_price || ict_tp2 <= entry_price {
                return (wave_tp1, wave_tp2);
            }
            let tp1 = if ict_tp1 - entry_price < wave_tp1 - entry_price {
                ict_tp1
            } else {
                wave_tp1
            };
            let tp2 = if ict_tp2 - entry_price > wave_tp2 - entry_price {
                ict_tp2
            } else {
                wave_tp2
            };
            (tp1, tp2)
        }
        Direction::Short => {
            if ict_tp1 >= entry_price || ict_tp2 >= entry_price {
                return (wave_tp1, wave_tp2);
            }
            let tp1 = if entry_price - ict_tp1 < entry_price - wave_tp1 {
                ict_tp1
            } else {
                wave_tp1
            };
            let tp2 = if entry_price - ict_tp2 > entry_price - wave_tp2 {
                ict_tp2
            } else {
                wave_tp2
            };
            (tp1, tp2)
        }
    }
}
