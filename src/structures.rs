//! ICT structure detectors: liquidity sweeps, displacement, fair value gaps,
//! market structure shifts, and order blocks.
//!
//! Detectors are independent and composable, but run them in order
//! sweeps -> displacement -> FVG -> MSS -> order blocks, since order blocks
//! key off displacement flags. Missing inputs (no ATR yet, empty session)
//! leave flags false rather than erroring — a full backtest over arbitrary
//! history must always complete.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::bars::Bar;
use crate::sessions::SessionLevels;

/// Which session's liquidity a sweep took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepSource {
    Asia,
    London,
}

impl std::fmt::Display for SweepSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepSource::Asia => write!(f, "asia"),
            SweepSource::London => write!(f, "london"),
        }
    }
}

/// Per-bar structure flags. Multiple structures may co-occur on one bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BarStructures {
    pub sweep_bullish: bool,
    pub sweep_bearish: bool,
    pub sweep_source: Option<SweepSource>,
    pub displacement_bullish: bool,
    pub displacement_bearish: bool,
    /// ATR value in effect at this bar (None until the window fills).
    pub atr: Option<f64>,
    pub fvg_bullish: bool,
    pub fvg_bearish: bool,
    pub fvg_low: Option<f64>,
    pub fvg_high: Option<f64>,
    pub mss_bullish: bool,
    pub mss_bearish: bool,
    pub ob_bullish: bool,
    pub ob_bearish: bool,
    pub ob_low: Option<f64>,
    pub ob_high: Option<f64>,
}

/// Running market-structure bias for MSS detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureBias {
    Bullish,
    Bearish,
    Neutral,
}

/// Serializable MSS state threaded bar-by-bar through the fold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StructureState {
    pub bias: StructureBias,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
}

impl Default for StructureState {
    fn default() -> Self {
        Self {
            bias: StructureBias::Neutral,
            last_swing_high: None,
            last_swing_low: None,
        }
    }
}

/// Backward scan bound for the order-block search.
const OB_LOOKBACK_BARS: usize = 20;

/// Detect liquidity sweeps of Asia or London session extremes.
///
/// Bullish: wick below the session low with a close back above it. Asia is
/// checked first; London is consulted only when the Asia condition fails
/// (falls through, not "any of"). Bearish mirrors on session highs.
pub fn detect_sweeps(bars: &[Bar], levels: &[SessionLevels], out: &mut [BarStructures]) {
    for i in 0..bars.len().min(levels.len()).min(out.len()) {
        let bar = &bars[i];
        let lv = &levels[i];

        let swept_low = |level: Option<f64>| {
            level.map_or(false, |l| bar.low < l && bar.close > l)
        };
        let swept_high = |level: Option<f64>| {
            level.map_or(false, |h| bar.high > h && bar.close < h)
        };

        if swept_low(lv.asia_low) {
            out[i].sweep_bullish = true;
            out[i].sweep_source = Some(SweepSource::Asia);
        } else if swept_low(lv.london_low) {
            out[i].sweep_bullish = true;
            out[i].sweep_source = Some(SweepSource::London);
        }

        if swept_high(lv.asia_high) {
            out[i].sweep_bearish = true;
            out[i].sweep_source = Some(SweepSource::Asia);
        } else if swept_high(lv.london_high) {
            out[i].sweep_bearish = true;
            out[i].sweep_source = Some(SweepSource::London);
        }
    }
}

/// Detect displacement candles: a large directional body relative to ATR
/// that also breaks the prior bar's extreme (confirms the break, not just a
/// big candle).
pub fn detect_displacement(
    bars: &[Bar],
    atr: &[Option<f64>],
    threshold: f64,
    out: &mut [BarStructures],
) {
    for i in 0..bars.len().min(out.len()) {
        out[i].atr = atr.get(i).copied().flatten();

        if i == 0 {
            continue;
        }
        let Some(atr_value) = out[i].atr else {
            continue;
        };

        let bar = &bars[i];
        let prev = &bars[i - 1];
        let body = bar.close - bar.open;

        if body > 0.0 && body > threshold * atr_value && bar.close > prev.high {
            out[i].displacement_bullish = true;
        } else if body < 0.0 && -body > threshold * atr_value && bar.close < prev.low {
            out[i].displacement_bearish = true;
        }
    }
}

/// Detect fair value gaps with 3-candle logic.
///
/// Bullish FVG at n: `low[n] > high[n-2]`, gap bounds `[high[n-2], low[n]]`.
pub fn detect_fvgs(bars: &[Bar], out: &mut [BarStructures]) {
    for i in 2..bars.len().min(out.len()) {
        if bars[i].low > bars[i - 2].high {
            out[i].fvg_bullish = true;
            out[i].fvg_low = Some(bars[i - 2].high);
            out[i].fvg_high = Some(bars[i].low);
        }

        if bars[i].high < bars[i - 2].low {
            out[i].fvg_bearish = true;
            out[i].fvg_low = Some(bars[i].high);
            out[i].fvg_high = Some(bars[i - 2].low);
        }
    }
}

/// Detect market structure shifts.
///
/// A swing high/low is a bar strictly more extreme than the two bars on each
/// side, so it is only confirmed two bars after it prints — the fold updates
/// the last swing at that point, never earlier. An MSS fires only on the
/// transition out of the opposing/neutral bias; this is the one detector
/// that carries state across bars.
pub fn detect_mss(bars: &[Bar], out: &mut [BarStructures]) {
    let mut state = StructureState::default();

    for i in 0..bars.len().min(out.len()) {
        // Confirm the swing candidate two bars back, if any.
        if i >= 4 {
            let j = i - 2;
            let h = bars[j].high;
            if h > bars[j - 1].high && h > bars[j - 2].high && h > bars[j + 1].high && h > bars[j + 2].high
            {
                state.last_swing_high = Some(h);
            }
            let l = bars[j].low;
            if l < bars[j - 1].low && l < bars[j - 2].low && l < bars[j + 1].low && l < bars[j + 2].low
            {
                state.last_swing_low = Some(l);
            }
        }

        if let Some(swing_high) = state.last_swing_high {
            if bars[i].close > swing_high
                && matches!(state.bias, StructureBias::Bearish | StructureBias::Neutral)
            {
                out[i].mss_bullish = true;
                state.bias = StructureBias::Bullish;
            }
        }

        if let Some(swing_low) = state.last_swing_low {
            if bars[i].close < swing_low
                && matches!(state.bias, StructureBias::Bullish | StructureBias::Neutral)
            {
                out[i].mss_bearish = true;
                state.bias = StructureBias::Bearish;
            }
        }
    }
}

/// Candle summary kept in the order-block ring buffer.
#[derive(Debug, Clone, Copy)]
struct CandleSummary {
    bullish: bool,
    bearish: bool,
    low: f64,
    high: f64,
}

/// Detect order blocks: the last opposite-color candle before a displacement
/// bar, found through a bounded ring buffer so the scan cost stays O(1)
/// amortized per bar regardless of series length.
pub fn detect_order_blocks(bars: &[Bar], out: &mut [BarStructures]) {
    let mut recent: VecDeque<CandleSummary> = VecDeque::with_capacity(OB_LOOKBACK_BARS);

    for i in 0..bars.len().min(out.len()) {
        if out[i].displacement_bullish {
            if let Some(candle) = recent.iter().rev().find(|c| c.bearish) {
                out[i].ob_bullish = true;
                out[i].ob_low = Some(candle.low);
                out[i].ob_high = Some(candle.high);
            }
        }

        if out[i].displacement_bearish {
            if let Some(candle) = recent.iter().rev().find(|c| c.bullish) {
                out[i].ob_bearish = true;
                out[i].ob_low = Some(candle.low);
                out[i].ob_high = Some(candle.high);
            }
        }

        if recent.len() == OB_LOOKBACK_BARS {
            recent.pop_front();
        }
        recent.push_back(CandleSummary {
            bullish: bars[i].is_bullish(),
            bearish: bars[i].is_bearish(),
            low: bars[i].low,
            high: bars[i].high,
        });
    }
}

/// Run every detector in dependency order over a bar series that already
/// carries session levels.
pub fn detect_all(
    bars: &[Bar],
    levels: &[SessionLevels],
    atr: &[Option<f64>],
    displacement_threshold: f64,
) -> Vec<BarStructures> {
    let mut out = vec![BarStructures::default(); bars.len()];

    detect_sweeps(bars, levels, &mut out);
    detect_displacement(bars, atr, displacement_threshold, &mut out);
    detect_fvgs(bars, &mut out);
    detect_mss(bars, &mut out);
    detect_order_blocks(bars, &mut out);

    out
}
