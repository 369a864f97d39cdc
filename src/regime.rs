//! Market regime classification from Renko momentum and price slope.

use serde::{Deserialize, Serialize};

use crate::bars::Bar;
use crate::indicators;

/// Coarse trend regime label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    BullTrend,
    BearTrend,
    Sideways,
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::BullTrend, Regime::BearTrend, Regime::Sideways];
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::BullTrend => write!(f, "bull_trend"),
            Regime::BearTrend => write!(f, "bear_trend"),
            Regime::Sideways => write!(f, "sideways"),
        }
    }
}

/// Classify each bar from brick-direction momentum and normalized price slope.
///
/// Bull: Renko mostly up AND slope positive. Bear: mirror. Everything else
/// (mixed or choppy) is sideways. Pure per-window computation — no state is
/// carried beyond the rolling windows.
pub fn classify_regimes(
    bars: &[Bar],
    renko_direction: &[i8],
    lookback: usize,
    trend_threshold: f64,
    slope_threshold: f64,
) -> Vec<Regime> {
    let renko_strength = indicators::rolling_mean_i8(renko_direction, lookback);
    let price_slope = indicators::rolling_slope(bars, lookback);

    bars.iter()
        .enumerate()
        .map(|(i, _)| {
            let strength = renko_strength.get(i).copied().unwrap_or(0.0);
            let slope = price_slope.get(i).copied().unwrap_or(0.0);

            if strength > trend_threshold && slope > slope_threshold {
                Regime::BullTrend
            } else if strength < -trend_threshold && slope < -slope_threshold {
                Regime::BearTrend
            } else {
                Regime::Sideways
            }
        })
        .collect()
}

/// Regime counts for reporting.
pub fn regime_counts(regimes: &[Regime]) -> [(Regime, usize); 3] {
    let mut counts = [0usize; 3];
    for r in regimes {
        match r {
            Regime::BullTrend => counts[0] += 1,
            Regime::BearTrend => counts[1] += 1,
            Regime::Sideways => counts[2] += 1,
        }
    }
    [
        (Regime::BullTrend, counts[0]),
        (Regime::BearTrend, counts[1]),
        (Regime::Sideways, counts[2]),
    ]
}

/// Whether a trade direction is allowed in a regime. Sideways admits both
/// directions when `allow_sideways` is set.
pub fn regime_allows(regime: Regime, is_long: bool, allow_sideways: bool) -> bool {
    match regime {
        Regime::BullTrend => is_long,
        Regime::BearTrend => !is_long,
        Regime::Sideways => allow_sideways,
    }
}
