//! Signal generation: the sweep-confluence rule and the wave/Renko rule.
//!
//! Both generators emit the same immutable `Signal` type, which is also the
//! surface a live execution adapter would consume.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bars::Bar;
use crate::confluence::{
    blend_confidence, calculate_confluence, check_alignment, combine_targets, ict_confluence,
    ict_targets, IctConfluence, MtfConfluence,
};
use crate::regime::{regime_allows, Regime};
use crate::renko::RenkoSeries;
use crate::sessions::SessionLevels;
use crate::structures::{BarStructures, SweepSource};
use crate::waves::{RetraceKind, WaveTracker};

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// How the simulator should derive the target price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TargetSpec {
    /// Entry-anchored target: `entry +/- multiple * atr`, with the ATR value
    /// captured at the signal bar.
    AtrMultiple { atr: f64 },
    /// Explicit price targets (wave/structure derived).
    Price { tp1: f64, tp2: Option<f64> },
}

/// Wave stats carried on wave-generated signals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaveSummary {
    pub brick_count: usize,
    pub p1_price: f64,
    pub p2_price: f64,
    pub wave_height: f64,
    pub retrace_pct: f64,
    pub retrace_kind: RetraceKind,
}

/// Which structures and context produced a signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalMeta {
    pub sweep_source: Option<SweepSource>,
    pub ict: Option<IctConfluence>,
    pub mtf: Option<MtfConfluence>,
    pub wave: Option<WaveSummary>,
    pub regime: Option<Regime>,
}

/// A directional trade signal. Created once per qualifying bar; immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub spot: f64,
    pub target: TargetSpec,
    pub stop: Option<f64>,
    pub confidence: f64,
    pub meta: SignalMeta,
}

/// Local-time trading gate, inclusive start / exclusive end in ET.
fn in_window(ts: DateTime<Utc>, start: (u32, u32), end: (u32, u32)) -> bool {
    let local = ts.with_timezone(&New_York);
    let t = local.hour() * 60 + local.minute();
    t >= start.0 * 60 + start.1 && t < end.0 * 60 + end.1
}

/// Configuration for the sweep-confluence generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSignalConfig {
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
    /// Bars after the sweep bar in which displacement/MSS must appear.
    pub confluence_window: usize,
    /// Require an aligned order block inside the window.
    pub enable_ob_filter: bool,
    /// Reject signals fighting the regime label.
    pub enable_regime_filter: bool,
    pub min_confidence: f64,
    /// Lookback for the ICT structure score.
    pub ict_lookback: usize,
}

impl Default for SweepSignalConfig {
    fn default() -> Self {
        Self {
            start_hour: 9,
            start_minute: 30,
            end_hour: 11,
            end_minute: 0,
            confluence_window: 6,
            enable_ob_filter: false,
            enable_regime_filter: true,
            min_confidence: 0.40,
            ict_lookback: 10,
        }
    }
}

/// Map wave-tracker entries onto the bar index so the sweep generator can
/// treat "wave entry fired here" as one of its confirmation legs.
pub fn wave_entry_series(
    bars: &[Bar],
    renko: &RenkoSeries,
    min_bricks: usize,
    max_entry_distance: f64,
) -> Vec<Option<Direction>> {
    let mut out = vec![None; bars.len()];
    let mut tracker = WaveTracker::new(min_bricks, max_entry_distance);

    for idx in 0..renko.len() {
        if let Some(entry) = tracker.on_brick(renko, idx) {
            let ts = renko.bricks[idx].timestamp;
            // Last bar at or before the completing brick.
            let pos = bars.partition_point(|b| b.timestamp <= ts);
            if pos > 0 {
                out[pos - 1] = Some(if entry.wave.direction == 1 {
                    Direction::Long
                } else {
                    Direction::Short
                });
            }
        }
    }

    out
}

/// Generate signals with the production sweep-confluence rule.
///
/// A long fires at sweep bar i iff, within `i..=i+W`: a bullish displacement
/// OR a wave entry, AND a bullish MSS all appear. Shorts mirror. The long
/// branch is checked first and the short branch only in its absence, so one
/// evaluation can never produce both directions. Candidates then pass the
/// blended-confidence gate.
#[allow(clippy::too_many_arguments)]
pub fn generate_sweep_signals(
    bars: &[Bar],
    structures: &[BarStructures],
    wave_entries: &[Option<Direction>],
    regimes: Option<&[Regime]>,
    df_4h: &[Bar],
    df_daily: &[Bar],
    config: &SweepSignalConfig,
) -> Vec<Signal> {
    let mut signals = Vec::new();
    let n = bars.len().min(structures.len());

    for i in 0..n {
        if !in_window(
            bars[i].timestamp,
            (config.start_hour, config.start_minute),
            (config.end_hour, config.end_minute),
        ) {
            continue;
        }

        let direction = if structures[i].sweep_bullish {
            Direction::Long
        } else if structures[i].sweep_bearish {
            Direction::Short
        } else {
            continue;
        };
        let long = direction == Direction::Long;

        let end = (i + config.confluence_window).min(n - 1);
        let window = &structures[i..=end];

        let has_displacement = window
            .iter()
            .any(|s| if long { s.displacement_bullish } else { s.displacement_bearish });
        let has_wave_entry = wave_entries
            .get(i..=end)
            .map_or(false, |w| w.iter().any(|e| *e == Some(direction)));
        let has_mss = window.iter().any(|s| if long { s.mss_bullish } else { s.mss_bearish });

        if !((has_displacement || has_wave_entry) && has_mss) {
            continue;
        }

        if config.enable_ob_filter {
            let has_ob = window.iter().any(|s| if long { s.ob_bullish } else { s.ob_bearish });
            if !has_ob {
                continue;
            }
        }

        let regime = regimes.map(|r| r[i]);
        if config.enable_regime_filter {
            if let Some(regime) = regime {
                if !regime_allows(regime, long, true) {
                    continue;
                }
            }
        }

        // Target sizing needs the ATR captured at the sweep bar.
        let Some(atr) = structures[i].atr else {
            continue;
        };

        let mtf = calculate_confluence(df_4h, df_daily, bars[i].timestamp);
        let ict = ict_confluence(structures, i, direction, config.ict_lookback);
        let confidence = blend_confidence(mtf.total_confidence, ict.score);
        if confidence < config.min_confidence {
            continue;
        }

        signals.push(Signal {
            id: Uuid::new_v4(),
            timestamp: bars[i].timestamp,
            direction,
            spot: bars[i].close,
            target: TargetSpec::AtrMultiple { atr },
            stop: None,
            confidence,
            meta: SignalMeta {
                sweep_source: structures[i].sweep_source,
                ict: Some(ict),
                mtf: Some(mtf),
                wave: None,
                regime,
            },
        });
    }

    signals
}

/// Configuration for the wave/Renko generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveSignalConfig {
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
    pub min_bricks: usize,
    pub max_entry_distance: f64,
    pub min_confidence: f64,
    pub ict_lookback: usize,
    /// Lookback for structure-derived targets.
    pub target_lookback: usize,
}

impl Default for WaveSignalConfig {
    fn default() -> Self {
        Self {
            start_hour: 9,
            start_minute: 45,
            end_hour: 15,
            end_minute: 45,
            min_bricks: 3,
            max_entry_distance: 1.5,
            min_confidence: 0.40,
            ict_lookback: 10,
            target_lookback: 20,
        }
    }
}

/// Generate signals from wave retracement entries with multi-timeframe
/// confluence alignment, regime filtering, and combined wave/ICT targets.
#[allow(clippy::too_many_arguments)]
pub fn generate_wave_signals(
    bars: &[Bar],
    levels: &[SessionLevels],
    structures: &[BarStructures],
    renko: &RenkoSeries,
    regimes: &[Regime],
    df_4h: &[Bar],
    df_daily: &[Bar],
    config: &WaveSignalConfig,
) -> Vec<Signal> {
    let mut signals = Vec::new();
    let mut tracker = WaveTracker::new(config.min_bricks, config.max_entry_distance);

    for idx in 0..renko.len() {
        let Some(entry) = tracker.on_brick(renko, idx) else {
            continue;
        };

        let timestamp = renko.bricks[idx].timestamp;
        if !in_window(
            timestamp,
            (config.start_hour, config.start_minute),
            (config.end_hour, config.end_minute),
        ) {
            continue;
        }

        let direction = if entry.wave.direction == 1 {
            Direction::Long
        } else {
            Direction::Short
        };

        // Bar index backing this brick, for regime/structure lookups.
        let pos = bars.partition_point(|b| b.timestamp <= timestamp);
        if pos == 0 {
            continue;
        }
        let bar_idx = pos - 1;

        let regime = regimes.get(bar_idx).copied();
        if let Some(regime) = regime {
            if !regime_allows(regime, direction == Direction::Long, true) {
                continue;
            }
        }

        let mtf = calculate_confluence(df_4h, df_daily, timestamp);
        let (aligned, mtf_confidence) = check_alignment(&mtf, direction, config.min_confidence);
        if !aligned {
            continue;
        }

        let ict = ict_confluence(structures, bar_idx, direction, config.ict_lookback);
        let confidence = blend_confidence(mtf_confidence, ict.score);
        if confidence < config.min_confidence {
            continue;
        }

        let spot = renko.bricks[idx].brick_close;
        let structure_targets =
            ict_targets(levels, bar_idx, direction, spot, config.target_lookback);
        let (tp1, tp2) = combine_targets(entry.tp1, entry.tp2, structure_targets, spot, direction);

        signals.push(Signal {
            id: Uuid::new_v4(),
            timestamp,
            direction,
            spot,
            target: TargetSpec::Price { tp1, tp2: Some(tp2) },
            stop: None,
            confidence,
            meta: SignalMeta {
                sweep_source: ict.sweep_source,
                ict: Some(ict),
                mtf: Some(mtf),
                wave: Some(WaveSummary {
                    brick_count: entry.wave.brick_count,
                    p1_price: entry.wave.p1_price,
                    p2_price: entry.wave.p2_price,
                    wave_height: entry.wave.wave_height,
                    retrace_pct: entry.retracement.retrace_pct,
                    retrace_kind: entry.retracement.kind,
                }),
                regime,
            },
        });
    }

    signals
}
