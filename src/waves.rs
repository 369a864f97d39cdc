//! Renko wave and retracement analysis.
//!
//! A wave is a run of 3+ consecutive same-direction bricks. The retracement
//! after a wave is banded: shallow (<33%) keeps momentum, healthy (33-62%)
//! is the entry zone, deep (>62%) kills the setup. Ownership of the "current
//! wave" is exclusive and transient — the tracker owns at most one wave, and
//! a wave produces at most one entry before it is cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::renko::RenkoSeries;

/// Fibonacci extension used for the second target.
const TP2_EXTENSION: f64 = 1.618;

/// A detected brick impulse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Wave {
    pub start_idx: usize,
    pub end_idx: usize,
    /// +1 up, -1 down.
    pub direction: i8,
    pub brick_count: usize,
    /// Turn price before the wave (close of the last opposite brick).
    pub p1_price: f64,
    /// Wave extreme.
    pub p2_price: f64,
    pub wave_height: f64,
    pub timestamp: DateTime<Utc>,
}

/// Retracement depth band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetraceKind {
    Shallow,
    Healthy,
    Deep,
}

impl std::fmt::Display for RetraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetraceKind::Shallow => write!(f, "shallow"),
            RetraceKind::Healthy => write!(f, "healthy"),
            RetraceKind::Deep => write!(f, "deep"),
        }
    }
}

/// Retracement measured against a wave.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Retracement {
    pub retrace_pct: f64,
    pub kind: RetraceKind,
    pub current_price: f64,
    /// Distance from p2 in bricks.
    pub distance_bricks: f64,
    pub entry_valid: bool,
}

/// A qualified wave entry: the wave, its retracement, and both targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaveEntry {
    pub wave: Wave,
    pub retracement: Retracement,
    pub tp1: f64,
    pub tp2: f64,
}

/// Detect the consecutive same-direction run ending at `end_idx`.
///
/// Returns `None` when the run is shorter than `min_bricks`. P1 is the brick
/// close just before the run started (the turn), or the run start itself at
/// the beginning of the series.
pub fn detect_wave(renko: &RenkoSeries, end_idx: usize, min_bricks: usize) -> Option<Wave> {
    if end_idx >= renko.bricks.len() || end_idx + 1 < min_bricks {
        return None;
    }

    let direction = renko.bricks[end_idx].direction;
    let mut start_idx = end_idx;
    while start_idx > 0 && renko.bricks[start_idx - 1].direction == direction {
        start_idx -= 1;
    }

    let brick_count = end_idx - start_idx + 1;
    if brick_count < min_bricks {
        return None;
    }

    let p1_price = if start_idx > 0 {
        renko.bricks[start_idx - 1].brick_close
    } else {
        renko.bricks[start_idx].brick_close
    };
    let p2_price = renko.bricks[end_idx].brick_close;

    Some(Wave {
        start_idx,
        end_idx,
        direction,
        brick_count,
        p1_price,
        p2_price,
        wave_height: (p2_price - p1_price).abs(),
        timestamp: renko.bricks[end_idx].timestamp,
    })
}

/// Measure how much of a wave the current price has given back, and whether
/// an entry this far from p2 is still acceptable.
pub fn analyze_retracement(
    wave: &Wave,
    current_price: f64,
    brick_size: f64,
    max_entry_distance: f64,
) -> Retracement {
    let retrace_amount = if wave.direction == 1 {
        wave.p2_price - current_price
    } else {
        current_price - wave.p2_price
    };

    let retrace_pct = if wave.wave_height > 0.0 {
        retrace_amount / wave.wave_height
    } else {
        0.0
    };

    let kind = if retrace_pct < 0.33 {
        RetraceKind::Shallow
    } else if retrace_pct < 0.62 {
        RetraceKind::Healthy
    } else {
        RetraceKind::Deep
    };

    let distance_bricks = if brick_size > 0.0 {
        (current_price - wave.p2_price).abs() / brick_size
    } else {
        0.0
    };

    Retracement {
        retrace_pct,
        kind,
        current_price,
        distance_bricks,
        entry_valid: kind != RetraceKind::Deep && distance_bricks <= max_entry_distance,
    }
}

/// Profit targets projected from the wave extreme: 1.0x the wave height for
/// tp1, 1.618x for tp2, signed by direction.
pub fn wave_targets(wave: &Wave) -> (f64, f64) {
    let sign = wave.direction as f64;
    let tp1 = wave.p2_price + sign * wave.wave_height;
    let tp2 = wave.p2_price + sign * wave.wave_height * TP2_EXTENSION;
    (tp1, tp2)
}

/// Stateful wave tracker, advanced one brick at a time.
///
/// States: no active wave, or tracking exactly one. A same-direction brick
/// beyond p2 folds the wave into a new, longer one (no signal on adoption).
/// An opposite brick is evaluated as a retracement: deep clears the wave,
/// a valid entry emits once and clears the wave.
#[derive(Debug, Clone)]
pub struct WaveTracker {
    min_bricks: usize,
    max_entry_distance: f64,
    active: Option<Wave>,
}

impl WaveTracker {
    pub fn new(min_bricks: usize, max_entry_distance: f64) -> Self {
        Self {
            min_bricks,
            max_entry_distance,
            active: None,
        }
    }

    pub fn active_wave(&self) -> Option<&Wave> {
        self.active.as_ref()
    }

    /// Advance the tracker to brick `idx`, returning a qualified entry when
    /// one fires.
    pub fn on_brick(&mut self, renko: &RenkoSeries, idx: usize) -> Option<WaveEntry> {
        let brick = *renko.bricks.get(idx)?;

        if let Some(wave) = self.active {
            if brick.direction == wave.direction {
                let beyond_p2 = match wave.direction {
                    1 => brick.brick_close > wave.p2_price,
                    _ => brick.brick_close < wave.p2_price,
                };
                if beyond_p2 {
                    // The old wave is stale: it just became part of a longer
                    // impulse. Re-detect so the active wave spans the full run.
                    self.active = detect_wave(renko, idx, self.min_bricks);
                }
                return None;
            }

            // Opposite brick: evaluate the pullback.
            let retracement = analyze_retracement(
                &wave,
                brick.brick_close,
                renko.brick_size,
                self.max_entry_distance,
            );

            if retracement.kind == RetraceKind::Deep {
                self.active = None;
                return None;
            }

            if retracement.entry_valid {
                let (tp1, tp2) = wave_targets(&wave);
                // One entry per impulse.
                self.active = None;
                return Some(WaveEntry {
                    wave,
                    retracement,
                    tp1,
                    tp2,
                });
            }

            return None;
        }

        // No active wave: see if a qualifying run ends here.
        self.active = detect_wave(renko, idx, self.min_bricks);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renko::RenkoBrick;
    use chrono::{Duration, TimeZone};

    fn series(directions: &[i8], start_price: f64, brick_size: f64) -> RenkoSeries {
        let base = Utc.with_ymd_and_hms(2025, 3, 11, 14, 30, 0).unwrap();
        let mut price = start_price;
        let bricks = directions
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                price += d as f64 * brick_size;
                RenkoBrick {
                    timestamp: base + Duration::minutes(i as i64),
                    brick_close: price,
                    direction: d,
                }
            })
            .collect();
        RenkoSeries { bricks, brick_size }
    }

    #[test]
    fn wave_needs_min_bricks() {
        let renko = series(&[1, 1, -1, 1, 1], 100.0, 1.0);
        assert!(detect_wave(&renko, 4, 3).is_none());

        let renko = series(&[-1, 1, 1, 1], 100.0, 1.0);
        let wave = detect_wave(&renko, 3, 3).unwrap();
        assert_eq!(wave.brick_count, 3);
        assert_eq!(wave.direction, 1);
        // P1 is the turn brick before the run: 100 - 1 = 99.
        assert_eq!(wave.p1_price, 99.0);
        assert_eq!(wave.p2_price, 102.0);
        assert_eq!(wave.wave_height, 3.0);
    }

    #[test]
    fn retracement_bands() {
        let renko = series(&[-1, 1, 1, 1], 100.0, 1.0);
        let wave = detect_wave(&renko, 3, 3).unwrap(); // p1=99, p2=102, h=3

        let shallow = analyze_retracement(&wave, 101.5, 1.0, 1.5);
        assert_eq!(shallow.kind, RetraceKind::Shallow);
        assert!(shallow.entry_valid);

        let healthy = analyze_retracement(&wave, 100.7, 1.0, 1.5);
        assert_eq!(healthy.kind, RetraceKind::Healthy);
        assert!(healthy.entry_valid);

        let deep = analyze_retracement(&wave, 100.0, 1.0, 1.5);
        assert_eq!(deep.kind, RetraceKind::Deep);
        assert!(!deep.entry_valid);
    }

    #[test]
    fn entry_distance_cap() {
        let renko = series(&[-1, 1, 1, 1, 1, 1, 1, 1, 1, 1], 100.0, 1.0);
        let wave = detect_wave(&renko, 9, 3).unwrap(); // p2=108, h=10

        // 2 bricks off p2 is only 20% retraced but beyond the 1.5 cap.
        let r = analyze_retracement(&wave, 106.0, 1.0, 1.5);
        assert_eq!(r.kind, RetraceKind::Shallow);
        assert!(!r.entry_valid);
    }

    #[test]
    fn targets_are_signed_extensions() {
        let renko = series(&[-1, 1, 1, 1], 100.0, 1.0);
        let up = detect_wave(&renko, 3, 3).unwrap(); // p2=102, h=3
        let (tp1, tp2) = wave_targets(&up);
        assert!((tp1 - 105.0).abs() < 1e-9);
        assert!((tp2 - (102.0 + 3.0 * 1.618)).abs() < 1e-9);

        let renko = series(&[1, -1, -1, -1], 100.0, 1.0);
        let down = detect_wave(&renko, 3, 3).unwrap(); // p1=101, p2=98, h=3
        let (tp1, tp2) = wave_targets(&down);
        assert!((tp1 - 95.0).abs() < 1e-9);
        assert!(tp2 < tp1);
    }

    #[test]
    fn tracker_emits_one_entry_per_wave() {
        // 4-brick up run, then two down bricks: the first pullback brick is
        // within 1.5 bricks of p2 and healthy enough to fire.
        let renko = series(&[1, 1, 1, 1, -1, -1], 100.0, 1.0);
        let mut tracker = WaveTracker::new(3, 1.5);

        let mut entries = Vec::new();
        for idx in 0..renko.len() {
            if let Some(entry) = tracker.on_brick(&renko, idx) {
                entries.push(entry);
            }
        }

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.wave.direction, 1);
        // Wave cleared after the single entry.
        assert!(tracker.active_wave().is_none());
    }

    #[test]
    fn deep_retrace_invalidates_wave() {
        // 3-brick up run (h=4 with the turn), then bricks straight back down
        // past 62%: no entry may ever reference this wave.
        let renko = series(&[-1, 1, 1, 1, -1, -1, -1, -1], 100.0, 2.0);
        let mut tracker = WaveTracker::new(3, 0.9);

        let mut entries = Vec::new();
        for idx in 0..renko.len() {
            if let Some(entry) = tracker.on_brick(&renko, idx) {
                entries.push(entry);
            }
        }

        assert!(entries.is_empty());
    }

    #[test]
    fn extension_past_p2_adopts_longer_wave() {
        let renko = series(&[1, 1, 1, 1, 1, 1], 100.0, 1.0);
        let mut tracker = WaveTracker::new(3, 1.5);

        for idx in 0..renko.len() {
            tracker.on_brick(&renko, idx);
        }

        let wave = tracker.active_wave().unwrap();
        assert_eq!(wave.brick_count, 6);
        assert_eq!(wave.p2_price, 106.0);
    }
}
