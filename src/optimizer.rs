//! Walk-forward optimizer with regime-specific parameter tuning.
//!
//! Chronological train/test splits (train grows, test slides forward), a
//! parameter grid evaluated per regime on the train segment, and the winner
//! scored out-of-sample on the following test segment. Grid evaluations are
//! independent pipelines, so they fan out across worker threads with rayon
//! and merge by arg-max — no shared mutable state.

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::bars::Bar;
use crate::config::{RegimeParamSet, StrategyParams};
use crate::pipeline;
use crate::regime::Regime;

/// Minimum train bars for a regime to be optimized in a split.
const MIN_TRAIN_BARS: usize = 100;
/// Minimum test bars for an out-of-sample evaluation.
const MIN_TEST_BARS: usize = 50;
/// Score assigned when a parameter set produces no signals at all.
const NO_SIGNALS_SCORE: f64 = -1000.0;
/// Penalty when a parameter set produces fewer than three trades.
const LOW_TRADE_PENALTY: f64 = -500.0;

/// Grid density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridMode {
    Fast,
    Medium,
    Full,
}

/// Build the parameter combinations to test, varying the tunable subset
/// around a base parameter set.
pub fn param_grid(mode: GridMode, base: &StrategyParams) -> Vec<StrategyParams> {
    let (renko_k_values, lookback_values, hold_values, ob_values): (
        &[f64],
        &[usize],
        &[usize],
        &[bool],
    ) = match mode {
        GridMode::Fast => (&[0.8, 1.0, 1.2], &[15, 20], &[45, 60], &[false, true]),
        GridMode::Medium => (
            &[0.5, 0.8, 1.0, 1.2, 1.5],
            &[10, 15, 20, 25],
            &[30, 45, 60, 90],
            &[false, true],
        ),
        GridMode::Full => (
            &[0.5, 0.7, 0.8, 1.0, 1.2, 1.5, 2.0],
            &[10, 15, 20, 25, 30],
            &[30, 45, 60, 90, 120],
            &[false, true],
        ),
    };

    let mut combinations = Vec::new();
    for &renko_k in renko_k_values {
        for &regime_lookback in lookback_values {
            for &max_hold_minutes in hold_values {
                for &enable_ob_filter in ob_values {
                    combinations.push(StrategyParams {
                        renko_k,
                        regime_lookback,
                        max_hold_minutes,
                        enable_ob_filter,
                        ..base.clone()
                    });
                }
            }
        }
    }

    combinations
}

/// One evaluation of one parameter set on one bar segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRecord {
    pub score: f64,
    pub win_rate: f64,
    pub avg_r: f64,
    pub max_drawdown: f64,
    pub num_trades: u32,
    pub total_pnl: f64,
    pub params: StrategyParams,
    pub regime: Option<Regime>,
    pub split: Option<usize>,
}

/// Run the full pipeline for one parameter set and score the result with
/// the composite fitness:
/// `100*win_rate + 50*avg_R - 0.1*max_drawdown + 5*min(trades, 20)`,
/// with a -500 penalty below three trades and -1000 for zero signals.
pub fn evaluate_params(bars: &[Bar], params: &StrategyParams, starting_balance: f64) -> EvalRecord {
    let empty = |score: f64| EvalRecord {
        score,
        win_rate: 0.0,
        avg_r: 0.0,
        max_drawdown: 0.0,
        num_trades: 0,
        total_pnl: 0.0,
        params: params.clone(),
        regime: None,
        split: None,
    };

    let Ok(features) = pipeline::compute_features(bars, params) else {
        return empty(NO_SIGNALS_SCORE);
    };
    let signals = pipeline::generate_signals(bars, &features, params);
    if signals.is_empty() {
        return empty(NO_SIGNALS_SCORE);
    }

    let report = match crate::backtest::Backtester::new(params.backtest_config(starting_balance)) {
        Ok(backtester) => backtester.run(bars, &signals),
        Err(_) => return empty(NO_SIGNALS_SCORE),
    };

    let num_trades = report.total_trades;
    let penalty = if num_trades < 3 { LOW_TRADE_PENALTY } else { 0.0 };
    let score = report.win_rate * 100.0 + report.avg_r_multiple * 50.0
        - report.max_drawdown * 0.1
        + (num_trades.min(20) as f64) * 5.0
        + penalty;

    EvalRecord {
        score,
        win_rate: report.win_rate,
        avg_r: report.avg_r_multiple,
        max_drawdown: report.max_drawdown,
        num_trades,
        total_pnl: report.total_pnl,
        params: params.clone(),
        regime: None,
        split: None,
    }
}

/// Chronological walk-forward splits over a series of `total_bars`.
///
/// Split i trains on everything up to `(i+1) * bars_per_split` and tests on
/// the following `bars_per_split` — the test window always starts where its
/// train window ends.
pub fn make_walkforward_splits(
    total_bars: usize,
    n_splits: usize,
) -> Vec<(Range<usize>, Range<usize>)> {
    if n_splits == 0 {
        return Vec::new();
    }
    let bars_per_split = total_bars / (n_splits + 1);
    if bars_per_split == 0 {
        return Vec::new();
    }

    let mut splits = Vec::new();
    for i in 0..n_splits {
        let train_end = (i + 1) * bars_per_split;
        let test_end = (train_end + bars_per_split).min(total_bars);
        if test_end <= train_end {
            break;
        }
        splits.push((0..train_end, train_end..test_end));
    }

    splits
}

/// Bars whose regime label matches, re-joined into a contiguous series.
fn bars_for_regime(bars: &[Bar], regimes: &[Regime], regime: Regime) -> Vec<Bar> {
    bars.iter()
        .zip(regimes)
        .filter(|(_, &r)| r == regime)
        .map(|(b, _)| b.clone())
        .collect()
}

/// Evaluate the whole grid on one segment in parallel and keep the best.
pub fn optimize_for_regime(
    bars: &[Bar],
    grid: &[StrategyParams],
    starting_balance: f64,
) -> Option<EvalRecord> {
    let completed = AtomicUsize::new(0);
    let total = grid.len();

    grid.par_iter()
        .map(|params| {
            let record = evaluate_params(bars, params, starting_balance);
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if done % 25 == 0 || done == total {
                info!("  [{}/{}] grid evaluations", done, total);
            }
            record
        })
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
}

/// Walk-forward output: the retained parameters per regime plus every
/// out-of-sample evaluation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardOutcome {
    pub best_params: RegimeParamSet,
    pub test_records: Vec<EvalRecord>,
    pub n_splits: usize,
}

/// Run the full walk-forward, regime-segmented optimization.
pub fn walkforward_optimize(
    bars: &[Bar],
    grid: &[StrategyParams],
    n_splits: usize,
    starting_balance: f64,
) -> Result<WalkForwardOutcome> {
    let baseline = grid.first().cloned().unwrap_or_default();
    let splits = make_walkforward_splits(bars.len(), n_splits);

    let mut best_params = RegimeParamSet::default();
    let mut test_records = Vec::new();

    for (split_idx, (train_range, test_range)) in splits.iter().enumerate() {
        let train = &bars[train_range.clone()];
        let test = &bars[test_range.clone()];
        info!(
            "Walk-forward split {}/{}: train {} bars, test {} bars",
            split_idx + 1,
            splits.len(),
            train.len(),
            test.len()
        );

        let train_features = pipeline::compute_features(train, &baseline)?;
        let test_features = pipeline::compute_features(test, &baseline)?;

        for regime in Regime::ALL {
            let regime_train = bars_for_regime(train, &train_features.regimes, regime);
            if regime_train.len() < MIN_TRAIN_BARS {
                info!("  {}: insufficient train data ({} bars)", regime, regime_train.len());
                continue;
            }

            info!("  Optimizing {} ({} bars)...", regime, regime_train.len());
            let Some(winner) = optimize_for_regime(&regime_train, grid, starting_balance) else {
                continue;
            };
            best_params.set(regime, winner.params.clone());

            let regime_test = bars_for_regime(test, &test_features.regimes, regime);
            if regime_test.len() < MIN_TEST_BARS {
                continue;
            }

            let mut record = evaluate_params(&regime_test, &winner.params, starting_balance);
            record.regime = Some(regime);
            record.split = Some(split_idx);
            test_records.push(record);
        }
    }

    Ok(WalkForwardOutcome {
        best_params,
        test_records,
        n_splits: splits.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use chrono_tz::America::New_York;

    fn quiet_bars(count: usize) -> Vec<Bar> {
        // Low-range drift that produces no qualifying setups.
        (0..count)
            .map(|i| {
                let local = New_York
                    .with_ymd_and_hms(2025, 3, 10, 4, 0, 0)
                    .unwrap()
                    + chrono::Duration::minutes(i as i64);
                let base = 500.0 + (i % 7) as f64 * 0.01;
                Bar {
                    timestamp: local.with_timezone(&Utc),
                    open: base,
                    high: base + 0.05,
                    low: base - 0.05,
                    close: base,
                    volume: 500,
                    symbol: "QQQ".to_string(),
                }
            })
            .collect()
    }

    #[test]
    fn splits_are_chronological_and_growing() {
        let splits = make_walkforward_splits(500, 4);

        assert_eq!(splits.len(), 4);
        let mut prev_train_end = 0;
        for (train, test) in &splits {
            assert_eq!(train.start, 0);
            assert!(train.end > prev_train_end);
            // Test data never precedes its train data.
            assert_eq!(test.start, train.end);
            assert!(test.end > test.start);
            prev_train_end = train.end;
        }
    }

    #[test]
    fn degenerate_split_counts_are_empty() {
        assert!(make_walkforward_splits(3, 10).is_empty());
        assert!(make_walkforward_splits(100, 0).is_empty());
    }

    #[test]
    fn grid_sizes_scale_with_mode() {
        let base = StrategyParams::default();
        assert_eq!(param_grid(GridMode::Fast, &base).len(), 3 * 2 * 2 * 2);
        assert_eq!(param_grid(GridMode::Medium, &base).len(), 5 * 4 * 4 * 2);
    }

    #[test]
    fn no_trades_scores_below_penalty_threshold_and_terminates() {
        // Every combination yields < 3 trades on quiet data: each score must
        // be <= -500 and the search still completes and returns a winner.
        let bars = quiet_bars(300);
        let grid = param_grid(GridMode::Fast, &StrategyParams::default());

        let records: Vec<EvalRecord> = grid
            .iter()
            .map(|p| evaluate_params(&bars, p, 25_000.0))
            .collect();

        assert_eq!(records.len(), grid.len());
        assert!(records.iter().all(|r| r.score <= -500.0));

        let winner = optimize_for_regime(&bars, &grid, 25_000.0);
        assert!(winner.is_some());
    }

    #[test]
    fn walkforward_terminates_on_short_data() {
        let bars = quiet_bars(240);
        let grid = param_grid(GridMode::Fast, &StrategyParams::default());
        let outcome = walkforward_optimize(&bars, &grid[..4], 3, 25_000.0).unwrap();

        assert!(outcome.n_splits <= 3);
    }
}
