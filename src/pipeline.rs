//! Pipeline composition: bars -> features -> signals -> simulated trades.
//!
//! Every stage is a pure or bar-ordered-stateful transform over the
//! in-memory series; the whole run is synchronous and single-threaded.
//! Callers that want parallelism (the optimizer) run independent pipelines
//! on worker threads.

use anyhow::Result;

use crate::backtest::{Backtester, BacktestReport};
use crate::bars::{self, Bar};
use crate::config::{SignalMode, StrategyParams};
use crate::indicators;
use crate::regime::{classify_regimes, Regime};
use crate::renko::{self, BrickSizing, RenkoSeries};
use crate::sessions::{self, SessionLevels};
use crate::signals::{self, Signal};
use crate::structures::{self, BarStructures};

/// Everything the signal generators need, computed once per (bars, params).
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub levels: Vec<SessionLevels>,
    pub structures: Vec<BarStructures>,
    pub renko: RenkoSeries,
    pub renko_direction: Vec<i8>,
    pub regimes: Vec<Regime>,
    pub df_4h: Vec<Bar>,
    pub df_daily: Vec<Bar>,
}

/// Build all per-bar features for a parameter set.
pub fn compute_features(bars: &[Bar], params: &StrategyParams) -> Result<FeatureSet> {
    params.validate()?;

    let levels = sessions::session_levels(bars);
    let atr = indicators::atr(bars, params.atr_period);
    let structures = structures::detect_all(bars, &levels, &atr, params.displacement_threshold);

    let renko = renko::build_renko(
        bars,
        BrickSizing::AtrMultiple {
            k: params.renko_k,
            period: params.atr_period,
        },
    )?;
    let renko_direction = renko::direction_series(bars, &renko);
    let regimes = classify_regimes(
        bars,
        &renko_direction,
        params.regime_lookback,
        params.trend_threshold,
        0.0,
    );

    Ok(FeatureSet {
        levels,
        structures,
        renko,
        renko_direction,
        regimes,
        df_4h: bars::resample_4h(bars),
        df_daily: bars::resample_daily(bars),
    })
}

/// Generate signals from precomputed features according to the signal mode.
pub fn generate_signals(
    bars: &[Bar],
    features: &FeatureSet,
    params: &StrategyParams,
) -> Vec<Signal> {
    match params.signal_mode {
        SignalMode::SweepConfluence => {
            let wave_entries = signals::wave_entry_series(
                bars,
                &features.renko,
                params.min_bricks,
                params.max_entry_distance,
            );
            signals::generate_sweep_signals(
                bars,
                &features.structures,
                &wave_entries,
                Some(&features.regimes),
                &features.df_4h,
                &features.df_daily,
                &params.sweep_signal_config(),
            )
        }
        SignalMode::WaveRenko => signals::generate_wave_signals(
            bars,
            &features.levels,
            &features.structures,
            &features.renko,
            &features.regimes,
            &features.df_4h,
            &features.df_daily,
            &params.wave_signal_config(),
        ),
    }
}

/// Full run: features, signals, then the execution simulator.
pub fn run_backtest(
    bars: &[Bar],
    params: &StrategyParams,
    starting_balance: f64,
) -> Result<BacktestReport> {
    let features = compute_features(bars, params)?;
    let signals = generate_signals(bars, &features, params);
    let backtester = Backtester::new(params.backtest_config(starting_balance))?;
    Ok(backtester.run(bars, &signals))
}
