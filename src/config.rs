//! Strategy parameter set: the single configuration surface for the whole
//! pipeline, validated once at construction.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::backtest::BacktestConfig;
use crate::options::RiskModel;
use crate::regime::Regime;
use crate::signals::{SweepSignalConfig, WaveSignalConfig};

/// Which generator produces signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalMode {
    /// Sweep + displacement/wave + MSS confluence in the NY open window.
    SweepConfluence,
    /// Renko wave retracement entries with MTF confluence.
    WaveRenko,
}

/// Tunable strategy parameters.
///
/// Defaults are the production values; the optimizer varies a subset per
/// regime. All validation happens in `validate` — a bad value is fatal
/// before any pipeline work, never mid-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// ATR multiple for Renko brick sizing.
    pub renko_k: f64,
    /// ATR window for brick sizing and displacement.
    pub atr_period: usize,
    /// Lookback for regime strength/slope windows.
    pub regime_lookback: usize,
    /// Renko-strength threshold separating trend from sideways.
    pub trend_threshold: f64,
    /// ATR multiple a displacement body must exceed.
    pub displacement_threshold: f64,
    /// Bars after a sweep in which confirmation must appear.
    pub confluence_window: usize,
    /// Target distance in ATRs.
    pub atr_multiple: f64,
    /// Maximum minutes a position is held.
    pub max_hold_minutes: usize,
    /// Minimum consecutive bricks for a wave.
    pub min_bricks: usize,
    /// Maximum entry distance from the wave extreme, in bricks.
    pub max_entry_distance: f64,
    /// Blended-confidence floor for accepting a signal.
    pub min_confidence: f64,
    /// Fraction of balance risked per trade.
    pub risk_pct: f64,
    pub signal_mode: SignalMode,
    pub enable_ob_filter: bool,
    pub enable_regime_filter: bool,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            renko_k: 1.0,
            atr_period: 14,
            regime_lookback: 20,
            trend_threshold: 0.3,
            displacement_threshold: 1.0,
            confluence_window: 6,
            atr_multiple: 5.0,
            max_hold_minutes: 60,
            min_bricks: 3,
            max_entry_distance: 1.5,
            min_confidence: 0.40,
            risk_pct: 0.05,
            signal_mode: SignalMode::SweepConfluence,
            enable_ob_filter: false,
            enable_regime_filter: true,
        }
    }
}

impl StrategyParams {
    pub fn validate(&self) -> Result<()> {
        if self.renko_k <= 0.0 {
            bail!("renko_k must be positive, got {}", self.renko_k);
        }
        if self.atr_period == 0 {
            bail!("atr_period must be at least 1");
        }
        if self.regime_lookback < 2 {
            bail!("regime_lookback must be at least 2, got {}", self.regime_lookback);
        }
        if self.displacement_threshold <= 0.0 {
            bail!(
                "displacement_threshold must be positive, got {}",
                self.displacement_threshold
            );
        }
        if self.confluence_window == 0 {
            bail!("confluence_window must be at least 1 bar");
        }
        if self.atr_multiple <= 0.0 {
            bail!("atr_multiple must be positive, got {}", self.atr_multiple);
        }
        if self.max_hold_minutes == 0 {
            bail!("max_hold_minutes must be at least 1");
        }
        if self.min_bricks == 0 {
            bail!("min_bricks must be at least 1");
        }
        if self.max_entry_distance <= 0.0 {
            bail!("max_entry_distance must be positive, got {}", self.max_entry_distance);
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("min_confidence must be in [0, 1], got {}", self.min_confidence);
        }
        if self.risk_pct <= 0.0 || self.risk_pct > 1.0 {
            bail!("risk_pct must be in (0, 1], got {}", self.risk_pct);
        }
        Ok(())
    }

    pub fn sweep_signal_config(&self) -> SweepSignalConfig {
        SweepSignalConfig {
            confluence_window: self.confluence_window,
            enable_ob_filter: self.enable_ob_filter,
            enable_regime_filter: self.enable_regime_filter,
            min_confidence: self.min_confidence,
            ..Default::default()
        }
    }

    pub fn wave_signal_config(&self) -> WaveSignalConfig {
        WaveSignalConfig {
            min_bricks: self.min_bricks,
            max_entry_distance: self.max_entry_distance,
            min_confidence: self.min_confidence,
            ..Default::default()
        }
    }

    pub fn backtest_config(&self, starting_balance: f64) -> BacktestConfig {
        BacktestConfig {
            starting_balance,
            risk: RiskModel::PctOfBalance(self.risk_pct),
            atr_multiple: self.atr_multiple,
            max_hold_minutes: self.max_hold_minutes,
            ..Default::default()
        }
    }
}

/// Best parameters per regime, the optimizer's persisted product.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeParamSet {
    pub bull_trend: Option<StrategyParams>,
    pub bear_trend: Option<StrategyParams>,
    pub sideways: Option<StrategyParams>,
}

impl RegimeParamSet {
    pub fn get(&self, regime: Regime) -> Option<&StrategyParams> {
        match regime {
            Regime::BullTrend => self.bull_trend.as_ref(),
            Regime::BearTrend => self.bear_trend.as_ref(),
            Regime::Sideways => self.sideways.as_ref(),
        }
    }

    pub fn set(&mut self, regime: Regime, params: StrategyParams) {
        match regime {
            Regime::BullTrend => self.bull_trend = Some(params),
            Regime::BearTrend => self.bear_trend = Some(params),
            Regime::Sideways => self.sideways = Some(params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StrategyParams::default().validate().is_ok());
    }

    #[test]
    fn bad_parameters_are_fatal() {
        let mut p = StrategyParams::default();
        p.renko_k = -0.5;
        assert!(p.validate().is_err());

        let mut p = StrategyParams::default();
        p.risk_pct = 1.5;
        assert!(p.validate().is_err());

        let mut p = StrategyParams::default();
        p.min_confidence = 1.2;
        assert!(p.validate().is_err());
    }

    #[test]
    fn params_round_trip_through_json() {
        let params = StrategyParams {
            renko_k: 1.2,
            enable_ob_filter: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: StrategyParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
