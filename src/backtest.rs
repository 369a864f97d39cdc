//! Options execution simulator: prices one 0DTE position per signal and
//! accounts the equity curve.
//!
//! Per trade: Pending -> Open (next bar's open after the signal) -> Closed
//! (target touch or time limit). There is no stop path — the premium paid is
//! the maximum loss by construction. Stage-local anomalies (no future bars,
//! tiny target) drop the signal with a counted reason; a backtest over
//! arbitrary history always completes.

use anyhow::{bail, Result};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::bars::Bar;
use crate::options::{
    atm_strike, contracts_for_budget, estimate_premium, RiskModel, CONTRACT_MULTIPLIER,
};
use crate::signals::{Direction, Signal, TargetSpec};

/// Why a closed trade exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Target,
    Time,
}

/// Simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub starting_balance: f64,
    pub risk: RiskModel,
    /// Target distance in ATRs for ATR-specced signals.
    pub atr_multiple: f64,
    /// Maximum bars (minutes) a position is held.
    pub max_hold_minutes: usize,
    /// Targets closer than this are noise; skip the signal.
    pub min_target_distance: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            starting_balance: 25_000.0,
            risk: RiskModel::PctOfBalance(0.05),
            atr_multiple: 5.0,
            max_hold_minutes: 60,
            min_target_distance: 0.15,
        }
    }
}

impl BacktestConfig {
    /// Reject nonsensical parameters before any pipeline work starts.
    /// Configuration errors are the only class allowed to halt a run.
    pub fn validate(&self) -> Result<()> {
        if self.starting_balance <= 0.0 {
            bail!("starting balance must be positive, got {}", self.starting_balance);
        }
        if self.atr_multiple <= 0.0 {
            bail!("atr multiple must be positive, got {}", self.atr_multiple);
        }
        if self.max_hold_minutes == 0 {
            bail!("max hold must be at least one minute");
        }
        if self.min_target_distance < 0.0 {
            bail!("min target distance cannot be negative");
        }
        match self.risk {
            RiskModel::PctOfBalance(pct) if !(0.0..=1.0).contains(&pct) || pct == 0.0 => {
                bail!("risk pct must be in (0, 1], got {}", pct)
            }
            RiskModel::FixedDollar(d) if d <= 0.0 => {
                bail!("fixed risk must be positive, got {}", d)
            }
            _ => Ok(()),
        }
    }
}

/// A completed simulated trade. Finalized at exit, never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub strike: f64,
    pub contracts: u32,
    pub target: f64,
    pub premium_paid: f64,
    pub exit_value: f64,
    pub pnl: f64,
    pub r_multiple: f64,
    pub balance_after: f64,
}

/// One equity snapshot per closed trade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub balance: f64,
}

/// Dropped-signal accounting, the "zero trades plus a reason" surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SkipCounts {
    /// A position was still open when the signal fired (no pyramiding).
    pub position_open: u32,
    /// No bars remained after the signal timestamp.
    pub end_of_data: u32,
    /// Target distance below the minimum tick threshold.
    pub target_too_small: u32,
}

/// Aggregate backtest output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub trades: Vec<SimulatedTrade>,
    pub total_trades: u32,
    pub wins: u32,
    pub win_rate: f64,
    pub target_hit_rate: f64,
    pub avg_pnl: f64,
    pub avg_r_multiple: f64,
    pub total_pnl: f64,
    pub max_drawdown: f64,
    pub final_balance: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub skipped: SkipCounts,
}

/// Minutes since the 09:30 ET session open, floored at zero for any
/// pre-open bars.
fn minutes_from_open(ts: DateTime<Utc>) -> f64 {
    let local = ts.with_timezone(&New_York);
    let minutes = local.hour() as i64 * 60 + local.minute() as i64 - (9 * 60 + 30);
    minutes.max(0) as f64
}

/// The options execution simulator.
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run every signal through the simulator, oldest first, one open
    /// position at a time. The equity fold is strictly time-ordered and
    /// must stay sequential.
    pub fn run(&self, bars: &[Bar], signals: &[Signal]) -> BacktestReport {
        let mut ordered: Vec<&Signal> = signals.iter().collect();
        ordered.sort_by_key(|s| s.timestamp);

        let mut trades: Vec<SimulatedTrade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut skipped = SkipCounts::default();

        let mut balance = self.config.starting_balance;
        let mut peak = balance;
        let mut max_drawdown = 0.0f64;
        let mut last_exit_time: Option<DateTime<Utc>> = None;

        for signal in ordered {
            if let Some(busy_until) = last_exit_time {
                if signal.timestamp <= busy_until {
                    skipped.position_open += 1;
                    continue;
                }
            }

            // Entry is the first bar strictly after the signal.
            let entry_idx = bars.partition_point(|b| b.timestamp <= signal.timestamp);
            if entry_idx >= bars.len() {
                skipped.end_of_data += 1;
                continue;
            }
            let entry_bar = &bars[entry_idx];
            let entry_price = entry_bar.open;
            let entry_time = entry_bar.timestamp;

            let sign = signal.direction.sign();
            let target_distance = match signal.target {
                TargetSpec::AtrMultiple { atr } => self.config.atr_multiple * atr,
                TargetSpec::Price { tp1, .. } => (tp1 - entry_price) * sign,
            };
            if target_distance < self.config.min_target_distance {
                skipped.target_too_small += 1;
                continue;
            }
            let target = entry_price + sign * target_distance;

            let entry_minutes = minutes_from_open(entry_time);
            let strike = atm_strike(entry_price);
            let premium = estimate_premium(entry_price, strike, signal.direction, entry_minutes);
            let contracts =
                contracts_for_budget(self.config.risk.budget(balance), premium);
            let premium_paid = premium * CONTRACT_MULTIPLIER * contracts as f64;

            // Walk forward bar-by-bar up to the hold limit; the window is
            // truncated by the end of data, never an error.
            let window_end = (entry_idx + self.config.max_hold_minutes).min(bars.len() - 1);
            let mut exit: Option<(usize, f64)> = None;
            for (idx, bar) in bars[entry_idx..=window_end].iter().enumerate() {
                let hit = match signal.direction {
                    Direction::Long => bar.high >= target,
                    Direction::Short => bar.low <= target,
                };
                if hit {
                    exit = Some((entry_idx + idx, target));
                    break;
                }
            }

            let (exit_reason, exit_idx, exit_price) = match exit {
                Some((idx, price)) => (ExitReason::Target, idx, price),
                None => (ExitReason::Time, window_end, bars[window_end].close),
            };
            let exit_time = bars[exit_idx].timestamp;

            let exit_value = match exit_reason {
                ExitReason::Target => {
                    // Target touch: the contract is ITM by the full move.
                    target_distance * CONTRACT_MULTIPLIER * contracts as f64
                }
                ExitReason::Time => {
                    let exit_premium = estimate_premium(
                        exit_price,
                        strike,
                        signal.direction,
                        minutes_from_open(exit_time),
                    );
                    exit_premium * CONTRACT_MULTIPLIER * contracts as f64
                }
            };

            let pnl = exit_value - premium_paid;
            balance += pnl;
            peak = peak.max(balance);
            max_drawdown = max_drawdown.max(peak - balance);
            equity_curve.push(EquityPoint {
                time: exit_time,
                balance,
            });
            last_exit_time = Some(exit_time);

            trades.push(SimulatedTrade {
                id: Uuid::new_v4(),
                signal_id: signal.id,
                direction: signal.direction,
                entry_time,
                entry_price,
                exit_time,
                exit_price,
                exit_reason,
                strike,
                contracts,
                target,
                premium_paid,
                exit_value,
                pnl,
                r_multiple: if premium_paid != 0.0 { pnl / premium_paid } else { 0.0 },
                balance_after: balance,
            });
        }

        self.summarize(trades, equity_curve, skipped, balance, max_drawdown)
    }

    fn summarize(
        &self,
        trades: Vec<SimulatedTrade>,
        equity_curve: Vec<EquityPoint>,
        skipped: SkipCounts,
        final_balance: f64,
        max_drawdown: f64,
    ) -> BacktestReport {
        let total_trades = trades.len() as u32;
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count() as u32;
        let target_hits = trades
            .iter()
            .filter(|t| t.exit_reason == ExitReason::Target)
            .count() as u32;

        let (win_rate, target_hit_rate, avg_pnl, avg_r_multiple) = if total_trades > 0 {
            let n = total_trades as f64;
            (
                wins as f64 / n,
                target_hits as f64 / n,
                trades.iter().map(|t| t.pnl).sum::<f64>() / n,
                trades.iter().map(|t| t.r_multiple).sum::<f64>() / n,
            )
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };

        BacktestReport {
            total_trades,
            wins,
            win_rate,
            target_hit_rate,
            avg_pnl,
            avg_r_multiple,
            total_pnl: final_balance - self.config.starting_balance,
            max_drawdown,
            final_balance,
            equity_curve,
            skipped,
            trades,
        }
    }
}

/// Print a summary to the log.
pub fn print_results(report: &BacktestReport) {
    info!("=== BACKTEST RESULTS ===");
    info!("Total trades: {}", report.total_trades);
    info!("Win rate: {:.1}%", report.win_rate * 100.0);
    info!("Target hit rate: {:.1}%", report.target_hit_rate * 100.0);
    info!("Avg P&L: ${:.2}", report.avg_pnl);
    info!("Avg R: {:.2}", report.avg_r_multiple);
    info!("Total P&L: ${:.2}", report.total_pnl);
    info!("Max drawdown: ${:.2}", report.max_drawdown);
    info!("Final balance: ${:.2}", report.final_balance);
    info!(
        "Skipped: {} position-open, {} end-of-data, {} target-too-small",
        report.skipped.position_open, report.skipped.end_of_data, report.skipped.target_too_small
    );
}

/// Export the trade list as CSV next to the JSON report.
pub fn write_trades_csv(report: &BacktestReport, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "entry_time",
        "exit_time",
        "direction",
        "entry_price",
        "exit_price",
        "exit_reason",
        "strike",
        "contracts",
        "premium_paid",
        "exit_value",
        "pnl",
        "r_multiple",
        "balance_after",
    ])?;

    for t in &report.trades {
        writer.write_record([
            t.entry_time.to_rfc3339(),
            t.exit_time.to_rfc3339(),
            t.direction.to_string(),
            format!("{:.2}", t.entry_price),
            format!("{:.2}", t.exit_price),
            format!("{:?}", t.exit_reason).to_lowercase(),
            format!("{:.1}", t.strike),
            t.contracts.to_string(),
            format!("{:.2}", t.premium_paid),
            format!("{:.2}", t.exit_value),
            format!("{:.2}", t.pnl),
            format!("{:.3}", t.r_multiple),
            format!("{:.2}", t.balance_after),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalMeta;
    use chrono::TimeZone;

    fn bar_at_et(h: u32, mi: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        let local = New_York.with_ymd_and_hms(2025, 3, 11, h, mi, 0).unwrap();
        Bar {
            timestamp: local.with_timezone(&Utc),
            open,
            high,
            low,
            close,
            volume: 100,
            symbol: "QQQ".to_string(),
        }
    }

    fn long_signal(ts: DateTime<Utc>, spot: f64, atr: f64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            timestamp: ts,
            direction: Direction::Long,
            spot,
            target: TargetSpec::AtrMultiple { atr },
            stop: None,
            confidence: 0.6,
            meta: SignalMeta {
                sweep_source: None,
                ict: None,
                mtf: None,
                wave: None,
                regime: None,
            },
        }
    }

    #[test]
    fn target_hit_exits_at_target() {
        // Signal at 10:00; entry next bar open 500; 5x ATR(0.5) = 2.5 target.
        let bars = vec![
            bar_at_et(10, 0, 499.5, 500.0, 499.0, 499.8),
            bar_at_et(10, 1, 500.0, 500.5, 499.5, 500.2),
            bar_at_et(10, 2, 500.2, 503.0, 500.0, 502.8), // touches 502.5
            bar_at_et(10, 3, 502.8, 503.5, 502.0, 503.0),
        ];
        let signal = long_signal(bars[0].timestamp, 499.8, 0.5);
        let backtester = Backtester::new(BacktestConfig::default()).unwrap();

        let report = backtester.run(&bars, &[signal]);

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.entry_price, 500.0);
        assert_eq!(trade.exit_reason, ExitReason::Target);
        assert_eq!(trade.exit_price, 502.5);
        assert_eq!(trade.exit_time, bars[2].timestamp);
        // Intrinsic exit: distance * 100 * contracts.
        assert!((trade.exit_value - 2.5 * 100.0 * trade.contracts as f64).abs() < 1e-9);
    }

    #[test]
    fn late_signal_exits_on_time_at_last_bar() {
        // Three bars remain after the signal; a 60-minute hold must truncate
        // to the data and exit at the last close without error.
        let bars = vec![
            bar_at_et(15, 55, 500.0, 500.2, 499.8, 500.0),
            bar_at_et(15, 56, 500.0, 500.3, 499.9, 500.1),
            bar_at_et(15, 57, 500.1, 500.4, 500.0, 500.2),
            bar_at_et(15, 58, 500.2, 500.5, 500.1, 500.3),
        ];
        let signal = long_signal(bars[0].timestamp, 500.0, 0.5);
        let backtester = Backtester::new(BacktestConfig::default()).unwrap();

        let report = backtester.run(&bars, &[signal]);

        assert_eq!(report.total_trades, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::Time);
        assert_eq!(trade.exit_time, bars[3].timestamp);
        assert_eq!(trade.exit_price, 500.3);
    }

    #[test]
    fn signal_with_no_future_bars_is_dropped() {
        let bars = vec![bar_at_et(10, 0, 500.0, 500.5, 499.5, 500.2)];
        let signal = long_signal(bars[0].timestamp, 500.2, 0.5);
        let backtester = Backtester::new(BacktestConfig::default()).unwrap();

        let report = backtester.run(&bars, &[signal]);

        assert_eq!(report.total_trades, 0);
        assert_eq!(report.skipped.end_of_data, 1);
    }

    #[test]
    fn overlapping_signal_is_dropped_not_queued() {
        let mut bars = Vec::new();
        for i in 0..70 {
            bars.push(bar_at_et(10, 0, 500.0, 500.2, 499.8, 500.0));
            bars.last_mut().unwrap().timestamp += chrono::Duration::minutes(i);
        }
        let first = long_signal(bars[0].timestamp, 500.0, 0.5);
        // Second signal fires while the first position is still open.
        let second = long_signal(bars[5].timestamp, 500.0, 0.5);
        let backtester = Backtester::new(BacktestConfig::default()).unwrap();

        let report = backtester.run(&bars, &[first, second]);

        assert_eq!(report.total_trades, 1);
        assert_eq!(report.skipped.position_open, 1);
    }

    #[test]
    fn tiny_target_is_skipped() {
        let bars = vec![
            bar_at_et(10, 0, 500.0, 500.2, 499.8, 500.0),
            bar_at_et(10, 1, 500.0, 500.2, 499.8, 500.0),
        ];
        let signal = long_signal(bars[0].timestamp, 500.0, 0.01); // 5x0.01 < 0.15
        let backtester = Backtester::new(BacktestConfig::default()).unwrap();

        let report = backtester.run(&bars, &[signal]);

        assert_eq!(report.total_trades, 0);
        assert_eq!(report.skipped.target_too_small, 1);
    }

    #[test]
    fn equity_curve_is_consistent() {
        // Several sequential signals far enough apart to all fill.
        let mut bars = Vec::new();
        for i in 0..240 {
            let drift = i as f64 * 0.01;
            bars.push(bar_at_et(9, 30, 500.0 + drift, 500.4 + drift, 499.8 + drift, 500.2 + drift));
            bars.last_mut().unwrap().timestamp += chrono::Duration::minutes(i);
        }
        let signals: Vec<Signal> = [0usize, 70, 140]
            .iter()
            .map(|&i| long_signal(bars[i].timestamp, bars[i].close, 0.1))
            .collect();
        let config = BacktestConfig::default();
        let starting = config.starting_balance;
        let backtester = Backtester::new(config).unwrap();

        let report = backtester.run(&bars, &signals);

        assert_eq!(report.total_trades, 3);
        let mut expected = starting;
        let mut peak = starting;
        let mut dd = 0.0f64;
        for (trade, point) in report.trades.iter().zip(&report.equity_curve) {
            expected += trade.pnl;
            assert!((trade.balance_after - expected).abs() < 1e-9);
            assert!((point.balance - expected).abs() < 1e-9);
            peak = peak.max(expected);
            dd = dd.max(peak - expected);
        }
        assert!((report.max_drawdown - dd).abs() < 1e-9);
        assert!((report.final_balance - expected).abs() < 1e-9);
    }

    #[test]
    fn fixed_dollar_risk_ignores_balance() {
        let bars = vec![
            bar_at_et(10, 0, 500.0, 500.2, 499.8, 500.0),
            bar_at_et(10, 1, 500.0, 500.4, 499.8, 500.2),
            bar_at_et(10, 2, 500.2, 504.0, 500.0, 503.8),
            bar_at_et(10, 3, 503.8, 504.2, 503.5, 504.0),
        ];
        let signal = long_signal(bars[0].timestamp, 500.0, 0.5);

        let pct = Backtester::new(BacktestConfig {
            starting_balance: 100_000.0,
            risk: RiskModel::PctOfBalance(0.05),
            ..Default::default()
        })
        .unwrap()
        .run(&bars, std::slice::from_ref(&signal));

        let fixed = Backtester::new(BacktestConfig {
            starting_balance: 100_000.0,
            risk: RiskModel::FixedDollar(400.0),
            ..Default::default()
        })
        .unwrap()
        .run(&bars, std::slice::from_ref(&signal));

        // 5% of 100k buys the clamp maximum; $400 at ~$190/contract buys 2.
        assert_eq!(pct.trades[0].contracts, 10);
        assert_eq!(fixed.trades[0].contracts, 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = BacktestConfig {
            atr_multiple: -1.0,
            ..Default::default()
        };
        assert!(Backtester::new(bad).is_err());

        let bad_risk = BacktestConfig {
            risk: RiskModel::PctOfBalance(0.0),
            ..Default::default()
        };
        assert!(Backtester::new(bad_risk).is_err());
    }
}
