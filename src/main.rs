use anyhow::Result;
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use zerodte::backtest::{print_results, write_trades_csv};
use zerodte::cache::{self, DayData};
use zerodte::config::{RegimeParamSet, SignalMode, StrategyParams};
use zerodte::optimizer::{self, GridMode};
use zerodte::store::SnapshotStore;
use zerodte::{bars, indicators, pipeline, sessions, structures, Bar};

#[derive(Parser, Debug)]
#[command(name = "zerodte")]
#[command(about = "ICT structure detection & 0DTE options backtest pipeline")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backtest the strategy over historical 1-minute bars
    Backtest {
        /// Path to a 1-minute OHLCV CSV (timestamp,open,high,low,close,volume)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Cache directory with precomputed days (alternative to --data)
        #[arg(short, long)]
        cache_dir: Option<PathBuf>,

        /// Date filter for cached data (YYYYMMDD, YYYYMM, or start:end)
        #[arg(short = 'D', long)]
        date: Option<String>,

        /// Symbol name for loaded bars
        #[arg(short, long, default_value = "QQQ")]
        symbol: String,

        /// Output directory for results
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Load strategy parameters from a JSON file instead of flags
        #[arg(long)]
        params_file: Option<PathBuf>,

        /// Use the wave/Renko signal generator instead of sweep confluence
        #[arg(long)]
        wave_mode: bool,

        /// Displacement body threshold as an ATR multiple
        #[arg(long, default_value = "1.0")]
        displacement_threshold: f64,

        /// Confluence window in bars after a sweep
        #[arg(long, default_value = "6")]
        confluence_window: usize,

        /// Target distance in ATRs
        #[arg(long, default_value = "5.0")]
        atr_multiple: f64,

        /// Maximum hold time in minutes
        #[arg(long, default_value = "60")]
        max_hold: usize,

        /// Minimum blended confidence to accept a signal
        #[arg(long, default_value = "0.40")]
        min_confidence: f64,

        /// Fraction of balance risked per trade
        #[arg(long, default_value = "0.05")]
        risk_pct: f64,

        /// ATR multiple for Renko brick sizing
        #[arg(long, default_value = "1.0")]
        renko_k: f64,

        /// Require an aligned order block in the confluence window
        #[arg(long)]
        ob_filter: bool,

        /// Disable the regime filter
        #[arg(long)]
        no_regime_filter: bool,

        /// Starting account balance
        #[arg(long, default_value = "25000.0")]
        starting_balance: f64,
    },

    /// Walk-forward optimize parameters per regime
    Optimize {
        /// Path to a 1-minute OHLCV CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Symbol name for loaded bars
        #[arg(short, long, default_value = "QQQ")]
        symbol: String,

        /// Grid density: fast, medium, or full
        #[arg(short, long, default_value = "fast")]
        grid: String,

        /// Number of walk-forward splits
        #[arg(long, default_value = "4")]
        splits: usize,

        /// Where to persist the best parameters per regime
        #[arg(short, long, default_value = "configs/strategy_params.json")]
        params_out: PathBuf,

        /// Output directory for the out-of-sample records
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Starting account balance for fitness evaluation
        #[arg(long, default_value = "25000.0")]
        starting_balance: f64,
    },

    /// Precompute per-day session levels and structures into a cache
    Precompute {
        /// Path to a 1-minute OHLCV CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Symbol name for loaded bars
        #[arg(short, long, default_value = "QQQ")]
        symbol: String,

        /// Cache directory for precomputed days
        #[arg(short, long, default_value = "cache")]
        cache_dir: PathBuf,

        /// Displacement body threshold as an ATR multiple
        #[arg(long, default_value = "1.0")]
        displacement_threshold: f64,

        /// ATR window
        #[arg(long, default_value = "14")]
        atr_period: usize,
    },

    /// Print generated signals without simulating execution
    Signals {
        /// Path to a 1-minute OHLCV CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Symbol name for loaded bars
        #[arg(short, long, default_value = "QQQ")]
        symbol: String,

        /// Use the wave/Renko signal generator instead of sweep confluence
        #[arg(long)]
        wave_mode: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Backtest {
            data,
            cache_dir,
            date,
            symbol,
            output_dir,
            params_file,
            wave_mode,
            displacement_threshold,
            confluence_window,
            atr_multiple,
            max_hold,
            min_confidence,
            risk_pct,
            renko_k,
            ob_filter,
            no_regime_filter,
            starting_balance,
        } => {
            let params = match params_file {
                Some(path) => load_params(&path)?,
                None => StrategyParams {
                    renko_k,
                    displacement_threshold,
                    confluence_window,
                    atr_multiple,
                    max_hold_minutes: max_hold,
                    min_confidence,
                    risk_pct,
                    signal_mode: if wave_mode {
                        SignalMode::WaveRenko
                    } else {
                        SignalMode::SweepConfluence
                    },
                    enable_ob_filter: ob_filter,
                    enable_regime_filter: !no_regime_filter,
                    ..Default::default()
                },
            };

            run_backtest(
                data,
                cache_dir,
                date,
                symbol,
                output_dir,
                params,
                starting_balance,
            )
        }
        Commands::Optimize {
            data,
            symbol,
            grid,
            splits,
            params_out,
            output_dir,
            starting_balance,
        } => run_optimize(data, symbol, &grid, splits, params_out, output_dir, starting_balance),
        Commands::Precompute {
            data,
            symbol,
            cache_dir,
            displacement_threshold,
            atr_period,
        } => run_precompute(data, symbol, cache_dir, displacement_threshold, atr_period),
        Commands::Signals { data, symbol, wave_mode } => run_signals(data, symbol, wave_mode),
    }
}

/// Accept either a plain `StrategyParams` JSON or a per-regime snapshot
/// written by `optimize` (falling back to whichever regime is present).
fn load_params(path: &std::path::Path) -> Result<StrategyParams> {
    let json = std::fs::read_to_string(path)?;
    if let Ok(params) = serde_json::from_str::<StrategyParams>(&json) {
        return Ok(params);
    }

    let store = SnapshotStore::open(path);
    let set: RegimeParamSet = store
        .load_or_recover()
        .ok_or_else(|| anyhow::anyhow!("unreadable params file {:?}", path))?;

    set.sideways
        .or(set.bull_trend)
        .or(set.bear_trend)
        .ok_or_else(|| anyhow::anyhow!("no parameters in snapshot {:?}", path))
}

fn load_bars(
    data: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    date: Option<String>,
    symbol: &str,
) -> Result<Vec<Bar>> {
    if let Some(path) = data {
        info!("Loading bars from {:?}...", path);
        let bars = bars::load_bars_csv(&path, symbol)?;
        info!("Loaded {} bars", bars.len());
        return Ok(bars);
    }

    let Some(cache_dir) = cache_dir else {
        anyhow::bail!("either --data or --cache-dir is required");
    };

    let days = cache::load_all_cached(&cache_dir, date.as_deref())?;
    if days.is_empty() {
        anyhow::bail!("No cached data found. Run 'precompute' first.");
    }

    let mut bars = Vec::new();
    for day in days {
        bars.extend(day.bars);
    }
    info!("Loaded {} bars from cache", bars.len());
    Ok(bars)
}

#[allow(clippy::too_many_arguments)]
fn run_backtest(
    data: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    date: Option<String>,
    symbol: String,
    output_dir: PathBuf,
    params: StrategyParams,
    starting_balance: f64,
) -> Result<()> {
    info!("=== BACKTEST ===");
    std::fs::create_dir_all(&output_dir)?;

    let bars = load_bars(data, cache_dir, date, &symbol)?;
    let report = pipeline::run_backtest(&bars, &params, starting_balance)?;

    print_results(&report);

    let results_path = output_dir.join("backtest_results.json");
    std::fs::write(&results_path, serde_json::to_string_pretty(&report)?)?;
    info!("Wrote results to {:?}", results_path);

    let trades_path = output_dir.join("trades.csv");
    write_trades_csv(&report, &trades_path)?;
    info!("Wrote trade list to {:?}", trades_path);

    Ok(())
}

fn run_optimize(
    data: PathBuf,
    symbol: String,
    grid: &str,
    splits: usize,
    params_out: PathBuf,
    output_dir: PathBuf,
    starting_balance: f64,
) -> Result<()> {
    info!("=== WALK-FORWARD OPTIMIZATION ===");
    std::fs::create_dir_all(&output_dir)?;

    let mode = match grid {
        "fast" => GridMode::Fast,
        "medium" => GridMode::Medium,
        "full" => GridMode::Full,
        other => anyhow::bail!("unknown grid mode '{}' (use fast, medium, or full)", other),
    };

    let bars = bars::load_bars_csv(&data, &symbol)?;
    info!("Loaded {} bars", bars.len());

    let grid = optimizer::param_grid(mode, &StrategyParams::default());
    info!("Testing {} parameter combinations over {} splits", grid.len(), splits);

    let start = std::time::Instant::now();
    let outcome = optimizer::walkforward_optimize(&bars, &grid, splits, starting_balance)?;
    info!(
        "Optimization complete in {:.1}s: {} out-of-sample records",
        start.elapsed().as_secs_f64(),
        outcome.test_records.len()
    );

    let store = SnapshotStore::open(&params_out);
    store.persist(&outcome.best_params)?;
    info!("Persisted best params per regime to {:?}", params_out);

    let records_path = output_dir.join("walkforward_records.json");
    std::fs::write(&records_path, serde_json::to_string_pretty(&outcome.test_records)?)?;
    info!("Wrote out-of-sample records to {:?}", records_path);

    Ok(())
}

fn run_precompute(
    data: PathBuf,
    symbol: String,
    cache_dir: PathBuf,
    displacement_threshold: f64,
    atr_period: usize,
) -> Result<()> {
    info!("=== PRECOMPUTE ===");

    let all_bars = bars::load_bars_csv(&data, &symbol)?;
    info!("Loaded {} bars", all_bars.len());

    let days = cache::split_by_trading_day(&all_bars);
    info!("Processing {} trading days...", days.len());

    let processed: Vec<Result<DayData>> = days
        .par_iter()
        .map(|(date, day_bars)| {
            let levels = sessions::session_levels(day_bars);
            let atr = indicators::atr(day_bars, atr_period);
            let structs =
                structures::detect_all(day_bars, &levels, &atr, displacement_threshold);
            let day = DayData {
                date: date.clone(),
                bars: day_bars.clone(),
                levels,
                structures: structs,
            };
            cache::save_day_cache(&day, &cache_dir)?;
            info!("Cached {}: {} bars", day.date, day.bars.len());
            Ok(day)
        })
        .collect();

    let ok = processed.iter().filter(|r| r.is_ok()).count();
    info!("Precompute complete: {}/{} days cached", ok, days.len());

    Ok(())
}

fn run_signals(data: PathBuf, symbol: String, wave_mode: bool) -> Result<()> {
    let bars = bars::load_bars_csv(&data, &symbol)?;
    info!("Loaded {} bars", bars.len());

    let params = StrategyParams {
        signal_mode: if wave_mode {
            SignalMode::WaveRenko
        } else {
            SignalMode::SweepConfluence
        },
        ..Default::default()
    };

    let features = pipeline::compute_features(&bars, &params)?;
    let signals = pipeline::generate_signals(&bars, &features, &params);

    for (regime, count) in zerodte::regime::regime_counts(&features.regimes) {
        info!("  regime {}: {} bars", regime, count);
    }

    info!("Generated {} signals", signals.len());
    for signal in &signals {
        info!(
            "  {} {} spot={:.2} conf={:.2} source={}",
            signal.timestamp,
            signal.direction,
            signal.spot,
            signal.confidence,
            signal
                .meta
                .sweep_source
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    Ok(())
}
