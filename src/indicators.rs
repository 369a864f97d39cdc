//! Rolling indicators shared across the pipeline: ATR and price slope.

use crate::bars::Bar;

/// Average True Range over a rolling window.
///
/// Returns `None` until the window is full — downstream detectors treat a
/// missing ATR as "do not fire", never as an error.
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if bars.is_empty() || period == 0 {
        return out;
    }

    let mut true_ranges = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let tr = if i == 0 {
            bar.high - bar.low
        } else {
            let prev_close = bars[i - 1].close;
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };
        true_ranges.push(tr);
    }

    let mut window_sum = 0.0;
    for i in 0..true_ranges.len() {
        window_sum += true_ranges[i];
        if i >= period {
            window_sum -= true_ranges[i - period];
        }
        if i + 1 >= period {
            out[i] = Some(window_sum / period as f64);
        }
    }

    out
}

/// Median of the defined ATR values, used for stable Renko brick sizing.
pub fn median_atr(atr_values: &[Option<f64>]) -> Option<f64> {
    let mut defined: Vec<f64> = atr_values.iter().filter_map(|v| *v).collect();
    if defined.is_empty() {
        return None;
    }

    defined.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = defined.len() / 2;
    if defined.len() % 2 == 0 {
        Some((defined[mid - 1] + defined[mid]) / 2.0)
    } else {
        Some(defined[mid])
    }
}

/// Rolling OLS slope of close prices, normalized by the current price so
/// values are comparable across price levels. Zero until the window fills.
pub fn rolling_slope(bars: &[Bar], lookback: usize) -> Vec<f64> {
    let mut out = vec![0.0; bars.len()];
    if lookback < 2 {
        return out;
    }

    for i in (lookback - 1)..bars.len() {
        let window = &bars[i + 1 - lookback..=i];
        let n = window.len() as f64;

        // Closed-form simple linear regression on x = 0..n-1.
        let sum_x = (n - 1.0) * n / 2.0;
        let sum_x2 = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
        let sum_y: f64 = window.iter().map(|b| b.close).sum();
        let sum_xy: f64 = window
            .iter()
            .enumerate()
            .map(|(x, b)| x as f64 * b.close)
            .sum();

        let denom = n * sum_x2 - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            continue;
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let current = bars[i].close;
        if current > 0.0 {
            out[i] = slope / current;
        }
    }

    out
}

/// Rolling mean of a direction series (+1/-1/0) with min-periods 1.
pub fn rolling_mean_i8(values: &[i8], lookback: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    if lookback == 0 {
        return out;
    }

    let mut window_sum = 0i64;
    for i in 0..values.len() {
        window_sum += values[i] as i64;
        if i >= lookback {
            window_sum -= values[i - lookback] as i64;
        }
        let len = (i + 1).min(lookback) as f64;
        out[i] = window_sum as f64 / len;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 14, 30, 0).unwrap()
                    + Duration::minutes(i as i64),
                open: c - 0.2,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 100,
                symbol: "QQQ".to_string(),
            })
            .collect()
    }

    #[test]
    fn atr_is_none_until_window_fills() {
        let bars = bars_from_closes(&[100.0, 100.5, 101.0, 101.5, 102.0]);
        let values = atr(&bars, 3);

        assert!(values[0].is_none());
        assert!(values[1].is_none());
        assert!(values[2].is_some());
        assert!(values[4].unwrap() > 0.0);
    }

    #[test]
    fn slope_sign_tracks_trend() {
        let up = bars_from_closes(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        let down = bars_from_closes(&[105.0, 104.0, 103.0, 102.0, 101.0, 100.0]);

        assert!(rolling_slope(&up, 5)[5] > 0.0);
        assert!(rolling_slope(&down, 5)[5] < 0.0);
        // Window not yet full.
        assert_eq!(rolling_slope(&up, 5)[2], 0.0);
    }

    #[test]
    fn rolling_mean_respects_min_periods() {
        let dirs = vec![1i8, 1, -1, 1];
        let means = rolling_mean_i8(&dirs, 3);

        assert_eq!(means[0], 1.0);
        assert_eq!(means[1], 1.0);
        assert!((means[2] - (1.0 / 3.0)).abs() < 1e-9);
        assert!((means[3] - (1.0 / 3.0)).abs() < 1e-9);
    }
}
