//! Per-day feature cache.
//!
//! Structure detection over months of minute bars is the slow part of a
//! sweep; precompute it once per day and reload compressed snapshots. Files
//! are `{YYYYMMDD}.json.zst` under the cache directory.

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::bars::Bar;
use crate::sessions::{self, SessionLevels};
use crate::structures::BarStructures;

/// Precomputed data for a single trading day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayData {
    pub date: String,
    pub bars: Vec<Bar>,
    pub levels: Vec<SessionLevels>,
    pub structures: Vec<BarStructures>,
}

/// Split a bar series into trading days (the +6h-shifted session key).
pub fn split_by_trading_day(bars: &[Bar]) -> Vec<(String, Vec<Bar>)> {
    let mut days: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        let key = sessions::trading_day(bar.timestamp)
            .format("%Y%m%d")
            .to_string();
        days.entry(key).or_default().push(bar.clone());
    }
    days.into_iter().collect()
}

/// Save one day's features, compressed.
pub fn save_day_cache(data: &DayData, cache_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(cache_dir)?;
    let path = cache_dir.join(format!("{}.json.zst", data.date));

    let json = serde_json::to_vec(data)?;
    let compressed = zstd::encode_all(&json[..], 3)?;
    std::fs::write(&path, compressed)?;

    Ok(())
}

/// Load one day's features if cached.
pub fn load_day_cache(date: &str, cache_dir: &Path) -> Result<Option<DayData>> {
    let path = cache_dir.join(format!("{}.json.zst", date));

    if !path.exists() {
        return Ok(None);
    }

    let compressed = std::fs::read(&path)?;
    let json = zstd::decode_all(&compressed[..])?;
    let data: DayData = serde_json::from_slice(&json)?;

    Ok(Some(data))
}

/// Dates with cached data, sorted ascending.
pub fn get_cached_dates(cache_dir: &Path) -> Result<Vec<String>> {
    if !cache_dir.exists() {
        return Ok(vec![]);
    }

    let mut dates = Vec::new();
    for entry in std::fs::read_dir(cache_dir)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().to_string();
        if let Some(date) = filename.strip_suffix(".json.zst") {
            dates.push(date.to_string());
        }
    }

    dates.sort();
    Ok(dates)
}

/// Load cached days, optionally filtered.
///
/// `date_filter` accepts a single date ("20250915"), a month prefix
/// ("202509"), or an inclusive range ("20250901:20251120").
pub fn load_all_cached(cache_dir: &Path, date_filter: Option<&str>) -> Result<Vec<DayData>> {
    let cached_dates = get_cached_dates(cache_dir)?;

    let dates_to_load: Vec<_> = if let Some(filter) = date_filter {
        if let Some((start, end)) = filter.split_once(':') {
            cached_dates
                .into_iter()
                .filter(|d| d.as_str() >= start && d.as_str() <= end)
                .collect()
        } else {
            cached_dates
                .into_iter()
                .filter(|d| d.starts_with(filter))
                .collect()
        }
    } else {
        cached_dates
    };

    info!("Loading {} cached days...", dates_to_load.len());

    let results: Vec<_> = dates_to_load
        .par_iter()
        .filter_map(|date| match load_day_cache(date, cache_dir) {
            Ok(Some(data)) => Some(data),
            Ok(None) => None,
            Err(e) => {
                info!("Failed to load cache for {}: {}", date, e);
                None
            }
        })
        .collect();

    info!("Loaded {} days from cache", results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use chrono_tz::America::New_York;

    fn sample_day() -> DayData {
        let local = New_York.with_ymd_and_hms(2025, 3, 11, 10, 0, 0).unwrap();
        let bars = vec![Bar {
            timestamp: local.with_timezone(&Utc),
            open: 500.0,
            high: 500.5,
            low: 499.5,
            close: 500.2,
            volume: 1_000,
            symbol: "QQQ".to_string(),
        }];
        let levels = sessions::session_levels(&bars);
        DayData {
            date: "20250311".to_string(),
            structures: vec![BarStructures::default(); bars.len()],
            bars,
            levels,
        }
    }

    #[test]
    fn cache_round_trip() {
        let dir = std::env::temp_dir().join("zerodte-cache-test");
        let _ = std::fs::remove_dir_all(&dir);

        let day = sample_day();
        save_day_cache(&day, &dir).unwrap();

        let loaded = load_day_cache("20250311", &dir).unwrap().unwrap();
        assert_eq!(loaded.date, day.date);
        assert_eq!(loaded.bars.len(), 1);
        assert_eq!(loaded.bars[0].close, 500.2);

        assert!(load_day_cache("20250312", &dir).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn date_filters() {
        let dir = std::env::temp_dir().join("zerodte-cache-filter-test");
        let _ = std::fs::remove_dir_all(&dir);

        for date in ["20250310", "20250311", "20250401"] {
            let mut day = sample_day();
            day.date = date.to_string();
            save_day_cache(&day, &dir).unwrap();
        }

        assert_eq!(load_all_cached(&dir, Some("202503")).unwrap().len(), 2);
        assert_eq!(
            load_all_cached(&dir, Some("20250311:20250401")).unwrap().len(),
            2
        );
        assert_eq!(load_all_cached(&dir, None).unwrap().len(), 3);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
