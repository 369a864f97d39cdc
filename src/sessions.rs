//! Session labeling and session liquidity levels.
//!
//! Sessions follow the ICT convention in America/New_York local time:
//! Asia 18:00-03:00 (spans midnight), London 03:00-09:30, NY 09:30-16:00.
//! The Asia range is grouped under the trading day it feeds into by shifting
//! the day boundary +6h, so London/NY bars reference the completed Asia
//! session from the same trading day.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

use crate::bars::Bar;

/// Trading session label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionLabel {
    Asia,
    London,
    NewYork,
    Other,
}

impl std::fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionLabel::Asia => write!(f, "asia"),
            SessionLabel::London => write!(f, "london"),
            SessionLabel::NewYork => write!(f, "ny"),
            SessionLabel::Other => write!(f, "other"),
        }
    }
}

/// Classify a timestamp into a session by New York local time-of-day.
pub fn label_session(timestamp: DateTime<Utc>) -> SessionLabel {
    let local = timestamp.with_timezone(&New_York);
    let t = local.hour() as f64 + local.minute() as f64 / 60.0;

    if (9.5..16.0).contains(&t) {
        SessionLabel::NewYork
    } else if (3.0..9.5).contains(&t) {
        SessionLabel::London
    } else if !(3.0..18.0).contains(&t) {
        SessionLabel::Asia
    } else {
        SessionLabel::Other
    }
}

/// Trading-day key: the calendar date after shifting ET time forward 6h.
///
/// The 18:00 Asia open lands at 00:00 of the next date, so the whole Asia
/// session (and the London/NY sessions that follow it) share one key.
pub fn trading_day(timestamp: DateTime<Utc>) -> NaiveDate {
    (timestamp.with_timezone(&New_York) + Duration::hours(6)).date_naive()
}

/// Session liquidity levels visible to a single bar.
///
/// `None` means the session has produced no bars yet this trading day —
/// a valid state that downstream detectors must treat as "no reference".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLevels {
    pub asia_high: Option<f64>,
    pub asia_low: Option<f64>,
    pub london_high: Option<f64>,
    pub london_low: Option<f64>,
}

fn extend(level: &mut Option<f64>, value: f64, take_max: bool) {
    *level = Some(match *level {
        Some(current) if take_max => current.max(value),
        Some(current) => current.min(value),
        None => value,
    });
}

/// Compute session high/low levels for every bar as a single forward fold.
///
/// Each bar sees the running extreme of its trading day's Asia and London
/// sessions as of that bar — never a level derived from later bars. Levels
/// reset at the trading-day boundary.
pub fn session_levels(bars: &[Bar]) -> Vec<SessionLevels> {
    let mut out = Vec::with_capacity(bars.len());
    let mut current_day: Option<NaiveDate> = None;
    let mut levels = SessionLevels::default();

    for bar in bars {
        let day = trading_day(bar.timestamp);
        if current_day != Some(day) {
            current_day = Some(day);
            levels = SessionLevels::default();
        }

        match label_session(bar.timestamp) {
            SessionLabel::Asia => {
                extend(&mut levels.asia_high, bar.high, true);
                extend(&mut levels.asia_low, bar.low, false);
            }
            SessionLabel::London => {
                extend(&mut levels.london_high, bar.high, true);
                extend(&mut levels.london_low, bar.low, false);
            }
            SessionLabel::NewYork | SessionLabel::Other => {}
        }

        out.push(levels);
    }

    out
}
