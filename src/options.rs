//! Synthetic 0DTE option pricing and position sizing.
//!
//! Premium model calibrated to observed QQQ 0DTE patterns:
//! `premium = base(moneyness) * time_decay(minutes from open) * price_scale`.
//! ATM opens near $2-3, decays toward $0.50-1 into the close; 1% OTM trades
//! at roughly half of ATM, 2% OTM at a fifth.

use serde::{Deserialize, Serialize};

use crate::signals::Direction;

/// Strike increment for ATM selection.
const STRIKE_INCREMENT: f64 = 5.0;
/// Minutes in the regular session (09:30-16:00).
const SESSION_MINUTES: f64 = 390.0;
/// Premium floor: 0DTE contracts rarely print under $0.05.
const MIN_PREMIUM: f64 = 0.05;
/// Options contract multiplier.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// How the per-trade risk budget is derived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RiskModel {
    /// Fraction of the current account balance (compounding).
    PctOfBalance(f64),
    /// Fixed dollar risk per trade (non-compounding).
    FixedDollar(f64),
}

impl RiskModel {
    pub fn budget(&self, balance: f64) -> f64 {
        match *self {
            RiskModel::PctOfBalance(pct) => balance * pct,
            RiskModel::FixedDollar(dollars) => dollars,
        }
    }
}

/// Nearest listed strike to the spot price.
pub fn atm_strike(spot: f64) -> f64 {
    (spot / STRIKE_INCREMENT).round() * STRIKE_INCREMENT
}

/// Estimate a 0DTE option premium per share.
///
/// `minutes_from_open` is minutes since 09:30 ET; the time-decay factor
/// runs linearly from 1.0 at the open to 0.3 at the close and is floored
/// there for any bars past the session end.
pub fn estimate_premium(
    underlying: f64,
    strike: f64,
    direction: Direction,
    minutes_from_open: f64,
) -> f64 {
    // Signed moneyness from the option holder's perspective.
    let moneyness = match direction {
        Direction::Long => (underlying - strike) / underlying,
        Direction::Short => (strike - underlying) / underlying,
    };

    let base = if moneyness >= 0.01 {
        3.0 + moneyness * 100.0
    } else if moneyness >= 0.005 {
        2.5
    } else if moneyness >= -0.005 {
        2.0
    } else if moneyness >= -0.01 {
        1.2
    } else if moneyness >= -0.02 {
        0.6
    } else {
        0.2
    };

    let time_remaining_pct = ((SESSION_MINUTES - minutes_from_open) / SESSION_MINUTES).max(0.0);
    let time_decay = 0.3 + 0.7 * time_remaining_pct;

    let price_scale = underlying / 500.0;

    (base * time_decay * price_scale).max(MIN_PREMIUM)
}

/// Contracts affordable for the risk budget, clamped to realistic 0DTE
/// order sizes (1-10).
pub fn contracts_for_budget(risk_budget: f64, premium_per_share: f64) -> u32 {
    let per_contract = premium_per_share * CONTRACT_MULTIPLIER;
    if per_contract <= 0.0 {
        return 1;
    }
    ((risk_budget / per_contract).floor() as i64).clamp(1, 10) as u32
}
