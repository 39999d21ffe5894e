//! Half-life decay model.
//!
//! ```text
//! remaining = origAmount × 0.5 ^ (elapsedHours / halfLifeHours)
//! ```
//!
//! Every pass recomputes from a dose's original amount and creation time, so
//! running the same pass twice for the same `now` gives the same result and
//! rounding error never compounds across ticks.

use crate::Dose;
use chrono::{DateTime, Utc};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Parameters of the decay pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecayParams {
    /// Must be positive; validated by [`crate::Config::validate`]
    pub half_life_hours: f64,
    /// Doses with a remaining amount strictly below this are dropped
    pub cutoff_mg: f64,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            half_life_hours: 5.0,
            cutoff_mg: 1.0,
        }
    }
}

/// Result of decaying a history to a point in time
#[derive(Clone, Debug, PartialEq)]
pub struct DecayOutcome {
    pub history: Vec<Dose>,
    pub expired: usize,
}

/// Amount left of `orig_amount` after `elapsed_hours`.
///
/// Negative elapsed time (a dose stamped in the future) counts as zero.
pub fn remaining(orig_amount: f64, elapsed_hours: f64, half_life_hours: f64) -> f64 {
    orig_amount * 0.5f64.powf(elapsed_hours.max(0.0) / half_life_hours)
}

/// Hours from `since` to `now`, clamped at zero
pub fn elapsed_hours(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_milliseconds().max(0) as f64 / MS_PER_HOUR
}

/// Recompute every dose for `now` and drop the ones under the cutoff.
///
/// Insertion order is preserved.
pub fn decay_history(history: &[Dose], now: DateTime<Utc>, params: &DecayParams) -> DecayOutcome {
    let mut expired = 0;
    let history = history
        .iter()
        .filter_map(|dose| {
            let current = remaining(
                dose.orig_amount,
                elapsed_hours(dose.time, now),
                params.half_life_hours,
            );
            if current < params.cutoff_mg {
                expired += 1;
                None
            } else {
                Some(Dose {
                    current_amount: current,
                    ..dose.clone()
                })
            }
        })
        .collect();

    DecayOutcome { history, expired }
}

/// Sum of the remaining amounts
pub fn total_mg(history: &[Dose]) -> f64 {
    history.iter().map(|d| d.current_amount).sum()
}
