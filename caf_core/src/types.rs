//! Core domain types for the caffeine tracker.
//!
//! This module defines the fundamental types used throughout the system:
//! - Doses and the value set held by the store
//! - Store keys (closed schema)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Dose Types
// ============================================================================

/// A single logged quantity of caffeine.
///
/// `orig_amount` never changes after creation. `current_amount` is
/// recomputed from `orig_amount` and `time` on every tick.
///
/// Serialized with the field names used by the browser version
/// (`time` in epoch milliseconds, `origAmount`, `currentAmount`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dose {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    pub orig_amount: f64,
    pub current_amount: f64,
}

impl Dose {
    /// A fresh dose taken at `time`; nothing has decayed yet.
    pub fn new(time: DateTime<Utc>, amount_mg: f64) -> Self {
        Self {
            time,
            orig_amount: amount_mg,
            current_amount: amount_mg,
        }
    }
}

// ============================================================================
// Store Value Set
// ============================================================================

/// Every value the store holds.
///
/// The set of fields is fixed; see [`Key`] for the matching key schema.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValueSet {
    #[serde(default)]
    pub history: Vec<Dose>,
    #[serde(default)]
    pub total_mg: f64,
}

/// Names of the fields in a [`ValueSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    History,
    TotalMg,
}

impl Key {
    pub const ALL: [Key; 2] = [Key::History, Key::TotalMg];

    /// The external name, as used in persisted blobs and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Key::History => "history",
            Key::TotalMg => "totalMg",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Key {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Key::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| crate::Error::UnknownKey(s.to_string()))
    }
}
