//! Caffeine tracker: the decay engine's entry points.
//!
//! Every operation publishes `history` and `totalMg` through the store in a
//! single transaction, so the total always equals the sum of the history's
//! remaining amounts when subscribers run.

use crate::blob::{state_dir, BlobStore, FileBlobStore};
use crate::decay::{self, DecayParams};
use crate::store::{History, Store, TotalMg};
use crate::{Config, Dose, Error, Result, ValueSet};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Blob key the value set is persisted under
pub const STATE_KEY: &str = "hfcf_state";

/// Summary of one tick
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub remaining: usize,
    pub expired: usize,
    pub total_mg: f64,
}

pub struct Tracker {
    store: Store,
    params: DecayParams,
    dose_size_mg: f64,
}

impl Tracker {
    pub fn new(store: Store, params: DecayParams, dose_size_mg: f64) -> Self {
        Self {
            store,
            params,
            dose_size_mg,
        }
    }

    /// Tracker with no persistence
    pub fn in_memory(config: &Config) -> Self {
        Self::new(
            Store::new(ValueSet::default()),
            config.decay_params(),
            config.dose.size_mg,
        )
    }

    /// Tracker rehydrated from `backend`.
    ///
    /// The total is recomputed from the loaded history rather than trusted.
    pub fn open(config: &Config, backend: impl BlobStore + 'static) -> Result<Self> {
        let store = Store::with_backend(ValueSet::default(), backend, STATE_KEY)?;
        let mut tracker = Self::new(store, config.decay_params(), config.dose.size_mg);

        let total = decay::total_mg(tracker.history());
        if total != tracker.total_mg() {
            tracing::debug!(
                "Persisted total {} disagrees with history, publishing {}",
                tracker.total_mg(),
                total
            );
            tracker.store.publish::<TotalMg>(total);
        }

        Ok(tracker)
    }

    /// Tracker persisted under `<data_dir>/state`
    pub fn open_in(config: &Config, data_dir: &Path) -> Result<Self> {
        Self::open(config, FileBlobStore::new(state_dir(data_dir)))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Mutable store access, for registering subscribers
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn history(&self) -> &[Dose] {
        self.store.get::<History>()
    }

    pub fn total_mg(&self) -> f64 {
        *self.store.get::<TotalMg>()
    }

    /// Decay every dose to `now`, drop spent doses, and publish.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let params = self.params;
        let report = self.store.transact(|tx| {
            let outcome = decay::decay_history(tx.get::<History>(), now, &params);
            let total = decay::total_mg(&outcome.history);
            let remaining = outcome.history.len();

            tx.set::<History>(outcome.history);
            tx.set::<TotalMg>(total);

            TickReport {
                remaining,
                expired: outcome.expired,
                total_mg: total,
            }
        });

        if report.expired > 0 {
            tracing::info!(
                "Dropped {} spent doses, {} remaining",
                report.expired,
                report.remaining
            );
        }
        report
    }

    /// Log a dose of the configured size taken at `now`
    pub fn add_dose(&mut self, now: DateTime<Utc>) -> Result<Dose> {
        self.add_dose_of(now, self.dose_size_mg)
    }

    /// Log a dose of `amount_mg` taken at `now`
    pub fn add_dose_of(&mut self, now: DateTime<Utc>, amount_mg: f64) -> Result<Dose> {
        if !amount_mg.is_finite() || amount_mg <= 0.0 {
            return Err(Error::InvalidDose(format!(
                "amount must be a positive number of mg, got {}",
                amount_mg
            )));
        }

        let dose = Dose::new(now, amount_mg);
        let mut history = self.history().to_vec();
        history.push(dose.clone());

        let total = decay::total_mg(&history);
        if !total.is_finite() {
            return Err(Error::InvalidDose(format!(
                "adding {}mg would overflow the total",
                amount_mg
            )));
        }

        self.store.transact(|tx| {
            tx.set::<History>(history);
            tx.set::<TotalMg>(total);
        });

        tracing::info!("Added {}mg dose, total {:.1}mg", amount_mg, self.total_mg());
        Ok(dose)
    }

    /// Clear the history and zero the total, unconditionally
    pub fn reset(&mut self) {
        self.store.transact(|tx| {
            tx.set::<History>(Vec::new());
            tx.set::<TotalMg>(0.0);
        });
        tracing::info!("Reset dose history");
    }
}
