//! Reactive value store.
//!
//! The store owns a [`ValueSet`] and notifies subscribers whenever a field is
//! published. Fields are addressed through marker types implementing
//! [`Field`], so only declared keys can be published or subscribed to.
//!
//! ## Publish cycle
//!
//! 1. The new values are written into the value set.
//! 2. Subscribers of every touched key run synchronously, key by key in
//!    first-touch order, each key's subscribers in subscription order.
//! 3. If a backend is configured, the whole value set is serialized and
//!    written once.
//!
//! Persistence failures are logged and never fail a publish: the in-memory
//! value set stays authoritative. A subscriber that panics unwinds before
//! step 3, so that publish is never persisted.
//!
//! Subscribers only get shared borrows, so they cannot publish back into the
//! store while it is notifying them.

use crate::blob::BlobStore;
use crate::{Dose, Error, Key, Result, ValueSet};
use std::collections::HashMap;

/// Reported as the blob key when a store without a backend fails to rehydrate
const MEMORY_LABEL: &str = "<memory>";

/// A named field of the [`ValueSet`]
pub trait Field: 'static {
    type Value: Clone + std::fmt::Debug + 'static;

    const KEY: Key;

    fn get(values: &ValueSet) -> &Self::Value;

    fn get_mut(values: &mut ValueSet) -> &mut Self::Value;
}

/// The dose history (`history`)
#[derive(Debug)]
pub struct History;

/// The aggregate remaining amount (`totalMg`)
#[derive(Debug)]
pub struct TotalMg;

impl Field for History {
    type Value = Vec<Dose>;
    const KEY: Key = Key::History;

    fn get(values: &ValueSet) -> &Vec<Dose> {
        &values.history
    }

    fn get_mut(values: &mut ValueSet) -> &mut Vec<Dose> {
        &mut values.history
    }
}

impl Field for TotalMg {
    type Value = f64;
    const KEY: Key = Key::TotalMg;

    fn get(values: &ValueSet) -> &f64 {
        &values.total_mg
    }

    fn get_mut(values: &mut ValueSet) -> &mut f64 {
        &mut values.total_mg
    }
}

/// Handle returned by [`Store::subscribe`], used to unsubscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&ValueSet)>;

struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

struct Persistence {
    backend: Box<dyn BlobStore>,
    key: String,
}

/// A set of changes applied to the value set as one publish
pub struct Transaction<'a> {
    values: &'a mut ValueSet,
    touched: Vec<Key>,
}

impl<'a> Transaction<'a> {
    /// Current value, including changes made earlier in this transaction
    pub fn get<F: Field>(&self) -> &F::Value {
        F::get(self.values)
    }

    pub fn set<F: Field>(&mut self, value: F::Value) {
        *F::get_mut(self.values) = value;
        self.touch(F::KEY);
    }

    /// Replace a field with a value computed from its current value
    pub fn update<F: Field>(&mut self, f: impl FnOnce(&F::Value) -> F::Value) {
        let next = f(F::get(self.values));
        self.set::<F>(next);
    }

    fn touch(&mut self, key: Key) {
        if !self.touched.contains(&key) {
            self.touched.push(key);
        }
    }
}

/// Single source of truth for the tracker's values
pub struct Store {
    values: ValueSet,
    subscribers: HashMap<Key, Vec<Subscriber>>,
    next_id: u64,
    persistence: Option<Persistence>,
}

impl Store {
    /// In-memory store initialized from `defaults`
    pub fn new(defaults: ValueSet) -> Self {
        Self {
            values: defaults,
            subscribers: HashMap::new(),
            next_id: 0,
            persistence: None,
        }
    }

    /// Store persisted to `backend` under `blob_key`.
    ///
    /// A non-empty blob replaces `defaults` entirely. A blob that does not
    /// parse is returned as [`Error::PersistedStateCorrupt`]. With no blob,
    /// the defaults are used and written immediately.
    pub fn with_backend(
        defaults: ValueSet,
        backend: impl BlobStore + 'static,
        blob_key: impl Into<String>,
    ) -> Result<Self> {
        let key = blob_key.into();
        let existing = backend.get(&key)?;

        let mut store = Self::new(defaults);
        store.persistence = Some(Persistence {
            backend: Box::new(backend),
            key: key.clone(),
        });

        match existing.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                store.values = parse_blob(&key, raw)?;
                tracing::info!(
                    "Rehydrated {} doses from persisted state {:?}",
                    store.values.history.len(),
                    key
                );
            }
            _ => {
                tracing::info!("No persisted state under {:?}, writing defaults", key);
                store.persist_logged();
            }
        }

        Ok(store)
    }

    /// Replace the entire value set with a persisted blob and notify every key.
    ///
    /// Nothing changes if the blob does not parse.
    pub fn rehydrate(&mut self, blob: &str) -> Result<()> {
        let key = self
            .persistence
            .as_ref()
            .map_or(MEMORY_LABEL, |p| p.key.as_str());
        self.values = parse_blob(key, blob)?;
        self.notify(&Key::ALL);
        Ok(())
    }

    pub fn get<F: Field>(&self) -> &F::Value {
        F::get(&self.values)
    }

    pub fn values(&self) -> &ValueSet {
        &self.values
    }

    /// JSON value of a field, for callers that address keys by name
    pub fn get_json(&self, key: Key) -> Result<serde_json::Value> {
        let value = match key {
            Key::History => serde_json::to_value(&self.values.history)?,
            Key::TotalMg => serde_json::to_value(self.values.total_mg)?,
        };
        Ok(value)
    }

    /// Set a field and notify its subscribers
    pub fn publish<F: Field>(&mut self, value: F::Value) {
        self.transact(|tx| tx.set::<F>(value));
    }

    /// Read-modify-write of a single field as one publish
    pub fn update<F: Field>(&mut self, f: impl FnOnce(&F::Value) -> F::Value) {
        self.transact(|tx| tx.update::<F>(f));
    }

    /// Apply several changes as one publish: subscribers see the complete
    /// result and the value set is persisted once.
    pub fn transact<R>(&mut self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        let mut tx = Transaction {
            values: &mut self.values,
            touched: Vec::new(),
        };
        let result = f(&mut tx);
        let touched = tx.touched;

        if !touched.is_empty() {
            self.notify(&touched);
            self.persist_logged();
        }

        result
    }

    /// Register `callback` for every future publish of `F`.
    ///
    /// The callback receives the new field value and the full value set.
    pub fn subscribe<F: Field>(
        &mut self,
        mut callback: impl FnMut(&F::Value, &ValueSet) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        self.subscribers.entry(F::KEY).or_default().push(Subscriber {
            id,
            callback: Box::new(move |values: &ValueSet| callback(F::get(values), values)),
        });

        tracing::debug!("Subscribed {:?} to {}", id, F::KEY);
        id
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for subs in self.subscribers.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn subscriber_count(&self, key: Key) -> usize {
        self.subscribers.get(&key).map_or(0, Vec::len)
    }

    /// Write the value set now, returning any failure instead of logging it
    pub fn flush(&mut self) -> Result<()> {
        self.persist()
    }

    fn notify(&mut self, keys: &[Key]) {
        for key in keys {
            if let Some(subs) = self.subscribers.get_mut(key) {
                for sub in subs.iter_mut() {
                    (sub.callback)(&self.values);
                }
            }
        }
    }

    fn persist(&mut self) -> Result<()> {
        let Some(persistence) = self.persistence.as_mut() else {
            return Ok(());
        };

        // serde_json writes NaN and infinity as null, which would not load back
        if !is_finite(&self.values) {
            return Err(Error::Other(
                "Refusing to persist a non-finite amount".into(),
            ));
        }

        let blob = serde_json::to_string(&self.values)?;
        persistence.backend.set(&persistence.key, &blob)?;
        tracing::debug!(
            "Persisted {} doses under {:?}",
            self.values.history.len(),
            persistence.key
        );
        Ok(())
    }

    fn persist_logged(&mut self) {
        if let Err(e) = self.persist() {
            tracing::warn!("Failed to persist state, keeping in-memory values: {}", e);
        }
    }
}

fn parse_blob(key: &str, raw: &str) -> Result<ValueSet> {
    serde_json::from_str(raw).map_err(|source| Error::PersistedStateCorrupt {
        key: key.to_string(),
        source: Box::new(source),
    })
}

fn is_finite(values: &ValueSet) -> bool {
    values.total_mg.is_finite()
        && values
            .history
            .iter()
            .all(|d| d.orig_amount.is_finite() && d.current_amount.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use chrono::{TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;

    const KEY: &str = "hfcf_state";

    fn dose(ms: i64, amount: f64) -> Dose {
        Dose::new(Utc.timestamp_millis_opt(ms).unwrap(), amount)
    }

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_publish_sets_value_and_notifies_in_order() {
        crate::logging::init_test();
        let mut store = Store::new(ValueSet::default());
        let log = recorder();

        for name in ["first", "second", "third"] {
            let log = log.clone();
            store.subscribe::<TotalMg>(move |total, _| {
                log.borrow_mut().push(format!("{}:{}", name, total));
            });
        }

        store.publish::<TotalMg>(12.5);

        assert_eq!(*store.get::<TotalMg>(), 12.5);
        assert_eq!(
            *log.borrow(),
            vec!["first:12.5", "second:12.5", "third:12.5"]
        );
    }

    #[test]
    fn test_update_reads_current_value() {
        let mut store = Store::new(ValueSet::default());
        store.update::<History>(|h| {
            let mut next = h.clone();
            next.push(dose(0, 50.0));
            next
        });
        store.update::<History>(|h| {
            let mut next = h.clone();
            next.push(dose(1, 50.0));
            next
        });

        assert_eq!(store.get::<History>().len(), 2);
    }

    #[test]
    fn test_only_touched_keys_notify() {
        let mut store = Store::new(ValueSet::default());
        let log = recorder();

        let history_log = log.clone();
        store.subscribe::<History>(move |_, _| history_log.borrow_mut().push("history".into()));
        let total_log = log.clone();
        store.subscribe::<TotalMg>(move |_, _| total_log.borrow_mut().push("total".into()));

        store.publish::<TotalMg>(3.0);

        assert_eq!(*log.borrow(), vec!["total"]);
    }

    #[test]
    fn test_transaction_subscribers_see_complete_value_set() {
        let mut store = Store::new(ValueSet::default());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        store.subscribe::<History>(move |history, values| {
            let sum: f64 = history.iter().map(|d| d.current_amount).sum();
            sink.borrow_mut().push((sum, values.total_mg));
        });

        store.transact(|tx| {
            tx.update::<History>(|h| {
                let mut next = h.clone();
                next.push(dose(0, 50.0));
                next
            });
            let total = tx.get::<History>().iter().map(|d| d.current_amount).sum();
            tx.set::<TotalMg>(total);
        });

        assert_eq!(*seen.borrow(), vec![(50.0, 50.0)]);
    }

    #[test]
    fn test_transaction_notifies_each_key_once() {
        let mut store = Store::new(ValueSet::default());
        let count = Rc::new(RefCell::new(0));

        let c = count.clone();
        store.subscribe::<TotalMg>(move |_, _| *c.borrow_mut() += 1);

        store.transact(|tx| {
            tx.set::<TotalMg>(1.0);
            tx.set::<TotalMg>(2.0);
        });

        assert_eq!(*count.borrow(), 1);
        assert_eq!(*store.get::<TotalMg>(), 2.0);
    }

    #[test]
    fn test_empty_transaction_is_silent() {
        let backend = MemoryBlobStore::new();
        let mut store = Store::with_backend(ValueSet::default(), backend.clone(), KEY).unwrap();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        store.subscribe::<TotalMg>(move |_, _| *c.borrow_mut() += 1);

        let read = store.transact(|tx| *tx.get::<TotalMg>());

        assert_eq!(read, 0.0);
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let mut store = Store::new(ValueSet::default());
        let count = Rc::new(RefCell::new(0));

        let c = count.clone();
        let id = store.subscribe::<TotalMg>(move |_, _| *c.borrow_mut() += 1);
        assert_eq!(store.subscriber_count(Key::TotalMg), 1);

        store.publish::<TotalMg>(1.0);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.publish::<TotalMg>(2.0);

        assert_eq!(*count.borrow(), 1);
        assert_eq!(store.subscriber_count(Key::TotalMg), 0);
    }

    #[test]
    fn test_publish_persists_entire_value_set() {
        let backend = MemoryBlobStore::new();
        let mut store = Store::with_backend(ValueSet::default(), backend.clone(), KEY).unwrap();

        store.publish::<History>(vec![dose(1_000, 50.0)]);

        let blob = backend.get(KEY).unwrap().unwrap();
        let persisted: ValueSet = serde_json::from_str(&blob).unwrap();
        assert_eq!(persisted.history, vec![dose(1_000, 50.0)]);
        assert_eq!(persisted.total_mg, 0.0);
    }

    #[test]
    fn test_subscribers_run_before_persist() {
        let backend = MemoryBlobStore::new();
        let mut store = Store::with_backend(ValueSet::default(), backend.clone(), KEY).unwrap();
        let observed = recorder();

        let handle = backend.clone();
        let sink = observed.clone();
        store.subscribe::<TotalMg>(move |_, _| {
            let blob = handle.get(KEY).unwrap().unwrap_or_default();
            sink.borrow_mut().push(blob);
        });

        store.publish::<TotalMg>(7.0);

        let during = serde_json::from_str::<ValueSet>(&observed.borrow()[0]).unwrap();
        assert_eq!(during.total_mg, 0.0);
        let after: ValueSet = serde_json::from_str(&backend.get(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(after.total_mg, 7.0);
    }

    #[test]
    fn test_missing_blob_uses_and_writes_defaults() {
        let backend = MemoryBlobStore::new();
        let defaults = ValueSet {
            history: vec![dose(5, 50.0)],
            total_mg: 50.0,
        };

        let store = Store::with_backend(defaults.clone(), backend.clone(), KEY).unwrap();

        assert_eq!(store.values(), &defaults);
        let written: ValueSet = serde_json::from_str(&backend.get(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(written, defaults);
    }

    #[test]
    fn test_existing_blob_replaces_defaults_entirely() {
        let mut backend = MemoryBlobStore::new();
        backend
            .set(KEY, r#"{"history":[{"time":0,"origAmount":80,"currentAmount":80}]}"#)
            .unwrap();
        let defaults = ValueSet {
            history: vec![dose(5, 50.0), dose(6, 50.0)],
            total_mg: 100.0,
        };

        let store = Store::with_backend(defaults, backend, KEY).unwrap();

        assert_eq!(store.get::<History>(), &vec![dose(0, 80.0)]);
        assert_eq!(*store.get::<TotalMg>(), 0.0);
    }

    #[test]
    fn test_whitespace_blob_counts_as_absent() {
        let mut backend = MemoryBlobStore::new();
        backend.set(KEY, "  \n").unwrap();

        let store = Store::with_backend(ValueSet::default(), backend.clone(), KEY).unwrap();

        assert!(store.get::<History>().is_empty());
        assert!(backend.get(KEY).unwrap().unwrap().contains("history"));
    }

    #[test]
    fn test_corrupt_blob_is_fatal() {
        let mut backend = MemoryBlobStore::new();
        backend.set(KEY, "{ invalid json }").unwrap();

        let result = Store::with_backend(ValueSet::default(), backend.clone(), KEY);

        match result {
            Err(Error::PersistedStateCorrupt { key, .. }) => assert_eq!(key, KEY),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("corrupt state must not load"),
        }
        // The corrupt blob is left untouched for the caller to deal with
        assert_eq!(backend.get(KEY).unwrap().as_deref(), Some("{ invalid json }"));
    }

    #[test]
    fn test_write_failure_keeps_in_memory_state() {
        let backend = MemoryBlobStore::new();
        let mut store = Store::with_backend(ValueSet::default(), backend.clone(), KEY).unwrap();
        backend.set_fail_writes(true);

        store.publish::<TotalMg>(42.0);

        assert_eq!(*store.get::<TotalMg>(), 42.0);
        assert!(store.flush().is_err());
        let persisted: ValueSet = serde_json::from_str(&backend.get(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted.total_mg, 0.0);
    }

    #[test]
    fn test_rehydrate_overwrites_and_notifies() {
        let mut store = Store::new(ValueSet {
            history: vec![dose(1, 50.0)],
            total_mg: 50.0,
        });
        let log = recorder();
        let sink = log.clone();
        store.subscribe::<History>(move |h, _| sink.borrow_mut().push(format!("{}", h.len())));

        store
            .rehydrate(r#"{"history":[],"totalMg":0}"#)
            .unwrap();

        assert!(store.get::<History>().is_empty());
        assert_eq!(*log.borrow(), vec!["0"]);

        match store.rehydrate("not json") {
            Err(Error::PersistedStateCorrupt { key, .. }) => assert_eq!(key, "<memory>"),
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert!(store.get::<History>().is_empty());
    }

    #[test]
    fn test_non_finite_values_are_not_persisted() {
        let backend = MemoryBlobStore::new();
        let mut store = Store::with_backend(ValueSet::default(), backend.clone(), KEY).unwrap();
        store.publish::<TotalMg>(12.5);

        store.publish::<TotalMg>(f64::INFINITY);

        assert!(store.flush().is_err());
        let persisted: ValueSet = serde_json::from_str(&backend.get(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted.total_mg, 12.5);

        store.publish::<History>(vec![dose(0, f64::NAN)]);
        let persisted: ValueSet = serde_json::from_str(&backend.get(KEY).unwrap().unwrap()).unwrap();
        assert!(persisted.history.is_empty());
    }

    #[test]
    fn test_get_json() {
        let store = Store::new(ValueSet {
            history: vec![dose(0, 50.0)],
            total_mg: 50.0,
        });

        assert_eq!(store.get_json(Key::TotalMg).unwrap(), serde_json::json!(50.0));
        let history = store.get_json(Key::History).unwrap();
        assert_eq!(history[0]["origAmount"], 50.0);
    }
}
