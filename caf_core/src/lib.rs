#![forbid(unsafe_code)]

//! Core state engine and decay model for the hfcf caffeine tracker.
//!
//! This crate provides:
//! - Domain types (doses and the store's value set)
//! - A reactive value store with blob persistence
//! - The half-life decay model and tracker operations
//! - A clock-driven ticker

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod blob;
pub mod store;
pub mod decay;
pub mod tracker;
pub mod ticker;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use store::{Field, History, Store, SubscriptionId, TotalMg};
pub use decay::DecayParams;
pub use tracker::{TickReport, Tracker, STATE_KEY};
pub use ticker::{Clock, ManualClock, SystemClock, Ticker, TickerHandle};
