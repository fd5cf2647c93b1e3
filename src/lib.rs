//! # Ride Stats Cache
//!
//! Mean-maximal curves and value distributions for recorded rides, computed
//! once and cached on disk.
//!
//! This library provides:
//! - Mean-maximal ("best average for every duration") curves per channel
//! - Time-in-value distributions per channel
//! - Derived channels (normalized and cube power) computed from power
//! - A versioned binary cache with staleness detection
//! - Best-of-range aggregates across recordings in a date range
//!
//! ## Features
//!
//! - **`parallel`** - Compute channels and long curves in parallel with rayon (default)
//! - **`persistence`** - SQLite-backed artifact storage
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use ride_stats_cache::{Channel, MemoryStorage, Recording, RideStatsCache};
//!
//! let ride = Recording::new("morning-ride", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), 1.0)
//!     .with_fingerprint("2024-06-01T07:12:00")
//!     .with_values(Channel::Power, &[180.0, 250.0, 320.0, 300.0, 210.0]);
//!
//! let cache = RideStatsCache::with_storage(MemoryStorage::new());
//! let lookup = cache.get(&ride).unwrap();
//!
//! let best = lookup.artifact.curve(Channel::Power);
//! println!("Best 1s: {}W, best 3s: {:.0}W", best[0], best[2]);
//! ```

// Unified error handling
pub mod error;
pub use error::{CacheError, Result};

// Channel model and per-channel tables
pub mod channel;
pub use channel::{Channel, ChannelMap};

// Tunable parameters
pub mod config;
pub use config::{CacheConfig, EnergyWeighting};

// Recordings and where they come from
pub mod source;
pub use source::{MemorySource, Recording, RecordingInfo, RecordingSource, Sample};

// Mean-maximal curves
pub mod curves;
pub use curves::{compute_mean_max, MeanMaxCurve};

// Value distributions
pub mod distribution;
pub use distribution::{compute_distribution, distribution_bin_width, Distribution};

// Channels computed from other channels
pub mod derived;
pub use derived::DerivedRule;

// In-memory artifact
pub mod artifact;
pub use artifact::{curve_bin_width, CacheArtifact};

// Binary artifact codec
pub mod format;
pub use format::CACHE_VERSION;

// Storage media, manifests and staleness
pub mod store;
pub use store::{
    ArtifactKey, ArtifactStorage, CacheStore, DirectoryStorage, MemoryStorage, Provenance,
    Staleness,
};

// SQLite-backed storage
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStorage;

// Per-channel fork-join computation
pub mod engine;
pub use engine::compute_artifact;

// LRU cache for decoded artifacts
pub mod lru_cache;

// Cache service
pub mod cache;
pub use cache::{CacheLookup, CacheStatus, RideStatsCache};

// Date-range aggregates
pub mod aggregate;
pub use aggregate::{merge_artifacts, range_key};
