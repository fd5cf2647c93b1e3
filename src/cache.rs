//! # Ride Statistics Cache
//!
//! The entry point consumers use. Requests resolve in three tiers:
//!
//! 1. **Memo**: recently used artifacts, already decoded (LRU). A memoized
//!    artifact is only served while storage still holds it: the manifest
//!    digest and the stored version word are re-read on every hit.
//! 2. **Store**: the persisted artifact, if its version, fingerprint and
//!    configuration still match
//! 3. **Recompute**: run the engine, persist the result, memoize it
//!
//! Storage problems only ever cost a recompute; they are logged, never
//! returned. At most one recompute runs per artifact key at a time: later
//! callers for the same key wait and then pick up the fresh artifact.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;

use crate::artifact::CacheArtifact;
use crate::channel::Channel;
use crate::config::CacheConfig;
use crate::engine::compute_artifact;
use crate::error::Result;
use crate::lru_cache::LruCache;
use crate::source::{Recording, RecordingInfo, RecordingSource};
use crate::store::{
    ArtifactKey, ArtifactStorage, CacheStore, Constituent, Lookup, Provenance, Staleness,
};

/// Where a returned artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the in-memory memo
    Memo,
    /// Read back from storage
    Stored,
    /// Rebuilt because the stored artifact was stale
    Recomputed(Staleness),
    /// Rebuilt on request
    Forced,
}

impl CacheStatus {
    pub fn was_recomputed(self) -> bool {
        matches!(self, CacheStatus::Recomputed(_) | CacheStatus::Forced)
    }
}

/// An artifact and how it was obtained.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub artifact: Arc<CacheArtifact>,
    pub status: CacheStatus,
}

#[derive(Debug, Clone)]
struct MemoEntry {
    fingerprint: String,
    constituents: Vec<Constituent>,
    /// Digest of the stored copy; `None` when persisting it failed
    digest: Option<String>,
    artifact: Arc<CacheArtifact>,
}

/// Cache of mean-maximal curves and distributions for recordings and date ranges.
pub struct RideStatsCache<S> {
    store: CacheStore<S>,
    config: CacheConfig,
    config_digest: String,
    memo: Mutex<LruCache<ArtifactKey, MemoEntry>>,
    in_flight: InFlight,
}

impl<S: ArtifactStorage> RideStatsCache<S> {
    pub fn new(storage: S, config: CacheConfig) -> Self {
        let config_digest = config.output_digest();
        let memo = Mutex::new(LruCache::new(config.memo_capacity));
        Self {
            store: CacheStore::new(storage),
            config,
            config_digest,
            memo,
            in_flight: InFlight::default(),
        }
    }

    /// Cache with the default configuration.
    pub fn with_storage(storage: S) -> Self {
        Self::new(storage, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore<S> {
        &self.store
    }

    pub(crate) fn provenance(
        &self,
        fingerprint: &str,
        constituents: Option<Vec<Constituent>>,
    ) -> Provenance {
        Provenance {
            fingerprint: fingerprint.to_string(),
            config_digest: self.config_digest.clone(),
            constituents,
            content_check: self.config.content_check,
        }
    }

    // ========================================================================
    // Per-recording requests
    // ========================================================================

    /// Whether the stored artifact for a recording can be reused.
    pub fn check(&self, info: &RecordingInfo) -> Staleness {
        self.store.staleness(
            &ArtifactKey::recording(info.id.as_str()),
            &self.provenance(&info.fingerprint, None),
        )
    }

    /// Artifact for a loaded recording, recomputing it if stale.
    pub fn get(&self, recording: &Recording) -> Result<CacheLookup> {
        let key = ArtifactKey::recording(recording.id.as_str());
        let expected = self.provenance(&recording.fingerprint, None);
        self.resolve(&key, &expected, || {
            Ok((compute_artifact(recording, &self.config), Vec::new()))
        })
    }

    /// Artifact for a recording known only by its metadata. Samples are
    /// loaded from `source` only when a recompute is needed.
    pub fn refresh(
        &self,
        info: &RecordingInfo,
        source: &dyn RecordingSource,
    ) -> Result<CacheLookup> {
        let key = ArtifactKey::recording(info.id.as_str());
        let expected = self.provenance(&info.fingerprint, None);
        self.resolve(&key, &expected, || {
            let recording = source.load(&info.id)?;
            Ok((compute_artifact(&recording, &self.config), Vec::new()))
        })
    }

    /// Rebuild and overwrite the artifact regardless of staleness.
    pub fn recompute(&self, recording: &Recording) -> Result<CacheLookup> {
        let key = ArtifactKey::recording(recording.id.as_str());
        let _guard = self.in_flight.acquire(&key);
        let artifact = compute_artifact(recording, &self.config);
        Ok(self.persist(
            &key,
            &recording.fingerprint,
            artifact,
            Vec::new(),
            CacheStatus::Forced,
        ))
    }

    /// Drop memoized state for a recording (and any aggregate built from it)
    /// so the next request re-validates against storage.
    pub fn invalidate(&self, id: &str) {
        let mut memo = self.lock_memo();
        memo.invalidate(&ArtifactKey::recording(id));
        memo.retain(|_, entry| !entry.constituents.iter().any(|c| c.id == id));
        log::debug!("[RideCache] Invalidated '{}'", id);
    }

    // ========================================================================
    // Consumer getters
    // ========================================================================

    /// The current artifact for a recording id or range key.
    ///
    /// Does not recompute; fails with `NotFound`, `VersionMismatch` or
    /// `CorruptArtifact` when nothing usable is stored.
    pub fn artifact(&self, key: impl Into<ArtifactKey>) -> Result<Arc<CacheArtifact>> {
        let key = key.into();
        if let Some(entry) = self.validated_memo(&key) {
            return Ok(entry.artifact);
        }
        let stored = self.store.read(&key)?;
        Ok(Arc::new(stored.artifact))
    }

    /// Mean-maximal curve in channel units, index 0 = 1 second.
    pub fn curve(&self, key: impl Into<ArtifactKey>, channel: Channel) -> Result<Vec<f64>> {
        Ok(self.artifact(key)?.curve(channel))
    }

    /// Dates the curve bests were set; empty for single recordings.
    pub fn curve_dates(
        &self,
        key: impl Into<ArtifactKey>,
        channel: Channel,
    ) -> Result<Vec<NaiveDate>> {
        Ok(self.artifact(key)?.curve_dates(channel).to_vec())
    }

    pub fn distribution(&self, key: impl Into<ArtifactKey>, channel: Channel) -> Result<Vec<f64>> {
        Ok(self.artifact(key)?.distribution(channel))
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Memo, then store, then `compute`.
    pub(crate) fn resolve<F>(
        &self,
        key: &ArtifactKey,
        expected: &Provenance,
        compute: F,
    ) -> Result<CacheLookup>
    where
        F: FnOnce() -> Result<(CacheArtifact, Vec<Constituent>)>,
    {
        if let Some(artifact) = self.memo_hit(key, expected) {
            log::debug!("[RideCache] Memo hit for '{}'", key);
            return Ok(CacheLookup {
                artifact,
                status: CacheStatus::Memo,
            });
        }

        let _guard = self.in_flight.acquire(key);
        let staleness = match self.store.lookup(key, expected) {
            Lookup::Fresh(stored) => {
                log::debug!("[RideCache] Using stored artifact for '{}'", key);
                let manifest = stored.manifest;
                let artifact = Arc::new(stored.artifact);
                self.remember(
                    key,
                    MemoEntry {
                        fingerprint: manifest.fingerprint,
                        constituents: manifest.constituents,
                        digest: Some(manifest.artifact_digest),
                        artifact: Arc::clone(&artifact),
                    },
                );
                return Ok(CacheLookup {
                    artifact,
                    status: CacheStatus::Stored,
                });
            }
            Lookup::Stale(staleness) => staleness,
        };

        log::info!("[RideCache] Recomputing '{}' ({:?})", key, staleness);
        let (artifact, constituents) = compute()?;
        Ok(self.persist(
            key,
            &expected.fingerprint,
            artifact,
            constituents,
            CacheStatus::Recomputed(staleness),
        ))
    }

    fn persist(
        &self,
        key: &ArtifactKey,
        fingerprint: &str,
        artifact: CacheArtifact,
        constituents: Vec<Constituent>,
        status: CacheStatus,
    ) -> CacheLookup {
        let digest = match self.store.write(
            key,
            &artifact,
            fingerprint,
            &self.config_digest,
            constituents.clone(),
        ) {
            Ok(manifest) => Some(manifest.artifact_digest),
            Err(e) => {
                log::warn!("[RideCache] Failed to persist '{}', serving from memory: {}", key, e);
                None
            }
        };
        let artifact = Arc::new(artifact);
        self.remember(
            key,
            MemoEntry {
                fingerprint: fingerprint.to_string(),
                constituents,
                digest,
                artifact: Arc::clone(&artifact),
            },
        );
        CacheLookup { artifact, status }
    }

    fn memo_hit(&self, key: &ArtifactKey, expected: &Provenance) -> Option<Arc<CacheArtifact>> {
        let entry = self.validated_memo(key)?;
        if expected.content_check && entry.fingerprint != expected.fingerprint {
            return None;
        }
        if let Some(constituents) = &expected.constituents {
            if &entry.constituents != constituents {
                return None;
            }
        }
        Some(entry.artifact)
    }

    /// Memo entry for `key`, provided storage still holds the same artifact.
    ///
    /// The storage check runs outside the memo lock.
    fn validated_memo(&self, key: &ArtifactKey) -> Option<MemoEntry> {
        let entry = self.lock_memo().get(key).cloned()?;
        match &entry.digest {
            Some(digest) if !self.store.still_holds(key, digest) => {
                log::debug!("[RideCache] Stored copy of '{}' changed, dropping memo", key);
                self.lock_memo().invalidate(key);
                None
            }
            _ => Some(entry),
        }
    }

    fn remember(&self, key: &ArtifactKey, entry: MemoEntry) {
        self.lock_memo().insert(key.clone(), entry);
    }

    fn lock_memo(&self) -> MutexGuard<'_, LruCache<ArtifactKey, MemoEntry>> {
        // Memo contents are plain data; a panicked holder cannot leave them half-written
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// In-flight coalescing
// ============================================================================

/// Keys currently being recomputed.
#[derive(Debug, Default)]
struct InFlight {
    keys: Mutex<HashSet<ArtifactKey>>,
    done: Condvar,
}

impl InFlight {
    /// Block until no one else holds `key`, then hold it.
    fn acquire(&self, key: &ArtifactKey) -> InFlightGuard<'_> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        while keys.contains(key) {
            keys = self.done.wait(keys).unwrap_or_else(PoisonError::into_inner);
        }
        keys.insert(key.clone());
        InFlightGuard {
            owner: self,
            key: key.clone(),
        }
    }
}

struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: ArtifactKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut keys = self.owner.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.remove(&self.key);
        self.owner.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::format::CACHE_VERSION;
    use crate::source::MemorySource;
    use crate::store::MemoryStorage;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn reference_ride() -> Recording {
        Recording::new("r1", day(1), 1.0)
            .with_fingerprint("mtime-1")
            .with_values(
                Channel::Power,
                &[100.0, 100.0, 100.0, 200.0, 200.0, 200.0, 100.0, 100.0, 100.0, 100.0],
            )
    }

    #[test]
    fn test_tiers() {
        let cache = RideStatsCache::with_storage(MemoryStorage::new());
        let ride = reference_ride();

        let first = cache.get(&ride).unwrap();
        assert_eq!(first.status, CacheStatus::Recomputed(Staleness::Missing));
        assert_eq!(first.artifact.curve(Channel::Power)[9], 140.0);

        let second = cache.get(&ride).unwrap();
        assert_eq!(second.status, CacheStatus::Memo);

        cache.invalidate("r1");
        let third = cache.get(&ride).unwrap();
        assert_eq!(third.status, CacheStatus::Stored);
        assert_eq!(third.artifact, first.artifact);
    }

    #[test]
    fn test_fingerprint_change_recomputes() {
        let cache = RideStatsCache::with_storage(MemoryStorage::new());
        cache.get(&reference_ride()).unwrap();

        let edited = reference_ride()
            .with_fingerprint("mtime-2")
            .with_values(Channel::Power, &[300.0; 10]);
        let lookup = cache.get(&edited).unwrap();
        assert_eq!(
            lookup.status,
            CacheStatus::Recomputed(Staleness::FingerprintChanged)
        );
        assert_eq!(lookup.artifact.curve(Channel::Power)[0], 300.0);
    }

    #[test]
    fn test_content_check_disabled() {
        let config = CacheConfig {
            content_check: false,
            memo_capacity: 0,
            ..CacheConfig::default()
        };
        let cache = RideStatsCache::new(MemoryStorage::new(), config);
        cache.get(&reference_ride()).unwrap();

        let lookup = cache
            .get(&reference_ride().with_fingerprint("mtime-2"))
            .unwrap();
        assert_eq!(lookup.status, CacheStatus::Stored);
    }

    #[test]
    fn test_refresh_loads_only_when_stale() {
        let mut source = MemorySource::new();
        source.insert(reference_ride());
        let cache = RideStatsCache::with_storage(MemoryStorage::new());
        let info = reference_ride().info();

        assert_eq!(cache.check(&info), Staleness::Missing);
        assert!(cache.refresh(&info, &source).unwrap().status.was_recomputed());
        assert_eq!(cache.check(&info), Staleness::Fresh);

        // Fresh artifacts never touch the source
        source.remove("r1");
        cache.invalidate("r1");
        assert_eq!(cache.refresh(&info, &source).unwrap().status, CacheStatus::Stored);
    }

    #[test]
    fn test_refresh_propagates_source_errors() {
        let cache = RideStatsCache::with_storage(MemoryStorage::new());
        let info = reference_ride().info();
        assert!(matches!(
            cache.refresh(&info, &MemorySource::new()),
            Err(CacheError::Source { .. })
        ));
    }

    #[test]
    fn test_version_bump_triggers_recompute() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = RideStatsCache::with_storage(Arc::clone(&storage));
        cache.get(&reference_ride()).unwrap();

        let mut bytes = storage.read_blob("r1.cpx").unwrap().unwrap();
        bytes[..4].copy_from_slice(&7u32.to_ne_bytes());
        storage.write_blob("r1.cpx", &bytes).unwrap();

        // No invalidation: the memo notices the stored copy changed
        let lookup = cache.get(&reference_ride()).unwrap();
        assert_eq!(
            lookup.status,
            CacheStatus::Recomputed(Staleness::VersionMismatch { found: 7 })
        );
        assert_eq!(
            cache.store().stored_version(&ArtifactKey::recording("r1")),
            Some(CACHE_VERSION)
        );
    }

    #[test]
    fn test_deleted_blob_triggers_recompute() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = RideStatsCache::with_storage(Arc::clone(&storage));
        cache.get(&reference_ride()).unwrap();
        assert_eq!(cache.get(&reference_ride()).unwrap().status, CacheStatus::Memo);

        storage.remove_blob("r1.cpx").unwrap();
        assert!(matches!(
            cache.curve("r1", Channel::Power),
            Err(CacheError::NotFound { .. })
        ));
        let lookup = cache.get(&reference_ride()).unwrap();
        assert_eq!(lookup.status, CacheStatus::Recomputed(Staleness::Missing));
    }

    /// Storage that accepts reads but refuses every write.
    struct ReadOnlyStorage;

    impl ArtifactStorage for ReadOnlyStorage {
        fn read_blob(&self, _name: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn write_blob(&self, _name: &str, _bytes: &[u8]) -> Result<()> {
            Err(CacheError::Storage {
                message: "read-only".to_string(),
            })
        }

        fn remove_blob(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unpersisted_artifact_served_from_memo() {
        let cache = RideStatsCache::with_storage(ReadOnlyStorage);

        let first = cache.get(&reference_ride()).unwrap();
        assert_eq!(first.status, CacheStatus::Recomputed(Staleness::Missing));
        let second = cache.get(&reference_ride()).unwrap();
        assert_eq!(second.status, CacheStatus::Memo);
        assert_eq!(second.artifact, first.artifact);
    }

    #[test]
    fn test_forced_recompute_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = RideStatsCache::with_storage(Arc::clone(&storage));

        cache.recompute(&reference_ride()).unwrap();
        let first = storage.read_blob("r1.cpx").unwrap().unwrap();
        let lookup = cache.recompute(&reference_ride()).unwrap();
        let second = storage.read_blob("r1.cpx").unwrap().unwrap();

        assert_eq!(lookup.status, CacheStatus::Forced);
        assert_eq!(first, second);
    }

    #[test]
    fn test_getters() {
        let cache = RideStatsCache::with_storage(MemoryStorage::new());
        assert!(matches!(
            cache.curve("r1", Channel::Power),
            Err(CacheError::NotFound { .. })
        ));

        cache.get(&reference_ride()).unwrap();
        let curve = cache.curve("r1", Channel::Power).unwrap();
        assert_eq!(curve.len(), 10);
        assert!(cache.curve_dates("r1", Channel::Power).unwrap().is_empty());
        let dist = cache.distribution("r1", Channel::Power).unwrap();
        assert_eq!(dist[100], 7.0);
        assert_eq!(dist[200], 3.0);
    }

    #[test]
    fn test_concurrent_requests_coalesce() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = RideStatsCache::with_storage(Arc::clone(&storage));
        let ride = reference_ride();

        let statuses: Vec<CacheStatus> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| cache.get(&ride).unwrap().status))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let recomputes = statuses.iter().filter(|s| s.was_recomputed()).count();
        assert_eq!(recomputes, 1, "statuses: {:?}", statuses);
    }
}
