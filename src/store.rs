//! # Cache Store
//!
//! Persists artifacts on a byte-addressable storage medium and decides
//! whether a stored artifact can be reused.
//!
//! ## Blobs per artifact
//! - `<id>.cpx` / `<id>.meta` for a recording
//! - `<range>.acpx` / `<range>.ameta` for a date-range aggregate
//!
//! The `.cpx` blob is the binary artifact (see [`crate::format`]); the
//! manifest is MessagePack holding the fingerprint that produced the
//! artifact, a digest of the derived-channel configuration, a SHA-256 digest
//! of the artifact bytes, aggregate constituents and curve dates.
//!
//! The artifact is written before its manifest. A crash in between leaves a
//! manifest whose digest does not match, which reads as corrupt and triggers
//! a rebuild.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifact::CacheArtifact;
use crate::channel::Channel;
use crate::error::{CacheError, Result};
use crate::format::{decode_artifact, encode_artifact, peek_version, CACHE_VERSION};

// ============================================================================
// Storage medium
// ============================================================================

/// Named blob storage. Implementations need not be a filesystem.
pub trait ArtifactStorage: Send + Sync {
    /// Read a blob; `Ok(None)` when it does not exist.
    fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace a blob.
    fn write_blob(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Delete a blob; deleting a missing blob is not an error.
    fn remove_blob(&self, name: &str) -> Result<()>;

    /// Read at most the first `len` bytes of a blob.
    fn read_prefix(&self, name: &str, len: usize) -> Result<Option<Vec<u8>>> {
        Ok(self.read_blob(name)?.map(|mut bytes| {
            bytes.truncate(len);
            bytes
        }))
    }
}

impl<T: ArtifactStorage + ?Sized> ArtifactStorage for Arc<T> {
    fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).read_blob(name)
    }

    fn write_blob(&self, name: &str, bytes: &[u8]) -> Result<()> {
        (**self).write_blob(name, bytes)
    }

    fn remove_blob(&self, name: &str) -> Result<()> {
        (**self).remove_blob(name)
    }

    fn read_prefix(&self, name: &str, len: usize) -> Result<Option<Vec<u8>>> {
        (**self).read_prefix(name, len)
    }
}

/// Blobs held in a map; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all stored blobs, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .blobs
            .lock()
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn poisoned() -> CacheError {
        CacheError::Storage {
            message: "memory storage lock poisoned".to_string(),
        }
    }
}

impl ArtifactStorage for MemoryStorage {
    fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| Self::poisoned())?;
        Ok(blobs.get(name).cloned())
    }

    fn write_blob(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| Self::poisoned())?;
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove_blob(&self, name: &str) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| Self::poisoned())?;
        blobs.remove(name);
        Ok(())
    }
}

/// One file per blob inside a directory.
///
/// Writes go to a temporary file that is renamed into place, so readers
/// never observe a half-written blob.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    /// Use `root`, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a blob name.
    ///
    /// Names are percent-encoded, so distinct names always map to distinct
    /// files and never escape `root`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(urlencoding::encode(name).as_ref())
    }

    fn write_tmp(tmp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

impl ArtifactStorage for DirectoryStorage {
    fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_blob(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(name);
        let mut tmp_name = path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let written = Self::write_tmp(&tmp_path, bytes).and_then(|()| fs::rename(&tmp_path, &path));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                if cleanup.kind() != ErrorKind::NotFound {
                    log::warn!("[CacheStore] Could not remove {:?}: {}", tmp_path, cleanup);
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn remove_blob(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_prefix(&self, name: &str, len: usize) -> Result<Option<Vec<u8>>> {
        let file = match fs::File::open(self.path_for(name)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }
}

// ============================================================================
// Artifact keys
// ============================================================================

/// What an artifact belongs to: one recording or one date range.
///
/// The two kinds are stored under different blob suffixes, so no recording
/// id can alias a range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    Recording(String),
    Range { start: NaiveDate, end: NaiveDate },
}

impl ArtifactKey {
    pub fn recording(id: impl Into<String>) -> Self {
        ArtifactKey::Recording(id.into())
    }

    pub fn range(start: NaiveDate, end: NaiveDate) -> Self {
        ArtifactKey::Range { start, end }
    }

    fn artifact_name(&self) -> String {
        match self {
            ArtifactKey::Recording(id) => format!("{}.cpx", id),
            ArtifactKey::Range { .. } => format!("{}.acpx", self),
        }
    }

    fn manifest_name(&self) -> String {
        match self {
            ArtifactKey::Recording(id) => format!("{}.meta", id),
            ArtifactKey::Range { .. } => format!("{}.ameta", self),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKey::Recording(id) => f.write_str(id),
            ArtifactKey::Range { start, end } => write!(
                f,
                "range-{}-{}",
                start.format("%Y%m%d"),
                end.format("%Y%m%d")
            ),
        }
    }
}

impl From<&str> for ArtifactKey {
    fn from(id: &str) -> Self {
        ArtifactKey::recording(id)
    }
}

impl From<String> for ArtifactKey {
    fn from(id: String) -> Self {
        ArtifactKey::Recording(id)
    }
}

impl From<&ArtifactKey> for ArtifactKey {
    fn from(key: &ArtifactKey) -> Self {
        key.clone()
    }
}

// ============================================================================
// Manifest and staleness
// ============================================================================

/// A recording that contributed to an aggregate, with its artifact digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constituent {
    pub id: String,
    pub digest: String,
}

/// Provenance stored next to each artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub version: u32,
    /// Recording fingerprint, or the range description for aggregates
    pub fingerprint: String,
    pub config_digest: String,
    /// SHA-256 of the artifact bytes
    pub artifact_digest: String,
    pub constituents: Vec<Constituent>,
    /// Curve dates for channels that carry them
    pub curve_dates: Vec<(Channel, Vec<NaiveDate>)>,
}

/// What the caller expects a reusable artifact to have been built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub fingerprint: String,
    pub config_digest: String,
    /// Checked only for aggregates
    pub constituents: Option<Vec<Constituent>>,
    /// Compare fingerprints; when false only version and config matter
    pub content_check: bool,
}

/// Why an artifact can or cannot be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Missing,
    VersionMismatch { found: u32 },
    Corrupt,
    FingerprintChanged,
    ConfigChanged,
    ConstituentsChanged,
}

impl Staleness {
    pub fn is_stale(self) -> bool {
        self != Staleness::Fresh
    }
}

/// A decoded artifact together with its manifest.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub artifact: CacheArtifact,
    pub manifest: ArtifactManifest,
}

/// Result of looking an artifact up against an expected provenance.
#[derive(Debug)]
pub enum Lookup {
    Fresh(StoredArtifact),
    Stale(Staleness),
}

/// SHA-256 hex digest of encoded artifact bytes.
pub fn artifact_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ============================================================================
// Cache Store
// ============================================================================

/// Reads, writes and validates artifacts on an [`ArtifactStorage`].
#[derive(Debug)]
pub struct CacheStore<S> {
    storage: S,
}

impl<S: ArtifactStorage> CacheStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Blob name holding the binary artifact for `key`.
    pub fn artifact_name(key: &ArtifactKey) -> String {
        key.artifact_name()
    }

    /// Blob name holding the manifest for `key`.
    pub fn manifest_name(key: &ArtifactKey) -> String {
        key.manifest_name()
    }

    /// Read an artifact and its manifest.
    ///
    /// Fails with `NotFound`, `VersionMismatch` or `CorruptArtifact`.
    pub fn read(&self, key: &ArtifactKey) -> Result<StoredArtifact> {
        let label = key.to_string();
        let bytes = self
            .storage
            .read_blob(&key.artifact_name())?
            .ok_or_else(|| CacheError::NotFound { key: label.clone() })?;
        let mut artifact = decode_artifact(&label, &bytes)?;

        let manifest = self.read_manifest(key)?;
        if manifest.version != CACHE_VERSION {
            return Err(CacheError::VersionMismatch {
                key: label,
                found: manifest.version,
                expected: CACHE_VERSION,
            });
        }
        if manifest.artifact_digest != artifact_digest(&bytes) {
            return Err(CacheError::corrupt(&label, "manifest digest does not match artifact"));
        }

        for (channel, dates) in &manifest.curve_dates {
            if dates.len() != artifact.curves[*channel].len() {
                return Err(CacheError::corrupt(
                    &label,
                    format!("{} dates do not cover the {} curve", dates.len(), channel),
                ));
            }
            artifact.curves[*channel].dates = dates.clone();
        }

        Ok(StoredArtifact { artifact, manifest })
    }

    /// Read just the manifest; a missing manifest next to an artifact is corrupt.
    pub fn read_manifest(&self, key: &ArtifactKey) -> Result<ArtifactManifest> {
        let label = key.to_string();
        let bytes = self
            .storage
            .read_blob(&key.manifest_name())?
            .ok_or_else(|| CacheError::corrupt(&label, "manifest missing"))?;
        rmp_serde::from_slice(&bytes)
            .map_err(|e| CacheError::corrupt(&label, format!("unreadable manifest: {}", e)))
    }

    /// Write an artifact, replacing whatever was stored under `key`.
    pub fn write(
        &self,
        key: &ArtifactKey,
        artifact: &CacheArtifact,
        fingerprint: &str,
        config_digest: &str,
        constituents: Vec<Constituent>,
    ) -> Result<ArtifactManifest> {
        let bytes = encode_artifact(artifact);
        let manifest = ArtifactManifest {
            version: CACHE_VERSION,
            fingerprint: fingerprint.to_string(),
            config_digest: config_digest.to_string(),
            artifact_digest: artifact_digest(&bytes),
            constituents,
            curve_dates: artifact
                .curves
                .iter()
                .filter(|(_, curve)| !curve.dates.is_empty())
                .map(|(channel, curve)| (channel, curve.dates.clone()))
                .collect(),
        };
        let manifest_bytes = rmp_serde::to_vec(&manifest)?;

        self.storage.write_blob(&key.artifact_name(), &bytes)?;
        self.storage.write_blob(&key.manifest_name(), &manifest_bytes)?;
        log::debug!(
            "[CacheStore] Wrote '{}' ({} bytes, digest {})",
            key,
            bytes.len(),
            &manifest.artifact_digest[..12]
        );
        Ok(manifest)
    }

    /// Delete an artifact and its manifest.
    pub fn remove(&self, key: &ArtifactKey) -> Result<()> {
        self.storage.remove_blob(&key.artifact_name())?;
        self.storage.remove_blob(&key.manifest_name())
    }

    /// Look up an artifact and check it against `expected`.
    ///
    /// Storage and decode failures are reported as staleness, never as errors.
    pub fn lookup(&self, key: &ArtifactKey, expected: &Provenance) -> Lookup {
        let stored = match self.read(key) {
            Ok(stored) => stored,
            Err(e) => {
                let staleness = match &e {
                    CacheError::NotFound { .. } => Staleness::Missing,
                    CacheError::VersionMismatch { found, .. } => {
                        Staleness::VersionMismatch { found: *found }
                    }
                    CacheError::CorruptArtifact { .. } => Staleness::Corrupt,
                    _ => {
                        log::warn!("[CacheStore] Reading '{}' failed, treating as missing: {}", key, e);
                        Staleness::Missing
                    }
                };
                return Lookup::Stale(staleness);
            }
        };

        let manifest = &stored.manifest;
        if manifest.config_digest != expected.config_digest {
            return Lookup::Stale(Staleness::ConfigChanged);
        }
        if expected.content_check && manifest.fingerprint != expected.fingerprint {
            return Lookup::Stale(Staleness::FingerprintChanged);
        }
        if let Some(constituents) = &expected.constituents {
            if &manifest.constituents != constituents {
                return Lookup::Stale(Staleness::ConstituentsChanged);
            }
        }
        Lookup::Fresh(stored)
    }

    /// Staleness of the artifact under `key`.
    pub fn staleness(&self, key: &ArtifactKey, expected: &Provenance) -> Staleness {
        match self.lookup(key, expected) {
            Lookup::Fresh(_) => Staleness::Fresh,
            Lookup::Stale(staleness) => staleness,
        }
    }

    pub fn is_stale(&self, key: &ArtifactKey, expected: &Provenance) -> bool {
        self.staleness(key, expected).is_stale()
    }

    /// Stored format version, if an artifact blob exists and has one.
    ///
    /// Reads only the version word.
    pub fn stored_version(&self, key: &ArtifactKey) -> Option<u32> {
        self.storage
            .read_prefix(&key.artifact_name(), std::mem::size_of::<u32>())
            .ok()
            .flatten()
            .and_then(|bytes| peek_version(&bytes))
    }

    /// Whether storage still holds the artifact with `digest` at the current
    /// version, judged from the manifest and the version word alone.
    pub fn still_holds(&self, key: &ArtifactKey, digest: &str) -> bool {
        let manifest_matches = self
            .read_manifest(key)
            .map(|m| m.version == CACHE_VERSION && m.artifact_digest == digest)
            .unwrap_or(false);
        manifest_matches && self.stored_version(key) == Some(CACHE_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::MeanMaxCurve;

    fn r1() -> ArtifactKey {
        ArtifactKey::recording("r1")
    }

    fn provenance(fingerprint: &str) -> Provenance {
        Provenance {
            fingerprint: fingerprint.to_string(),
            config_digest: "cfg".to_string(),
            constituents: None,
            content_check: true,
        }
    }

    fn artifact() -> CacheArtifact {
        let mut artifact = CacheArtifact::empty();
        artifact.curves[Channel::Power] = MeanMaxCurve::from_values(vec![300, 250]);
        artifact
    }

    #[test]
    fn test_write_then_read() {
        let store = CacheStore::new(MemoryStorage::new());
        store.write(&r1(), &artifact(), "fp", "cfg", Vec::new()).unwrap();

        let stored = store.read(&r1()).unwrap();
        assert_eq!(stored.artifact, artifact());
        assert_eq!(stored.manifest.fingerprint, "fp");
        assert_eq!(
            store.storage().names(),
            vec!["r1.cpx".to_string(), "r1.meta".to_string()]
        );
    }

    #[test]
    fn test_staleness_rules() {
        let store = CacheStore::new(MemoryStorage::new());
        assert_eq!(store.staleness(&r1(), &provenance("fp")), Staleness::Missing);

        store.write(&r1(), &artifact(), "fp", "cfg", Vec::new()).unwrap();
        assert_eq!(store.staleness(&r1(), &provenance("fp")), Staleness::Fresh);
        assert_eq!(
            store.staleness(&r1(), &provenance("other")),
            Staleness::FingerprintChanged
        );

        let mut unchecked = provenance("other");
        unchecked.content_check = false;
        assert!(!store.is_stale(&r1(), &unchecked));

        let mut new_config = provenance("fp");
        new_config.config_digest = "cfg2".to_string();
        assert_eq!(store.staleness(&r1(), &new_config), Staleness::ConfigChanged);
    }

    #[test]
    fn test_version_bump_is_stale() {
        let store = CacheStore::new(MemoryStorage::new());
        let manifest = store.write(&r1(), &artifact(), "fp", "cfg", Vec::new()).unwrap();
        assert!(store.still_holds(&r1(), &manifest.artifact_digest));

        let mut bytes = store.storage().read_blob("r1.cpx").unwrap().unwrap();
        bytes[..4].copy_from_slice(&(CACHE_VERSION + 1).to_ne_bytes());
        store.storage().write_blob("r1.cpx", &bytes).unwrap();

        assert_eq!(
            store.staleness(&r1(), &provenance("fp")),
            Staleness::VersionMismatch {
                found: CACHE_VERSION + 1
            }
        );
        assert_eq!(store.stored_version(&r1()), Some(CACHE_VERSION + 1));
        assert!(!store.still_holds(&r1(), &manifest.artifact_digest));
    }

    #[test]
    fn test_still_holds_tracks_rewrites() {
        let store = CacheStore::new(MemoryStorage::new());
        let first = store.write(&r1(), &artifact(), "fp", "cfg", Vec::new()).unwrap();

        let mut other = artifact();
        other.curves[Channel::Power] = MeanMaxCurve::from_values(vec![999]);
        store.write(&r1(), &other, "fp", "cfg", Vec::new()).unwrap();
        assert!(!store.still_holds(&r1(), &first.artifact_digest));

        store.remove(&r1()).unwrap();
        assert!(!store.still_holds(&r1(), &first.artifact_digest));
    }

    #[test]
    fn test_digest_mismatch_is_corrupt() {
        let store = CacheStore::new(MemoryStorage::new());
        store.write(&r1(), &artifact(), "fp", "cfg", Vec::new()).unwrap();

        let mut other = artifact();
        other.curves[Channel::Power] = MeanMaxCurve::from_values(vec![999]);
        let bytes = encode_artifact(&other);
        store.storage().write_blob("r1.cpx", &bytes).unwrap();

        assert_eq!(store.staleness(&r1(), &provenance("fp")), Staleness::Corrupt);
    }

    #[test]
    fn test_missing_manifest_is_corrupt() {
        let store = CacheStore::new(MemoryStorage::new());
        store.write(&r1(), &artifact(), "fp", "cfg", Vec::new()).unwrap();
        store.storage().remove_blob("r1.meta").unwrap();
        assert!(matches!(
            store.read(&r1()),
            Err(CacheError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_dates_and_constituents_round_trip() {
        let store = CacheStore::new(MemoryStorage::new());
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let key = ArtifactKey::range(day, day);
        let mut dated = artifact();
        dated.curves[Channel::Power].dates = vec![day, day];
        let constituents = vec![Constituent {
            id: "r1".to_string(),
            digest: "abc".to_string(),
        }];
        store
            .write(&key, &dated, "2024-05-01..2024-05-01", "cfg", constituents.clone())
            .unwrap();

        let stored = store.read(&key).unwrap();
        assert_eq!(stored.artifact.curve_dates(Channel::Power), &[day, day]);

        let mut expected = provenance("2024-05-01..2024-05-01");
        expected.constituents = Some(constituents);
        assert_eq!(store.staleness(&key, &expected), Staleness::Fresh);

        expected.constituents = Some(Vec::new());
        assert_eq!(
            store.staleness(&key, &expected),
            Staleness::ConstituentsChanged
        );
    }

    #[test]
    fn test_range_and_recording_namespaces_are_disjoint() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let range = ArtifactKey::range(day, day);
        let lookalike = ArtifactKey::recording(range.to_string());
        assert_eq!(lookalike.to_string(), "range-20240101-20240101");

        let store = CacheStore::new(MemoryStorage::new());
        store.write(&lookalike, &artifact(), "fp", "cfg", Vec::new()).unwrap();
        store.write(&range, &CacheArtifact::empty(), "fp", "cfg", Vec::new()).unwrap();

        assert_eq!(store.read(&lookalike).unwrap().artifact, artifact());
        assert_eq!(store.read(&range).unwrap().artifact, CacheArtifact::empty());
        assert_eq!(store.storage().names().len(), 4);
    }

    #[test]
    fn test_remove() {
        let store = CacheStore::new(MemoryStorage::new());
        store.write(&r1(), &artifact(), "fp", "cfg", Vec::new()).unwrap();
        store.remove(&r1()).unwrap();
        store.remove(&r1()).unwrap();
        assert!(store.storage().names().is_empty());
    }

    #[test]
    fn test_directory_names_are_distinct() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DirectoryStorage::new(dir.path()).unwrap();

        let names = ["ride/1.cpx", "ride_1.cpx", "ride%2F1.cpx", "../ride.cpx"];
        for (i, name) in names.iter().enumerate() {
            storage.write_blob(name, &[i as u8]).unwrap();
        }
        for (i, name) in names.iter().enumerate() {
            assert_eq!(storage.read_blob(name).unwrap(), Some(vec![i as u8]), "{}", name);
            assert!(storage.path_for(name).starts_with(dir.path()));
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), names.len());
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DirectoryStorage::new(dir.path()).unwrap();
        // A directory where the blob should go makes the final rename fail
        fs::create_dir(storage.path_for("r1.cpx")).unwrap();
        fs::write(storage.path_for("r1.cpx").join("occupied"), b"x").unwrap();

        assert!(storage.write_blob("r1.cpx", &[1, 2, 3]).is_err());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_prefix() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DirectoryStorage::new(dir.path()).unwrap();
        storage.write_blob("r1.cpx", &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(storage.read_prefix("r1.cpx", 4).unwrap(), Some(vec![1, 2, 3, 4]));
        assert_eq!(storage.read_prefix("missing.cpx", 4).unwrap(), None);
        assert_eq!(
            MemoryStorage::new().read_prefix("missing.cpx", 4).unwrap(),
            None
        );
    }
}
