//! Recording data source types.
//!
//! Parsing recordings is someone else's job. The cache only needs a
//! time-ordered sample sequence per channel, the recording date, and a
//! fingerprint that changes whenever the underlying data changes.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelMap};
use crate::error::{CacheError, Result};

/// One timestamped value. Non-finite values are treated as missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Elapsed seconds since the recording started
    pub secs: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(secs: f64, value: f64) -> Self {
        Self { secs, value }
    }

    pub fn is_valid(&self) -> bool {
        self.secs.is_finite() && self.value.is_finite()
    }
}

/// Metadata needed to decide staleness without loading samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub id: String,
    pub date: NaiveDate,
    /// Opaque marker that changes when the recording's data changes
    /// (modification time, content hash, ...)
    pub fingerprint: String,
}

/// A fully loaded recording.
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: String,
    pub date: NaiveDate,
    pub fingerprint: String,
    /// Nominal sampling interval in seconds
    pub interval_secs: f64,
    pub duration_secs: f64,
    series: ChannelMap<Vec<Sample>>,
}

impl Recording {
    /// Create an empty recording. Duration grows as series are added.
    pub fn new(id: impl Into<String>, date: NaiveDate, interval_secs: f64) -> Self {
        Self {
            id: id.into(),
            date,
            fingerprint: String::new(),
            interval_secs,
            duration_secs: 0.0,
            series: ChannelMap::default(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Override the duration derived from the samples.
    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Attach a sample sequence for a recorded channel.
    ///
    /// Derived channels are always rebuilt from their source, so series
    /// supplied for them are kept but never read by the engine.
    pub fn with_series(mut self, channel: Channel, samples: Vec<Sample>) -> Self {
        if let Some(last) = samples.iter().rev().find(|s| s.secs.is_finite()) {
            self.duration_secs = self.duration_secs.max(last.secs + self.interval_secs);
        }
        self.series[channel] = samples;
        self
    }

    /// Attach evenly spaced values starting at 0 seconds.
    pub fn with_values(self, channel: Channel, values: &[f64]) -> Self {
        let interval = self.interval_secs;
        let samples = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(i as f64 * interval, v))
            .collect();
        self.with_series(channel, samples)
    }

    pub fn samples(&self, channel: Channel) -> &[Sample] {
        &self.series[channel]
    }

    pub fn info(&self) -> RecordingInfo {
        RecordingInfo {
            id: self.id.clone(),
            date: self.date,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Supplies recordings to the cache.
pub trait RecordingSource: Sync {
    /// Every recording known to the source.
    fn recordings(&self) -> Vec<RecordingInfo>;

    /// Load samples for one recording.
    fn load(&self, id: &str) -> Result<Recording>;

    /// Recordings dated within `[start, end]`, oldest first.
    fn recordings_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<RecordingInfo> {
        let mut infos: Vec<RecordingInfo> = self
            .recordings()
            .into_iter()
            .filter(|info| info.date >= start && info.date <= end)
            .collect();
        infos.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        infos
    }
}

/// A source backed by recordings held in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    recordings: HashMap<String, Recording>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a recording.
    pub fn insert(&mut self, recording: Recording) {
        self.recordings.insert(recording.id.clone(), recording);
    }

    pub fn remove(&mut self, id: &str) -> Option<Recording> {
        self.recordings.remove(id)
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }
}

impl RecordingSource for MemorySource {
    fn recordings(&self) -> Vec<RecordingInfo> {
        self.recordings.values().map(Recording::info).collect()
    }

    fn load(&self, id: &str) -> Result<Recording> {
        self.recordings
            .get(id)
            .cloned()
            .ok_or_else(|| CacheError::Source {
                recording_id: id.to_string(),
                message: "not present in memory source".to_string(),
            })
    }
}
