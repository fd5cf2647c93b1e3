//! # Aggregator
//!
//! Best-of-range artifacts. For every duration the aggregate curve keeps the
//! highest value any recording in the range reached, dated with the day it
//! was set; distributions are summed, since time spent in a bin is additive.
//!
//! Each constituent is refreshed through the normal per-recording path
//! before merging, so an aggregate is never built from a stale artifact.
//! The aggregate itself is cached under [`range_key`], a namespace separate
//! from recording ids, and goes stale when the set of constituents or any of
//! their artifacts changes.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;

use crate::artifact::CacheArtifact;
use crate::cache::{CacheLookup, RideStatsCache};
use crate::channel::{Channel, ChannelMap};
use crate::curves::MeanMaxCurve;
use crate::distribution::Distribution;
use crate::error::Result;
use crate::format::encode_artifact;
use crate::source::RecordingSource;
use crate::store::{artifact_digest, ArtifactKey, ArtifactStorage, Constituent};

/// Cache key for the aggregate over `[start, end]`.
pub fn range_key(start: NaiveDate, end: NaiveDate) -> ArtifactKey {
    ArtifactKey::range(start, end)
}

/// Merge per-recording artifacts into one best-of-range artifact.
///
/// Ties on a curve value keep the earliest date. Every slot of a non-empty
/// merged curve carries a date.
pub fn merge_artifacts(members: &[(NaiveDate, &CacheArtifact)]) -> CacheArtifact {
    let mut ordered: Vec<(NaiveDate, &CacheArtifact)> = members.to_vec();
    ordered.sort_by_key(|(date, _)| *date);

    CacheArtifact {
        curves: ChannelMap::from_fn(|channel| merge_curves(channel, &ordered)),
        distributions: ChannelMap::from_fn(|channel| merge_distributions(channel, &ordered)),
    }
}

/// Members must be in ascending date order.
fn merge_curves(channel: Channel, members: &[(NaiveDate, &CacheArtifact)]) -> MeanMaxCurve {
    let len = members
        .iter()
        .map(|(_, artifact)| artifact.curves[channel].len())
        .max()
        .unwrap_or(0);

    let mut best: Vec<Option<(u32, NaiveDate)>> = vec![None; len];
    for (date, artifact) in members {
        for (slot, &value) in best.iter_mut().zip(&artifact.curves[channel].values) {
            match slot {
                Some((current, _)) if value <= *current => {}
                _ => *slot = Some((value, *date)),
            }
        }
    }

    // A member covering slot i also covers every slot before it
    let (values, dates) = best.into_iter().flatten().unzip();
    MeanMaxCurve { values, dates }
}

fn merge_distributions(channel: Channel, members: &[(NaiveDate, &CacheArtifact)]) -> Distribution {
    let mut bins = Distribution::empty(channel).bins;
    for (_, artifact) in members {
        let member = &artifact.distributions[channel].bins;
        if member.len() > bins.len() {
            bins.resize(member.len(), 0);
        }
        for (total, &count) in bins.iter_mut().zip(member) {
            *total = total.saturating_add(count);
        }
    }
    Distribution::from_bins(bins)
}

impl<S: ArtifactStorage> RideStatsCache<S> {
    /// Best-of-range artifact for every recording dated within `[start, end]`.
    ///
    /// Constituents are refreshed first; a source failure for any of them
    /// fails the aggregate.
    pub fn aggregate(
        &self,
        source: &dyn RecordingSource,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CacheLookup> {
        let key = range_key(start, end);
        let infos = source.recordings_between(start, end);

        let mut members: Vec<(NaiveDate, Arc<CacheArtifact>)> = Vec::with_capacity(infos.len());
        let mut constituents = Vec::with_capacity(infos.len());
        for info in &infos {
            let lookup = self.refresh(info, source)?;
            constituents.push(Constituent {
                id: info.id.clone(),
                digest: artifact_digest(&encode_artifact(&lookup.artifact)),
            });
            members.push((info.date, lookup.artifact));
        }

        let fingerprint = format!("{}..{}", start, end);
        let expected = self.provenance(&fingerprint, Some(constituents.clone()));
        self.resolve(&key, &expected, || {
            let started = Instant::now();
            let refs: Vec<(NaiveDate, &CacheArtifact)> = members
                .iter()
                .map(|(date, artifact)| (*date, artifact.as_ref()))
                .collect();
            let merged = merge_artifacts(&refs);
            log::info!(
                "[Aggregator] Merged {} recordings into '{}' in {:?}",
                refs.len(),
                key,
                started.elapsed()
            );
            Ok((merged, constituents))
        })
    }
}
