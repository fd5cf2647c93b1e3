//! # Parallel Dispatch
//!
//! Builds a complete artifact for one recording. Channels are computed in
//! dependency levels: every channel whose source is ready runs as its own
//! task, the level joins, and the next level (the derived channels) reads
//! the finished results. Each task returns an owned result; nothing is
//! shared mutably between tasks.

use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::artifact::CacheArtifact;
use crate::channel::{Channel, ChannelMap};
use crate::config::CacheConfig;
use crate::curves::{mean_max_from_series, resample_to_seconds, MeanMaxCurve};
use crate::derived::DerivedRule;
use crate::distribution::{compute_distribution, Distribution};
use crate::source::Recording;

/// Output of one channel task.
#[derive(Debug, Clone)]
struct ChannelResult {
    channel: Channel,
    curve: MeanMaxCurve,
    distribution: Distribution,
    /// 1 second series, kept for channels derived from this one
    series: Vec<f64>,
}

impl ChannelResult {
    fn empty(channel: Channel) -> Self {
        Self {
            channel,
            curve: MeanMaxCurve::default(),
            distribution: Distribution::empty(channel),
            series: Vec::new(),
        }
    }
}

/// Compute curves and distributions for every channel of a recording.
///
/// Output is deterministic: the same recording and configuration always
/// produce the same artifact, whatever the scheduling.
pub fn compute_artifact(recording: &Recording, config: &CacheConfig) -> CacheArtifact {
    let start = Instant::now();
    let mut results: ChannelMap<Option<ChannelResult>> = ChannelMap::default();
    let mut pending: Vec<Channel> = Channel::ALL.to_vec();
    let mut levels = 0;

    while !pending.is_empty() {
        let (ready, blocked): (Vec<Channel>, Vec<Channel>) = pending
            .iter()
            .partition(|c| c.source().map_or(true, |s| results[s].is_some()));

        if ready.is_empty() {
            log::warn!(
                "[Engine] Unresolvable channel dependencies for {:?}, leaving them empty",
                blocked
            );
            for channel in blocked {
                results[channel] = Some(ChannelResult::empty(channel));
            }
            break;
        }

        let finished = &results;
        let computed = dispatch(&ready, |channel| {
            compute_channel(channel, recording, finished, config)
        });
        for result in computed {
            let channel = result.channel;
            results[channel] = Some(result);
        }
        pending = blocked;
        levels += 1;
    }

    let artifact = assemble(results);
    log::info!(
        "[Engine] Computed '{}' ({:.0}s) in {:?} over {} levels",
        recording.id,
        recording.duration_secs,
        start.elapsed(),
        levels
    );
    artifact
}

/// Run one task per channel and wait for all of them.
#[cfg(feature = "parallel")]
fn dispatch<F>(channels: &[Channel], task: F) -> Vec<ChannelResult>
where
    F: Fn(Channel) -> ChannelResult + Sync + Send,
{
    channels.par_iter().map(|&channel| task(channel)).collect()
}

#[cfg(not(feature = "parallel"))]
fn dispatch<F>(channels: &[Channel], task: F) -> Vec<ChannelResult>
where
    F: Fn(Channel) -> ChannelResult,
{
    channels.iter().map(|&channel| task(channel)).collect()
}

fn compute_channel(
    channel: Channel,
    recording: &Recording,
    finished: &ChannelMap<Option<ChannelResult>>,
    config: &CacheConfig,
) -> ChannelResult {
    match channel.source() {
        None => {
            let samples = recording.samples(channel);
            let series =
                resample_to_seconds(samples, recording.interval_secs, recording.duration_secs);
            ChannelResult {
                channel,
                curve: mean_max_from_series(&series, channel),
                distribution: compute_distribution(samples, channel),
                series,
            }
        }
        Some(source) => {
            let (Some(rule), Some(source_result)) = (
                DerivedRule::for_channel(channel, config),
                finished[source].as_ref(),
            ) else {
                return ChannelResult::empty(channel);
            };
            let (curve, distribution) =
                rule.apply(&source_result.series, &source_result.distribution);
            ChannelResult {
                channel,
                curve,
                distribution,
                series: Vec::new(),
            }
        }
    }
}

fn assemble(results: ChannelMap<Option<ChannelResult>>) -> CacheArtifact {
    let results = results.map(|channel, result| result.unwrap_or_else(|| ChannelResult::empty(channel)));
    CacheArtifact {
        curves: ChannelMap::from_fn(|c| results[c].curve.clone()),
        distributions: ChannelMap::from_fn(|c| results[c].distribution.clone()),
    }
}
