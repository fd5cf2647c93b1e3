//! Derived channels: series computed from another channel's data.
//!
//! Each derived channel declares its source through [`Channel::source`] and
//! a [`DerivedRule`] describing the transform. The engine evaluates rules
//! only after the source channel's resampled series and distribution exist.
//!
//! Both current rules weight the source power series: a rolling average
//! over `window_secs`, raised to `exponent`. The curve is the `exponent`-th
//! root of the mean-maximal curve of the weighted series, which keeps it in
//! watts and preserves the non-increasing shape.

use crate::channel::Channel;
use crate::config::{CacheConfig, EnergyWeighting};
use crate::curves::{best_averages, quantize, MeanMaxCurve};
use crate::distribution::{bin_count, bin_index, bin_value, distribution_from_series, Distribution};

/// How a derived channel's distribution is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionRule {
    /// Bin the per-second equivalent (smoothed) series
    FromSeries,
    /// Rescale the source distribution's durations by each bin's energy share
    EnergyShare,
}

/// Transform deriving one channel from its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedRule {
    pub channel: Channel,
    pub source: Channel,
    pub weighting: EnergyWeighting,
    pub distribution: DistributionRule,
}

impl DerivedRule {
    /// Rule for `channel`, or `None` when the channel is sampled directly.
    pub fn for_channel(channel: Channel, config: &CacheConfig) -> Option<Self> {
        let source = channel.source()?;
        let weighting = config.weighting_for(channel)?;
        let distribution = match channel {
            Channel::CubePower => DistributionRule::EnergyShare,
            _ => DistributionRule::FromSeries,
        };
        Some(Self {
            channel,
            source,
            weighting,
            distribution,
        })
    }

    /// Compute the derived curve and distribution.
    ///
    /// `source_series` is the source channel on the 1 second grid and
    /// `source_distribution` its distribution. An empty source series gives
    /// an empty curve and an all-zero distribution.
    pub fn apply(
        &self,
        source_series: &[f64],
        source_distribution: &Distribution,
    ) -> (MeanMaxCurve, Distribution) {
        if source_series.is_empty() {
            return (MeanMaxCurve::default(), Distribution::empty(self.channel));
        }

        let smoothed = rolling_average(source_series, self.weighting.window_secs);
        let curve = weighted_mean_max(&smoothed, self.weighting.exponent, self.channel);
        let distribution = match self.distribution {
            DistributionRule::FromSeries => distribution_from_series(&smoothed, self.channel),
            DistributionRule::EnergyShare => redistribute_by_energy(
                source_distribution,
                self.source,
                self.channel,
                self.weighting.exponent,
            ),
        };
        (curve, distribution)
    }
}

/// Rolling average over `window` entries.
///
/// Leading entries divide the partial sum by the full window, so the first
/// `window - 1` values ramp up from zero.
pub fn rolling_average(series: &[f64], window: u32) -> Vec<f64> {
    let window = window.max(1) as usize;
    if window == 1 {
        return series.to_vec();
    }

    let mut sum = 0.0;
    series
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            sum += value;
            if i >= window {
                sum -= series[i - window];
            }
            sum / window as f64
        })
        .collect()
}

/// Mean-maximal curve of `smoothed^exponent`, mapped back with the root.
fn weighted_mean_max(smoothed: &[f64], exponent: f64, channel: Channel) -> MeanMaxCurve {
    let weighted: Vec<f64> = smoothed.iter().map(|&v| v.max(0.0).powf(exponent)).collect();
    let root = 1.0 / exponent;
    let values = best_averages(&weighted)
        .into_iter()
        .map(|best| quantize(best.max(0.0).powf(root), channel))
        .collect();
    MeanMaxCurve::from_values(values)
}

/// Rescale bin durations by `v^exponent / mean(v^exponent)`.
///
/// The mean is time-weighted, so the total duration is unchanged; rounding
/// uses largest remainders to keep it exact. With no energy at all every
/// bin is zero.
pub fn redistribute_by_energy(
    source: &Distribution,
    source_channel: Channel,
    target_channel: Channel,
    exponent: f64,
) -> Distribution {
    let mut target = vec![0u32; bin_count(target_channel)];
    let total_time = source.total();
    let energies: Vec<f64> = source
        .bins
        .iter()
        .enumerate()
        .map(|(i, &time)| time as f64 * bin_value(i, source_channel).max(0.0).powf(exponent))
        .collect();
    let total_energy: f64 = energies.iter().sum();
    if total_time == 0 || total_energy <= 0.0 || !total_energy.is_finite() {
        return Distribution::from_bins(target);
    }

    // (target bin, exact share)
    let shares: Vec<(usize, f64)> = energies
        .iter()
        .enumerate()
        .filter(|(_, &e)| e > 0.0)
        .map(|(i, &e)| {
            let value = bin_value(i, source_channel);
            (
                bin_index(value, target_channel),
                e / total_energy * total_time as f64,
            )
        })
        .collect();

    let mut assigned: u64 = 0;
    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(shares.len());
    for &(bin, share) in &shares {
        let whole = share.floor();
        target[bin] += whole as u32;
        assigned += whole as u64;
        remainders.push((bin, share - whole));
    }

    // Largest remainders first, lower bins win ties
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let leftover = total_time.saturating_sub(assigned) as usize;
    for &(bin, _) in remainders.iter().take(leftover) {
        target[bin] += 1;
    }

    Distribution::from_bins(target)
}
