//! Value distributions (time spent at each value) for recorded channels.
//!
//! Bins run from the channel minimum to its maximum in steps of 1 unit, or
//! 0.1 unit for channels with decimal places. Values outside the domain are
//! clamped into the boundary bins, so the total recorded time is conserved.
//!
//! ## Example
//! ```rust
//! use ride_stats_cache::distribution::{distribution_from_series, distribution_bin_width};
//! use ride_stats_cache::Channel;
//!
//! let hr = vec![120.0, 121.0, 121.0, 300.0];
//! let dist = distribution_from_series(&hr, Channel::HeartRate);
//! assert_eq!(dist.bins[121], 2);
//! assert_eq!(dist.total(), 4);
//! assert_eq!(distribution_bin_width(Channel::HeartRate), 1.0);
//! ```

use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::channel::Channel;
use crate::source::Sample;

/// Below this many samples the binning stays sequential.
#[cfg(feature = "parallel")]
const PARALLEL_SAMPLE_THRESHOLD: usize = 10_000;

/// Guards against `0.3 / 0.1 == 2.9999999999999996` style truncation.
const BIN_EPSILON: f64 = 1e-9;

/// Time at each value for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Distribution {
    /// Duration per bin in sampling units (seconds for 1 Hz data)
    pub bins: Vec<u32>,
}

impl Distribution {
    pub fn from_bins(bins: Vec<u32>) -> Self {
        Self { bins }
    }

    /// All-zero distribution with the channel's full bin range.
    pub fn empty(channel: Channel) -> Self {
        Self {
            bins: vec![0; bin_count(channel)],
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Total duration across all bins.
    pub fn total(&self) -> u64 {
        self.bins.iter().map(|&b| b as u64).sum()
    }

    pub fn is_all_zero(&self) -> bool {
        self.bins.iter().all(|&b| b == 0)
    }

    pub fn to_f64(&self) -> Vec<f64> {
        self.bins.iter().map(|&b| b as f64).collect()
    }

    /// Duration recorded in the bin holding `value`.
    pub fn duration_at(&self, value: f64, channel: Channel) -> u32 {
        self.bins
            .get(bin_index(value, channel))
            .copied()
            .unwrap_or(0)
    }
}

/// Width of one distribution bin in channel units.
pub fn distribution_bin_width(channel: Channel) -> f64 {
    1.0 / bins_per_unit(channel) as f64
}

fn bins_per_unit(channel: Channel) -> u32 {
    if channel.decimal_places() == 0 {
        1
    } else {
        10
    }
}

/// Number of bins: `ceil((max - min) / width) + 1`.
pub fn bin_count(channel: Channel) -> usize {
    let span = (channel.max_value() - channel.min_value()) * bins_per_unit(channel) as f64;
    span.ceil() as usize + 1
}

/// Bin holding `value`, clamping out-of-domain values to the boundary bins.
pub fn bin_index(value: f64, channel: Channel) -> usize {
    let clamped = value.clamp(channel.min_value(), channel.max_value());
    let offset = (clamped - channel.min_value()) * bins_per_unit(channel) as f64;
    ((offset + BIN_EPSILON).floor() as usize).min(bin_count(channel) - 1)
}

/// Representative (lower edge) value of a bin.
pub fn bin_value(index: usize, channel: Channel) -> f64 {
    channel.min_value() + index as f64 * distribution_bin_width(channel)
}

/// Distribution of a raw sample sequence; each valid sample adds one
/// sampling interval to its bin. Missing values are skipped.
pub fn compute_distribution(samples: &[Sample], channel: Channel) -> Distribution {
    let values: Vec<f64> = samples
        .iter()
        .filter(|s| s.is_valid())
        .map(|s| s.value)
        .collect();
    distribution_from_series(&values, channel)
}

/// Distribution of a value series where every entry counts as one unit.
pub fn distribution_from_series(values: &[f64], channel: Channel) -> Distribution {
    let count = bin_count(channel);

    #[cfg(feature = "parallel")]
    if values.len() >= PARALLEL_SAMPLE_THRESHOLD {
        let bins = values
            .par_iter()
            .filter(|v| v.is_finite())
            .fold(
                || vec![0u32; count],
                |mut bins, &value| {
                    bins[bin_index(value, channel)] += 1;
                    bins
                },
            )
            .reduce(
                || vec![0u32; count],
                |mut b1, b2| {
                    for (a, b) in b1.iter_mut().zip(b2) {
                        *a += b;
                    }
                    b1
                },
            );
        return Distribution { bins };
    }

    let mut bins = vec![0u32; count];
    for &value in values.iter().filter(|v| v.is_finite()) {
        bins[bin_index(value, channel)] += 1;
    }
    Distribution { bins }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_layout() {
        assert_eq!(bin_count(Channel::Power), 2501);
        assert_eq!(bin_count(Channel::Speed), 1501);
        assert_eq!(bin_count(Channel::Torque), 3001);
        assert_eq!(distribution_bin_width(Channel::Torque), 0.1);
        assert_eq!(distribution_bin_width(Channel::Cadence), 1.0);
    }

    #[test]
    fn test_bin_index() {
        assert_eq!(bin_index(0.3, Channel::Speed), 3);
        assert_eq!(bin_index(27.15, Channel::Speed), 271);
        assert_eq!(bin_index(99.9, Channel::Power), 99);
        // Out of domain clamps to the edges
        assert_eq!(bin_index(-10.0, Channel::Power), 0);
        assert_eq!(bin_index(9000.0, Channel::Power), 2500);
        assert!((bin_value(271, Channel::Speed) - 27.1).abs() < 1e-9);
    }

    #[test]
    fn test_reference_ride() {
        let values = [100.0, 100.0, 100.0, 200.0, 200.0, 200.0, 100.0, 100.0, 100.0, 100.0];
        let samples: Vec<Sample> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(i as f64, v))
            .collect();
        let dist = compute_distribution(&samples, Channel::Power);

        assert_eq!(dist.bins[100], 7);
        assert_eq!(dist.bins[200], 3);
        assert_eq!(dist.total(), 10);
        assert_eq!(dist.duration_at(200.0, Channel::Power), 3);
    }

    #[test]
    fn test_duration_conserved_with_clamping() {
        let values = vec![-5.0, 0.0, 150.0, 4000.0, f64::NAN];
        let dist = distribution_from_series(&values, Channel::HeartRate);
        // NaN is missing, everything else is kept
        assert_eq!(dist.total(), 4);
        assert_eq!(dist.bins[0], 2);
        assert_eq!(dist.bins[250], 1);
    }

    #[test]
    fn test_empty_input() {
        let dist = compute_distribution(&[], Channel::Cadence);
        assert_eq!(dist.len(), bin_count(Channel::Cadence));
        assert!(dist.is_all_zero());
        assert_eq!(dist, Distribution::empty(Channel::Cadence));
    }

    #[test]
    fn test_large_input_matches_small_path() {
        let values: Vec<f64> = (0..25_000).map(|i| (i % 400) as f64 * 0.5).collect();
        let dist = distribution_from_series(&values, Channel::Power);
        assert_eq!(dist.total(), 25_000);

        let mut expected = vec![0u32; bin_count(Channel::Power)];
        for &v in &values {
            expected[v as usize] += 1;
        }
        assert_eq!(dist.bins, expected);
    }
}
