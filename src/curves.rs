//! Mean-maximal curve computation.
//!
//! A mean-maximal curve holds, for every duration from 1 second to the
//! recording length, the best average value sustained over that duration.
//!
//! ## Pipeline
//! 1. Resample the raw samples onto a uniform 1 second grid
//! 2. Find the best rolling average for each window length with a sliding window
//! 3. Enforce the non-increasing shape and quantize to `10^decimal_places`
//!
//! ## Example
//! ```rust
//! use ride_stats_cache::curves::{mean_max_from_series, CURVE_BIN_WIDTH};
//! use ride_stats_cache::Channel;
//!
//! let power = vec![200.0, 250.0, 300.0, 280.0, 260.0];
//! let curve = mean_max_from_series(&power, Channel::Power);
//! assert_eq!(curve.value_at(1), Some(300));
//! assert_eq!(CURVE_BIN_WIDTH, 1.0);
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::channel::Channel;
use crate::source::Sample;

/// Curves are always sampled at 1 second, whatever the recording interval.
pub const CURVE_BIN_WIDTH: f64 = 1.0;

/// Below this many durations the per-window search stays sequential.
#[cfg(feature = "parallel")]
const PARALLEL_DURATION_THRESHOLD: usize = 1_000;

/// Best average value per duration for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeanMaxCurve {
    /// Entry `d - 1` is the best `d`-second average, scaled by `10^decimal_places`
    pub values: Vec<u32>,
    /// Date each best was set. Only aggregated curves carry dates.
    pub dates: Vec<NaiveDate>,
}

impl MeanMaxCurve {
    pub fn from_values(values: Vec<u32>) -> Self {
        Self {
            values,
            dates: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stored value for a duration in seconds (1-based).
    pub fn value_at(&self, duration_secs: usize) -> Option<u32> {
        duration_secs
            .checked_sub(1)
            .and_then(|i| self.values.get(i))
            .copied()
    }

    /// Date the best for a duration was set, if this curve carries dates.
    pub fn date_at(&self, duration_secs: usize) -> Option<NaiveDate> {
        duration_secs
            .checked_sub(1)
            .and_then(|i| self.dates.get(i))
            .copied()
    }

    /// Values descaled to channel units.
    pub fn to_f64(&self, channel: Channel) -> Vec<f64> {
        let scale = channel.scale();
        self.values.iter().map(|&v| v as f64 / scale).collect()
    }
}

/// Compute the mean-maximal curve of a raw sample sequence.
///
/// # Arguments
/// * `samples` - Time-ordered samples for the channel
/// * `interval_secs` - Nominal recording interval
/// * `duration_secs` - Recording duration; the curve has `floor(duration_secs)` entries
/// * `channel` - Channel the samples belong to (controls quantization)
///
/// A sequence without valid samples yields an empty curve.
pub fn compute_mean_max(
    samples: &[Sample],
    interval_secs: f64,
    duration_secs: f64,
    channel: Channel,
) -> MeanMaxCurve {
    let series = resample_to_seconds(samples, interval_secs, duration_secs);
    mean_max_from_series(&series, channel)
}

/// Compute the mean-maximal curve of a series already on a 1 second grid.
pub fn mean_max_from_series(series: &[f64], channel: Channel) -> MeanMaxCurve {
    let values = best_averages(series)
        .into_iter()
        .map(|avg| quantize(avg, channel))
        .collect();
    MeanMaxCurve::from_values(values)
}

/// Resample onto a 1 second grid starting at 0.
///
/// Each sample covers `[secs, secs + interval)`, cut short by the next sample
/// when the recording is denser than its nominal interval. Every bucket gets
/// the time-weighted mean of the samples covering it; seconds nobody covers
/// (recording gaps) are 0. Seconds past `floor(duration_secs)` are dropped.
pub fn resample_to_seconds(samples: &[Sample], interval_secs: f64, duration_secs: f64) -> Vec<f64> {
    let bucket_count = if duration_secs.is_finite() && duration_secs > 0.0 {
        duration_secs.floor() as usize
    } else {
        0
    };
    let valid: Vec<&Sample> = samples.iter().filter(|s| s.is_valid()).collect();
    if bucket_count == 0 || valid.is_empty() {
        return Vec::new();
    }

    let interval = if interval_secs > 0.0 { interval_secs } else { 1.0 };
    let limit = bucket_count as f64;
    let mut sums = vec![0.0f64; bucket_count];
    let mut covered = vec![0.0f64; bucket_count];

    for (i, sample) in valid.iter().enumerate() {
        let start = sample.secs.max(0.0);
        let mut end = (sample.secs + interval).min(limit);
        if let Some(next) = valid.get(i + 1) {
            if next.secs > sample.secs {
                end = end.min(next.secs);
            }
        }

        let mut t = start;
        while t < end {
            let bucket = t.floor() as usize;
            if bucket >= bucket_count {
                break;
            }
            let bucket_end = ((bucket + 1) as f64).min(end);
            let overlap = bucket_end - t;
            sums[bucket] += sample.value * overlap;
            covered[bucket] += overlap;
            t = bucket_end;
        }
    }

    sums.iter()
        .zip(covered.iter())
        .map(|(&sum, &time)| if time > 0.0 { sum / time } else { 0.0 })
        .collect()
}

/// Best average for every window length `1..=series.len()`, made non-increasing.
///
/// Raw window maxima are not monotone (`[10, 0, 10]` averages 5 over two
/// seconds but 6.67 over three), so each entry is lifted to the best of any
/// longer window: the best average sustained for at least `d` seconds.
pub(crate) fn best_averages(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }

    #[cfg(feature = "parallel")]
    let mut bests: Vec<f64> = if n >= PARALLEL_DURATION_THRESHOLD {
        (1..=n)
            .into_par_iter()
            .map(|window| compute_best_avg(series, window))
            .collect()
    } else {
        (1..=n).map(|window| compute_best_avg(series, window)).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let mut bests: Vec<f64> = (1..=n).map(|window| compute_best_avg(series, window)).collect();

    for i in (0..n - 1).rev() {
        if bests[i] < bests[i + 1] {
            bests[i] = bests[i + 1];
        }
    }
    bests
}

/// Best average for one window size using a running sum.
fn compute_best_avg(series: &[f64], window_size: usize) -> f64 {
    if window_size == 0 || series.len() < window_size {
        return 0.0;
    }

    let mut window_sum: f64 = series[..window_size].iter().sum();
    let mut best_sum = window_sum;

    for i in window_size..series.len() {
        window_sum += series[i] - series[i - window_size];
        if window_sum > best_sum {
            best_sum = window_sum;
        }
    }

    best_sum / window_size as f64
}

/// Scale to the channel's integer storage form.
pub fn quantize(value: f64, channel: Channel) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    (value * channel.scale()).round().clamp(0.0, u32::MAX as f64) as u32
}
