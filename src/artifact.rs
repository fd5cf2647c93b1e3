//! In-memory form of a cache artifact: one curve and one distribution per channel.

use chrono::NaiveDate;

use crate::channel::{Channel, ChannelMap};
use crate::curves::{MeanMaxCurve, CURVE_BIN_WIDTH};
use crate::distribution::Distribution;

/// Curves and distributions for every channel of one recording or date range.
///
/// Artifacts are immutable once built; a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheArtifact {
    pub curves: ChannelMap<MeanMaxCurve>,
    pub distributions: ChannelMap<Distribution>,
}

impl CacheArtifact {
    /// Artifact for a recording without data: empty curves, zeroed distributions.
    pub fn empty() -> Self {
        Self {
            curves: ChannelMap::default(),
            distributions: ChannelMap::from_fn(Distribution::empty),
        }
    }

    /// Mean-maximal curve in channel units, index 0 = 1 second.
    pub fn curve(&self, channel: Channel) -> Vec<f64> {
        self.curves[channel].to_f64(channel)
    }

    /// Dates the curve bests were set (aggregates only).
    pub fn curve_dates(&self, channel: Channel) -> &[NaiveDate] {
        &self.curves[channel].dates
    }

    pub fn distribution(&self, channel: Channel) -> Vec<f64> {
        self.distributions[channel].to_f64()
    }

    pub fn curve_values(&self, channel: Channel) -> &MeanMaxCurve {
        &self.curves[channel]
    }

    pub fn distribution_values(&self, channel: Channel) -> &Distribution {
        &self.distributions[channel]
    }

    /// True when no channel has curve data.
    pub fn has_no_curves(&self) -> bool {
        self.curves.values().all(MeanMaxCurve::is_empty)
    }
}

/// Width of a curve step in seconds; always 1.
pub fn curve_bin_width(_channel: Channel) -> f64 {
    CURVE_BIN_WIDTH
}
