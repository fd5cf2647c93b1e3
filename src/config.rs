//! Cache configuration.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::channel::Channel;
use crate::error::Result;

/// Rolling-average plus power-law weighting applied to a source series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyWeighting {
    /// Rolling average window in seconds (1 = no smoothing)
    pub window_secs: u32,
    /// Exponent applied to the smoothed value before averaging
    pub exponent: f64,
}

impl EnergyWeighting {
    /// 30 second rolling average, fourth power.
    pub fn normalized() -> Self {
        Self {
            window_secs: 30,
            exponent: 4.0,
        }
    }

    /// Cube weighting without smoothing.
    pub fn cube() -> Self {
        Self {
            window_secs: 1,
            exponent: 3.0,
        }
    }
}

/// Configuration for [`crate::RideStatsCache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Compare recording fingerprints when deciding staleness
    pub content_check: bool,
    /// Decoded artifacts kept in memory
    pub memo_capacity: usize,
    /// Weighting for the normalized power channel
    pub normalized: EnergyWeighting,
    /// Weighting for the cube power channel
    pub cube: EnergyWeighting,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            content_check: true,
            memo_capacity: 32,
            normalized: EnergyWeighting::normalized(),
            cube: EnergyWeighting::cube(),
        }
    }
}

impl CacheConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Weighting used to derive `channel`, if it is a derived channel.
    pub fn weighting_for(&self, channel: Channel) -> Option<EnergyWeighting> {
        match channel {
            Channel::NormalizedPower => Some(self.normalized),
            Channel::CubePower => Some(self.cube),
            _ => None,
        }
    }

    /// Digest of everything that changes computed output.
    ///
    /// Stored alongside each artifact; a different digest makes it stale.
    pub fn output_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for weighting in [self.normalized, self.cube] {
            hasher.update(weighting.window_secs.to_le_bytes());
            hasher.update(weighting.exponent.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }
}
