//! Channel model: the recorded and derived series the cache covers.
//!
//! Each channel has a fixed precision and value domain. Per-channel data is
//! held in a [`ChannelMap`], a table indexed by channel, so that adding a
//! channel means adding a table entry rather than touching every call site.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// A series supported by the cache.
///
/// Declaration order is the serialization order of the artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    Power,
    HeartRate,
    Cadence,
    Torque,
    Speed,
    /// Power with cube-root energy weighting
    CubePower,
    /// Power after a rolling average and fourth-power weighting
    NormalizedPower,
}

impl Channel {
    pub const COUNT: usize = 7;

    /// All channels in artifact order.
    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::Power,
        Channel::HeartRate,
        Channel::Cadence,
        Channel::Torque,
        Channel::Speed,
        Channel::CubePower,
        Channel::NormalizedPower,
    ];

    /// Position in the fixed channel order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Number of decimal places kept when values are stored as integers.
    pub fn decimal_places(self) -> u32 {
        match self {
            Channel::Torque => 2,
            Channel::Speed => 1,
            _ => 0,
        }
    }

    /// Multiplier between stored integers and real values (`10^decimal_places`).
    pub fn scale(self) -> f64 {
        10f64.powi(self.decimal_places() as i32)
    }

    pub fn min_value(self) -> f64 {
        0.0
    }

    pub fn max_value(self) -> f64 {
        match self {
            Channel::Power | Channel::CubePower | Channel::NormalizedPower => 2500.0,
            Channel::HeartRate => 250.0,
            Channel::Cadence => 300.0,
            Channel::Torque => 300.0,
            Channel::Speed => 150.0,
        }
    }

    /// Channel this one is computed from, if it is not sampled directly.
    pub fn source(self) -> Option<Channel> {
        match self {
            Channel::CubePower | Channel::NormalizedPower => Some(Channel::Power),
            _ => None,
        }
    }

    pub fn is_derived(self) -> bool {
        self.source().is_some()
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Power => "power",
            Channel::HeartRate => "heart_rate",
            Channel::Cadence => "cadence",
            Channel::Torque => "torque",
            Channel::Speed => "speed",
            Channel::CubePower => "cube_power",
            Channel::NormalizedPower => "normalized_power",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CacheError::UnknownChannel {
                name: s.to_string(),
            })
    }
}

impl TryFrom<u32> for Channel {
    type Error = CacheError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Channel::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| CacheError::UnknownChannel {
                name: value.to_string(),
            })
    }
}

/// A value per channel, indexed by [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelMap<T> {
    slots: [T; Channel::COUNT],
}

impl<T> ChannelMap<T> {
    /// Build a table by evaluating `f` for every channel in order.
    pub fn from_fn(mut f: impl FnMut(Channel) -> T) -> Self {
        Self {
            slots: Channel::ALL.map(&mut f),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &T)> {
        Channel::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }

    /// Transform every entry, keeping the channel association.
    pub fn map<U>(self, mut f: impl FnMut(Channel, T) -> U) -> ChannelMap<U> {
        let mut position = 0;
        ChannelMap {
            slots: self.slots.map(|value| {
                let channel = Channel::ALL[position];
                position += 1;
                f(channel, value)
            }),
        }
    }
}

impl<T> Index<Channel> for ChannelMap<T> {
    type Output = T;

    fn index(&self, channel: Channel) -> &T {
        &self.slots[channel.index()]
    }
}

impl<T> IndexMut<Channel> for ChannelMap<T> {
    fn index_mut(&mut self, channel: Channel) -> &mut T {
        &mut self.slots[channel.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_order() {
        for (i, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
            assert_eq!(Channel::try_from(i as u32).unwrap(), *channel);
        }
    }

    #[test]
    fn test_precision_and_domain() {
        assert_eq!(Channel::Power.decimal_places(), 0);
        assert_eq!(Channel::Speed.scale(), 10.0);
        assert_eq!(Channel::Torque.scale(), 100.0);
        assert!(Channel::ALL
            .iter()
            .all(|c| c.min_value() < c.max_value()));
    }

    #[test]
    fn test_dependency_graph() {
        assert_eq!(Channel::NormalizedPower.source(), Some(Channel::Power));
        assert_eq!(Channel::CubePower.source(), Some(Channel::Power));
        let raw: Vec<_> = Channel::ALL.iter().filter(|c| !c.is_derived()).collect();
        assert_eq!(raw.len(), 5);
        // Sources are never derived themselves
        assert!(Channel::ALL
            .iter()
            .filter_map(|c| c.source())
            .all(|s| !s.is_derived()));
    }

    #[test]
    fn test_unknown_channel() {
        assert_eq!("POWER".parse::<Channel>().unwrap(), Channel::Power);
        assert!(matches!(
            "altitude".parse::<Channel>(),
            Err(CacheError::UnknownChannel { .. })
        ));
        assert!(matches!(
            Channel::try_from(7),
            Err(CacheError::UnknownChannel { .. })
        ));
    }

    #[test]
    fn test_channel_map() {
        let mut map = ChannelMap::from_fn(|c| c.index() * 10);
        map[Channel::Speed] = 99;
        assert_eq!(map[Channel::Cadence], 20);
        assert_eq!(map[Channel::Speed], 99);

        let names = map.map(|c, _| c.name());
        assert_eq!(names[Channel::NormalizedPower], "normalized_power");
    }
}
