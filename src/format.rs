//! Binary artifact format.
//!
//! ```text
//! header:   version: u32
//!           curve count: u32          x 7 (channel order)
//!           distribution count: u32   x 7 (channel order)
//! payload:  curve values: u32 x count, for each channel in order
//!           distribution bins: u32 x count, for each channel in order
//! ```
//!
//! Every field is a 32-bit unsigned integer in native byte order. Artifacts
//! are local caches and never move between machines. Curve dates are not
//! part of this layout; they travel in the artifact manifest.

use crate::artifact::CacheArtifact;
use crate::channel::{Channel, ChannelMap};
use crate::curves::MeanMaxCurve;
use crate::distribution::Distribution;
use crate::error::{CacheError, Result};

/// Current format version. Any layout change must bump it; older or newer
/// files are rebuilt, never migrated.
pub const CACHE_VERSION: u32 = 1;

const WORD: usize = std::mem::size_of::<u32>();

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = WORD * (1 + 2 * Channel::COUNT);

/// Version tag and per-channel element counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeader {
    pub version: u32,
    pub curve_counts: ChannelMap<u32>,
    pub distribution_counts: ChannelMap<u32>,
}

impl CacheHeader {
    /// Header describing `artifact` at the current version.
    pub fn for_artifact(artifact: &CacheArtifact) -> Self {
        Self {
            version: CACHE_VERSION,
            curve_counts: ChannelMap::from_fn(|c| artifact.curves[c].len() as u32),
            distribution_counts: ChannelMap::from_fn(|c| artifact.distributions[c].len() as u32),
        }
    }

    /// Payload size in bytes implied by the counts.
    pub fn payload_len(&self) -> usize {
        let words: usize = self
            .curve_counts
            .values()
            .chain(self.distribution_counts.values())
            .map(|&count| count as usize)
            .sum();
        words * WORD
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_ne_bytes());
        for &count in self.curve_counts.values() {
            out.extend_from_slice(&count.to_ne_bytes());
        }
        for &count in self.distribution_counts.values() {
            out.extend_from_slice(&count.to_ne_bytes());
        }
    }

    /// Decode a header, rejecting other versions before looking at counts.
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
        let mut reader = WordReader::new(bytes);
        let version = reader
            .next_word()
            .ok_or_else(|| CacheError::corrupt(key, "missing version"))?;
        if version != CACHE_VERSION {
            return Err(CacheError::VersionMismatch {
                key: key.to_string(),
                found: version,
                expected: CACHE_VERSION,
            });
        }
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::corrupt(
                key,
                format!("header needs {} bytes, found {}", HEADER_LEN, bytes.len()),
            ));
        }

        let mut counts = [0u32; 2 * Channel::COUNT];
        for count in counts.iter_mut() {
            *count = reader
                .next_word()
                .ok_or_else(|| CacheError::corrupt(key, "truncated header"))?;
        }
        Ok(Self {
            version,
            curve_counts: ChannelMap::from_fn(|c| counts[c.index()]),
            distribution_counts: ChannelMap::from_fn(|c| counts[Channel::COUNT + c.index()]),
        })
    }
}

/// Serialize an artifact into the version 1 layout.
pub fn encode_artifact(artifact: &CacheArtifact) -> Vec<u8> {
    let header = CacheHeader::for_artifact(artifact);
    let mut out = Vec::with_capacity(HEADER_LEN + header.payload_len());
    header.encode_into(&mut out);
    for curve in artifact.curves.values() {
        for &value in &curve.values {
            out.extend_from_slice(&value.to_ne_bytes());
        }
    }
    for distribution in artifact.distributions.values() {
        for &bin in &distribution.bins {
            out.extend_from_slice(&bin.to_ne_bytes());
        }
    }
    out
}

/// Deserialize an artifact. The byte length must match the header exactly.
pub fn decode_artifact(key: &str, bytes: &[u8]) -> Result<CacheArtifact> {
    let header = CacheHeader::decode(key, bytes)?;
    let expected = HEADER_LEN + header.payload_len();
    if bytes.len() != expected {
        return Err(CacheError::corrupt(
            key,
            format!("expected {} bytes, found {}", expected, bytes.len()),
        ));
    }

    let mut reader = WordReader::new(&bytes[HEADER_LEN..]);
    let mut curves: ChannelMap<MeanMaxCurve> = ChannelMap::default();
    for channel in Channel::ALL {
        let values = reader
            .take(header.curve_counts[channel] as usize)
            .ok_or_else(|| CacheError::corrupt(key, "truncated curve"))?;
        curves[channel] = MeanMaxCurve::from_values(values);
    }
    let mut distributions: ChannelMap<Distribution> = ChannelMap::default();
    for channel in Channel::ALL {
        let bins = reader
            .take(header.distribution_counts[channel] as usize)
            .ok_or_else(|| CacheError::corrupt(key, "truncated distribution"))?;
        distributions[channel] = Distribution::from_bins(bins);
    }

    Ok(CacheArtifact {
        curves,
        distributions,
    })
}

/// Version tag of an encoded artifact, if it has one.
pub fn peek_version(bytes: &[u8]) -> Option<u32> {
    WordReader::new(bytes).next_word()
}

struct WordReader<'a> {
    bytes: &'a [u8],
}

impl<'a> WordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn next_word(&mut self) -> Option<u32> {
        if self.bytes.len() < WORD {
            return None;
        }
        let (word, rest) = self.bytes.split_at(WORD);
        self.bytes = rest;
        let mut buf = [0u8; WORD];
        buf.copy_from_slice(word);
        Some(u32::from_ne_bytes(buf))
    }

    fn take(&mut self, count: usize) -> Option<Vec<u32>> {
        if self.bytes.len() < count.checked_mul(WORD)? {
            return None;
        }
        (0..count).map(|_| self.next_word()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifact() -> CacheArtifact {
        let mut artifact = CacheArtifact::empty();
        artifact.curves[Channel::Power] = MeanMaxCurve::from_values(vec![400, 350, 300]);
        artifact.curves[Channel::Speed] = MeanMaxCurve::from_values(vec![452]);
        artifact.distributions[Channel::Power].bins[300] = 2;
        artifact
    }

    #[test]
    fn test_layout() {
        let artifact = sample_artifact();
        let bytes = encode_artifact(&artifact);
        let header = CacheHeader::for_artifact(&artifact);

        assert_eq!(HEADER_LEN, 60);
        assert_eq!(bytes.len(), HEADER_LEN + header.payload_len());
        assert_eq!(peek_version(&bytes), Some(CACHE_VERSION));
        // First curve count follows the version
        assert_eq!(&bytes[4..8], &3u32.to_ne_bytes());
        // First payload word is the first power curve value
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 4], &400u32.to_ne_bytes());
    }

    #[test]
    fn test_decode_matches_encoded() {
        let artifact = sample_artifact();
        let decoded = decode_artifact("r1", &encode_artifact(&artifact)).unwrap();
        assert_eq!(decoded, artifact);
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = encode_artifact(&sample_artifact());
        bytes[..4].copy_from_slice(&2u32.to_ne_bytes());
        assert!(matches!(
            decode_artifact("r1", &bytes),
            Err(CacheError::VersionMismatch { found: 2, expected: 1, .. })
        ));

        bytes[..4].copy_from_slice(&0u32.to_ne_bytes());
        assert!(matches!(
            decode_artifact("r1", &bytes),
            Err(CacheError::VersionMismatch { found: 0, .. })
        ));
    }

    #[test]
    fn test_truncated_is_corrupt() {
        let bytes = encode_artifact(&sample_artifact());
        for len in [0, 3, 20, HEADER_LEN + 5, bytes.len() - 1] {
            assert!(
                matches!(
                    decode_artifact("r1", &bytes[..len]),
                    Err(CacheError::CorruptArtifact { .. })
                ),
                "length {} should be corrupt",
                len
            );
        }
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut bytes = encode_artifact(&sample_artifact());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            decode_artifact("r1", &bytes),
            Err(CacheError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_oversized_counts_are_corrupt() {
        let mut bytes = encode_artifact(&sample_artifact());
        bytes[4..8].copy_from_slice(&u32::MAX.to_ne_bytes());
        assert!(matches!(
            decode_artifact("r1", &bytes),
            Err(CacheError::CorruptArtifact { .. })
        ));
    }
}
