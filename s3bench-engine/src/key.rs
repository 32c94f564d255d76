//! Object key derivation.
//!
//! Keys are never stored: they are derived from the object name prefix, the encoded checksum of
//! the canonical payload and the sample index. A later run can re-derive the same key space from
//! any one object written by an earlier run, see [`KeySpace::recover`].

use crate::checksum::{self, Checksum, InvalidChecksum};

/// The set of object keys touched by a run.
#[derive(Clone, Debug, PartialEq)]
pub struct KeySpace {
    prefix: String,
    checksum: Checksum,
    samples: usize,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>, checksum: Checksum, samples: usize) -> Self {
        Self {
            prefix: prefix.into(),
            checksum,
            samples,
        }
    }

    /// Rebuilds a key space from one of its keys.
    ///
    /// Returns `Ok(None)` if `key` does not start with `prefix`.
    pub fn recover(
        prefix: &str,
        key: &str,
        samples: usize,
    ) -> Result<Option<Self>, InvalidChecksum> {
        let Some(rest) = key.strip_prefix(prefix) else {
            return Ok(None);
        };

        let encoded = rest.get(..checksum::ENCODED_LEN).unwrap_or(rest);
        let checksum = Checksum::from_hex(encoded)?;
        Ok(Some(Self::new(prefix, checksum, samples)))
    }

    /// The checksum of the canonical payload.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// The number of distinct objects.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Returns the key of the object for the given operation index.
    ///
    /// Indices wrap around the number of samples, so a phase may issue more operations than
    /// there are objects.
    pub fn key(&self, index: usize) -> String {
        let sample = index % self.samples.max(1);
        format!("{}{}{}", self.prefix, self.checksum.to_hex(), sample)
    }

    /// Iterates over all keys in sample order.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.samples).map(|index| self.key(index))
    }
}
