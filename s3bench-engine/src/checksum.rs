//! SHA-512 digests of written payloads.

use std::fmt;

use sha2::{Digest, Sha512};
use thiserror::Error;

/// Length of a hex-encoded [`Checksum`].
pub const ENCODED_LEN: usize = 2 * 64;

/// The digest of a payload, used to validate reads and to derive object keys.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Checksum([u8; 64]);

/// Error returned when decoding a malformed checksum.
#[derive(Debug, Error)]
#[error("invalid checksum encoding `{encoded}`")]
pub struct InvalidChecksum {
    encoded: String,
}

impl Checksum {
    /// Computes the checksum of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = ChecksumHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Decodes a checksum from its hex encoding.
    pub fn from_hex(encoded: &str) -> Result<Self, InvalidChecksum> {
        let mut digest = [0; 64];
        hex::decode_to_slice(encoded, &mut digest).map_err(|_| InvalidChecksum {
            encoded: encoded.to_owned(),
        })?;
        Ok(Self(digest))
    }

    /// Returns the lowercase hex encoding, which is [`ENCODED_LEN`] characters long.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..16])
    }
}

/// Incrementally computes a [`Checksum`] over streamed chunks.
#[derive(Clone, Debug, Default)]
pub struct ChecksumHasher(Sha512);

impl ChecksumHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finish(self) -> Checksum {
        let mut digest = [0; 64];
        digest.copy_from_slice(&self.0.finalize());
        Checksum(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_matches_oneshot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let mut hasher = ChecksumHasher::new();
        for chunk in data.chunks(999) {
            hasher.update(chunk);
        }

        assert_eq!(hasher.finish(), Checksum::compute(&data));
    }

    #[test]
    fn hex_round_trip() {
        let checksum = Checksum::compute(b"hello");
        let encoded = checksum.to_hex();
        assert_eq!(encoded.len(), ENCODED_LEN);
        assert_eq!(Checksum::from_hex(&encoded).unwrap(), checksum);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(Checksum::from_hex("abc").is_err());
        assert!(Checksum::from_hex(&"zz".repeat(64)).is_err());
    }
}
