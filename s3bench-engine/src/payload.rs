//! Write payloads shared across the worker pool.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future;

use crate::checksum::Checksum;
use crate::reduction::{self, GenerateError, ReductionParams};

/// Where payload bytes come from.
#[derive(Clone, Debug)]
pub enum PayloadSource {
    /// Generate synthetic data with the given reduction characteristics.
    Reduction(ReductionParams),
    /// Tile the given pattern up to `size` bytes.
    Pattern { size: usize, pattern: Bytes },
}

impl PayloadSource {
    /// The length of every buffer built from this source.
    pub fn size(&self) -> usize {
        match self {
            PayloadSource::Reduction(params) => params.size,
            PayloadSource::Pattern { size, .. } => *size,
        }
    }

    /// Builds a single buffer.
    pub fn build(&self) -> Result<Vec<u8>, GenerateError> {
        match self {
            PayloadSource::Reduction(params) => reduction::generate(params),
            PayloadSource::Pattern { size, pattern } => reduction::tile_pattern(*size, pattern),
        }
    }

    /// Checks the parameters without generating anything.
    pub fn validate(&self) -> Result<(), GenerateError> {
        match self {
            PayloadSource::Reduction(params) => params.validate(),
            PayloadSource::Pattern { pattern, .. } if pattern.is_empty() => {
                Err(GenerateError::EmptyPattern)
            }
            PayloadSource::Pattern { .. } => Ok(()),
        }
    }
}

#[derive(Debug)]
struct Buffer {
    data: Bytes,
    checksum: Checksum,
}

impl Buffer {
    fn new(data: Vec<u8>) -> Self {
        let checksum = Checksum::compute(&data);
        Self {
            data: data.into(),
            checksum,
        }
    }
}

/// The immutable content written by a write phase.
///
/// Cloning is cheap; all clones share the same buffers.
#[derive(Clone, Debug)]
pub struct Payload {
    buffers: Arc<[Buffer]>,
}

impl Payload {
    /// A single buffer written by every request.
    pub fn shared(data: impl Into<Vec<u8>>) -> Self {
        Self {
            buffers: Arc::new([Buffer::new(data.into())]),
        }
    }

    /// One buffer per sample.
    ///
    /// # Panics
    ///
    /// Panics if `buffers` is empty.
    pub fn per_sample(buffers: Vec<Vec<u8>>) -> Self {
        assert!(!buffers.is_empty(), "payload needs at least one buffer");
        Self {
            buffers: buffers.into_iter().map(Buffer::new).collect(),
        }
    }

    /// Builds the payload for `samples` objects.
    ///
    /// With `unique` set, every sample gets an independently generated buffer. Buffers are
    /// generated in parallel on the blocking thread pool. Pattern sources always yield a single
    /// shared buffer since tiling is deterministic.
    pub async fn generate(
        source: PayloadSource,
        samples: usize,
        unique: bool,
    ) -> Result<Self, GenerateError> {
        source.validate()?;

        if !unique || samples <= 1 || matches!(source, PayloadSource::Pattern { .. }) {
            let data = tokio::task::spawn_blocking(move || source.build());
            return Ok(Self::shared(join(data).await?));
        }

        let source = Arc::new(source);
        let tasks = (0..samples).map(|_| {
            let source = Arc::clone(&source);
            join(tokio::task::spawn_blocking(move || source.build()))
        });

        let buffers = future::try_join_all(tasks).await?;
        Ok(Self::per_sample(buffers))
    }

    /// Returns `true` if every sample has its own buffer.
    pub fn is_unique(&self) -> bool {
        self.buffers.len() > 1
    }

    /// The bytes written for the given sample.
    pub fn data(&self, sample: usize) -> Bytes {
        self.buffer(sample).data.clone()
    }

    /// The checksum of the bytes written for the given sample.
    pub fn checksum(&self, sample: usize) -> Checksum {
        self.buffer(sample).checksum
    }

    /// The checksum used to derive object keys, which is the one of the first buffer.
    pub fn canonical_checksum(&self) -> Checksum {
        self.buffers[0].checksum
    }

    /// The length of every buffer.
    pub fn object_size(&self) -> u64 {
        self.buffers[0].data.len() as u64
    }

    fn buffer(&self, sample: usize) -> &Buffer {
        &self.buffers[sample % self.buffers.len()]
    }
}

async fn join(
    handle: tokio::task::JoinHandle<Result<Vec<u8>, GenerateError>>,
) -> Result<Vec<u8>, GenerateError> {
    match handle.await {
        Ok(result) => result,
        // Generation only fails this way if the random source is exhausted.
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}

#[cfg(test)]
mod tests {
    use crate::reduction::FillPolicy;

    use super::*;

    fn reduction(size: usize) -> PayloadSource {
        PayloadSource::Reduction(ReductionParams {
            size,
            block_size: 512,
            dedup_unit_size: 4096,
            compression_percent: 100.0,
            dedup_percent: 100.0,
            fill: FillPolicy::Zeros,
        })
    }

    #[tokio::test]
    async fn shared_payload() {
        let payload = Payload::generate(reduction(10_000), 8, false).await.unwrap();

        assert!(!payload.is_unique());
        assert_eq!(payload.object_size(), 10_000);
        assert_eq!(payload.data(0), payload.data(7));
        assert_eq!(payload.checksum(3), payload.canonical_checksum());
    }

    #[tokio::test]
    async fn unique_payloads_differ() {
        let payload = Payload::generate(reduction(4096), 4, true).await.unwrap();

        assert!(payload.is_unique());
        assert_ne!(payload.data(0), payload.data(1));
        assert_eq!(payload.checksum(2), Checksum::compute(&payload.data(2)));
        assert_eq!(payload.checksum(0), payload.canonical_checksum());
    }

    #[tokio::test]
    async fn pattern_is_always_shared() {
        let source = PayloadSource::Pattern {
            size: 5,
            pattern: Bytes::from_static(b"ab"),
        };
        let payload = Payload::generate(source, 4, true).await.unwrap();

        assert!(!payload.is_unique());
        assert_eq!(payload.data(1), Bytes::from_static(b"ababa"));
    }

    #[tokio::test]
    async fn rejects_invalid_source() {
        let source = PayloadSource::Pattern {
            size: 5,
            pattern: Bytes::new(),
        };
        let result = Payload::generate(source, 1, false).await;
        assert_eq!(result.unwrap_err(), GenerateError::EmptyPattern);
    }
}
