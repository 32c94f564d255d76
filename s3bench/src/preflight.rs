//! Everything that happens before the first phase: backends, payload, key space and bucket.
//!
//! Any failure here is fatal and aborts the run.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use s3bench_engine::backend::{
    BucketStatus, InMemoryBackend, S3CompatibleBackend, S3CompatibleBackendConfig, SharedBackend,
};
use s3bench_engine::{KeySpace, Payload, Workload};
use secrecy::ExposeSecret;

use crate::config::{Config, MEMORY_ENDPOINT};

/// Creates one backend per configured endpoint.
///
/// All `memory://` endpoints share a single in-process store.
pub fn build_backends(config: &Config) -> Vec<SharedBackend> {
    let mut memory: Option<SharedBackend> = None;

    config
        .endpoints
        .iter()
        .map(|endpoint| {
            if endpoint == MEMORY_ENDPOINT {
                let backend = memory
                    .get_or_insert_with(|| Arc::new(InMemoryBackend::new()) as SharedBackend);
                return Arc::clone(backend);
            }

            let backend = S3CompatibleBackend::new(S3CompatibleBackendConfig {
                bucket: config.bucket.clone(),
                region: config.region.clone(),
                endpoint: endpoint.clone(),
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.expose_secret().as_str().to_owned(),
                ..Default::default()
            });
            Arc::new(backend) as SharedBackend
        })
        .collect()
}

/// The state a run starts from.
#[derive(Debug)]
pub struct Prepared {
    /// Requests of every phase are built from this.
    pub workload: Workload,
    /// Whether the bucket was created by this run and should be removed on cleanup.
    pub bucket_created: bool,
}

/// Generates the payload or recovers the key space of a previous run, then creates the bucket.
pub async fn prepare(config: &Config, backend: &SharedBackend) -> Result<Prepared> {
    let (keys, payload) = if config.skip_write {
        (recover_keys(config, backend).await?, None)
    } else {
        let payload = generate_payload(config).await?;
        let keys = KeySpace::new(
            config.object_name_prefix.clone(),
            payload.canonical_checksum(),
            config.num_samples,
        );
        (keys, Some(payload))
    };

    tracing::info!(checksum = %keys.checksum(), "using key space");

    let bucket_created = match backend
        .create_bucket()
        .await
        .with_context(|| format!("failed to create bucket {}", config.bucket))?
    {
        BucketStatus::Created => {
            tracing::info!(bucket = %config.bucket, "created bucket");
            true
        }
        BucketStatus::AlreadyExists => {
            tracing::info!(bucket = %config.bucket, "using existing bucket");
            false
        }
    };

    let workload = Workload {
        keys,
        payload,
        sample_reads: config.sample_reads,
        tags: config.tag_template(),
    };

    Ok(Prepared {
        workload,
        bucket_created,
    })
}

/// Builds the payload written by the write phase.
pub async fn generate_payload(config: &Config) -> Result<Payload> {
    let source = config.payload_source()?;

    tracing::info!(
        size = %config.object_size,
        unique = config.unique_payloads,
        "generating payload"
    );
    let start = Instant::now();

    let payload = Payload::generate(source, config.num_samples, config.unique_payloads)
        .await
        .context("failed to generate payload")?;

    tracing::info!(elapsed = ?start.elapsed(), "generated payload");
    Ok(payload)
}

/// Derives the key space from an object written by a previous run.
async fn recover_keys(config: &Config, backend: &SharedBackend) -> Result<KeySpace> {
    let prefix = &config.object_name_prefix;

    let keys = backend
        .list_objects(prefix, 1)
        .await
        .context("failed to list objects of a previous run")?;
    let Some(key) = keys.first() else {
        bail!("no object found with prefix {prefix:?}, cannot skip the write phase");
    };

    match KeySpace::recover(prefix, key, config.num_samples)
        .with_context(|| format!("cannot recover checksum from object {key}"))?
    {
        Some(keys) => Ok(keys),
        None => bail!("listed object {key} does not start with prefix {prefix:?}"),
    }
}

#[cfg(test)]
mod tests {
    use s3bench_engine::{Checksum, Operation};

    use super::*;
    use crate::size::Size;

    fn config() -> Config {
        Config {
            endpoints: vec![MEMORY_ENDPOINT.to_owned(), MEMORY_ENDPOINT.to_owned()],
            object_size: Size::kib(8),
            dedup_unit_size: Size::kib(4),
            num_samples: 3,
            num_clients: 1,
            ..Default::default()
        }
    }

    #[test]
    fn memory_endpoints_share_a_store() {
        let backends = build_backends(&config());
        assert_eq!(backends.len(), 2);
        assert!(Arc::ptr_eq(&backends[0], &backends[1]));
    }

    #[tokio::test]
    async fn prepares_write_run() {
        let backend: SharedBackend = Arc::new(InMemoryBackend::new());
        let prepared = prepare(&config(), &backend).await.unwrap();

        assert!(prepared.bucket_created);
        let payload = prepared.workload.payload.as_ref().unwrap();
        assert_eq!(payload.object_size(), 8192);
        assert_eq!(
            prepared.workload.keys.checksum(),
            payload.canonical_checksum()
        );

        let prepared = prepare(&config(), &backend).await.unwrap();
        assert!(!prepared.bucket_created);
    }

    #[tokio::test]
    async fn recovers_keys_when_skipping_writes() {
        let memory = InMemoryBackend::new();
        let checksum = Checksum::compute(b"previous run");
        let previous = KeySpace::new("loadgen_test", checksum, 3);
        memory.insert(previous.key(1), "x");

        let backend: SharedBackend = Arc::new(memory);
        let config = Config {
            skip_write: true,
            ..config()
        };
        let prepared = prepare(&config, &backend).await.unwrap();

        assert!(prepared.workload.payload.is_none());
        assert_eq!(prepared.workload.keys, previous);
        let request = prepared.workload.request(Operation::Read, 0).unwrap();
        assert_eq!(request.key(), previous.key(0));
    }

    #[tokio::test]
    async fn skipping_writes_requires_objects() {
        let backend: SharedBackend = Arc::new(InMemoryBackend::new());
        let config = Config {
            skip_write: true,
            ..config()
        };

        let err = prepare(&config, &backend).await.unwrap_err();
        assert!(err.to_string().contains("no object found"));
    }
}
