//! Drives a complete benchmark run.

use std::sync::Arc;

use anyhow::{Context, Result};
use s3bench_engine::backend::SharedBackend;
use s3bench_engine::{PhaseResult, PhaseRunner, WorkerPool};

use crate::cleanup::{self, CleanupOptions};
use crate::config::Config;
use crate::preflight;

/// Runs all configured phases against the configured endpoints.
pub async fn run(config: &Config) -> Result<Vec<PhaseResult>> {
    let backends = preflight::build_backends(config);
    run_with_backends(config, backends).await
}

/// Runs all configured phases against the given backends.
///
/// The first backend is used for setup and cleanup. Phase failures still trigger cleanup before
/// the error is returned.
pub async fn run_with_backends(
    config: &Config,
    backends: Vec<SharedBackend>,
) -> Result<Vec<PhaseResult>> {
    config.validate()?;
    let primary = backends
        .first()
        .map(Arc::clone)
        .context("at least one endpoint is required")?;

    let prepared = preflight::prepare(config, &primary).await?;

    tracing::info!(
        clients = config.num_clients,
        endpoints = backends.len(),
        "starting workers"
    );
    let pool = WorkerPool::start(backends, config.pool_config())
        .await
        .context("failed to start workers")?;

    let mut runner = PhaseRunner::new(pool, prepared.workload);
    let results = runner.run_all(config.phases()).await;
    let keys = runner.workload().keys.clone();
    runner.shutdown().await;

    if config.skip_cleanup {
        tracing::info!("skipping cleanup");
    } else {
        let options = CleanupOptions {
            delete_tags: config.put_obj_tag || config.get_obj_tag,
            batch_size: config.delete_at_once,
            delete_bucket: prepared.bucket_created,
        };
        cleanup::cleanup(primary.as_ref(), &keys, options).await;
    }

    Ok(results?)
}
