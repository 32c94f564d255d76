//! Best-effort removal of everything a run created.
//!
//! Failures are logged and counted, but never fail the run.

use std::time::Instant;

use s3bench_engine::KeySpace;
use s3bench_engine::backend::Backend;

/// What to remove after the phases completed.
#[derive(Clone, Copy, Debug)]
pub struct CleanupOptions {
    /// Remove the tags of every object before deleting it.
    pub delete_tags: bool,
    /// Number of keys per batch delete request.
    pub batch_size: usize,
    /// Remove the bucket once all objects are gone.
    pub delete_bucket: bool,
}

/// The outcome of a cleanup.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CleanupSummary {
    /// Number of objects the backend confirmed as deleted.
    pub deleted: usize,
    /// Number of objects that were to be deleted.
    pub total: usize,
    /// Number of failed requests of any kind.
    pub failures: usize,
    /// Whether the bucket was deleted.
    pub bucket_deleted: bool,
}

/// Deletes all objects of `keys` in batches, then optionally the bucket.
pub async fn cleanup(
    backend: &dyn Backend,
    keys: &KeySpace,
    options: CleanupOptions,
) -> CleanupSummary {
    let start = Instant::now();
    let mut summary = CleanupSummary {
        total: keys.samples(),
        ..Default::default()
    };
    tracing::info!(objects = summary.total, "cleaning up");

    let all_keys: Vec<String> = keys.keys().collect();
    for (index, batch) in all_keys.chunks(options.batch_size.max(1)).enumerate() {
        if options.delete_tags {
            for key in batch {
                if let Err(err) = backend.delete_object_tags(key).await {
                    summary.failures += 1;
                    tracing::warn!(
                        key,
                        error = &err as &dyn std::error::Error,
                        "failed to delete tags"
                    );
                }
            }
        }

        let first = index * options.batch_size.max(1);
        let last = first + batch.len() - 1;
        match backend.delete_objects(batch).await {
            Ok(deleted) => {
                tracing::debug!(first, last, deleted, "deleted batch of objects");
                summary.deleted += deleted;
            }
            Err(err) => {
                summary.failures += 1;
                tracing::warn!(
                    first,
                    last,
                    error = &err as &dyn std::error::Error,
                    "failed to delete batch of objects"
                );
            }
        }
    }

    tracing::info!(
        deleted = summary.deleted,
        total = summary.total,
        elapsed = ?start.elapsed(),
        "deleted objects"
    );

    if options.delete_bucket {
        match backend.delete_bucket().await {
            Ok(()) => {
                tracing::info!("deleted bucket");
                summary.bucket_deleted = true;
            }
            Err(err) => {
                summary.failures += 1;
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "failed to delete bucket"
                );
            }
        }
    }

    summary
}
