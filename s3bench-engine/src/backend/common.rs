use std::fmt::Debug;

use bytes::Bytes;
use thiserror::Error;

use crate::PayloadStream;
use crate::request::Tag;

/// A shared, type-erased [`Backend`] instance.
pub type SharedBackend = std::sync::Arc<dyn Backend>;

/// Outcome of [`Backend::create_bucket`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BucketStatus {
    /// The bucket did not exist and has been created by this call.
    Created,
    /// The bucket already existed, either owned by us or by someone else.
    AlreadyExists,
}

/// The set of storage operations the workload engine drives.
///
/// Implementations are bound to a single bucket. Transport details such as request signing,
/// endpoint selection and addressing style are the implementation's concern.
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// Creates the bucket. An already existing bucket is not an error.
    async fn create_bucket(&self) -> BackendResult<BucketStatus>;

    /// Stores `payload` under `key`, returning the number of bytes accepted.
    async fn put_object(&self, key: &str, payload: Bytes) -> BackendResult<u64>;

    /// Retrieves the object stored under `key` as a stream of bytes.
    async fn get_object(&self, key: &str) -> BackendResult<PayloadStream>;

    /// Returns the content length of the object stored under `key`.
    async fn head_object(&self, key: &str) -> BackendResult<u64>;

    /// Replaces the tag set of the object stored under `key`.
    async fn put_object_tags(&self, key: &str, tags: &[Tag]) -> BackendResult<()>;

    /// Returns the tag set of the object stored under `key`.
    async fn get_object_tags(&self, key: &str) -> BackendResult<Vec<Tag>>;

    /// Removes all tags from the object stored under `key`.
    async fn delete_object_tags(&self, key: &str) -> BackendResult<()>;

    /// Deletes a batch of objects in a single call, returning how many were deleted.
    async fn delete_objects(&self, keys: &[String]) -> BackendResult<usize>;

    /// Deletes the (empty) bucket.
    async fn delete_bucket(&self) -> BackendResult<()>;

    /// Lists up to `max_keys` object keys starting with `prefix`.
    async fn list_objects(&self, prefix: &str, max_keys: usize) -> BackendResult<Vec<String>>;
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// IO errors related to payload streaming.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The backend was asked to fail this call, see
    /// [`InMemoryBackend::fail_every`](super::InMemoryBackend::fail_every).
    #[error("injected failure for call {0}")]
    Injected(usize),

    /// Any other error stemming from the storage backend, which might be specific to that
    /// backend or to a certain operation.
    #[error("{context}: {cause}")]
    Generic {
        context: String,
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BackendError {
    /// Wraps an arbitrary error with a short description of the failed operation.
    pub fn generic(
        context: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Generic {
            context: context.into(),
            cause: cause.into(),
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
