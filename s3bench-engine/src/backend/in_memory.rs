//! In-memory backend for tests and dry runs.
//!
//! This provides a [`Backend`](super::common::Backend) backed by a `HashMap`, removing the need
//! for a live storage endpoint. The backend is [`Clone`] so tests can hold a handle for direct
//! inspection while the worker pool owns a shared copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;

use super::common::{Backend, BackendError, BackendResult, BucketStatus};
use crate::PayloadStream;
use crate::request::Tag;

/// Size of the chunks yielded by [`InMemoryBackend::get_object`].
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
struct Store {
    bucket_exists: bool,
    objects: HashMap<String, (Bytes, Vec<Tag>)>,
}

#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
    calls: Arc<AtomicUsize>,
    fail_every: Option<usize>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_every: None,
        }
    }

    /// Makes every `n`-th object operation fail with [`BackendError::Injected`].
    ///
    /// Calls are counted across all clones of this backend, starting at 1. Bucket management,
    /// listing and deletes are never failed.
    pub fn fail_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Returns a clone of the stored bytes, if present.
    pub fn get_stored(&self, key: &str) -> Option<Bytes> {
        let store = self.store.lock().unwrap();
        store.objects.get(key).map(|(bytes, _)| bytes.clone())
    }

    /// Returns the stored tags of an object, if present.
    pub fn get_tags(&self, key: &str) -> Option<Vec<Tag>> {
        let store = self.store.lock().unwrap();
        store.objects.get(key).map(|(_, tags)| tags.clone())
    }

    /// Stores an object directly, bypassing the `Backend` trait.
    ///
    /// Useful for seeding objects from a previous run or corrupting existing ones.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>) {
        let mut store = self.store.lock().unwrap();
        store.objects.insert(key.into(), (bytes.into(), Vec::new()));
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().objects.len()
    }

    /// Returns `true` if the backend has no stored objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the bucket has been created and not deleted since.
    pub fn bucket_exists(&self) -> bool {
        self.store.lock().unwrap().bucket_exists
    }

    fn check_injected(&self) -> BackendResult<()> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        match self.fail_every {
            Some(n) if call % n == 0 => Err(BackendError::Injected(call)),
            _ => Ok(()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    async fn create_bucket(&self) -> BackendResult<BucketStatus> {
        let mut store = self.store.lock().unwrap();
        if store.bucket_exists {
            return Ok(BucketStatus::AlreadyExists);
        }
        store.bucket_exists = true;
        Ok(BucketStatus::Created)
    }

    async fn put_object(&self, key: &str, payload: Bytes) -> BackendResult<u64> {
        self.check_injected()?;
        let len = payload.len() as u64;
        self.store
            .lock()
            .unwrap()
            .objects
            .insert(key.to_owned(), (payload, Vec::new()));
        Ok(len)
    }

    async fn get_object(&self, key: &str) -> BackendResult<PayloadStream> {
        self.check_injected()?;
        let bytes = self
            .get_stored(key)
            .ok_or_else(|| BackendError::NotFound(key.to_owned()))?;

        let chunks: Vec<std::io::Result<Bytes>> = (0..bytes.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
            .collect();
        Ok(futures_util::stream::iter(chunks).boxed())
    }

    async fn head_object(&self, key: &str) -> BackendResult<u64> {
        self.check_injected()?;
        self.get_stored(key)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| BackendError::NotFound(key.to_owned()))
    }

    async fn put_object_tags(&self, key: &str, tags: &[Tag]) -> BackendResult<()> {
        self.check_injected()?;
        let mut store = self.store.lock().unwrap();
        let (_, stored_tags) = store
            .objects
            .get_mut(key)
            .ok_or_else(|| BackendError::NotFound(key.to_owned()))?;
        *stored_tags = tags.to_vec();
        Ok(())
    }

    async fn get_object_tags(&self, key: &str) -> BackendResult<Vec<Tag>> {
        self.check_injected()?;
        self.get_tags(key)
            .ok_or_else(|| BackendError::NotFound(key.to_owned()))
    }

    async fn delete_object_tags(&self, key: &str) -> BackendResult<()> {
        let mut store = self.store.lock().unwrap();
        if let Some((_, tags)) = store.objects.get_mut(key) {
            tags.clear();
        }
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> BackendResult<usize> {
        let mut store = self.store.lock().unwrap();
        let deleted = keys
            .iter()
            .filter(|key| store.objects.remove(key.as_str()).is_some())
            .count();
        Ok(deleted)
    }

    async fn delete_bucket(&self) -> BackendResult<()> {
        let mut store = self.store.lock().unwrap();
        if !store.objects.is_empty() {
            return Err(BackendError::generic(
                "failed to delete bucket",
                "bucket is not empty",
            ));
        }
        store.bucket_exists = false;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, max_keys: usize) -> BackendResult<Vec<String>> {
        let store = self.store.lock().unwrap();
        let mut keys: Vec<_> = store
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort_unstable();
        keys.truncate(max_keys);
        Ok(keys)
    }
}
