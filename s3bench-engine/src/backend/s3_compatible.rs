use std::fmt;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier, Tagging};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;

use super::common::{Backend, BackendError, BackendResult, BucketStatus};
use crate::PayloadStream;
use crate::request::Tag;

/// Name reported to the credentials chain for the static credentials below.
const CREDENTIALS_PROVIDER: &str = "s3bench";

pub struct S3CompatibleBackend {
    client: Client,
    endpoint: String,
    bucket: String,
}

#[derive(Debug, Default)]
pub struct S3CompatibleBackendConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

impl S3CompatibleBackend {
    /// Creates a new S3 compatible backend bound to the given bucket and endpoint.
    pub fn new(config: S3CompatibleBackendConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key,
            config.secret_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        // Payloads are neither signed nor checksummed unless the operation requires it.
        let config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired);

        Self {
            client: Client::from_conf(config_builder.build()),
            endpoint: config.endpoint,
            bucket: config.bucket,
        }
    }
}

impl fmt::Debug for S3CompatibleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Compatible")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Converts an SDK error into a [`BackendError`], keeping the full error chain in the message.
fn sdk_error<E>(context: &'static str) -> impl FnOnce(E) -> BackendError
where
    E: std::error::Error,
{
    move |err| BackendError::generic(context, DisplayErrorContext(&err).to_string())
}

#[async_trait::async_trait]
impl Backend for S3CompatibleBackend {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn create_bucket(&self) -> BackendResult<BucketStatus> {
        let result = self.client.create_bucket().bucket(&self.bucket).send().await;

        match result {
            Ok(_) => Ok(BucketStatus::Created),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists() {
                    Ok(BucketStatus::AlreadyExists)
                } else {
                    Err(sdk_error("failed to create bucket")(err))
                }
            }
        }
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn put_object(&self, key: &str, payload: Bytes) -> BackendResult<u64> {
        let len = payload.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(len as i64)
            .body(ByteStream::from(payload))
            .customize()
            .disable_payload_signing()
            .send()
            .await
            .map_err(sdk_error("failed to put object"))?;

        Ok(len)
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn get_object(&self, key: &str) -> BackendResult<PayloadStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error("failed to get object"))?;

        Ok(ReaderStream::new(output.body.into_async_read()).boxed())
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn head_object(&self, key: &str) -> BackendResult<u64> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error("failed to head object"))?;

        Ok(output.content_length().unwrap_or_default().max(0) as u64)
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn put_object_tags(&self, key: &str, tags: &[Tag]) -> BackendResult<()> {
        let tag_set = tags
            .iter()
            .map(|tag| {
                aws_sdk_s3::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(sdk_error("invalid tag"))?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(sdk_error("invalid tag set"))?;

        self.client
            .put_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(sdk_error("failed to put object tags"))?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn get_object_tags(&self, key: &str) -> BackendResult<Vec<Tag>> {
        let output = self
            .client
            .get_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error("failed to get object tags"))?;

        let tags = output
            .tag_set()
            .iter()
            .map(|tag| Tag::new(tag.key(), tag.value()))
            .collect();
        Ok(tags)
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn delete_object_tags(&self, key: &str) -> BackendResult<()> {
        self.client
            .delete_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error("failed to delete object tags"))?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(count = keys.len()), skip_all)]
    async fn delete_objects(&self, keys: &[String]) -> BackendResult<usize> {
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(sdk_error("invalid object key"))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(sdk_error("invalid delete request"))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(sdk_error("failed to delete objects"))?;

        for error in output.errors() {
            tracing::debug!(
                key = error.key(),
                code = error.code(),
                message = error.message(),
                "object not deleted"
            );
        }

        Ok(keys.len().saturating_sub(output.errors().len()))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn delete_bucket(&self) -> BackendResult<()> {
        self.client
            .delete_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(sdk_error("failed to delete bucket"))?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?prefix), skip_all)]
    async fn list_objects(&self, prefix: &str, max_keys: usize) -> BackendResult<Vec<String>> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys.min(i32::MAX as usize) as i32)
            .send()
            .await
            .map_err(sdk_error("failed to list objects"))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .map(str::to_owned)
            .collect();
        Ok(keys)
    }
}
