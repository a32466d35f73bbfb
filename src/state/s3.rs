//! S3-based checkpoint backend.
//!
//! Records are JSON objects under `<prefix><key>.json`. Version checks map to
//! S3 conditional writes: a first write uses `If-None-Match: *`, later writes
//! use `If-Match` with the ETag that was read, so two runs sharing a bucket
//! cannot overwrite each other's progress.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use serde_json::Value;
use tracing::{debug, info};

use super::store::CheckpointStore;
use super::types::VersionedRecord;
use crate::error::{Result, StateError};

/// S3-based checkpoint store.
#[derive(Debug)]
pub struct S3CheckpointStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

impl S3CheckpointStore {
    /// Creates a new S3 checkpoint store from the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a new S3 checkpoint store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the full object key for a record key.
    fn object_key(&self, key: &str) -> String {
        format!("{}{key}.json", self.prefix)
    }

    /// Reads a record and its ETag.
    async fn get_object(&self, key: &str) -> Result<Option<(VersionedRecord, Option<String>)>> {
        let object_key = self.object_key(key);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let etag = response.e_tag().map(str::to_string);
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| {
                        StateError::s3(format!(
                            "Failed to read s3://{}/{object_key}: {e}",
                            self.bucket
                        ))
                    })?;
                let record = serde_json::from_slice(&bytes.into_bytes()).map_err(|e| {
                    StateError::Corrupted {
                        message: format!("Failed to parse s3://{}/{object_key}: {e}", self.bucket),
                    }
                })?;
                Ok(Some((record, etag)))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StateError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }
}

#[async_trait]
impl CheckpointStore for S3CheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedRecord>> {
        Ok(self.get_object(key).await?.map(|(record, _)| record))
    }

    async fn put_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Value,
    ) -> Result<VersionedRecord> {
        let current = self.get_object(key).await?;
        let found = current.as_ref().map(|(record, _)| record.version);
        if found != expected {
            return Err(StateError::VersionConflict {
                key: key.to_string(),
                expected,
                found,
            }
            .into());
        }

        let record = VersionedRecord::next(key, found, value);
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize record: {e}")))?;

        let object_key = self.object_key(key);
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(body.into())
            .content_type("application/json");
        request = match current.and_then(|(_, etag)| etag) {
            Some(etag) => request.if_match(etag),
            None => request.if_none_match("*"),
        };

        if let Err(sdk_err) = request.send().await {
            let status = sdk_err.raw_response().map(|r| r.status().as_u16());
            if matches!(status, Some(409 | 412)) {
                debug!("Conditional write on {object_key} lost (status {status:?})");
                let found = self.get(key).await.ok().flatten().map(|r| r.version);
                return Err(StateError::VersionConflict {
                    key: key.to_string(),
                    expected,
                    found,
                }
                .into());
            }
            return Err(StateError::s3(format!("S3 put error: {sdk_err}")).into());
        }

        info!("Saved {key} v{} to s3://{}/{object_key}", record.version, self.bucket);
        Ok(record)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let object_key = self.object_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;
        debug!("Deleted s3://{}/{object_key}", self.bucket);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
