//! AWS S3 backend.
//!
//! Thin mapping from [`ObjectStore`](super::store::ObjectStore) onto the
//! AWS SDK.  Credentials come from the standard chain (env vars,
//! `~/.aws/credentials`, IAM role); region, endpoint override, and
//! path-style addressing come from [`AwsConfig`].  A custom endpoint is
//! how test stacks (MinIO, LocalStack) are reached; those only speak
//! path-style URLs.

use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info};

use super::store::{ListPage, ObjectStore, StoreFuture};
use crate::config::AwsConfig;
use crate::errors::TransferError;

/// [`ObjectStore`] backed by the AWS S3 SDK.
pub struct AwsStore {
    client: Client,
}

/// Inclusive range header value for `[start, end]`.
fn range_header(start: u64, end: u64) -> String {
    format!("bytes={start}-{end}")
}

/// Classify a service error: a permanent redirect means the request went
/// to the wrong region, which is actionable by the caller; everything
/// else is an opaque backend rejection.
fn classify(
    op: &'static str,
    bucket: &str,
    err: impl ProvideErrorMetadata + std::fmt::Display,
) -> TransferError {
    if err.code() == Some("PermanentRedirect") {
        return TransferError::WrongRegion {
            bucket: bucket.to_string(),
        };
    }
    TransferError::backend(op, err)
}

impl AwsStore {
    /// Build a client from config.  Region falls back to the configured
    /// default; explicit static credentials override the default chain
    /// when both keys are present.
    pub async fn new(config: &AwsConfig) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if !config.endpoint_url.is_empty() {
            loader = loader.endpoint_url(&config.endpoint_url);
        }

        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "partstream-config",
            );
            loader = loader.credentials_provider(creds);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style)
            .build();

        info!(
            "AWS backend initialized: region={} endpoint={}",
            config.region,
            if config.endpoint_url.is_empty() {
                "default"
            } else {
                &config.endpoint_url
            }
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }
}

impl ObjectStore for AwsStore {
    fn head_object(&self, bucket: &str, key: &str) -> StoreFuture<'_, u64> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            match self
                .client
                .head_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(resp) => Ok(resp.content_length().unwrap_or(0) as u64),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        // Existence probes legitimately miss.
                        debug!("head_object: [{bucket}] {key} not found");
                        Err(TransferError::NotFound { bucket, key })
                    } else {
                        Err(classify("head_object", &bucket, service_err))
                    }
                }
            }
        })
    }

    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!("put_object: [{bucket}] {key} {} bytes", data.len());
            self.client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .content_type("application/octet-stream")
                .body(aws_sdk_s3::primitives::ByteStream::from(data))
                .send()
                .await
                .map_err(|e| classify("put_object", &bucket, e.into_service_error()))?;
            Ok(())
        })
    }

    fn create_multipart(&self, bucket: &str, key: &str) -> StoreFuture<'_, String> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .content_type("application/octet-stream")
                .send()
                .await
                .map_err(|e| classify("create_multipart", &bucket, e.into_service_error()))?;
            let upload_id = resp
                .upload_id()
                .ok_or_else(|| TransferError::backend("create_multipart", "no upload id returned"))?
                .to_string();
            debug!("create_multipart: [{bucket}] {key} upload id {upload_id}");
            Ok(upload_id)
        })
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StoreFuture<'_, String> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let resp = self
                .client
                .upload_part()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .part_number(part_number as i32)
                .content_length(data.len() as i64)
                .body(aws_sdk_s3::primitives::ByteStream::from(data))
                .send()
                .await
                .map_err(|e| classify("upload_part", &bucket, e.into_service_error()))?;
            Ok(resp.e_tag().unwrap_or("").to_string())
        })
    }

    fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<(u32, String)>,
    ) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let completed_parts: Vec<CompletedPart> = parts
                .into_iter()
                .map(|(number, tag)| {
                    CompletedPart::builder()
                        .part_number(number as i32)
                        .e_tag(tag)
                        .build()
                })
                .collect();
            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build();

            debug!("complete_multipart: [{bucket}] {key} upload id {upload_id}");
            self.client
                .complete_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .multipart_upload(completed)
                .send()
                .await
                .map_err(|e| classify("complete_multipart", &bucket, e.into_service_error()))?;
            Ok(())
        })
    }

    fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'_, Bytes> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let resp = self
                .client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .range(range_header(start, end))
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        TransferError::NotFound {
                            bucket: bucket.clone(),
                            key: key.clone(),
                        }
                    } else {
                        classify("get_object_range", &bucket, service_err)
                    }
                })?;
            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| TransferError::backend("get_object_range", e))?;
            Ok(body.into_bytes())
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> StoreFuture<'_, ListPage> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        Box::pin(async move {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&bucket)
                .prefix(&prefix);
            if let Some(token) = token {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| classify("list_objects", &bucket, e.into_service_error()))?;

            let keys = resp
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(|k| k.to_string()))
                .collect();
            let next_token = if resp.is_truncated() == Some(true) {
                resp.next_continuation_token().map(|s| s.to_string())
            } else {
                None
            };
            Ok(ListPage { keys, next_token })
        })
    }

    fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("delete_objects: [{bucket}] {} keys", keys.len());
            let objects: Result<Vec<ObjectIdentifier>, _> = keys
                .into_iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect();
            let delete = Delete::builder()
                .set_objects(Some(
                    objects.map_err(|e| TransferError::backend("delete_objects", e))?,
                ))
                .quiet(true)
                .build()
                .map_err(|e| TransferError::backend("delete_objects", e))?;

            self.client
                .delete_objects()
                .bucket(&bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| classify("delete_objects", &bucket, e.into_service_error()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_is_inclusive() {
        // One segment of [0, 7] covers eight bytes.
        assert_eq!(range_header(0, 7), "bytes=0-7");
        assert_eq!(range_header(100, 199), "bytes=100-199");
    }

    #[test]
    fn backend_error_formatting() {
        let err = TransferError::backend("upload_part", "SlowDown");
        assert!(err.to_string().contains("upload_part"));
    }
}
