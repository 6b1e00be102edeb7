//! S3-compatible remote store backend.
//!
//! Talks to the backing bucket (AWS S3, Cloudflare R2, MinIO, ...)
//! through the AWS SDK. All objects live under a configurable key
//! prefix inside a single bucket.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit
//! keys are configured.

use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info};

use crate::config::StoreBackendConfig;
use crate::errors::BackendError;

use super::backend::{AccessPolicy, ByteRange, ObjectBackend, ObjectMetadata, PutOptions};

/// Backend that forwards operations to an S3-compatible bucket.
pub struct S3Backend {
    /// AWS S3 SDK client.
    client: Client,
    /// The remote bucket name.
    bucket: String,
    /// Key prefix for all objects in the bucket.
    prefix: String,
}

impl S3Backend {
    /// Create a new backend from config.
    ///
    /// Loads credentials from the default chain unless the config
    /// carries explicit keys, and honors a custom endpoint for
    /// S3-compatible stores.
    pub async fn new(config: &StoreBackendConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if !config.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&config.endpoint_url);
        }

        // If explicit credentials are provided, inject them as static credentials.
        if !config.access_key_id.is_empty() && !config.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None, // session_token
                None, // expiry
                "blobgate-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "S3 backend initialized: bucket={} prefix='{}'",
            config.bucket, config.prefix
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        })
    }

    /// Map a logical key to its key in the backing bucket.
    fn remote_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Format an inclusive byte range as an HTTP Range header value.
    fn range_header(range: ByteRange) -> String {
        format!("bytes={}-{}", range.start, range.end)
    }

    fn canned_acl(access: AccessPolicy) -> ObjectCannedAcl {
        match access {
            AccessPolicy::Private => ObjectCannedAcl::Private,
            AccessPolicy::PublicRead => ObjectCannedAcl::PublicRead,
        }
    }

    /// Whether an SDK error is worth retrying (the request may never
    /// have reached the store).
    fn is_transient<E, R>(err: &SdkError<E, R>) -> bool {
        matches!(
            err,
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
        )
    }

    fn map_other(context: &str, is_transient: bool, err: impl std::fmt::Display) -> BackendError {
        BackendError::other(is_transient, anyhow::anyhow!("S3 {context}: {err}"))
    }
}

impl ObjectBackend for S3Backend {
    fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, BackendError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let remote_key = self.remote_key(&key);

            debug!("S3 get_object: bucket={} key={}", self.bucket, remote_key);

            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&remote_key)
                .set_range(range.map(Self::range_header))
                .send()
                .await
                .map_err(|e| {
                    let is_transient = Self::is_transient(&e);
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        BackendError::KeyNotFound
                    } else {
                        Self::map_other("get_object", is_transient, service_err)
                    }
                })?;

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::map_other("get_object body", true, e))?;

            Ok(body.into_bytes())
        })
    }

    fn put(
        &self,
        key: &str,
        data: Bytes,
        opts: PutOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let remote_key = self.remote_key(&key);

            debug!(
                "S3 put_object: bucket={} key={} bytes={} if_none_match={}",
                self.bucket,
                remote_key,
                data.len(),
                opts.if_none_match
            );

            let mut req = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&remote_key)
                .content_type(&opts.content_type)
                .acl(Self::canned_acl(opts.access))
                .body(aws_sdk_s3::primitives::ByteStream::from(data));

            if opts.if_none_match {
                req = req.if_none_match("*");
            }

            req.send().await.map_err(|e| {
                let is_transient = Self::is_transient(&e);
                let precondition_status = matches!(
                    &e,
                    SdkError::ServiceError(ctx) if ctx.raw().status().as_u16() == 412
                );
                let service_err = e.into_service_error();
                let code = service_err.meta().code().unwrap_or("");
                if precondition_status
                    || code == "PreconditionFailed"
                    || code == "ConditionalRequestConflict"
                {
                    BackendError::PreconditionFailed
                } else {
                    Self::map_other("put_object", is_transient, service_err)
                }
            })?;

            Ok(())
        })
    }

    fn delete(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let remote_key = self.remote_key(&key);

            debug!("S3 delete_object: bucket={} key={}", self.bucket, remote_key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&remote_key)
                .send()
                .await
                .map_err(|e| {
                    let is_transient = Self::is_transient(&e);
                    Self::map_other("delete_object", is_transient, e.into_service_error())
                })?;

            Ok(())
        })
    }

    fn head(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectMetadata, BackendError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let remote_key = self.remote_key(&key);

            debug!("S3 head_object: bucket={} key={}", self.bucket, remote_key);

            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&remote_key)
                .send()
                .await
            {
                Ok(resp) => Ok(ObjectMetadata {
                    size: resp.content_length().unwrap_or(0).max(0) as u64,
                    etag: resp.e_tag().map(|s| s.to_string()),
                    last_modified_ms: resp
                        .last_modified()
                        .and_then(|dt| dt.to_millis().ok()),
                }),
                Err(e) => {
                    let is_transient = Self::is_transient(&e);
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Err(BackendError::KeyNotFound)
                    } else {
                        Err(Self::map_other("head_object", is_transient, service_err))
                    }
                }
            }
        })
    }

    fn list(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, BackendError>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let remote_prefix = self.remote_key(&prefix);

            debug!("S3 list_objects_v2: bucket={} prefix={}", self.bucket, remote_prefix);

            let mut keys = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&remote_prefix);

                if let Some(ref token) = continuation_token {
                    req = req.continuation_token(token);
                }

                let resp = req.send().await.map_err(|e| {
                    let is_transient = Self::is_transient(&e);
                    Self::map_other("list_objects_v2", is_transient, e.into_service_error())
                })?;

                for obj in resp.contents() {
                    if let Some(remote_key) = obj.key() {
                        // Strip the bucket-level prefix back off so callers
                        // see logical keys.
                        if let Some(key) = remote_key.strip_prefix(&self.prefix) {
                            keys.push(key.to_string());
                        }
                    }
                }

                if resp.is_truncated() == Some(true) {
                    continuation_token = resp.next_continuation_token().map(|s| s.to_string());
                } else {
                    break;
                }
            }

            Ok(keys)
        })
    }
}

// -- Tests --------------------------------------------------------------------
