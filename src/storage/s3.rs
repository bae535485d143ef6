use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};

use super::{ObjectMeta, ObjectStore};
use crate::config::MinioConfig;

/// [`ObjectStore`] over any S3-compatible endpoint (MinIO in practice).
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: &MinioConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "minio-env",
        );

        let timeouts = TimeoutConfig::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .operation_timeout(config.timeout)
            .build();

        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(config.endpoint_url())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            // MinIO serves buckets by path, not by virtual host.
            .force_path_style(true)
            .timeout_config(timeouts)
            .retry_config(RetryConfig::disabled())
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(e).context("S3 HeadBucket request failed")
                }
            }
        }
    }

    async fn create_bucket(&self) -> Result<()> {
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .context("S3 CreateBucket request failed")?;
        Ok(())
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("S3 PutObject failed for {key}"))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.context("S3 ListObjectsV2 request failed")?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));
                objects.push(ObjectMeta {
                    key: key.to_owned(),
                    last_modified,
                });
            }
        }
        Ok(objects)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("S3 GetObject failed for {key}"))?;

        let body = output
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read S3 object body for {key}"))?;
        Ok(body.into_bytes().to_vec())
    }
}
