/*
 * This file is part of the Sitora hosting platform.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::app::config::ObjectStoreConfig;
use crate::common::retry::Retryable;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, ExpirationStatus, LifecycleExpiration,
    LifecycleRule as S3LifecycleRule, LifecycleRuleFilter, StorageClass,
};
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store failure: {0}")]
    Api(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

impl Retryable for StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, StorageError::Api(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One object-store lifecycle rule: everything under `prefix` expires after
/// `expiration_days`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionRule {
    pub id: String,
    pub prefix: String,
    pub expiration_days: i32,
}

/// Backup blob storage. Keys are tenant-scoped; the engine never writes
/// outside its tenant's prefix.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: BTreeMap<String, String>,
        storage_class: &str,
    ) -> StorageResult<()>;

    async fn download(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn presign_get(&self, key: &str, expires_in_secs: u64) -> StorageResult<String>;

    /// Installs the retention rules on the bucket. Ran once at startup; the
    /// store enforces expiry from then on.
    async fn apply_retention_rules(&self, rules: Vec<RetentionRule>) -> StorageResult<()>;
}

/// S3-compatible implementation (AWS S3, R2, MinIO) over the AWS SDK.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(config: &ObjectStoreConfig) -> Self {
        let mut loader = aws_config::from_env().region(Region::new(config.region().to_string()));
        if let Some(endpoint) = config.endpoint() {
            loader = loader.endpoint_url(endpoint);
        }
        if !config.access_key().is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                config.access_key(),
                config.secret_key(),
                None,
                None,
                "sitora-config",
            ));
        }
        let aws_config = loader.load().await;
        Self {
            client: Client::new(&aws_config),
            bucket: config.bucket().to_string(),
        }
    }

    fn map_s3_error<E: std::fmt::Display>(err: E) -> StorageError {
        StorageError::Api(err.to_string())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: BTreeMap<String, String>,
        storage_class: &str,
    ) -> StorageResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .storage_class(StorageClass::from(storage_class))
            .body(ByteStream::from(bytes));
        for (name, value) in metadata {
            request = request.metadata(name, value);
        }
        request.send().await.map_err(Self::map_s3_error)?;
        info!("Uploaded backup object {key}");
        Ok(())
    }

    async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let rendered = e.to_string();
                if rendered.contains("NoSuchKey") {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Api(rendered)
                }
            })?;
        let data = output
            .body
            .collect()
            .await
            .map_err(Self::map_s3_error)?
            .into_bytes();
        Ok(data.to_vec())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_s3_error)?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in_secs: u64) -> StorageResult<String> {
        let presigning_config = aws_sdk_s3::presigning::PresigningConfig::builder()
            .expires_in(Duration::from_secs(expires_in_secs))
            .build()
            .map_err(Self::map_s3_error)?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(Self::map_s3_error)?;
        Ok(presigned.uri().to_string())
    }

    async fn apply_retention_rules(&self, rules: Vec<RetentionRule>) -> StorageResult<()> {
        let mut s3_rules = Vec::with_capacity(rules.len());
        for rule in &rules {
            s3_rules.push(
                S3LifecycleRule::builder()
                    .id(&rule.id)
                    .status(ExpirationStatus::Enabled)
                    .filter(LifecycleRuleFilter::builder().prefix(&rule.prefix).build())
                    .expiration(
                        LifecycleExpiration::builder()
                            .days(rule.expiration_days)
                            .build(),
                    )
                    .build()
                    .map_err(Self::map_s3_error)?,
            );
        }
        let configuration = BucketLifecycleConfiguration::builder()
            .set_rules(Some(s3_rules))
            .build()
            .map_err(Self::map_s3_error)?;
        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(&self.bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await
            .map_err(Self::map_s3_error)?;
        info!("Object store retention rules installed on bucket {}", self.bucket);
        Ok(())
    }
}
