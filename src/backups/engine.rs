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

use crate::app::config::AppConfig;
use crate::backups::model::{
    BackupContents, BackupKind, BackupMetadata, BackupRecord, NewBackupRecord, backup_id,
    object_key,
};
use crate::backups::repository::BackupRecordsRepository;
use crate::backups::storage::{ObjectStore, RetentionRule, StorageError};
use crate::common::MailTransporter;
use crate::common::clock::Clock;
use crate::common::dto::GeneralError;
use crate::common::error::{FriendlyError, IntoFriendlyError, RepositoryError};
use crate::common::locks::TenantLocks;
use crate::events::{DomainEvent, EventBus};
use crate::orchestrator::{
    DriverError, OrchestratorDriver, PodTarget, copy_from_pod, copy_to_pod,
};
use crate::tenants::model::{SiteCredentials, Tenant};
use crate::tenants::repository::TenantsRepository;
use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

const STREAM_DEADLINE: Duration = Duration::from_secs(3600);
const STORAGE_CLASS: &str = "STANDARD_IA";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Checksum mismatch: expected {expected}, archive hashes to {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Tenant {0} has no stored credentials")]
    MissingCredentials(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),
}

pub type BackupResult<T> = Result<T, BackupError>;

#[async_trait]
impl IntoFriendlyError<GeneralError> for BackupError {
    async fn into_friendly_error(
        self,
        mailer: Arc<dyn MailTransporter>,
    ) -> FriendlyError<GeneralError> {
        match self {
            e @ BackupError::NotFound(_) => FriendlyError::user_facing(
                tracing::Level::DEBUG,
                axum::http::StatusCode::NOT_FOUND,
                file!(),
                GeneralError {
                    message: e.to_string(),
                },
            ),
            BackupError::Repository(e) if e.is_not_found() => FriendlyError::user_facing(
                tracing::Level::DEBUG,
                axum::http::StatusCode::NOT_FOUND,
                file!(),
                GeneralError {
                    message: "The requested tenant does not exist".to_string(),
                },
            ),
            e => {
                FriendlyError::internal_with_admin_notify(
                    file!(),
                    GeneralError {
                        message: e.to_string(),
                    },
                    mailer,
                )
                .await
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BackupListing {
    #[serde(flatten)]
    pub record: BackupRecord,
    pub download_url: Option<String>,
}

/// The backup surface consumed by the lifecycle machine and the dunning
/// scheduler.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupService: Send + Sync {
    async fn take(&self, tenant_id: &str, kind: BackupKind) -> BackupResult<BackupRecord>;

    async fn restore(
        &self,
        tenant_id: &str,
        backup_id: &str,
        database: bool,
        files: bool,
    ) -> BackupResult<()>;

    async fn list(&self, tenant_id: &str) -> BackupResult<Vec<BackupListing>>;

    /// Returns the newest `final` backup, taking one first if none exists.
    async fn ensure_final_backup(&self, tenant_id: &str) -> BackupResult<BackupRecord>;
}

/// Produces self-describing tenant archives and stores them with a retention
/// class; reverses the process on restore. `take` and `restore` for the same
/// tenant are mutually exclusive.
pub struct BackupEngine {
    driver: Arc<dyn OrchestratorDriver>,
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn BackupRecordsRepository>,
    tenants: Arc<dyn TenantsRepository>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: Arc<AppConfig>,
    locks: TenantLocks,
}

impl BackupEngine {
    pub fn new(
        driver: Arc<dyn OrchestratorDriver>,
        store: Arc<dyn ObjectStore>,
        records: Arc<dyn BackupRecordsRepository>,
        tenants: Arc<dyn TenantsRepository>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            driver,
            store,
            records,
            tenants,
            bus,
            clock,
            config,
            locks: TenantLocks::new(),
        }
    }

    /// Installs the bucket lifecycle policy derived from the retention
    /// classes. Called once at startup.
    pub async fn install_retention_rules(&self) -> BackupResult<()> {
        let rules = BackupKind::ALL
            .iter()
            .filter_map(|kind| {
                kind.retention_days().map(|days| RetentionRule {
                    id: format!("expire-{kind}-backups"),
                    prefix: format!("{kind}/"),
                    expiration_days: days,
                })
            })
            .collect();
        self.store.apply_retention_rules(rules).await?;
        Ok(())
    }

    async fn dump_database(
        &self,
        tenant: &Tenant,
        credentials: &SiteCredentials,
        scratch: &Path,
    ) -> BackupResult<std::path::PathBuf> {
        let dump = self
            .driver
            .exec_in_pod(
                &tenant.id,
                PodTarget::Database,
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!(
                        "MYSQL_PWD={} mysqldump --user={} --single-transaction --routines --triggers --events {}",
                        credentials.db_password, credentials.db_user, credentials.db_name
                    ),
                ],
                None,
                STREAM_DEADLINE,
            )
            .await?
            .ensure_success()?;

        let path = scratch.join("database.sql.gz");
        let file = std::fs::File::create(&path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&dump.stdout)?;
        encoder.finish()?;
        Ok(path)
    }

    async fn archive_site_files(
        &self,
        tenant: &Tenant,
        contents: &BackupContents,
        scratch: &Path,
    ) -> BackupResult<std::path::PathBuf> {
        let mut paths = Vec::new();
        if contents.include_uploads {
            paths.push("/var/www/html/wp-content/uploads");
        }
        if contents.include_plugins {
            paths.push("/var/www/html/wp-content/plugins");
        }
        if contents.include_themes {
            paths.push("/var/www/html/wp-content/themes");
        }
        // wp-config.php always travels with the backup.
        paths.push("/var/www/html/wp-config.php");

        let remote_archive = format!("/tmp/wordpress_files_{}.tar.gz", tenant.id);
        let mut command = vec![
            "tar".to_string(),
            "-czf".to_string(),
            remote_archive.clone(),
        ];
        command.extend(paths.iter().map(|p| p.to_string()));
        self.driver
            .exec_in_pod(
                &tenant.id,
                PodTarget::WordPress,
                command,
                None,
                STREAM_DEADLINE,
            )
            .await?
            .ensure_success()?;

        let bytes = copy_from_pod(
            self.driver.as_ref(),
            &tenant.id,
            PodTarget::WordPress,
            &remote_archive,
            STREAM_DEADLINE,
        )
        .await?;

        let cleanup = self
            .driver
            .exec_in_pod(
                &tenant.id,
                PodTarget::WordPress,
                vec!["rm".to_string(), "-f".to_string(), remote_archive],
                None,
                Duration::from_secs(30),
            )
            .await;
        if let Err(e) = cleanup {
            warn!("Could not remove staging archive in pod of {}: {e}", tenant.id);
        }

        let path = scratch.join("wordpress_files.tar.gz");
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    async fn wordpress_version(&self, tenant_id: &str) -> String {
        let result = self
            .driver
            .exec_in_pod(
                tenant_id,
                PodTarget::WordPress,
                vec!["wp".to_string(), "core".to_string(), "version".to_string()],
                None,
                Duration::from_secs(60),
            )
            .await;
        match result.map(|output| output.ensure_success()) {
            Ok(Ok(output)) => output.stdout_utf8().trim().to_string(),
            _ => "unknown".to_string(),
        }
    }

    fn assemble_archive(
        scratch: &Path,
        archive_name: &str,
        members: &[(&str, &Path)],
    ) -> BackupResult<std::path::PathBuf> {
        let archive_path = scratch.join(archive_name);
        let file = std::fs::File::create(&archive_path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, path) in members {
            builder.append_path_with_name(path, name)?;
        }
        builder.into_inner()?.finish()?;
        Ok(archive_path)
    }

    fn checksum(path: &Path) -> BackupResult<String> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    async fn take_inner(
        &self,
        tenant_id: &str,
        kind: BackupKind,
    ) -> BackupResult<BackupRecord> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        let credentials = tenant
            .credentials()
            .ok_or_else(|| BackupError::MissingCredentials(tenant_id.to_string()))?;
        let contents = BackupContents {
            database: true,
            files: true,
            include_uploads: self.config.backup().include_uploads(),
            include_plugins: self.config.backup().include_plugins(),
            include_themes: self.config.backup().include_themes(),
        };

        let now = self.clock.now();
        let id = backup_id(tenant_id, kind, now);
        let key = object_key(tenant_id, kind, &id);

        // Everything below works in a scratch directory that is removed on
        // every exit path, success or failure.
        let scratch = tempfile::tempdir()?;
        let database_path = self
            .dump_database(&tenant, &credentials, scratch.path())
            .await?;
        let files_path = self
            .archive_site_files(&tenant, &contents, scratch.path())
            .await?;

        let metadata = BackupMetadata {
            backup_id: id.clone(),
            tenant_id: tenant_id.to_string(),
            timestamp: now.to_rfc3339(),
            wordpress_version: self.wordpress_version(tenant_id).await,
            php_version: self.config.backup().php_version().to_string(),
            mysql_version: self.config.backup().mysql_version().to_string(),
            backup_contents: contents,
            retention_policy: kind.retention_class(),
        };
        let metadata_path = scratch.path().join("metadata.json");
        std::fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?)?;

        let archive_path = Self::assemble_archive(
            scratch.path(),
            &format!("{id}.tar.gz"),
            &[
                ("./database.sql.gz", database_path.as_path()),
                ("./wordpress_files.tar.gz", files_path.as_path()),
                ("./metadata.json", metadata_path.as_path()),
            ],
        )?;
        let checksum = Self::checksum(&archive_path)?;
        let bytes = std::fs::read(&archive_path)?;
        let size_bytes = bytes.len() as i64;

        let mut headers = BTreeMap::new();
        headers.insert("tenant-id".to_string(), tenant_id.to_string());
        headers.insert("kind".to_string(), kind.as_str().to_string());
        headers.insert("checksum".to_string(), checksum.clone());
        headers.insert("timestamp".to_string(), metadata.timestamp.clone());
        self.store.upload(&key, bytes, headers, STORAGE_CLASS).await?;

        let record = self
            .records
            .insert(NewBackupRecord {
                id,
                tenant_id: tenant_id.to_string(),
                kind,
                size_bytes,
                checksum,
                object_key: key,
            })
            .await?;

        self.prune_surplus(tenant_id, kind).await;
        info!(
            "Backup {} for tenant {tenant_id} stored at {} ({size_bytes} bytes)",
            record.id, record.object_key
        );
        Ok(record)
    }

    /// Count-based pruning on top of the store's age-based lifecycle rules.
    async fn prune_surplus(&self, tenant_id: &str, kind: BackupKind) {
        let retained = kind.retained_count();
        let records = match self
            .records
            .list_for_tenant_and_kind(tenant_id, kind.as_str())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not list backups of {tenant_id} for pruning: {e}");
                return;
            }
        };
        if records.len() <= retained {
            return;
        }
        for surplus in &records[retained..] {
            if let Err(e) = self.store.delete(&surplus.object_key).await {
                warn!("Could not delete surplus backup object {}: {e}", surplus.object_key);
                continue;
            }
            if let Err(e) = self.records.delete(&surplus.id).await {
                warn!("Could not delete surplus backup record {}: {e}", surplus.id);
            }
        }
    }

    async fn locate_archive(
        &self,
        tenant_id: &str,
        backup_id: &str,
    ) -> BackupResult<(String, Option<String>)> {
        if let Some(record) = self.records.get(tenant_id, backup_id).await? {
            return Ok((record.object_key.clone(), Some(record.checksum)));
        }
        // No catalog row (e.g. restored into a fresh control plane): scan
        // the four kind prefixes for the object.
        for kind in BackupKind::ALL {
            let key = object_key(tenant_id, kind, backup_id);
            if self.store.exists(&key).await? {
                return Ok((key, None));
            }
        }
        Err(BackupError::NotFound(backup_id.to_string()))
    }

    async fn restore_database(
        &self,
        tenant: &Tenant,
        credentials: &SiteCredentials,
        dump_path: &Path,
    ) -> BackupResult<()> {
        let compressed = std::fs::read(dump_path)?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut sql = Vec::new();
        decoder.read_to_end(&mut sql)?;

        copy_to_pod(
            self.driver.as_ref(),
            &tenant.id,
            PodTarget::Database,
            "/tmp/restore.sql",
            &sql,
            STREAM_DEADLINE,
        )
        .await?;
        self.driver
            .exec_in_pod(
                &tenant.id,
                PodTarget::Database,
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!(
                        "MYSQL_PWD={} mysql --user={} {} < /tmp/restore.sql",
                        credentials.db_password, credentials.db_user, credentials.db_name
                    ),
                ],
                None,
                STREAM_DEADLINE,
            )
            .await?
            .ensure_success()?;
        self.driver
            .exec_in_pod(
                &tenant.id,
                PodTarget::Database,
                vec!["rm".to_string(), "-f".to_string(), "/tmp/restore.sql".to_string()],
                None,
                Duration::from_secs(30),
            )
            .await?;
        Ok(())
    }

    async fn restore_files(&self, tenant: &Tenant, files_path: &Path) -> BackupResult<()> {
        let bytes = std::fs::read(files_path)?;
        copy_to_pod(
            self.driver.as_ref(),
            &tenant.id,
            PodTarget::WordPress,
            "/tmp/restore_files.tar.gz",
            &bytes,
            STREAM_DEADLINE,
        )
        .await?;
        for command in [
            vec![
                "tar".to_string(),
                "-xzf".to_string(),
                "/tmp/restore_files.tar.gz".to_string(),
                "-C".to_string(),
                "/var/www/html".to_string(),
            ],
            vec![
                "chown".to_string(),
                "-R".to_string(),
                "www-data:www-data".to_string(),
                "/var/www/html/wp-content".to_string(),
            ],
            vec![
                "rm".to_string(),
                "-f".to_string(),
                "/tmp/restore_files.tar.gz".to_string(),
            ],
        ] {
            self.driver
                .exec_in_pod(
                    &tenant.id,
                    PodTarget::WordPress,
                    command,
                    None,
                    STREAM_DEADLINE,
                )
                .await?
                .ensure_success()?;
        }
        Ok(())
    }

    async fn restore_inner(
        &self,
        tenant_id: &str,
        backup_id: &str,
        database: bool,
        files: bool,
    ) -> BackupResult<()> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        let credentials = tenant
            .credentials()
            .ok_or_else(|| BackupError::MissingCredentials(tenant_id.to_string()))?;

        let (key, expected_checksum) = self.locate_archive(tenant_id, backup_id).await?;
        let bytes = self.store.download(&key).await?;
        if let Some(expected) = expected_checksum {
            let actual = hex::encode(Sha256::digest(&bytes));
            if actual != expected {
                return Err(BackupError::ChecksumMismatch { expected, actual });
            }
        }

        let scratch = tempfile::tempdir()?;
        let archive_path = scratch.path().join(format!("{backup_id}.tar.gz"));
        std::fs::write(&archive_path, &bytes)?;
        let file = std::fs::File::open(&archive_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .unpack(scratch.path())
            .map_err(|e| BackupError::InvalidArchive(e.to_string()))?;

        let metadata_path = scratch.path().join("metadata.json");
        let metadata: Option<BackupMetadata> = std::fs::read(&metadata_path)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok());
        if let Some(metadata) = &metadata
            && metadata.tenant_id != tenant_id
        {
            return Err(BackupError::InvalidArchive(format!(
                "archive belongs to tenant {}",
                metadata.tenant_id
            )));
        }

        if database {
            self.restore_database(&tenant, &credentials, &scratch.path().join("database.sql.gz"))
                .await?;
        }
        if files {
            self.restore_files(&tenant, &scratch.path().join("wordpress_files.tar.gz"))
                .await?;
        }
        info!("Restore of backup {backup_id} for tenant {tenant_id} finished");
        Ok(())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(value: serde_json::Error) -> Self {
        BackupError::InvalidArchive(value.to_string())
    }
}

#[async_trait]
impl BackupService for BackupEngine {
    async fn take(&self, tenant_id: &str, kind: BackupKind) -> BackupResult<BackupRecord> {
        let lock = self.locks.lock_for(tenant_id);
        let _guard = lock.lock().await;
        let result = self.take_inner(tenant_id, kind).await;
        match &result {
            Ok(record) => {
                self.bus
                    .publish(DomainEvent::BackupCompleted {
                        tenant_id: tenant_id.to_string(),
                        backup_id: record.id.clone(),
                    })
                    .await;
            }
            Err(e) => {
                error!("Backup of tenant {tenant_id} failed: {e}");
                self.bus
                    .publish(DomainEvent::BackupFailed {
                        tenant_id: tenant_id.to_string(),
                        reason: e.to_string(),
                    })
                    .await;
            }
        }
        result
    }

    async fn restore(
        &self,
        tenant_id: &str,
        backup_id: &str,
        database: bool,
        files: bool,
    ) -> BackupResult<()> {
        let lock = self.locks.lock_for(tenant_id);
        let _guard = lock.lock().await;
        self.restore_inner(tenant_id, backup_id, database, files)
            .await
    }

    async fn list(&self, tenant_id: &str) -> BackupResult<Vec<BackupListing>> {
        let records = self.records.list_for_tenant(tenant_id).await?;
        let expiry = self.config.object_store().presign_expiry_secs();
        let mut listings = Vec::with_capacity(records.len());
        for record in records {
            let download_url = self
                .store
                .presign_get(&record.object_key, expiry)
                .await
                .ok();
            listings.push(BackupListing {
                record,
                download_url,
            });
        }
        Ok(listings)
    }

    async fn ensure_final_backup(&self, tenant_id: &str) -> BackupResult<BackupRecord> {
        if let Some(record) = self.records.latest_final(tenant_id).await? {
            return Ok(record);
        }
        self.take(tenant_id, BackupKind::Final).await
    }
}
