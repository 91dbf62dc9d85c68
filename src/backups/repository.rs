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

use crate::app::database::{PgPoolManager, PoolManager};
use crate::backups::model::{BackupRecord, NewBackupRecord};
use crate::common::error::RepositoryResult;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupRecordsRepository: Send + Sync {
    async fn insert(&self, record: NewBackupRecord) -> RepositoryResult<BackupRecord>;
    async fn get(&self, tenant_id: &str, backup_id: &str)
    -> RepositoryResult<Option<BackupRecord>>;
    /// Newest first.
    async fn list_for_tenant(&self, tenant_id: &str) -> RepositoryResult<Vec<BackupRecord>>;
    /// Newest first.
    async fn list_for_tenant_and_kind(
        &self,
        tenant_id: &str,
        kind: &str,
    ) -> RepositoryResult<Vec<BackupRecord>>;
    async fn latest_final(&self, tenant_id: &str) -> RepositoryResult<Option<BackupRecord>>;
    async fn delete(&self, id: &str) -> RepositoryResult<()>;
}

#[async_trait]
impl BackupRecordsRepository for PgPoolManager {
    async fn insert(&self, record: NewBackupRecord) -> RepositoryResult<BackupRecord> {
        Ok(sqlx::query_as::<_, BackupRecord>(
            r#"
            INSERT INTO backup_records (id, tenant_id, kind, size_bytes, checksum, object_key, retention_class)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(record.kind.as_str())
        .bind(record.size_bytes)
        .bind(&record.checksum)
        .bind(&record.object_key)
        .bind(record.kind.retention_class())
        .fetch_one(&self.get_main_pool())
        .await?)
    }

    async fn get(
        &self,
        tenant_id: &str,
        backup_id: &str,
    ) -> RepositoryResult<Option<BackupRecord>> {
        Ok(sqlx::query_as::<_, BackupRecord>(
            "SELECT * FROM backup_records WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(backup_id)
        .fetch_optional(&self.get_main_pool())
        .await?)
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> RepositoryResult<Vec<BackupRecord>> {
        Ok(sqlx::query_as::<_, BackupRecord>(
            "SELECT * FROM backup_records WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.get_main_pool())
        .await?)
    }

    async fn list_for_tenant_and_kind(
        &self,
        tenant_id: &str,
        kind: &str,
    ) -> RepositoryResult<Vec<BackupRecord>> {
        Ok(sqlx::query_as::<_, BackupRecord>(
            r#"
            SELECT *
            FROM backup_records
            WHERE tenant_id = $1
                AND kind = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(kind)
        .fetch_all(&self.get_main_pool())
        .await?)
    }

    async fn latest_final(&self, tenant_id: &str) -> RepositoryResult<Option<BackupRecord>> {
        Ok(sqlx::query_as::<_, BackupRecord>(
            r#"
            SELECT *
            FROM backup_records
            WHERE tenant_id = $1
                AND kind = 'final'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.get_main_pool())
        .await?)
    }

    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        sqlx::query("DELETE FROM backup_records WHERE id = $1")
            .bind(id)
            .execute(&self.get_main_pool())
            .await?;
        Ok(())
    }
}
