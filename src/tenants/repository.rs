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
use crate::common::error::{RepositoryError, RepositoryResult};
use crate::tenants::model::{LifecycleEventRow, LifecycleState, Tenant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

/// Insert payload for a tenant entering the `Provisioning` state.
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub id: String,
    pub business_name: String,
    pub domain: String,
    pub industry: String,
    pub plan: String,
    pub owner_id: String,
    pub contact_email: String,
    pub whatsapp_contact: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLifecycleEvent {
    pub tenant_id: String,
    pub from_state: LifecycleState,
    pub to_state: LifecycleState,
    pub reason: String,
    pub cause: String,
    pub ts: DateTime<Utc>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantsRepository: Send + Sync {
    async fn insert_provisioning(&self, tenant: NewTenant) -> RepositoryResult<Tenant>;
    async fn get_by_id(&self, id: &str) -> RepositoryResult<Tenant>;
    async fn find_by_domain(&self, domain: &str) -> RepositoryResult<Option<Tenant>>;
    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> RepositoryResult<Option<Tenant>>;

    /// Write-once: only succeeds while the blob column is still NULL.
    async fn store_credentials(
        &self,
        id: &str,
        blob: serde_json::Value,
    ) -> RepositoryResult<()>;
    async fn zero_credentials(&self, id: &str) -> RepositoryResult<()>;
    async fn mark_credentials_revealed(&self, id: &str) -> RepositoryResult<()>;

    async fn set_provision_step(&self, id: &str, step: i16) -> RepositoryResult<()>;
    async fn set_subscription(
        &self,
        id: &str,
        customer_ref: Option<String>,
        subscription_ref: Option<String>,
    ) -> RepositoryResult<()>;

    /// Compare-and-set state transition. Returns whether the row moved, i.e.
    /// whether this caller won the transition.
    async fn transition_state(
        &self,
        id: &str,
        from: LifecycleState,
        to: LifecycleState,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    async fn set_grace_anchor_if_absent(
        &self,
        id: &str,
        anchor: DateTime<Utc>,
    ) -> RepositoryResult<()>;
    async fn clear_grace_anchor(&self, id: &str) -> RepositoryResult<()>;
    async fn set_deletion_due(
        &self,
        id: &str,
        due: Option<DateTime<Utc>>,
    ) -> RepositoryResult<()>;

    async fn list_in_states(
        &self,
        states: Vec<String>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Tenant>>;
    async fn count_by_state(&self) -> RepositoryResult<Vec<(String, i64)>>;

    async fn append_lifecycle_event(&self, event: NewLifecycleEvent) -> RepositoryResult<()>;
    async fn lifecycle_events(&self, tenant_id: &str)
    -> RepositoryResult<Vec<LifecycleEventRow>>;
}

#[async_trait]
impl TenantsRepository for PgPoolManager {
    async fn insert_provisioning(&self, tenant: NewTenant) -> RepositoryResult<Tenant> {
        Ok(sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants
                (id, business_name, domain, industry, plan, owner_id, contact_email, whatsapp_contact, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'provisioning')
            RETURNING *
            "#,
        )
        .bind(&tenant.id)
        .bind(&tenant.business_name)
        .bind(&tenant.domain)
        .bind(&tenant.industry)
        .bind(&tenant.plan)
        .bind(&tenant.owner_id)
        .bind(&tenant.contact_email)
        .bind(&tenant.whatsapp_contact)
        .fetch_one(&self.get_main_pool())
        .await?)
    }

    async fn get_by_id(&self, id: &str) -> RepositoryResult<Tenant> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.get_main_pool())
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_by_domain(&self, domain: &str) -> RepositoryResult<Option<Tenant>> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE domain = $1")
                .bind(domain)
                .fetch_optional(&self.get_main_pool())
                .await?,
        )
    }

    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> RepositoryResult<Option<Tenant>> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE subscription_ref = $1")
                .bind(subscription_ref)
                .fetch_optional(&self.get_main_pool())
                .await?,
        )
    }

    async fn store_credentials(
        &self,
        id: &str,
        blob: serde_json::Value,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET credentials_blob = $2,
                updated_at = NOW()
            WHERE id = $1
                AND credentials_blob IS NULL
            "#,
        )
        .bind(id)
        .bind(&blob)
        .execute(&self.get_main_pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::Custom(format!(
                "credentials for tenant {id} were already written"
            )));
        }
        Ok(())
    }

    async fn zero_credentials(&self, id: &str) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE tenants SET credentials_blob = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.get_main_pool())
        .await?;
        Ok(())
    }

    async fn mark_credentials_revealed(&self, id: &str) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE tenants SET credentials_revealed = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.get_main_pool())
        .await?;
        Ok(())
    }

    async fn set_provision_step(&self, id: &str, step: i16) -> RepositoryResult<()> {
        sqlx::query("UPDATE tenants SET provision_step = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(step)
            .execute(&self.get_main_pool())
            .await?;
        Ok(())
    }

    async fn set_subscription(
        &self,
        id: &str,
        customer_ref: Option<String>,
        subscription_ref: Option<String>,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET customer_ref = $2,
                subscription_ref = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&customer_ref)
        .bind(&subscription_ref)
        .execute(&self.get_main_pool())
        .await?;
        Ok(())
    }

    async fn transition_state(
        &self,
        id: &str,
        from: LifecycleState,
        to: LifecycleState,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET state = $3,
                state_since = $4,
                updated_at = NOW()
            WHERE id = $1
                AND state = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&self.get_main_pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_grace_anchor_if_absent(
        &self,
        id: &str,
        anchor: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET grace_anchor = COALESCE(grace_anchor, $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(anchor)
        .execute(&self.get_main_pool())
        .await?;
        Ok(())
    }

    async fn clear_grace_anchor(&self, id: &str) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET grace_anchor = NULL,
                deletion_due_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.get_main_pool())
        .await?;
        Ok(())
    }

    async fn set_deletion_due(
        &self,
        id: &str,
        due: Option<DateTime<Utc>>,
    ) -> RepositoryResult<()> {
        sqlx::query("UPDATE tenants SET deletion_due_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(due)
            .execute(&self.get_main_pool())
            .await?;
        Ok(())
    }

    async fn list_in_states(
        &self,
        states: Vec<String>,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<Tenant>> {
        Ok(sqlx::query_as::<_, Tenant>(
            r#"
            SELECT *
            FROM tenants
            WHERE state = ANY($1)
            ORDER BY id
            LIMIT $2
            OFFSET $3
            "#,
        )
        .bind(&states)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.get_main_pool())
        .await?)
    }

    async fn count_by_state(&self) -> RepositoryResult<Vec<(String, i64)>> {
        Ok(
            sqlx::query_as("SELECT state, COUNT(*) FROM tenants GROUP BY state")
                .fetch_all(&self.get_main_pool())
                .await?,
        )
    }

    async fn append_lifecycle_event(&self, event: NewLifecycleEvent) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lifecycle_events (tenant_id, from_state, to_state, reason, cause, ts)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.tenant_id)
        .bind(event.from_state.as_str())
        .bind(event.to_state.as_str())
        .bind(&event.reason)
        .bind(&event.cause)
        .bind(event.ts)
        .execute(&self.get_main_pool())
        .await?;
        Ok(())
    }

    async fn lifecycle_events(
        &self,
        tenant_id: &str,
    ) -> RepositoryResult<Vec<LifecycleEventRow>> {
        Ok(sqlx::query_as::<_, LifecycleEventRow>(
            "SELECT * FROM lifecycle_events WHERE tenant_id = $1 ORDER BY seq",
        )
        .bind(tenant_id)
        .fetch_all(&self.get_main_pool())
        .await?)
    }
}
