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
use crate::billing::model::{Invoice, InvoiceStatus, NewInvoice};
use crate::common::error::RepositoryResult;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InvoicesRepository: Send + Sync {
    /// Inserts or refreshes the local mirror row. A row that already reached
    /// `confirmed` keeps that status: confirmation is terminal for dunning.
    async fn upsert(&self, invoice: NewInvoice) -> RepositoryResult<()>;

    async fn get(&self, id: &str) -> RepositoryResult<Option<Invoice>>;

    async fn list_for_tenant(&self, tenant_id: &str) -> RepositoryResult<Vec<Invoice>>;

    /// Marks a status change reported by the gateway. Unknown invoices are
    /// ignored.
    async fn mark_status(&self, id: &str, status: InvoiceStatus) -> RepositoryResult<()>;
}

#[async_trait]
impl InvoicesRepository for PgPoolManager {
    async fn upsert(&self, invoice: NewInvoice) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, tenant_id, amount, currency, due_date, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                due_date = EXCLUDED.due_date,
                status = CASE
                    WHEN invoices.status = 'confirmed' THEN invoices.status
                    ELSE EXCLUDED.status
                END,
                updated_at = NOW()
            "#,
        )
        .bind(&invoice.id)
        .bind(&invoice.tenant_id)
        .bind(&invoice.amount)
        .bind(&invoice.currency)
        .bind(invoice.due_date)
        .bind(invoice.status.as_str())
        .execute(&self.get_main_pool())
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> RepositoryResult<Option<Invoice>> {
        Ok(
            sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.get_main_pool())
                .await?,
        )
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> RepositoryResult<Vec<Invoice>> {
        Ok(sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE tenant_id = $1 ORDER BY due_date",
        )
        .bind(tenant_id)
        .fetch_all(&self.get_main_pool())
        .await?)
    }

    async fn mark_status(&self, id: &str, status: InvoiceStatus) -> RepositoryResult<()> {
        sqlx::query("UPDATE invoices SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.get_main_pool())
            .await?;
        Ok(())
    }
}
