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

use crate::app::config::BasicDatabaseConfig;
use crate::common::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::time::Duration;

/// Provides access to the control plane's own Postgres pool. Tenant site
/// databases live on the orchestrator and are never reached through sqlx;
/// this pool holds only the durable control-plane state.
#[cfg_attr(test, automock)]
pub trait PoolManager: Send + Sync {
    fn get_main_pool(&self) -> PgPool;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseMigrator: Send + Sync {
    async fn migrate_main_db(&self) -> RepositoryResult<()>;
}

/// Process-wide advisory locks backed by Postgres. Used for single-leader
/// work such as the dunning tick: whichever instance gets the lock runs the
/// tick, everybody else skips it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Attempts to take the advisory lock identified by `key`, giving up
    /// after `timeout`. Returns whether the lock was acquired.
    async fn try_acquire(&self, key: i64, timeout: Duration) -> RepositoryResult<bool>;
    async fn release(&self, key: i64) -> RepositoryResult<()>;
}

pub struct PgPoolManager {
    main_pool: PgPool,
}

impl PgPoolManager {
    pub async fn new(config: &BasicDatabaseConfig) -> Result<Self, sqlx::Error> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database);
        let main_pool = PgPoolOptions::new()
            .max_connections(config.max_pool_size())
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        Ok(Self { main_pool })
    }
}

impl PoolManager for PgPoolManager {
    fn get_main_pool(&self) -> PgPool {
        self.main_pool.clone()
    }
}

#[async_trait]
impl DatabaseMigrator for PgPoolManager {
    async fn migrate_main_db(&self) -> RepositoryResult<()> {
        sqlx::migrate!("./migrations").run(&self.main_pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LeaderLock for PgPoolManager {
    async fn try_acquire(&self, key: i64, timeout: Duration) -> RepositoryResult<bool> {
        let acquired: (bool,) = tokio::time::timeout(
            timeout,
            sqlx::query_as("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&self.main_pool),
        )
        .await
        .map_err(|_| RepositoryError::Custom(format!("advisory lock {key} timed out")))??;
        Ok(acquired.0)
    }

    async fn release(&self, key: i64) -> RepositoryResult<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .execute(&self.main_pool)
            .await?;
        Ok(())
    }
}
