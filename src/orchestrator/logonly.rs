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

use super::{
    DatabaseInit, DriverResult, ExecOutput, OrchestratorDriver, PodTarget, WordPressEnv,
    WorkloadRef, namespace_for,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Explicit development-mode driver selected only when no orchestrator
/// endpoint is configured. Every operation logs what it would have done and
/// simulates success. No state is kept.
pub struct LogOnlyOrchestrator;

#[async_trait]
impl OrchestratorDriver for LogOnlyOrchestrator {
    async fn ensure_namespace(&self, tenant_id: &str) -> DriverResult<String> {
        let namespace = namespace_for(tenant_id);
        info!("[log-only] would ensure namespace {namespace}");
        Ok(namespace)
    }

    async fn ensure_secret(
        &self,
        tenant_id: &str,
        name: &str,
        _data: BTreeMap<String, String>,
    ) -> DriverResult<String> {
        info!("[log-only] would ensure secret {name} for tenant {tenant_id}");
        Ok(name.to_string())
    }

    async fn ensure_config(
        &self,
        tenant_id: &str,
        name: &str,
        _data: BTreeMap<String, String>,
    ) -> DriverResult<String> {
        info!("[log-only] would ensure config {name} for tenant {tenant_id}");
        Ok(name.to_string())
    }

    async fn ensure_database_deployment(
        &self,
        tenant_id: &str,
        _creds: DatabaseInit,
    ) -> DriverResult<WorkloadRef> {
        info!("[log-only] would ensure database deployment for tenant {tenant_id}");
        Ok(WorkloadRef {
            namespace: namespace_for(tenant_id),
            name: super::database_deployment(tenant_id),
        })
    }

    async fn ensure_wordpress_deployment(
        &self,
        tenant_id: &str,
        domain: &str,
        _env: WordPressEnv,
    ) -> DriverResult<WorkloadRef> {
        info!("[log-only] would ensure WordPress deployment for tenant {tenant_id} at {domain}");
        Ok(WorkloadRef {
            namespace: namespace_for(tenant_id),
            name: super::wordpress_deployment(tenant_id),
        })
    }

    async fn wait_ready(&self, reference: WorkloadRef, _deadline: Duration) -> DriverResult<()> {
        info!("[log-only] would wait for {} to become ready", reference.name);
        Ok(())
    }

    async fn ensure_ingress(
        &self,
        tenant_id: &str,
        domain: &str,
        _tls_secret: &str,
    ) -> DriverResult<String> {
        info!("[log-only] would ensure ingress for tenant {tenant_id} at {domain}");
        Ok(super::wordpress_deployment(tenant_id))
    }

    async fn set_ingress_backend(
        &self,
        tenant_id: &str,
        service: &str,
        port: u16,
    ) -> DriverResult<()> {
        info!("[log-only] would route ingress of {tenant_id} to {service}:{port}");
        Ok(())
    }

    async fn scale_deployment(
        &self,
        tenant_id: &str,
        name: &str,
        replicas: u32,
    ) -> DriverResult<()> {
        info!("[log-only] would scale {name} of tenant {tenant_id} to {replicas}");
        Ok(())
    }

    async fn ensure_backup_cron(&self, tenant_id: &str, schedule: &str) -> DriverResult<()> {
        info!("[log-only] would ensure backup cron '{schedule}' for tenant {tenant_id}");
        Ok(())
    }

    async fn delete_namespace(&self, tenant_id: &str) -> DriverResult<()> {
        info!("[log-only] would delete namespace {}", namespace_for(tenant_id));
        Ok(())
    }

    async fn exec_in_pod(
        &self,
        tenant_id: &str,
        target: PodTarget,
        command: Vec<String>,
        _stdin: Option<Vec<u8>>,
        _deadline: Duration,
    ) -> DriverResult<ExecOutput> {
        info!(
            "[log-only] would exec in {} pod of tenant {tenant_id}: {}",
            target.deployment(tenant_id),
            command.first().map(String::as_str).unwrap_or("")
        );
        Ok(ExecOutput::default())
    }
}
