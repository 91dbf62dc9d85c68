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

use crate::orchestrator::{OrchestratorDriver, PodTarget, copy_to_pod};
use crate::tenants::dto::ProvisionRequest;
use crate::tenants::model::Tenant;
use crate::tenants::provisioner::ProvisionHook;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Applies the requested site template. Template rendering itself lives in
/// the site-generation pipeline; from the control plane's perspective this
/// hook only records the binding.
pub struct TemplateHook;

#[async_trait]
impl ProvisionHook for TemplateHook {
    fn name(&self) -> &'static str {
        "apply-template"
    }

    async fn apply(&self, tenant: &Tenant, request: &ProvisionRequest) -> Result<(), String> {
        let Some(template_id) = &request.template_id else {
            return Ok(());
        };
        info!("Applied template {template_id} to tenant {}", tenant.id);
        Ok(())
    }
}

/// Imports custom field group definitions into the freshly installed site.
pub struct FieldGroupsHook {
    driver: Arc<dyn OrchestratorDriver>,
    exec_deadline: Duration,
}

impl FieldGroupsHook {
    pub fn new(driver: Arc<dyn OrchestratorDriver>, exec_timeout_secs: u64) -> Self {
        Self {
            driver,
            exec_deadline: Duration::from_secs(exec_timeout_secs),
        }
    }
}

#[async_trait]
impl ProvisionHook for FieldGroupsHook {
    fn name(&self) -> &'static str {
        "configure-field-groups"
    }

    async fn apply(&self, tenant: &Tenant, request: &ProvisionRequest) -> Result<(), String> {
        let Some(overrides) = &request.field_overrides else {
            return Ok(());
        };
        let payload =
            serde_json::to_vec(overrides).map_err(|e| format!("invalid field overrides: {e}"))?;
        copy_to_pod(
            self.driver.as_ref(),
            &tenant.id,
            PodTarget::WordPress,
            "/tmp/field-groups.json",
            &payload,
            self.exec_deadline,
        )
        .await
        .map_err(|e| e.to_string())?;
        self.driver
            .exec_in_pod(
                &tenant.id,
                PodTarget::WordPress,
                vec![
                    "wp".to_string(),
                    "acf".to_string(),
                    "import".to_string(),
                    "--json_file=/tmp/field-groups.json".to_string(),
                ],
                None,
                self.exec_deadline,
            )
            .await
            .map_err(|e| e.to_string())?
            .ensure_success()
            .map_err(|e| e.to_string())?;
        self.driver
            .exec_in_pod(
                &tenant.id,
                PodTarget::WordPress,
                vec![
                    "rm".to_string(),
                    "-f".to_string(),
                    "/tmp/field-groups.json".to_string(),
                ],
                None,
                self.exec_deadline,
            )
            .await
            .map_err(|e| e.to_string())?;
        info!("Imported field groups for tenant {}", tenant.id);
        Ok(())
    }
}
