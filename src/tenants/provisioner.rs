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
use crate::common::MailTransporter;
use crate::common::dto::GeneralError;
use crate::common::error::{FriendlyError, IntoFriendlyError, RepositoryError};
use crate::common::locks::TenantLocks;
use crate::common::retry::{BackoffPolicy, retry_with_backoff};
use crate::common::services::{
    generate_hex_csprng, generate_secret_csprng, generate_string_csprng,
};
use crate::dns::{DnsClient, DnsError};
use crate::events::{DomainEvent, EventBus};
use crate::orchestrator::{
    DatabaseInit, DriverError, OrchestratorDriver, PodTarget, WordPressEnv, database_deployment,
    database_secret, proxy_config, tls_secret, wordpress_secret,
};
use crate::tenants::dto::ProvisionRequest;
use crate::tenants::lifecycle::{
    Cause, LifecycleError, LifecycleStateMachine, Trigger, TriggerContext,
};
use crate::tenants::model::{LifecycleState, ProvisionStep, SiteCredentials, Tenant};
use crate::tenants::repository::{NewTenant, TenantsRepository};
use crate::common::types::value_object::ValueObjectable;
use async_trait::async_trait;
use axum::http::StatusCode;
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Level, info, warn};

const SLUG_MAX_LEN: usize = 20;
const ID_ENTROPY_HEX: usize = 6;
const INSERT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("A tenant for domain {0} already exists")]
    AlreadyExists(String),

    #[error("Provisioning for tenant {0} is already running")]
    InProgress(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Post-provision hook {0} failed: {1}")]
    Hook(String, String),

    #[error("Invariant violation: {0}")]
    Invariant(String),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[async_trait]
impl IntoFriendlyError<GeneralError> for ProvisionError {
    async fn into_friendly_error(
        self,
        mailer: Arc<dyn MailTransporter>,
    ) -> FriendlyError<GeneralError> {
        match self {
            e @ (ProvisionError::AlreadyExists(_) | ProvisionError::InProgress(_)) => {
                FriendlyError::user_facing(
                    Level::INFO,
                    StatusCode::CONFLICT,
                    file!(),
                    GeneralError {
                        message: e.to_string(),
                    },
                )
            }
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

/// Result of a provision call. `credentials` is populated exactly once per
/// tenant: on the call that completed the workflow.
pub struct ProvisionOutcome {
    pub tenant: Tenant,
    pub credentials: Option<SiteCredentials>,
}

/// Pluggable post-provision step (template application, field group
/// configuration). The provisioner passes the tenant and request context and
/// waits for success or failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProvisionHook: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, tenant: &Tenant, request: &ProvisionRequest) -> Result<(), String>;
}

/// Derives the permanent tenant id: a slug of the business name plus six hex
/// characters of entropy, at most 27 characters in total.
pub fn derive_tenant_id(business_name: &str) -> String {
    let slug: String = business_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(SLUG_MAX_LEN)
        .collect();
    let slug = if slug.is_empty() {
        "site".to_string()
    } else {
        slug
    };
    format!("{slug}_{}", generate_hex_csprng(ID_ENTROPY_HEX))
}

fn generate_credentials(tenant_id: &str, domain: &str) -> SiteCredentials {
    SiteCredentials {
        admin_user: "admin".to_string(),
        admin_password: generate_secret_csprng(16),
        admin_email: format!("admin@{domain}"),
        db_user: format!("wp_{tenant_id}"),
        db_password: generate_secret_csprng(16),
        db_root_password: generate_secret_csprng(20),
        db_name: format!("wordpress_{tenant_id}"),
        // Alphanumeric only: the cache password travels inside a URL.
        cache_password: generate_string_csprng(16),
    }
}

/// The fixed WP-CLI installation sequence. Every command must exit 0.
fn install_commands(tenant_id: &str, domain: &str, creds: &SiteCredentials) -> Vec<Vec<String>> {
    let arg = |s: &str| s.to_string();
    vec![
        vec![arg("wp"), arg("core"), arg("download"), arg("--force"), arg("--locale=pt_BR")],
        vec![
            arg("wp"),
            arg("config"),
            arg("create"),
            format!("--dbname={}", creds.db_name),
            format!("--dbuser={}", creds.db_user),
            format!("--dbpass={}", creds.db_password),
            format!("--dbhost={}", database_deployment(tenant_id)),
            arg("--locale=pt_BR"),
        ],
        vec![
            arg("wp"),
            arg("core"),
            arg("install"),
            format!("--url=https://{domain}"),
            format!("--title={domain}"),
            format!("--admin_user={}", creds.admin_user),
            format!("--admin_password={}", creds.admin_password),
            format!("--admin_email={}", creds.admin_email),
            arg("--skip-email"),
        ],
        vec![arg("wp"), arg("option"), arg("update"), arg("timezone_string"), arg("America/Sao_Paulo")],
        vec![arg("wp"), arg("option"), arg("update"), arg("WPLANG"), arg("pt_BR")],
        vec![arg("wp"), arg("option"), arg("update"), arg("date_format"), arg("d/m/Y")],
        vec![arg("wp"), arg("option"), arg("update"), arg("time_format"), arg("H:i")],
        vec![arg("wp"), arg("option"), arg("update"), arg("blog_public"), arg("1")],
        vec![arg("wp"), arg("option"), arg("update"), arg("default_comment_status"), arg("closed")],
        vec![arg("wp"), arg("option"), arg("update"), arg("default_ping_status"), arg("closed")],
        vec![arg("wp"), arg("rewrite"), arg("structure"), arg("/%postname%/"), arg("--hard")],
        vec![arg("wp"), arg("post"), arg("delete"), arg("1"), arg("--force")],
        vec![arg("wp"), arg("post"), arg("delete"), arg("2"), arg("--force")],
        vec![arg("wp"), arg("comment"), arg("delete"), arg("1"), arg("--force")],
    ]
}

const ESSENTIAL_PLUGINS: [&str; 6] = [
    "advanced-custom-fields",
    "wordpress-seo",
    "redis-cache",
    "wordfence",
    "updraftplus",
    "w3-total-cache",
];

fn industry_plugins(industry: &str) -> &'static [&'static str] {
    match industry {
        "restaurant" => &["restaurant-menu", "wp-reservation"],
        "health" => &["bookly", "medical-history"],
        "ecommerce" => &["woocommerce"],
        "education" => &["learnpress"],
        "real_estate" => &["estatik"],
        _ => &[],
    }
}

fn plan_plugins(plan: &str) -> &'static [&'static str] {
    match plan {
        "professional" => &["google-analytics-for-wordpress", "mailchimp-for-wp"],
        "business" => &["wp-rocket", "imagify"],
        "agency" => &["white-label-cms", "mainwp-child"],
        _ => &[],
    }
}

/// Plugins installed for a given industry and plan. Install failures are
/// soft: logged, never fatal.
pub fn plugins_for(industry: &str, plan: &str) -> Vec<&'static str> {
    let mut plugins: Vec<&'static str> = ESSENTIAL_PLUGINS.to_vec();
    plugins.extend_from_slice(industry_plugins(industry));
    plugins.extend_from_slice(plan_plugins(plan));
    plugins
}

/// Executes the resumable provisioning workflow: namespace, secrets,
/// database, WordPress, ingress, install, plugins, hooks, backup cron,
/// activation. Each completed step is checkpointed on the tenant row; any
/// hard failure rolls the infrastructure back and pins the tenant to
/// `ProvisioningFailed`.
pub struct Provisioner {
    tenants: Arc<dyn TenantsRepository>,
    driver: Arc<dyn OrchestratorDriver>,
    dns: Arc<dyn DnsClient>,
    lifecycle: Arc<LifecycleStateMachine>,
    bus: Arc<EventBus>,
    /// Advisory locks for the provision workflow itself. Deliberately not
    /// the lifecycle lock map: the workflow calls into the state machine,
    /// which takes its own per-tenant lock.
    locks: TenantLocks,
    config: Arc<AppConfig>,
    hooks: Vec<Arc<dyn ProvisionHook>>,
}

impl Provisioner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantsRepository>,
        driver: Arc<dyn OrchestratorDriver>,
        dns: Arc<dyn DnsClient>,
        lifecycle: Arc<LifecycleStateMachine>,
        bus: Arc<EventBus>,
        config: Arc<AppConfig>,
        hooks: Vec<Arc<dyn ProvisionHook>>,
    ) -> Self {
        Self {
            tenants,
            driver,
            dns,
            lifecycle,
            bus,
            locks: TenantLocks::new(),
            config,
            hooks,
        }
    }

    pub async fn execute(&self, request: ProvisionRequest) -> ProvisionResult<ProvisionOutcome> {
        let domain = request.domain.extract().get_value().clone();
        if let Some(existing) = self.tenants.find_by_domain(&domain).await? {
            return self.resume_existing(existing, &request).await;
        }
        let tenant = self.insert_new(&request).await?;
        self.run_locked(tenant, &request).await
    }

    /// A repeated request for an existing domain either resumes an
    /// interrupted workflow, hands out the credentials of a finished one
    /// exactly once, or reports the tenant as taken.
    async fn resume_existing(
        &self,
        existing: Tenant,
        request: &ProvisionRequest,
    ) -> ProvisionResult<ProvisionOutcome> {
        if existing.credentials_revealed {
            return Err(ProvisionError::AlreadyExists(existing.domain));
        }
        match existing.lifecycle_state() {
            Ok(LifecycleState::Provisioning) => self.run_locked(existing, request).await,
            Ok(LifecycleState::Active) => {
                self.tenants.mark_credentials_revealed(&existing.id).await?;
                let credentials = existing.credentials();
                Ok(ProvisionOutcome {
                    tenant: existing,
                    credentials,
                })
            }
            Ok(_) => Err(ProvisionError::AlreadyExists(existing.domain)),
            Err(e) => Err(ProvisionError::Invariant(e)),
        }
    }

    async fn insert_new(&self, request: &ProvisionRequest) -> ProvisionResult<Tenant> {
        let mut attempt = 0;
        loop {
            let new_tenant = NewTenant {
                id: derive_tenant_id(request.business_name.extract().get_value()),
                business_name: request.business_name.extract().get_value().clone(),
                domain: request.domain.extract().get_value().clone(),
                industry: request.industry.extract().get_value().clone(),
                plan: request.plan_tier.extract().get_value().clone(),
                owner_id: request.owner_user_id.clone(),
                contact_email: request.contact_email(),
                whatsapp_contact: request.whatsapp_contact.clone(),
            };
            match self.tenants.insert_provisioning(new_tenant).await {
                Ok(tenant) => return Ok(tenant),
                Err(e) if e.is_unique_violation() => {
                    // Either the domain is taken (the concurrent-provision
                    // loser lands here, with no orchestrator side-effects)
                    // or the id entropy collided; only the latter warrants
                    // another attempt.
                    if self
                        .tenants
                        .find_by_domain(request.domain.extract().get_value())
                        .await?
                        .is_some()
                    {
                        return Err(ProvisionError::AlreadyExists(
                            request.domain.extract().get_value().clone(),
                        ));
                    }
                    attempt += 1;
                    if attempt >= INSERT_ATTEMPTS {
                        return Err(ProvisionError::Invariant(
                            "could not derive a unique tenant id".to_string(),
                        ));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn run_locked(
        &self,
        tenant: Tenant,
        request: &ProvisionRequest,
    ) -> ProvisionResult<ProvisionOutcome> {
        let tenant_id = tenant.id.clone();
        let lock = self.locks.lock_for(&tenant_id);
        let Ok(_guard) = lock.try_lock() else {
            return Err(ProvisionError::InProgress(tenant_id));
        };

        match self.workflow(&tenant_id, request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.rollback(&tenant_id, &e).await;
                Err(e)
            }
        }
    }

    fn step_policy(&self) -> BackoffPolicy {
        BackoffPolicy::provision_step(
            self.config.provision().retry_cap_secs(),
            self.config.provision().retry_attempts(),
        )
    }

    async fn advance(&self, tenant: &mut Tenant, step: ProvisionStep) -> ProvisionResult<()> {
        self.tenants
            .set_provision_step(&tenant.id, step.as_i16())
            .await?;
        tenant.provision_step = step.as_i16();
        Ok(())
    }

    async fn workflow(
        &self,
        tenant_id: &str,
        request: &ProvisionRequest,
    ) -> ProvisionResult<ProvisionOutcome> {
        let mut tenant = self.tenants.get_by_id(tenant_id).await?;
        let domain = tenant.domain.clone();
        let policy = self.step_policy();
        let step_deadline = Duration::from_secs(self.config.provision().step_timeout_secs());
        let exec_deadline = Duration::from_secs(self.config.provision().exec_timeout_secs());

        if tenant.provision_step() < ProvisionStep::CredentialsStored {
            let credentials = generate_credentials(tenant_id, &domain);
            let blob = serde_json::to_value(&credentials)
                .map_err(|e| ProvisionError::Invariant(e.to_string()))?;
            self.tenants.store_credentials(tenant_id, blob).await?;
            self.advance(&mut tenant, ProvisionStep::CredentialsStored)
                .await?;
            tenant = self.tenants.get_by_id(tenant_id).await?;
        }
        let credentials = tenant.credentials().ok_or_else(|| {
            ProvisionError::Invariant(format!("tenant {tenant_id} has no stored credentials"))
        })?;

        if tenant.provision_step() < ProvisionStep::NamespaceReady {
            retry_with_backoff(&policy, "ensure-namespace", || {
                self.driver.ensure_namespace(tenant_id)
            })
            .await?;
            let db_secret_name = database_secret(tenant_id);
            let mut db_secret = BTreeMap::new();
            db_secret.insert("root-password".to_string(), credentials.db_root_password.clone());
            db_secret.insert("username".to_string(), credentials.db_user.clone());
            db_secret.insert("password".to_string(), credentials.db_password.clone());
            retry_with_backoff(&policy, "ensure-db-secret", || {
                self.driver
                    .ensure_secret(tenant_id, &db_secret_name, db_secret.clone())
            })
            .await?;
            let wp_secret_name = wordpress_secret(tenant_id);
            let mut wp_secret = BTreeMap::new();
            wp_secret.insert("admin-user".to_string(), credentials.admin_user.clone());
            wp_secret.insert("admin-password".to_string(), credentials.admin_password.clone());
            wp_secret.insert("admin-email".to_string(), credentials.admin_email.clone());
            wp_secret.insert("cache-password".to_string(), credentials.cache_password.clone());
            retry_with_backoff(&policy, "ensure-wp-secret", || {
                self.driver
                    .ensure_secret(tenant_id, &wp_secret_name, wp_secret.clone())
            })
            .await?;
            let proxy_config_name = proxy_config(tenant_id);
            let mut proxy = BTreeMap::new();
            proxy.insert("server_name".to_string(), domain.clone());
            proxy.insert("upstream".to_string(), format!("wp-{tenant_id}:80"));
            retry_with_backoff(&policy, "ensure-proxy-config", || {
                self.driver
                    .ensure_config(tenant_id, &proxy_config_name, proxy.clone())
            })
            .await?;
            self.advance(&mut tenant, ProvisionStep::NamespaceReady)
                .await?;
        }

        if tenant.provision_step() < ProvisionStep::DatabaseReady {
            let reference = retry_with_backoff(&policy, "ensure-database", || {
                self.driver.ensure_database_deployment(
                    tenant_id,
                    DatabaseInit {
                        root_password: credentials.db_root_password.clone(),
                        user: credentials.db_user.clone(),
                        password: credentials.db_password.clone(),
                        database: credentials.db_name.clone(),
                    },
                )
            })
            .await?;
            self.driver.wait_ready(reference, step_deadline).await?;
            self.advance(&mut tenant, ProvisionStep::DatabaseReady)
                .await?;
        }

        if tenant.provision_step() < ProvisionStep::WordPressReady {
            let reference = retry_with_backoff(&policy, "ensure-wordpress", || {
                self.driver.ensure_wordpress_deployment(
                    tenant_id,
                    &domain,
                    WordPressEnv {
                        db_host: database_deployment(tenant_id),
                        db_user: credentials.db_user.clone(),
                        db_password: credentials.db_password.clone(),
                        db_name: credentials.db_name.clone(),
                    },
                )
            })
            .await?;
            self.driver.wait_ready(reference, step_deadline).await?;
            self.advance(&mut tenant, ProvisionStep::WordPressReady)
                .await?;
        }

        if tenant.provision_step() < ProvisionStep::IngressReady {
            let tls_secret_name = tls_secret(tenant_id);
            retry_with_backoff(&policy, "ensure-ingress", || {
                self.driver
                    .ensure_ingress(tenant_id, &domain, &tls_secret_name)
            })
            .await?;
            retry_with_backoff(&policy, "ensure-dns", || {
                self.dns
                    .upsert_record(&domain, self.config.server().hostname())
            })
            .await?;
            self.advance(&mut tenant, ProvisionStep::IngressReady)
                .await?;
        }

        if tenant.provision_step() < ProvisionStep::CoreInstalled {
            for command in install_commands(tenant_id, &domain, &credentials) {
                self.driver
                    .exec_in_pod(tenant_id, PodTarget::WordPress, command, None, exec_deadline)
                    .await?
                    .ensure_success()?;
            }
            self.advance(&mut tenant, ProvisionStep::CoreInstalled)
                .await?;
        }

        if tenant.provision_step() < ProvisionStep::PluginsInstalled {
            for plugin in plugins_for(&tenant.industry, &tenant.plan) {
                let command = vec![
                    "wp".to_string(),
                    "plugin".to_string(),
                    "install".to_string(),
                    plugin.to_string(),
                    "--activate".to_string(),
                ];
                let result = self
                    .driver
                    .exec_in_pod(tenant_id, PodTarget::WordPress, command, None, exec_deadline)
                    .await
                    .map(|output| output.ensure_success());
                match result {
                    Ok(Ok(_)) => info!("Installed plugin {plugin} for {tenant_id}"),
                    Ok(Err(e)) | Err(e) => {
                        warn!("Plugin {plugin} failed to install for {tenant_id}: {e}")
                    }
                }
            }
            self.advance(&mut tenant, ProvisionStep::PluginsInstalled)
                .await?;
        }

        if tenant.provision_step() < ProvisionStep::HooksApplied {
            for hook in &self.hooks {
                hook.apply(&tenant, request)
                    .await
                    .map_err(|e| ProvisionError::Hook(hook.name().to_string(), e))?;
            }
            self.advance(&mut tenant, ProvisionStep::HooksApplied)
                .await?;
        }

        if tenant.provision_step() < ProvisionStep::BackupCronScheduled {
            retry_with_backoff(&policy, "ensure-backup-cron", || {
                self.driver
                    .ensure_backup_cron(tenant_id, self.config.backup().cron_schedule())
            })
            .await?;
            self.advance(&mut tenant, ProvisionStep::BackupCronScheduled)
                .await?;
        }

        if tenant.provision_step() < ProvisionStep::Completed {
            self.lifecycle
                .apply(
                    tenant_id,
                    Trigger::ProvisionSucceeded,
                    Cause::Admin,
                    TriggerContext::default(),
                )
                .await?;
            self.advance(&mut tenant, ProvisionStep::Completed).await?;
            self.bus
                .publish(DomainEvent::TenantProvisioned {
                    tenant_id: tenant_id.to_string(),
                })
                .await;
        }

        self.tenants.mark_credentials_revealed(tenant_id).await?;
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        info!("Tenant {tenant_id} provisioned for domain {domain}");
        Ok(ProvisionOutcome {
            tenant,
            credentials: Some(credentials),
        })
    }

    /// Failure path: the namespace (and everything in it) is removed, the
    /// credentials are zeroed and the tenant is pinned to
    /// `ProvisioningFailed`.
    async fn rollback(&self, tenant_id: &str, error: &ProvisionError) {
        warn!("Rolling back provisioning of {tenant_id}: {error}");
        if let Err(e) = self.driver.delete_namespace(tenant_id).await {
            warn!("Rollback of {tenant_id}: namespace deletion failed: {e}");
        }
        if let Err(e) = self.tenants.zero_credentials(tenant_id).await {
            warn!("Rollback of {tenant_id}: zeroing credentials failed: {e}");
        }
        if let Err(e) = self
            .lifecycle
            .apply(
                tenant_id,
                Trigger::ProvisionFailed,
                Cause::Admin,
                TriggerContext::default(),
            )
            .await
        {
            warn!("Rollback of {tenant_id}: state transition failed: {e}");
        }
        self.bus
            .publish(DomainEvent::TenantProvisioningFailed {
                tenant_id: tenant_id.to_string(),
                reason: error.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::tests::test_config;
    use crate::backups::engine::MockBackupService;
    use crate::common::clock::{Clock, SystemClock};
    use crate::common::error::RepositoryResult;
    use crate::common::metrics::SystemCounters;
    use crate::dns::LogOnlyDns;
    use crate::events::EventBus;
    use crate::gateway::MockPaymentGateway;
    use crate::notifications::MockNotifier;
    use crate::orchestrator::{LogOnlyOrchestrator, MockOrchestratorDriver, WorkloadRef};
    use crate::tenants::dto::ProvisionRequestHelper;
    use crate::tenants::model::LifecycleEventRow;
    use crate::tenants::repository::NewLifecycleEvent;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_derived_tenant_id_shape() {
        let id = derive_tenant_id("Padaria Rosa");
        let (slug, entropy) = id.split_once('_').unwrap();
        assert_eq!(slug, "padariarosa");
        assert_eq!(entropy.len(), 6);
        assert!(entropy.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id.len() <= 32);

        let long = derive_tenant_id("An Unreasonably Long Business Name Ltda.");
        assert!(long.len() <= 32);
        assert!(derive_tenant_id("!!!").starts_with("site_"));
    }

    #[test]
    fn test_generated_credentials_shape() {
        let creds = generate_credentials("padariarosa_a1b2c3", "rosa.ex.com");
        assert_eq!(creds.admin_user, "admin");
        assert_eq!(creds.admin_password.len(), 16);
        assert_eq!(creds.admin_email, "admin@rosa.ex.com");
        assert_eq!(creds.db_user, "wp_padariarosa_a1b2c3");
        assert!(creds.db_user.len() <= 32);
        assert_eq!(creds.db_password.len(), 16);
        assert_eq!(creds.db_root_password.len(), 20);
        assert_eq!(creds.db_name, "wordpress_padariarosa_a1b2c3");
        assert_eq!(creds.cache_password.len(), 16);
    }

    #[test]
    fn test_plugin_set_is_keyed_by_industry_and_plan() {
        let plugins = plugins_for("restaurant", "professional");
        assert!(plugins.contains(&"wordpress-seo"));
        assert!(plugins.contains(&"restaurant-menu"));
        assert!(plugins.contains(&"mailchimp-for-wp"));
        assert!(!plugins.contains(&"woocommerce"));

        let unknown = plugins_for("carpentry", "starter");
        assert_eq!(unknown, ESSENTIAL_PLUGINS.to_vec());
    }

    #[test]
    fn test_install_command_sequence() {
        let creds = generate_credentials("padariarosa_a1b2c3", "rosa.ex.com");
        let commands = install_commands("padariarosa_a1b2c3", "rosa.ex.com", &creds);
        assert_eq!(commands[0][..3], ["wp", "core", "download"]);
        assert!(commands[1].contains(&"--dbhost=db-padariarosa_a1b2c3".to_string()));
        assert!(commands[2].contains(&"--url=https://rosa.ex.com".to_string()));
        assert!(commands.iter().any(|c| c.contains(&"rewrite".to_string())));
        // Sample content removal comes last.
        assert_eq!(commands.last().unwrap()[..3], ["wp", "comment", "delete"]);
    }

    fn request() -> ProvisionRequest {
        ProvisionRequest::try_from(ProvisionRequestHelper {
            business_name: "Padaria Rosa".to_string(),
            domain: "rosa.ex.com".to_string(),
            industry: "restaurant".to_string(),
            plan_tier: "professional".to_string(),
            owner_user_id: "u42".to_string(),
            contact_email: None,
            whatsapp_contact: None,
            template_id: None,
            field_overrides: None,
        })
        .unwrap()
    }

    /// Trait-backed in-memory tenant store, enough to drive the workflow.
    struct InMemoryTenants {
        rows: StdMutex<HashMap<String, Tenant>>,
        events: StdMutex<Vec<NewLifecycleEvent>>,
    }

    impl InMemoryTenants {
        fn new() -> Self {
            Self {
                rows: StdMutex::new(HashMap::new()),
                events: StdMutex::new(Vec::new()),
            }
        }
        fn row(&self, id: &str) -> Option<Tenant> {
            self.rows.lock().unwrap().get(id).cloned()
        }
        fn event_reasons(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.reason.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TenantsRepository for InMemoryTenants {
        async fn insert_provisioning(&self, tenant: NewTenant) -> RepositoryResult<Tenant> {
            let row = Tenant {
                id: tenant.id.clone(),
                business_name: tenant.business_name,
                domain: tenant.domain,
                industry: tenant.industry,
                plan: tenant.plan,
                owner_id: tenant.owner_id,
                contact_email: tenant.contact_email,
                whatsapp_contact: tenant.whatsapp_contact,
                state: "provisioning".to_string(),
                state_since: Utc::now(),
                grace_anchor: None,
                deletion_due_at: None,
                subscription_ref: None,
                customer_ref: None,
                credentials_blob: None,
                credentials_revealed: false,
                provision_step: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.rows.lock().unwrap().insert(tenant.id, row.clone());
            Ok(row)
        }
        async fn get_by_id(&self, id: &str) -> RepositoryResult<Tenant> {
            self.row(id).ok_or(RepositoryError::NotFound)
        }
        async fn find_by_domain(&self, domain: &str) -> RepositoryResult<Option<Tenant>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|t| t.domain == domain)
                .cloned())
        }
        async fn find_by_subscription_ref(
            &self,
            subscription_ref: &str,
        ) -> RepositoryResult<Option<Tenant>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|t| t.subscription_ref.as_deref() == Some(subscription_ref))
                .cloned())
        }
        async fn store_credentials(
            &self,
            id: &str,
            blob: serde_json::Value,
        ) -> RepositoryResult<()> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows.get_mut(id).ok_or(RepositoryError::NotFound)?;
            if row.credentials_blob.is_some() {
                return Err(RepositoryError::Custom("already written".to_string()));
            }
            row.credentials_blob = Some(blob);
            Ok(())
        }
        async fn zero_credentials(&self, id: &str) -> RepositoryResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
                row.credentials_blob = None;
            }
            Ok(())
        }
        async fn mark_credentials_revealed(&self, id: &str) -> RepositoryResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
                row.credentials_revealed = true;
            }
            Ok(())
        }
        async fn set_provision_step(&self, id: &str, step: i16) -> RepositoryResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
                row.provision_step = step;
            }
            Ok(())
        }
        async fn set_subscription(
            &self,
            id: &str,
            customer_ref: Option<String>,
            subscription_ref: Option<String>,
        ) -> RepositoryResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
                row.customer_ref = customer_ref;
                row.subscription_ref = subscription_ref;
            }
            Ok(())
        }
        async fn transition_state(
            &self,
            id: &str,
            from: LifecycleState,
            to: LifecycleState,
            at: DateTime<Utc>,
        ) -> RepositoryResult<bool> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows.get_mut(id).ok_or(RepositoryError::NotFound)?;
            if row.state != from.as_str() {
                return Ok(false);
            }
            row.state = to.as_str().to_string();
            row.state_since = at;
            Ok(true)
        }
        async fn set_grace_anchor_if_absent(
            &self,
            id: &str,
            anchor: DateTime<Utc>,
        ) -> RepositoryResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
                row.grace_anchor.get_or_insert(anchor);
            }
            Ok(())
        }
        async fn clear_grace_anchor(&self, id: &str) -> RepositoryResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
                row.grace_anchor = None;
                row.deletion_due_at = None;
            }
            Ok(())
        }
        async fn set_deletion_due(
            &self,
            id: &str,
            due: Option<DateTime<Utc>>,
        ) -> RepositoryResult<()> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
                row.deletion_due_at = due;
            }
            Ok(())
        }
        async fn list_in_states(
            &self,
            states: Vec<String>,
            _limit: i64,
            _offset: i64,
        ) -> RepositoryResult<Vec<Tenant>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|t| states.contains(&t.state))
                .cloned()
                .collect())
        }
        async fn count_by_state(&self) -> RepositoryResult<Vec<(String, i64)>> {
            let mut counts: HashMap<String, i64> = HashMap::new();
            for row in self.rows.lock().unwrap().values() {
                *counts.entry(row.state.clone()).or_insert(0) += 1;
            }
            Ok(counts.into_iter().collect())
        }
        async fn append_lifecycle_event(
            &self,
            event: NewLifecycleEvent,
        ) -> RepositoryResult<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
        async fn lifecycle_events(
            &self,
            _tenant_id: &str,
        ) -> RepositoryResult<Vec<LifecycleEventRow>> {
            Ok(Vec::new())
        }
    }

    fn build_provisioner(
        repo: Arc<InMemoryTenants>,
        driver: Arc<dyn OrchestratorDriver>,
    ) -> Provisioner {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let counters = Arc::new(SystemCounters::new());
        let bus = Arc::new(EventBus::new(64, 24, 2, clock.clone(), counters));
        let config = Arc::new(test_config());
        let locks = Arc::new(TenantLocks::new());
        let dns = Arc::new(LogOnlyDns);
        let lifecycle = Arc::new(LifecycleStateMachine::new(
            repo.clone(),
            driver.clone(),
            dns.clone(),
            Arc::new(MockNotifier::new()),
            Arc::new(MockPaymentGateway::new()),
            Arc::new(MockBackupService::new()),
            bus.clone(),
            locks.clone(),
            clock,
            config.clone(),
        ));
        Provisioner::new(repo, driver, dns, lifecycle, bus, config, Vec::new())
    }

    #[tokio::test]
    async fn test_happy_path_provisions_and_reveals_credentials_once() {
        let repo = Arc::new(InMemoryTenants::new());
        let provisioner = build_provisioner(repo.clone(), Arc::new(LogOnlyOrchestrator));

        let outcome = provisioner.execute(request()).await.unwrap();
        let credentials = outcome.credentials.expect("credentials revealed once");
        assert_eq!(credentials.admin_user, "admin");
        assert_eq!(outcome.tenant.state, "active");
        assert_eq!(outcome.tenant.provision_step, ProvisionStep::Completed.as_i16());
        assert!(outcome.tenant.credentials_revealed);
        assert_eq!(repo.event_reasons(), vec!["provision_succeeded".to_string()]);

        // The same request again must not re-provision or reveal again.
        let second = provisioner.execute(request()).await;
        match second {
            Err(ProvisionError::AlreadyExists(domain)) => assert_eq!(domain, "rosa.ex.com"),
            other => panic!("expected AlreadyExists, got {:?}", other.map(|o| o.tenant)),
        }
    }

    #[tokio::test]
    async fn test_readiness_timeout_rolls_back() {
        let mut driver = MockOrchestratorDriver::new();
        driver
            .expect_ensure_namespace()
            .returning(|id| Ok(format!("client-{id}")));
        driver
            .expect_ensure_secret()
            .returning(|_, name, _| Ok(name.to_string()));
        driver
            .expect_ensure_config()
            .returning(|_, name, _| Ok(name.to_string()));
        driver.expect_ensure_database_deployment().returning(|id, _| {
            Ok(WorkloadRef {
                namespace: format!("client-{id}"),
                name: format!("db-{id}"),
            })
        });
        driver
            .expect_wait_ready()
            .returning(|reference, _| Err(DriverError::ProvisionTimeout(reference.name)));
        // Rollback must tear the namespace down exactly once.
        driver
            .expect_delete_namespace()
            .times(1)
            .returning(|_| Ok(()));

        let repo = Arc::new(InMemoryTenants::new());
        let provisioner = build_provisioner(repo.clone(), Arc::new(driver));

        let result = provisioner.execute(request()).await;
        assert!(matches!(
            result,
            Err(ProvisionError::Driver(DriverError::ProvisionTimeout(_)))
        ));

        let row = repo.find_by_domain("rosa.ex.com").await.unwrap().unwrap();
        assert_eq!(row.state, "provisioning_failed");
        assert!(row.credentials_blob.is_none());
        assert_eq!(
            repo.event_reasons(),
            vec!["provision_failed".to_string()]
        );
    }

    #[tokio::test]
    async fn test_interrupted_workflow_resumes_at_checkpoint() {
        let repo = Arc::new(InMemoryTenants::new());

        // First run dies after the namespace step.
        let mut first_driver = MockOrchestratorDriver::new();
        first_driver
            .expect_ensure_namespace()
            .times(1)
            .returning(|id| Ok(format!("client-{id}")));
        first_driver
            .expect_ensure_secret()
            .returning(|_, name, _| Ok(name.to_string()));
        first_driver
            .expect_ensure_config()
            .returning(|_, name, _| Ok(name.to_string()));
        first_driver
            .expect_ensure_database_deployment()
            .returning(|_, _| Err(DriverError::PermanentAuth("revoked mid-flight".into())));
        first_driver.expect_delete_namespace().returning(|_| Ok(()));

        let provisioner = build_provisioner(repo.clone(), Arc::new(first_driver));
        assert!(provisioner.execute(request()).await.is_err());

        // Simulate the operator fixing the cause and the tenant being put
        // back into provisioning: the retry starts at the recorded step.
        let tenant_id = repo
            .find_by_domain("rosa.ex.com")
            .await
            .unwrap()
            .unwrap()
            .id;
        {
            let mut rows = repo.rows.lock().unwrap();
            let row = rows.get_mut(&tenant_id).unwrap();
            row.state = "provisioning".to_string();
        }
        // Credentials were zeroed by the rollback, so the resumed run
        // regenerates them from the checkpoint.
        {
            let mut rows = repo.rows.lock().unwrap();
            rows.get_mut(&tenant_id).unwrap().provision_step = 0;
        }

        let provisioner = build_provisioner(repo.clone(), Arc::new(LogOnlyOrchestrator));
        let outcome = provisioner.execute(request()).await.unwrap();
        assert_eq!(outcome.tenant.id, tenant_id);
        assert_eq!(outcome.tenant.state, "active");
        assert!(outcome.credentials.is_some());
    }
}
