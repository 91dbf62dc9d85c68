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

use std::sync::Arc;

use crate::app::config::AppConfig;
use crate::app::database::{DatabaseMigrator, PgPoolManager};
use crate::backups::engine::{BackupEngine, BackupService};
use crate::backups::storage::{ObjectStore, S3ObjectStore};
use crate::billing::dunning::DunningScheduler;
use crate::billing::webhook::WebhookIngestor;
use crate::common::clock::{Clock, SystemClock};
use crate::common::error::RepositoryResult;
use crate::common::locks::TenantLocks;
use crate::common::metrics::SystemCounters;
use crate::dns::{DnsClient, HttpDnsClient, LogOnlyDns};
use crate::events::EventBus;
use crate::gateway::{HttpPaymentGateway, PaymentGateway};
use crate::notifications::{EmailNotifier, LogOnlyOutOfBand, Notifier};
use crate::orchestrator::{HttpOrchestrator, LogOnlyOrchestrator, OrchestratorDriver};
use crate::tenants::hooks::{FieldGroupsHook, TemplateHook};
use crate::tenants::lifecycle::LifecycleStateMachine;
use crate::tenants::provisioner::{ProvisionHook, Provisioner};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    transport::smtp::{Error, authentication::Credentials, response::Response},
};
use tracing::warn;

pub(crate) mod clock;
pub(crate) mod dto;
pub(crate) mod error;
pub(crate) mod locks;
pub(crate) mod metrics;
pub(crate) mod retry;
pub(crate) mod services;
pub(crate) mod types;

pub trait ConfigProvider: Send + Sync {
    fn config(&self) -> Arc<AppConfig>;
}

#[async_trait]
pub trait MailTransporter: ConfigProvider + Send + Sync {
    async fn send(&self, message: Message) -> Result<Response, Error>;
}

pub type DefaultSmtpTransport = AsyncSmtpTransport<Tokio1Executor>;

/// Standalone SMTP mailer handed to collaborators that are built before the
/// application state exists (the notifier, the error reporter).
pub struct SmtpMailer<T: Send + Sync> {
    config: Arc<AppConfig>,
    transport: Arc<T>,
}

impl<T: Send + Sync> ConfigProvider for SmtpMailer<T> {
    fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }
}

#[async_trait]
impl MailTransporter for SmtpMailer<DefaultSmtpTransport> {
    async fn send(&self, message: Message) -> Result<Response, Error> {
        self.transport.send(message).await
    }
}

/// The composition root. Every component is built exactly once here and
/// wired through the module traits; nothing else constructs collaborators.
pub struct AppState<P, T>
where
    P: Send + Sync,
    T: Send + Sync,
{
    pub config: Arc<AppConfig>,
    pub default_smtp_transport: Arc<T>,
    pub pool_manager: Arc<P>,
    pub migrator: Arc<dyn DatabaseMigrator>,
    pub clock: Arc<dyn Clock>,
    pub counters: Arc<SystemCounters>,
    pub tenant_locks: Arc<TenantLocks>,
    pub driver: Arc<dyn OrchestratorDriver>,
    pub object_store: Arc<dyn ObjectStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub dns: Arc<dyn DnsClient>,
    pub notifier: Arc<dyn Notifier>,
    pub bus: Arc<EventBus>,
    pub backups: Arc<BackupEngine>,
    pub lifecycle: Arc<LifecycleStateMachine>,
    pub provisioner: Arc<Provisioner>,
    pub dunning: Arc<DunningScheduler>,
    pub webhooks: Arc<WebhookIngestor>,
}

pub type DefaultAppState = AppState<PgPoolManager, DefaultSmtpTransport>;

impl DefaultAppState {
    fn init_config() -> anyhow::Result<AppConfig> {
        Ok(AppConfig::from_env()?)
    }

    async fn init_pool_manager(config: Arc<AppConfig>) -> anyhow::Result<PgPoolManager> {
        Ok(PgPoolManager::new(config.database()).await?)
    }

    fn init_smtp_transport(config: Arc<AppConfig>) -> anyhow::Result<DefaultSmtpTransport> {
        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(config.mail().smtp_host())?
                .credentials(Credentials::new(
                    config.mail().smtp_user().to_owned(),
                    config.mail().smtp_passwd().to_owned(),
                ))
                .build(),
        )
    }

    fn init_driver(config: &AppConfig) -> Arc<dyn OrchestratorDriver> {
        match config.orchestrator().endpoint() {
            Some(endpoint) => Arc::new(HttpOrchestrator::new(
                endpoint,
                config.orchestrator().token(),
                config.orchestrator().tls_issuer(),
                config.orchestrator().suspension_service(),
            )),
            None => {
                warn!("No orchestrator endpoint configured: driver runs in log-only mode");
                Arc::new(LogOnlyOrchestrator)
            }
        }
    }

    fn init_dns(config: &AppConfig) -> Arc<dyn DnsClient> {
        match config.dns().endpoint() {
            Some(endpoint) => Arc::new(HttpDnsClient::new(
                endpoint,
                config.dns().token(),
                config.dns().zone(),
            )),
            None => {
                warn!("No DNS provider configured: DNS client runs in log-only mode");
                Arc::new(LogOnlyDns)
            }
        }
    }

    pub async fn new() -> anyhow::Result<DefaultAppState> {
        let config = Arc::new(Self::init_config()?);
        let pool_manager = Arc::new(Self::init_pool_manager(config.clone()).await?);
        let default_smtp_transport = Arc::new(Self::init_smtp_transport(config.clone())?);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let counters = Arc::new(SystemCounters::new());
        let tenant_locks = Arc::new(TenantLocks::new());
        let bus = Arc::new(EventBus::new(
            config.bus().queue_capacity(),
            config.bus().max_age_hours(),
            config.bus().handler_retries(),
            clock.clone(),
            counters.clone(),
        ));

        let driver = Self::init_driver(&config);
        let dns = Self::init_dns(&config);
        let object_store: Arc<dyn ObjectStore> =
            Arc::new(S3ObjectStore::new(config.object_store()).await);
        let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::new(
            config.gateway().base_url(),
            config.gateway().api_key(),
            config.gateway().webhook_secret(),
        ));
        let notifier: Arc<dyn Notifier> = Arc::new(EmailNotifier::new(
            Arc::new(SmtpMailer {
                config: config.clone(),
                transport: default_smtp_transport.clone(),
            }),
            Arc::new(LogOnlyOutOfBand),
        ));

        let backups = Arc::new(BackupEngine::new(
            driver.clone(),
            object_store.clone(),
            pool_manager.clone(),
            pool_manager.clone(),
            bus.clone(),
            clock.clone(),
            config.clone(),
        ));
        let backup_service: Arc<dyn BackupService> = backups.clone();
        let lifecycle = Arc::new(LifecycleStateMachine::new(
            pool_manager.clone(),
            driver.clone(),
            dns.clone(),
            notifier.clone(),
            gateway.clone(),
            backup_service.clone(),
            bus.clone(),
            tenant_locks.clone(),
            clock.clone(),
            config.clone(),
        ));
        let hooks: Vec<Arc<dyn ProvisionHook>> = vec![
            Arc::new(TemplateHook),
            Arc::new(FieldGroupsHook::new(
                driver.clone(),
                config.provision().exec_timeout_secs(),
            )),
        ];
        let provisioner = Arc::new(Provisioner::new(
            pool_manager.clone(),
            driver.clone(),
            dns.clone(),
            lifecycle.clone(),
            bus.clone(),
            config.clone(),
            hooks,
        ));
        let dunning = Arc::new(DunningScheduler::new(
            pool_manager.clone(),
            pool_manager.clone(),
            gateway.clone(),
            backup_service,
            bus.clone(),
            pool_manager.clone(),
            clock.clone(),
            config.clone(),
        ));
        let webhooks = Arc::new(WebhookIngestor::new(
            gateway.clone(),
            pool_manager.clone(),
            pool_manager.clone(),
            bus.clone(),
            counters.clone(),
            clock.clone(),
        ));

        Ok(Self {
            config,
            default_smtp_transport,
            pool_manager: pool_manager.clone(),
            migrator: pool_manager,
            clock,
            counters,
            tenant_locks,
            driver,
            object_store,
            gateway,
            dns,
            notifier,
            bus,
            backups,
            lifecycle,
            provisioner,
            dunning,
            webhooks,
        })
    }
}

impl<P, T> ConfigProvider for AppState<P, T>
where
    P: Send + Sync,
    T: Send + Sync,
{
    fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }
}

#[async_trait]
impl<P> MailTransporter for AppState<P, DefaultSmtpTransport>
where
    P: Send + Sync,
{
    async fn send(&self, message: Message) -> Result<Response, Error> {
        self.default_smtp_transport.send(message).await
    }
}

#[async_trait]
impl<T> DatabaseMigrator for AppState<PgPoolManager, T>
where
    T: Send + Sync,
{
    async fn migrate_main_db(&self) -> RepositoryResult<()> {
        self.migrator.migrate_main_db().await
    }
}
