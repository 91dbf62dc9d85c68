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
use crate::backups::engine::BackupService;
use crate::backups::model::BackupKind;
use crate::common::MailTransporter;
use crate::common::clock::Clock;
use crate::common::dto::GeneralError;
use crate::common::error::{FriendlyError, IntoFriendlyError, RepositoryError};
use crate::common::locks::TenantLocks;
use crate::common::retry::{BackoffPolicy, retry_with_backoff};
use crate::dns::DnsClient;
use crate::events::{DomainEvent, EventBus};
use crate::gateway::PaymentGateway;
use crate::notifications::{Notifier, OverdueNotice};
use crate::orchestrator::{OrchestratorDriver, wordpress_deployment};
use crate::tenants::model::{LifecycleState, Tenant};
use crate::tenants::repository::{NewLifecycleEvent, TenantsRepository};
use chrono::Duration as ChronoDuration;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// The closed set of triggers the state machine reacts to. Anything else is
/// a no-op by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ProvisionSucceeded,
    ProvisionFailed,
    OverdueD3,
    OverdueD7,
    OverdueD15,
    OverdueD30,
    PaymentConfirmed,
    DeletionDueElapsed,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::ProvisionSucceeded => "provision_succeeded",
            Trigger::ProvisionFailed => "provision_failed",
            Trigger::OverdueD3 => "overdue_d3",
            Trigger::OverdueD7 => "overdue_d7",
            Trigger::OverdueD15 => "overdue_d15",
            Trigger::OverdueD30 => "overdue_d30",
            Trigger::PaymentConfirmed => "payment_confirmed",
            Trigger::DeletionDueElapsed => "deletion_due_elapsed",
        }
    }
}

/// What caused a transition; recorded verbatim in the audit stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    Payment(String),
    Timer,
    Admin,
    Webhook,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Payment(id) => write!(f, "payment:{id}"),
            Cause::Timer => write!(f, "timer"),
            Cause::Admin => write!(f, "admin"),
            Cause::Webhook => write!(f, "webhook"),
        }
    }
}

/// Extra context travelling with a trigger, used only to enrich
/// notifications.
#[derive(Debug, Clone, Default)]
pub struct TriggerContext {
    pub invoice_id: Option<String>,
    pub days_overdue: Option<i64>,
}

/// The transition diagram. Returns the target state, or `None` when the
/// trigger does not apply to the current state.
pub fn next_state(from: LifecycleState, trigger: Trigger) -> Option<LifecycleState> {
    use LifecycleState::*;
    match (from, trigger) {
        (Provisioning, Trigger::ProvisionSucceeded) => Some(Active),
        (Provisioning, Trigger::ProvisionFailed) => Some(ProvisioningFailed),
        (Active, Trigger::OverdueD3) => Some(WarningSent),
        (WarningSent, Trigger::OverdueD7) => Some(Suspended),
        (Suspended, Trigger::OverdueD15) => Some(FinalWarningSent),
        (FinalWarningSent, Trigger::OverdueD30) => Some(ScheduledForDeletion),
        (ScheduledForDeletion, Trigger::DeletionDueElapsed) => Some(Deleted),
        (WarningSent | Suspended | FinalWarningSent | ScheduledForDeletion, Trigger::PaymentConfirmed) => {
            Some(Active)
        }
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Invariant violation: {0}")]
    Invariant(String),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[async_trait::async_trait]
impl IntoFriendlyError<GeneralError> for LifecycleError {
    async fn into_friendly_error(
        self,
        mailer: Arc<dyn MailTransporter>,
    ) -> FriendlyError<GeneralError> {
        match self {
            LifecycleError::Repository(e) if e.is_not_found() => FriendlyError::user_facing(
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

#[derive(Debug, PartialEq, Eq)]
pub enum Applied {
    Transitioned {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// The trigger does not apply to the current state, or another caller
    /// already performed the transition. Replays are safe.
    NoOp,
}

/// Holds per-tenant lifecycle state and drives transitions from billing and
/// time events. Transitions for one tenant are totally ordered through the
/// shared keyed lock; side-effects are idempotent and retried with bounded
/// backoff.
pub struct LifecycleStateMachine {
    tenants: Arc<dyn TenantsRepository>,
    driver: Arc<dyn OrchestratorDriver>,
    dns: Arc<dyn DnsClient>,
    notifier: Arc<dyn Notifier>,
    gateway: Arc<dyn PaymentGateway>,
    backups: Arc<dyn BackupService>,
    bus: Arc<EventBus>,
    locks: Arc<TenantLocks>,
    clock: Arc<dyn Clock>,
    config: Arc<AppConfig>,
}

impl LifecycleStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantsRepository>,
        driver: Arc<dyn OrchestratorDriver>,
        dns: Arc<dyn DnsClient>,
        notifier: Arc<dyn Notifier>,
        gateway: Arc<dyn PaymentGateway>,
        backups: Arc<dyn BackupService>,
        bus: Arc<EventBus>,
        locks: Arc<TenantLocks>,
        clock: Arc<dyn Clock>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            tenants,
            driver,
            dns,
            notifier,
            gateway,
            backups,
            bus,
            locks,
            clock,
            config,
        }
    }

    /// Applies a trigger to a tenant. Serialized per tenant; a trigger that
    /// is not in the diagram for the current state is a no-op.
    pub async fn apply(
        &self,
        tenant_id: &str,
        trigger: Trigger,
        cause: Cause,
        context: TriggerContext,
    ) -> LifecycleResult<Applied> {
        let lock = self.locks.lock_for(tenant_id);
        let _guard = lock.lock().await;

        let tenant = self.tenants.get_by_id(tenant_id).await?;
        let from = tenant
            .lifecycle_state()
            .map_err(LifecycleError::Invariant)?;
        let Some(to) = next_state(from, trigger) else {
            debug!("Trigger {trigger:?} on {tenant_id} in state {from} is a no-op");
            return Ok(Applied::NoOp);
        };

        let now = self.clock.now();
        if !self.tenants.transition_state(tenant_id, from, to, now).await? {
            // Somebody else moved the row between our read and the CAS.
            debug!("Lost the {from}->{to} transition race for {tenant_id}");
            return Ok(Applied::NoOp);
        }
        self.tenants
            .append_lifecycle_event(NewLifecycleEvent {
                tenant_id: tenant_id.to_string(),
                from_state: from,
                to_state: to,
                reason: trigger.as_str().to_string(),
                cause: cause.to_string(),
                ts: now,
            })
            .await?;
        info!("Tenant {tenant_id}: {from} -> {to} ({})", cause);

        self.run_side_effects(&tenant, from, to, &context).await;
        Ok(Applied::Transitioned { from, to })
    }

    /// Admin force-delete: bypasses dunning entirely. Takes a final backup,
    /// tears the infrastructure down and pins the tenant to `Deleted`.
    pub async fn force_delete(&self, tenant_id: &str) -> LifecycleResult<()> {
        let lock = self.locks.lock_for(tenant_id);
        let _guard = lock.lock().await;

        let tenant = self.tenants.get_by_id(tenant_id).await?;
        let from = tenant
            .lifecycle_state()
            .map_err(LifecycleError::Invariant)?;
        if from == LifecycleState::Deleted {
            return Ok(());
        }
        if let Err(e) = self.backups.ensure_final_backup(tenant_id).await {
            warn!("Final backup before force-delete of {tenant_id} failed: {e}");
        }
        let now = self.clock.now();
        self.tenants
            .transition_state(tenant_id, from, LifecycleState::Deleted, now)
            .await?;
        self.tenants
            .append_lifecycle_event(NewLifecycleEvent {
                tenant_id: tenant_id.to_string(),
                from_state: from,
                to_state: LifecycleState::Deleted,
                reason: "admin_force_delete".to_string(),
                cause: Cause::Admin.to_string(),
                ts: now,
            })
            .await?;
        self.tear_down(&tenant).await;
        self.bus
            .publish(DomainEvent::TenantDeleted {
                tenant_id: tenant_id.to_string(),
            })
            .await;
        Ok(())
    }

    fn notice(&self, context: &TriggerContext) -> OverdueNotice {
        let invoice_id = context.invoice_id.clone().unwrap_or_default();
        OverdueNotice {
            payment_link: format!(
                "https://{}/payment/{invoice_id}",
                self.config.server().hostname()
            ),
            invoice_id,
            amount: None,
            days_overdue: context.days_overdue.unwrap_or_default(),
        }
    }

    async fn run_side_effects(
        &self,
        tenant: &Tenant,
        from: LifecycleState,
        to: LifecycleState,
        context: &TriggerContext,
    ) {
        match to {
            LifecycleState::Active if from == LifecycleState::Provisioning => {
                // Provisioning success effects (events, credentials reveal)
                // belong to the provisioner.
            }
            LifecycleState::Active => self.reactivate(tenant).await,
            LifecycleState::WarningSent => {
                if let Err(e) = self
                    .notifier
                    .payment_reminder(tenant, &self.notice(context))
                    .await
                {
                    warn!("Payment reminder for {} failed: {e}", tenant.id);
                }
            }
            LifecycleState::Suspended => self.suspend(tenant, context).await,
            LifecycleState::FinalWarningSent => {
                if let Err(e) = self
                    .notifier
                    .final_warning(tenant, &self.notice(context))
                    .await
                {
                    warn!("Final warning for {} failed: {e}", tenant.id);
                }
            }
            LifecycleState::ScheduledForDeletion => self.schedule_deletion(tenant).await,
            LifecycleState::Deleted => {
                self.tear_down(tenant).await;
                self.bus
                    .publish(DomainEvent::TenantDeleted {
                        tenant_id: tenant.id.clone(),
                    })
                    .await;
            }
            LifecycleState::Provisioning
            | LifecycleState::ProvisioningFailed => {}
        }
    }

    /// Scale the site down and swap the ingress to the static suspension
    /// page. The database keeps running so the data stays warm.
    async fn suspend(&self, tenant: &Tenant, context: &TriggerContext) {
        let policy = BackoffPolicy::provision_step(30, 5);
        let wp = wordpress_deployment(&tenant.id);
        if let Err(e) = retry_with_backoff(&policy, "scale-down", || {
            self.driver.scale_deployment(&tenant.id, &wp, 0)
        })
        .await
        {
            error!("Could not scale down {}: {e}", tenant.id);
        }
        if let Err(e) = retry_with_backoff(&policy, "suspension-page", || {
            self.driver.set_ingress_backend(
                &tenant.id,
                self.config.orchestrator().suspension_service(),
                80,
            )
        })
        .await
        {
            error!("Could not install suspension page for {}: {e}", tenant.id);
        }
        if let Err(e) = self
            .notifier
            .site_suspended(tenant, &self.notice(context))
            .await
        {
            warn!("Suspension notification for {} failed: {e}", tenant.id);
        }
    }

    async fn reactivate(&self, tenant: &Tenant) {
        let policy = BackoffPolicy::provision_step(30, 5);
        let wp = wordpress_deployment(&tenant.id);
        if let Err(e) = retry_with_backoff(&policy, "scale-up", || {
            self.driver.scale_deployment(&tenant.id, &wp, 1)
        })
        .await
        {
            error!("Could not scale up {}: {e}", tenant.id);
        }
        if let Err(e) = retry_with_backoff(&policy, "restore-ingress", || {
            self.driver.set_ingress_backend(&tenant.id, &wp, 80)
        })
        .await
        {
            error!("Could not restore ingress backend for {}: {e}", tenant.id);
        }
        if let Err(e) = self
            .dns
            .upsert_record(&tenant.domain, self.config.server().hostname())
            .await
        {
            error!("Could not restore DNS record for {}: {e}", tenant.id);
        }
        if let Err(e) = self.tenants.clear_grace_anchor(&tenant.id).await {
            error!("Could not clear grace anchor of {}: {e}", tenant.id);
        }
        if let Err(e) = self.notifier.site_reactivated(tenant).await {
            warn!("Reactivation notification for {} failed: {e}", tenant.id);
        }
    }

    async fn schedule_deletion(&self, tenant: &Tenant) {
        let due = self.clock.now()
            + ChronoDuration::hours(self.config.dunning().deletion_grace_hours());
        if let Err(e) = self.tenants.set_deletion_due(&tenant.id, Some(due)).await {
            error!("Could not record deletion due date for {}: {e}", tenant.id);
        }
        // The backup engine publishes BackupCompleted/BackupFailed itself.
        if let Err(e) = self.backups.take(&tenant.id, BackupKind::Final).await {
            error!("Final backup for {} failed: {e}", tenant.id);
        }
        if let Err(e) = self.notifier.deletion_scheduled(tenant, due).await {
            warn!("Deletion-scheduled notification for {} failed: {e}", tenant.id);
        }
    }

    /// Deletes everything owned by the tenant: namespace, DNS record and
    /// the gateway subscription. All three calls are idempotent.
    async fn tear_down(&self, tenant: &Tenant) {
        let policy = BackoffPolicy::provision_step(30, 5);
        if let Err(e) = retry_with_backoff(&policy, "delete-namespace", || {
            self.driver.delete_namespace(&tenant.id)
        })
        .await
        {
            error!("Could not delete namespace of {}: {e}", tenant.id);
        }
        if let Err(e) = self.dns.delete_record(&tenant.domain).await {
            error!("Could not delete DNS record of {}: {e}", tenant.id);
        }
        if let Some(subscription_ref) = &tenant.subscription_ref {
            if let Err(e) = self.gateway.cancel_subscription(subscription_ref).await {
                error!(
                    "Could not cancel subscription {subscription_ref} of {}: {e}",
                    tenant.id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transition_diagram_is_closed() {
        use LifecycleState::*;
        assert_eq!(next_state(Provisioning, Trigger::ProvisionSucceeded), Some(Active));
        assert_eq!(next_state(Provisioning, Trigger::ProvisionFailed), Some(ProvisioningFailed));
        assert_eq!(next_state(Active, Trigger::OverdueD3), Some(WarningSent));
        assert_eq!(next_state(WarningSent, Trigger::OverdueD7), Some(Suspended));
        assert_eq!(next_state(Suspended, Trigger::OverdueD15), Some(FinalWarningSent));
        assert_eq!(next_state(FinalWarningSent, Trigger::OverdueD30), Some(ScheduledForDeletion));
        assert_eq!(
            next_state(ScheduledForDeletion, Trigger::DeletionDueElapsed),
            Some(Deleted)
        );
        for state in [WarningSent, Suspended, FinalWarningSent, ScheduledForDeletion] {
            assert_eq!(next_state(state, Trigger::PaymentConfirmed), Some(Active));
        }
    }

    #[test]
    fn test_everything_else_is_a_no_op() {
        use LifecycleState::*;
        // Skipping levels is not allowed.
        assert_eq!(next_state(Active, Trigger::OverdueD7), None);
        assert_eq!(next_state(Active, Trigger::OverdueD30), None);
        assert_eq!(next_state(WarningSent, Trigger::OverdueD3), None);
        // Payment on a healthy or terminal tenant changes nothing.
        assert_eq!(next_state(Active, Trigger::PaymentConfirmed), None);
        assert_eq!(next_state(Deleted, Trigger::PaymentConfirmed), None);
        assert_eq!(next_state(ProvisioningFailed, Trigger::ProvisionSucceeded), None);
        // Deletion requires the full escalation.
        assert_eq!(next_state(Suspended, Trigger::DeletionDueElapsed), None);
    }

    #[test]
    fn test_cause_renders_audit_strings() {
        assert_eq!(Cause::Payment("pay_1".into()).to_string(), "payment:pay_1");
        assert_eq!(Cause::Timer.to_string(), "timer");
        assert_eq!(Cause::Admin.to_string(), "admin");
        assert_eq!(Cause::Webhook.to_string(), "webhook");
    }

    mod machine {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::app::config::tests::test_config;
        use crate::backups::engine::MockBackupService;
        use crate::common::clock::SystemClock;
        use crate::common::metrics::SystemCounters;
        use crate::dns::MockDnsClient;
        use crate::events::EventBus;
        use crate::gateway::MockPaymentGateway;
        use crate::notifications::MockNotifier;
        use crate::orchestrator::MockOrchestratorDriver;
        use crate::tenants::repository::MockTenantsRepository;
        use chrono::Utc;

        fn suspended_tenant() -> Tenant {
            Tenant {
                id: "padariarosa_a1b2c3".into(),
                business_name: "Padaria Rosa".into(),
                domain: "rosa.ex.com".into(),
                industry: "restaurant".into(),
                plan: "professional".into(),
                owner_id: "u42".into(),
                contact_email: "owner@rosa.ex.com".into(),
                whatsapp_contact: None,
                state: "suspended".into(),
                state_since: Utc::now(),
                grace_anchor: Some(Utc::now()),
                deletion_due_at: None,
                subscription_ref: Some("sub_1".into()),
                customer_ref: Some("cus_1".into()),
                credentials_blob: None,
                credentials_revealed: true,
                provision_step: 10,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }
        }

        struct Harness {
            tenants: MockTenantsRepository,
            driver: MockOrchestratorDriver,
            dns: MockDnsClient,
            notifier: MockNotifier,
            gateway: MockPaymentGateway,
            backups: MockBackupService,
        }

        impl Harness {
            fn new() -> Self {
                Self {
                    tenants: MockTenantsRepository::new(),
                    driver: MockOrchestratorDriver::new(),
                    dns: MockDnsClient::new(),
                    notifier: MockNotifier::new(),
                    gateway: MockPaymentGateway::new(),
                    backups: MockBackupService::new(),
                }
            }

            fn build(self) -> LifecycleStateMachine {
                let clock: Arc<dyn Clock> = Arc::new(SystemClock);
                let counters = Arc::new(SystemCounters::new());
                let bus = Arc::new(EventBus::new(16, 24, 2, clock.clone(), counters));
                LifecycleStateMachine::new(
                    Arc::new(self.tenants),
                    Arc::new(self.driver),
                    Arc::new(self.dns),
                    Arc::new(self.notifier),
                    Arc::new(self.gateway),
                    Arc::new(self.backups),
                    bus,
                    Arc::new(TenantLocks::new()),
                    clock,
                    Arc::new(test_config()),
                )
            }
        }

        #[tokio::test]
        async fn test_payment_confirmed_reactivates_a_suspended_tenant() {
            let mut harness = Harness::new();
            harness
                .tenants
                .expect_get_by_id()
                .returning(|_| Ok(suspended_tenant()));
            harness
                .tenants
                .expect_transition_state()
                .withf(|_, from, to, _| {
                    *from == LifecycleState::Suspended && *to == LifecycleState::Active
                })
                .times(1)
                .returning(|_, _, _, _| Ok(true));
            harness
                .tenants
                .expect_append_lifecycle_event()
                .withf(|event| {
                    event.reason == "payment_confirmed" && event.cause == "payment:pay_1"
                })
                .times(1)
                .returning(|_| Ok(()));
            harness
                .driver
                .expect_scale_deployment()
                .withf(|_, name, replicas| name == "wp-padariarosa_a1b2c3" && *replicas == 1)
                .times(1)
                .returning(|_, _, _| Ok(()));
            harness
                .driver
                .expect_set_ingress_backend()
                .withf(|_, service, _| service == "wp-padariarosa_a1b2c3")
                .times(1)
                .returning(|_, _, _| Ok(()));
            harness
                .dns
                .expect_upsert_record()
                .times(1)
                .returning(|_, _| Ok(()));
            harness
                .tenants
                .expect_clear_grace_anchor()
                .times(1)
                .returning(|_| Ok(()));
            harness
                .notifier
                .expect_site_reactivated()
                .times(1)
                .returning(|_| Ok(()));

            let machine = harness.build();
            let applied = machine
                .apply(
                    "padariarosa_a1b2c3",
                    Trigger::PaymentConfirmed,
                    Cause::Payment("pay_1".into()),
                    TriggerContext::default(),
                )
                .await
                .unwrap();
            assert_eq!(
                applied,
                Applied::Transitioned {
                    from: LifecycleState::Suspended,
                    to: LifecycleState::Active
                }
            );
        }

        #[tokio::test]
        async fn test_inapplicable_trigger_has_no_side_effects() {
            let mut harness = Harness::new();
            harness
                .tenants
                .expect_get_by_id()
                .returning(|_| Ok(suspended_tenant()));
            // No transition, no event row, no driver traffic.
            harness.tenants.expect_transition_state().times(0);
            harness.tenants.expect_append_lifecycle_event().times(0);
            harness.driver.expect_scale_deployment().times(0);

            let machine = harness.build();
            let applied = machine
                .apply(
                    "padariarosa_a1b2c3",
                    Trigger::OverdueD3,
                    Cause::Timer,
                    TriggerContext::default(),
                )
                .await
                .unwrap();
            assert_eq!(applied, Applied::NoOp);
        }

        #[tokio::test]
        async fn test_lost_cas_race_is_a_no_op() {
            let mut harness = Harness::new();
            harness
                .tenants
                .expect_get_by_id()
                .returning(|_| Ok(suspended_tenant()));
            harness
                .tenants
                .expect_transition_state()
                .times(1)
                .returning(|_, _, _, _| Ok(false));
            harness.tenants.expect_append_lifecycle_event().times(0);

            let machine = harness.build();
            let applied = machine
                .apply(
                    "padariarosa_a1b2c3",
                    Trigger::PaymentConfirmed,
                    Cause::Webhook,
                    TriggerContext::default(),
                )
                .await
                .unwrap();
            assert_eq!(applied, Applied::NoOp);
        }

        #[tokio::test]
        async fn test_scheduled_deletion_takes_a_final_backup() {
            let mut harness = Harness::new();
            let mut tenant = suspended_tenant();
            tenant.state = "final_warning_sent".into();
            harness
                .tenants
                .expect_get_by_id()
                .returning(move |_| Ok(tenant.clone()));
            harness
                .tenants
                .expect_transition_state()
                .times(1)
                .returning(|_, _, _, _| Ok(true));
            harness
                .tenants
                .expect_append_lifecycle_event()
                .times(1)
                .returning(|_| Ok(()));
            harness
                .tenants
                .expect_set_deletion_due()
                .withf(|_, due| due.is_some())
                .times(1)
                .returning(|_, _| Ok(()));
            harness
                .backups
                .expect_take()
                .withf(|_, kind| *kind == BackupKind::Final)
                .times(1)
                .returning(|tenant_id, _| {
                    Err(crate::backups::engine::BackupError::NotFound(
                        tenant_id.to_string(),
                    ))
                });
            harness
                .notifier
                .expect_deletion_scheduled()
                .times(1)
                .returning(|_, _| Ok(()));

            let machine = harness.build();
            let applied = machine
                .apply(
                    "padariarosa_a1b2c3",
                    Trigger::OverdueD30,
                    Cause::Timer,
                    TriggerContext {
                        invoice_id: Some("inv_1".into()),
                        days_overdue: Some(30),
                    },
                )
                .await
                .unwrap();
            assert_eq!(
                applied,
                Applied::Transitioned {
                    from: LifecycleState::FinalWarningSent,
                    to: LifecycleState::ScheduledForDeletion
                }
            );
        }
    }
}
