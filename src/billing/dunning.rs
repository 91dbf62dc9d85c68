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
use crate::app::database::LeaderLock;
use crate::backups::engine::BackupService;
use crate::billing::model::{InvoiceStatus, NewInvoice};
use crate::billing::repository::InvoicesRepository;
use crate::common::MailTransporter;
use crate::common::clock::Clock;
use crate::common::dto::GeneralError;
use crate::common::error::{FriendlyError, IntoFriendlyError, RepositoryError};
use crate::events::{DomainEvent, EventBus};
use crate::gateway::{GatewayInvoice, PaymentGateway};
use crate::tenants::model::{LifecycleState, Tenant};
use crate::tenants::repository::TenantsRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Stable key of the cross-process dunning leader lock.
pub const DUNNING_LEADER_LOCK_KEY: i64 = 0x53_49_54_4f_52_41;
const LEADER_LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const SCAN_PAGE_SIZE: i64 = 200;

#[derive(Debug, Error)]
pub enum DunningError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

pub type DunningResult<T> = Result<T, DunningError>;

#[async_trait::async_trait]
impl IntoFriendlyError<GeneralError> for DunningError {
    async fn into_friendly_error(
        self,
        mailer: Arc<dyn MailTransporter>,
    ) -> FriendlyError<GeneralError> {
        FriendlyError::internal_with_admin_notify(
            file!(),
            GeneralError {
                message: self.to_string(),
            },
            mailer,
        )
        .await
    }
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct TickSummary {
    /// Whether the tick ran at all; `true` means another instance holds the
    /// leader lock and this tick was skipped.
    pub skipped: bool,
    pub scanned: usize,
    pub events_emitted: usize,
    pub deletions_due: usize,
}

/// Single-leader periodic scanner of overdue invoices. Emits at most one
/// `Overdue*` escalation per tenant per tick and executes scheduled
/// deletions on a separate pass. Missed ticks are never replayed: every tick
/// recomputes from the gateway's authoritative state.
pub struct DunningScheduler {
    tenants: Arc<dyn TenantsRepository>,
    invoices: Arc<dyn InvoicesRepository>,
    gateway: Arc<dyn PaymentGateway>,
    backups: Arc<dyn BackupService>,
    bus: Arc<EventBus>,
    leader: Arc<dyn LeaderLock>,
    clock: Arc<dyn Clock>,
    config: Arc<AppConfig>,
}

impl DunningScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantsRepository>,
        invoices: Arc<dyn InvoicesRepository>,
        gateway: Arc<dyn PaymentGateway>,
        backups: Arc<dyn BackupService>,
        bus: Arc<EventBus>,
        leader: Arc<dyn LeaderLock>,
        clock: Arc<dyn Clock>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            tenants,
            invoices,
            gateway,
            backups,
            bus,
            leader,
            clock,
            config,
        }
    }

    /// The periodic loop, one tick per configured interval. Spawned once by
    /// the composition root.
    pub async fn run_loop(self: Arc<Self>) {
        let interval =
            Duration::from_secs(self.config.dunning().tick_interval_hours() * 60 * 60);
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately.
        timer.tick().await;
        loop {
            match self.tick().await {
                Ok(summary) if summary.skipped => {
                    debug!("Dunning tick skipped, another instance is leader")
                }
                Ok(summary) => info!(
                    "Dunning tick done: scanned={} events={} deletions={}",
                    summary.scanned, summary.events_emitted, summary.deletions_due
                ),
                Err(e) => error!("Dunning tick failed: {e}"),
            }
            timer.tick().await;
        }
    }

    /// One tick. Also invoked on demand through the admin API.
    pub async fn tick(&self) -> DunningResult<TickSummary> {
        if !self
            .leader
            .try_acquire(DUNNING_LEADER_LOCK_KEY, LEADER_LOCK_TIMEOUT)
            .await?
        {
            return Ok(TickSummary {
                skipped: true,
                ..TickSummary::default()
            });
        }
        let result = self.tick_as_leader().await;
        if let Err(e) = self.leader.release(DUNNING_LEADER_LOCK_KEY).await {
            warn!("Could not release the dunning leader lock: {e}");
        }
        result
    }

    async fn tick_as_leader(&self) -> DunningResult<TickSummary> {
        let mut summary = TickSummary::default();
        let now = self.clock.now();

        let dunning_states: Vec<String> = [
            LifecycleState::Active,
            LifecycleState::WarningSent,
            LifecycleState::Suspended,
            LifecycleState::FinalWarningSent,
        ]
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();

        let mut offset = 0;
        loop {
            let page = self
                .tenants
                .list_in_states(dunning_states.clone(), SCAN_PAGE_SIZE, offset)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;
            for tenant in page {
                summary.scanned += 1;
                if let Some(emitted) = self.scan_tenant(&tenant, now).await? {
                    debug!("Dunning escalation for {}: {:?}", tenant.id, emitted.kind());
                    self.bus.publish(emitted).await;
                    summary.events_emitted += 1;
                }
            }
        }

        summary.deletions_due = self.deletion_pass(now).await?;
        Ok(summary)
    }

    /// Computes the single highest-applicable escalation for one tenant, or
    /// `None`. Never more than one transition per tenant per tick.
    async fn scan_tenant(
        &self,
        tenant: &Tenant,
        now: DateTime<Utc>,
    ) -> DunningResult<Option<DomainEvent>> {
        let Some(subscription_ref) = tenant.subscription_ref.as_deref() else {
            return Ok(None);
        };
        let state = match tenant.lifecycle_state() {
            Ok(state) => state,
            Err(e) => {
                error!("Tenant {} has an invalid state: {e}", tenant.id);
                return Ok(None);
            }
        };

        let overdue = match self.gateway.list_overdue_invoices(subscription_ref).await {
            Ok(invoices) => invoices,
            Err(e) => {
                warn!("Could not list overdue invoices of {}: {e}", tenant.id);
                return Ok(None);
            }
        };
        let Some(invoice) = earliest_due(&overdue) else {
            return Ok(None);
        };

        let due_at = invoice
            .due_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        self.mirror_invoice(tenant, invoice, due_at).await;

        // The anchor is the first day an unpaid invoice went overdue; day
        // thresholds are measured from it and a payment clears it.
        self.tenants
            .set_grace_anchor_if_absent(&tenant.id, due_at)
            .await?;
        let anchor = tenant.grace_anchor.unwrap_or(due_at);
        let days_overdue = (now - anchor).num_days().max(0);

        let thresholds = self.config.dunning();
        let tenant_id = tenant.id.to_string();
        let invoice_id = invoice.id.clone();
        let escalation = match state {
            LifecycleState::Active if days_overdue >= thresholds.first_warning_days() => {
                Some(DomainEvent::OverdueD3 {
                    tenant_id,
                    invoice_id,
                    days_overdue,
                })
            }
            LifecycleState::WarningSent if days_overdue >= thresholds.suspension_days() => {
                Some(DomainEvent::OverdueD7 {
                    tenant_id,
                    invoice_id,
                    days_overdue,
                })
            }
            LifecycleState::Suspended if days_overdue >= thresholds.final_warning_days() => {
                Some(DomainEvent::OverdueD15 {
                    tenant_id,
                    invoice_id,
                    days_overdue,
                })
            }
            LifecycleState::FinalWarningSent if days_overdue >= thresholds.deletion_days() => {
                Some(DomainEvent::OverdueD30 {
                    tenant_id,
                    invoice_id,
                    days_overdue,
                })
            }
            _ => None,
        };
        Ok(escalation)
    }

    async fn mirror_invoice(
        &self,
        tenant: &Tenant,
        invoice: &GatewayInvoice,
        due_at: DateTime<Utc>,
    ) {
        let result = self
            .invoices
            .upsert(NewInvoice {
                id: invoice.id.clone(),
                tenant_id: tenant.id.clone(),
                amount: invoice.value.clone(),
                currency: invoice.currency.clone(),
                due_date: due_at,
                status: InvoiceStatus::Overdue,
            })
            .await;
        if let Err(e) = result {
            warn!("Could not mirror invoice {} of {}: {e}", invoice.id, tenant.id);
        }
    }

    /// Separate pass: every `ScheduledForDeletion` tenant whose due date
    /// elapsed gets its `DeletionDueElapsed` event, but only once a `final`
    /// backup provably exists.
    async fn deletion_pass(&self, now: DateTime<Utc>) -> DunningResult<usize> {
        let mut deletions = 0;
        let mut offset = 0;
        loop {
            let page = self
                .tenants
                .list_in_states(
                    vec![LifecycleState::ScheduledForDeletion.as_str().to_string()],
                    SCAN_PAGE_SIZE,
                    offset,
                )
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;
            for tenant in page {
                let due = match tenant.deletion_due_at {
                    Some(due) if due <= now => due,
                    _ => continue,
                };
                if let Err(e) = self.backups.ensure_final_backup(&tenant.id).await {
                    error!(
                        "Holding deletion of {}: no final backup could be taken: {e}",
                        tenant.id
                    );
                    continue;
                }
                debug!("Deletion due for {} since {due}", tenant.id);
                self.bus
                    .publish(DomainEvent::DeletionDueElapsed {
                        tenant_id: tenant.id.clone(),
                    })
                    .await;
                deletions += 1;
            }
        }
        Ok(deletions)
    }
}

fn earliest_due<'a>(invoices: &'a [GatewayInvoice]) -> Option<&'a GatewayInvoice> {
    invoices.iter().min_by_key(|invoice| invoice.due_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::tests::test_config;
    use crate::app::database::MockLeaderLock;
    use crate::backups::engine::MockBackupService;
    use crate::backups::model::BackupRecord;
    use crate::billing::repository::MockInvoicesRepository;
    use crate::common::clock::tests::FixedClock;
    use crate::common::metrics::SystemCounters;
    use crate::events::EventKind;
    use crate::gateway::MockPaymentGateway;
    use crate::tenants::repository::MockTenantsRepository;
    use bigdecimal::BigDecimal;
    use chrono::{NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn tenant_in(state: LifecycleState) -> Tenant {
        Tenant {
            id: "padariarosa_a1b2c3".into(),
            business_name: "Padaria Rosa".into(),
            domain: "rosa.ex.com".into(),
            industry: "restaurant".into(),
            plan: "professional".into(),
            owner_id: "u42".into(),
            contact_email: "owner@rosa.ex.com".into(),
            whatsapp_contact: None,
            state: state.as_str().into(),
            state_since: Utc::now(),
            grace_anchor: None,
            deletion_due_at: None,
            subscription_ref: Some("sub_1".into()),
            customer_ref: None,
            credentials_blob: None,
            credentials_revealed: true,
            provision_step: 10,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn overdue_invoice(due: NaiveDate) -> GatewayInvoice {
        GatewayInvoice {
            id: "inv_1".into(),
            subscription: Some("sub_1".into()),
            customer: Some("cus_1".into()),
            value: BigDecimal::from_str("149.9").unwrap(),
            currency: "BRL".into(),
            due_date: due,
            status: "OVERDUE".into(),
            external_reference: None,
        }
    }

    struct Setup {
        tenants: MockTenantsRepository,
        invoices: MockInvoicesRepository,
        gateway: MockPaymentGateway,
        backups: MockBackupService,
        leader: MockLeaderLock,
        clock: Arc<FixedClock>,
        bus: Arc<EventBus>,
    }

    impl Setup {
        fn at(now: DateTime<Utc>) -> Self {
            let clock = Arc::new(FixedClock::at(now));
            let bus = Arc::new(EventBus::new(
                64,
                24,
                2,
                clock.clone(),
                Arc::new(SystemCounters::new()),
            ));
            let mut leader = MockLeaderLock::new();
            leader.expect_try_acquire().returning(|_, _| Ok(true));
            leader.expect_release().returning(|_| Ok(()));
            Self {
                tenants: MockTenantsRepository::new(),
                invoices: MockInvoicesRepository::new(),
                gateway: MockPaymentGateway::new(),
                backups: MockBackupService::new(),
                leader,
                clock,
                bus,
            }
        }

        fn build(self) -> (DunningScheduler, Arc<EventBus>) {
            let bus = self.bus.clone();
            (
                DunningScheduler::new(
                    Arc::new(self.tenants),
                    Arc::new(self.invoices),
                    Arc::new(self.gateway),
                    Arc::new(self.backups),
                    self.bus,
                    Arc::new(self.leader),
                    self.clock,
                    Arc::new(test_config()),
                ),
                bus,
            )
        }
    }

    fn drain_kinds(bus: &Arc<EventBus>) -> Vec<EventKind> {
        // The bus exposes only occupancy; for assertions the tests dequeue
        // directly through the internal hook.
        let mut kinds = Vec::new();
        while let Some(envelope) = bus.try_dequeue_for_test() {
            kinds.push(envelope.event.kind());
        }
        kinds
    }

    fn day(days_after_due: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap() + chrono::Duration::days(days_after_due)
    }

    fn due_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    async fn tick_with(state: LifecycleState, days: i64) -> Vec<EventKind> {
        let mut setup = Setup::at(day(days));
        let scanned = tenant_in(state);
        setup
            .tenants
            .expect_list_in_states()
            .returning(move |states, _, offset| {
                if offset == 0 && states.contains(&scanned.state) {
                    Ok(vec![scanned.clone()])
                } else {
                    Ok(vec![])
                }
            });
        setup
            .gateway
            .expect_list_overdue_invoices()
            .returning(|_| Ok(vec![overdue_invoice(due_date())]));
        setup.invoices.expect_upsert().returning(|_| Ok(()));
        setup
            .tenants
            .expect_set_grace_anchor_if_absent()
            .returning(|_, _| Ok(()));
        let (scheduler, bus) = setup.build();
        let summary = scheduler.tick().await.unwrap();
        assert!(!summary.skipped);
        drain_kinds(&bus)
    }

    #[tokio::test]
    async fn test_day_boundaries_drive_single_escalations() {
        // Day 2: below every threshold.
        assert_eq!(tick_with(LifecycleState::Active, 2).await, vec![]);
        // Day 3: first warning.
        assert_eq!(
            tick_with(LifecycleState::Active, 3).await,
            vec![EventKind::OverdueD3]
        );
        // Day 6 with the warning already sent: nothing new.
        assert_eq!(tick_with(LifecycleState::WarningSent, 6).await, vec![]);
        // Day 7: suspension.
        assert_eq!(
            tick_with(LifecycleState::WarningSent, 7).await,
            vec![EventKind::OverdueD7]
        );
        assert_eq!(
            tick_with(LifecycleState::Suspended, 15).await,
            vec![EventKind::OverdueD15]
        );
        assert_eq!(
            tick_with(LifecycleState::FinalWarningSent, 30).await,
            vec![EventKind::OverdueD30]
        );
    }

    #[tokio::test]
    async fn test_deep_overdue_still_emits_only_the_state_gated_event() {
        // A tenant that is already suspended and 40 days overdue gets the
        // D15 escalation, never a jump straight to deletion.
        assert_eq!(
            tick_with(LifecycleState::Suspended, 40).await,
            vec![EventKind::OverdueD15]
        );
    }

    #[tokio::test]
    async fn test_clock_jitter_does_not_double_fire_within_a_day() {
        let mut setup = Setup::at(day(3));
        let scanned = tenant_in(LifecycleState::WarningSent);
        setup
            .tenants
            .expect_list_in_states()
            .returning(move |states, _, offset| {
                if offset == 0 && states.contains(&scanned.state) {
                    Ok(vec![scanned.clone()])
                } else {
                    Ok(vec![])
                }
            });
        setup
            .gateway
            .expect_list_overdue_invoices()
            .returning(|_| Ok(vec![overdue_invoice(due_date())]));
        setup.invoices.expect_upsert().returning(|_| Ok(()));
        setup
            .tenants
            .expect_set_grace_anchor_if_absent()
            .returning(|_, _| Ok(()));
        let clock = setup.clock.clone();
        let (scheduler, bus) = setup.build();

        // The warning fired earlier today (state is WarningSent). An
        // on-demand tick an hour later, even with the clock skewed back,
        // stays below the day-7 threshold.
        clock.advance(chrono::Duration::hours(1));
        scheduler.tick().await.unwrap();
        clock.advance(chrono::Duration::hours(-2));
        scheduler.tick().await.unwrap();
        assert_eq!(drain_kinds(&bus), vec![]);
    }

    #[tokio::test]
    async fn test_skipped_when_leader_lock_is_taken() {
        let mut setup = Setup::at(day(3));
        setup.leader = MockLeaderLock::new();
        setup.leader.expect_try_acquire().returning(|_, _| Ok(false));
        setup.tenants.expect_list_in_states().times(0);
        let (scheduler, _) = setup.build();
        let summary = scheduler.tick().await.unwrap();
        assert!(summary.skipped);
    }

    #[tokio::test]
    async fn test_deletion_pass_requires_a_final_backup() {
        let mut setup = Setup::at(day(31));
        let mut due_tenant = tenant_in(LifecycleState::ScheduledForDeletion);
        due_tenant.deletion_due_at = Some(day(31) - chrono::Duration::hours(1));
        setup
            .tenants
            .expect_list_in_states()
            .returning(move |states, _, offset| {
                if offset == 0 && states.contains(&due_tenant.state) {
                    Ok(vec![due_tenant.clone()])
                } else {
                    Ok(vec![])
                }
            });
        setup
            .backups
            .expect_ensure_final_backup()
            .times(1)
            .returning(|tenant_id| {
                Ok(BackupRecord {
                    id: format!("{tenant_id}_final_20250731000000"),
                    tenant_id: tenant_id.to_string(),
                    kind: "final".into(),
                    created_at: Utc::now(),
                    size_bytes: 1024,
                    checksum: "ab".repeat(32),
                    object_key: format!("final/{tenant_id}/x.tar.gz"),
                    retention_class: "until-admin-delete".into(),
                })
            });
        let (scheduler, bus) = setup.build();
        let summary = scheduler.tick().await.unwrap();
        assert_eq!(summary.deletions_due, 1);
        assert_eq!(drain_kinds(&bus), vec![EventKind::DeletionDueElapsed]);
    }

    #[tokio::test]
    async fn test_deletion_is_held_when_final_backup_fails() {
        let mut setup = Setup::at(day(31));
        let mut due_tenant = tenant_in(LifecycleState::ScheduledForDeletion);
        due_tenant.deletion_due_at = Some(day(30));
        setup
            .tenants
            .expect_list_in_states()
            .returning(move |states, _, offset| {
                if offset == 0 && states.contains(&due_tenant.state) {
                    Ok(vec![due_tenant.clone()])
                } else {
                    Ok(vec![])
                }
            });
        setup
            .backups
            .expect_ensure_final_backup()
            .returning(|tenant_id| {
                Err(crate::backups::engine::BackupError::NotFound(
                    tenant_id.to_string(),
                ))
            });
        let (scheduler, bus) = setup.build();
        let summary = scheduler.tick().await.unwrap();
        assert_eq!(summary.deletions_due, 0);
        assert_eq!(drain_kinds(&bus), vec![]);
    }
}
