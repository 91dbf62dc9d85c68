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

use crate::billing::model::InvoiceStatus;
use crate::billing::repository::InvoicesRepository;
use crate::events::{DomainEvent, EventBus, EventEnvelope, EventHandler, EventKind};
use crate::tenants::lifecycle::{Cause, LifecycleStateMachine, Trigger, TriggerContext};
use crate::tenants::repository::TenantsRepository;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// The single bus subscriber translating domain events into lifecycle
/// triggers and bookkeeping. Registered for every kind of the closed set;
/// idempotent because every lifecycle trigger outside the diagram is a
/// no-op and the bookkeeping writes are absolute.
pub struct DomainEventHandler {
    lifecycle: Arc<LifecycleStateMachine>,
    invoices: Arc<dyn InvoicesRepository>,
    tenants: Arc<dyn TenantsRepository>,
}

impl DomainEventHandler {
    pub fn new(
        lifecycle: Arc<LifecycleStateMachine>,
        invoices: Arc<dyn InvoicesRepository>,
        tenants: Arc<dyn TenantsRepository>,
    ) -> Self {
        Self {
            lifecycle,
            invoices,
            tenants,
        }
    }

    pub fn register(self: Arc<Self>, bus: &EventBus) {
        for kind in EventKind::ALL {
            bus.subscribe(kind, self.clone());
        }
    }
}

#[async_trait]
impl EventHandler for DomainEventHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        match &envelope.event {
            DomainEvent::PaymentConfirmed {
                tenant_id,
                invoice_id,
            } => {
                self.invoices
                    .mark_status(invoice_id, InvoiceStatus::Confirmed)
                    .await?;
                self.lifecycle
                    .apply(
                        tenant_id,
                        Trigger::PaymentConfirmed,
                        Cause::Payment(invoice_id.clone()),
                        TriggerContext {
                            invoice_id: Some(invoice_id.clone()),
                            days_overdue: None,
                        },
                    )
                    .await?;
            }
            DomainEvent::PaymentReversed {
                tenant_id,
                invoice_id,
            } => {
                self.invoices
                    .mark_status(invoice_id, InvoiceStatus::Refunded)
                    .await?;
                info!(
                    "Payment {invoice_id} of tenant {tenant_id} reversed, correlation_id={}",
                    envelope.event_id
                );
            }
            DomainEvent::SubscriptionCancelled { tenant_id } => {
                self.tenants.set_subscription(tenant_id, None, None).await?;
                info!(
                    "Subscription of tenant {tenant_id} cancelled at the gateway, correlation_id={}",
                    envelope.event_id
                );
            }
            DomainEvent::OverdueD3 {
                tenant_id,
                invoice_id,
                days_overdue,
            } => {
                self.escalate(tenant_id, Trigger::OverdueD3, invoice_id, *days_overdue)
                    .await?;
            }
            DomainEvent::OverdueD7 {
                tenant_id,
                invoice_id,
                days_overdue,
            } => {
                self.escalate(tenant_id, Trigger::OverdueD7, invoice_id, *days_overdue)
                    .await?;
            }
            DomainEvent::OverdueD15 {
                tenant_id,
                invoice_id,
                days_overdue,
            } => {
                self.escalate(tenant_id, Trigger::OverdueD15, invoice_id, *days_overdue)
                    .await?;
            }
            DomainEvent::OverdueD30 {
                tenant_id,
                invoice_id,
                days_overdue,
            } => {
                self.escalate(tenant_id, Trigger::OverdueD30, invoice_id, *days_overdue)
                    .await?;
            }
            DomainEvent::DeletionDueElapsed { tenant_id } => {
                self.lifecycle
                    .apply(
                        tenant_id,
                        Trigger::DeletionDueElapsed,
                        Cause::Timer,
                        TriggerContext::default(),
                    )
                    .await?;
            }
            DomainEvent::TenantProvisioned { tenant_id } => {
                info!(
                    "Tenant {tenant_id} provisioned, correlation_id={}",
                    envelope.event_id
                );
            }
            DomainEvent::TenantProvisioningFailed { tenant_id, reason } => {
                info!(
                    "Tenant {tenant_id} provisioning failed ({reason}), correlation_id={}",
                    envelope.event_id
                );
            }
            DomainEvent::TenantDeleted { tenant_id } => {
                info!(
                    "Tenant {tenant_id} deleted, correlation_id={}",
                    envelope.event_id
                );
            }
            DomainEvent::BackupCompleted {
                tenant_id,
                backup_id,
            } => {
                info!(
                    "Backup {backup_id} of tenant {tenant_id} completed, correlation_id={}",
                    envelope.event_id
                );
            }
            DomainEvent::BackupFailed { tenant_id, reason } => {
                info!(
                    "Backup of tenant {tenant_id} failed ({reason}), correlation_id={}",
                    envelope.event_id
                );
            }
        }
        Ok(())
    }
}

impl DomainEventHandler {
    async fn escalate(
        &self,
        tenant_id: &str,
        trigger: Trigger,
        invoice_id: &str,
        days_overdue: i64,
    ) -> anyhow::Result<()> {
        self.lifecycle
            .apply(
                tenant_id,
                trigger,
                Cause::Timer,
                TriggerContext {
                    invoice_id: Some(invoice_id.to_string()),
                    days_overdue: Some(days_overdue),
                },
            )
            .await?;
        Ok(())
    }
}
