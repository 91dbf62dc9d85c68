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

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// The closed set of event types flowing through the bus. Nothing outside
/// this enum is ever dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    TenantProvisioned,
    TenantProvisioningFailed,
    TenantDeleted,
    PaymentConfirmed,
    PaymentReversed,
    SubscriptionCancelled,
    OverdueD3,
    OverdueD7,
    OverdueD15,
    OverdueD30,
    DeletionDueElapsed,
    BackupCompleted,
    BackupFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::TenantProvisioned,
        EventKind::TenantProvisioningFailed,
        EventKind::TenantDeleted,
        EventKind::PaymentConfirmed,
        EventKind::PaymentReversed,
        EventKind::SubscriptionCancelled,
        EventKind::OverdueD3,
        EventKind::OverdueD7,
        EventKind::OverdueD15,
        EventKind::OverdueD30,
        EventKind::DeletionDueElapsed,
        EventKind::BackupCompleted,
        EventKind::BackupFailed,
    ];
}

#[derive(Debug, Clone, Serialize)]
pub enum DomainEvent {
    TenantProvisioned {
        tenant_id: String,
    },
    TenantProvisioningFailed {
        tenant_id: String,
        reason: String,
    },
    TenantDeleted {
        tenant_id: String,
    },
    PaymentConfirmed {
        tenant_id: String,
        invoice_id: String,
    },
    PaymentReversed {
        tenant_id: String,
        invoice_id: String,
    },
    SubscriptionCancelled {
        tenant_id: String,
    },
    OverdueD3 {
        tenant_id: String,
        invoice_id: String,
        days_overdue: i64,
    },
    OverdueD7 {
        tenant_id: String,
        invoice_id: String,
        days_overdue: i64,
    },
    OverdueD15 {
        tenant_id: String,
        invoice_id: String,
        days_overdue: i64,
    },
    OverdueD30 {
        tenant_id: String,
        invoice_id: String,
        days_overdue: i64,
    },
    DeletionDueElapsed {
        tenant_id: String,
    },
    BackupCompleted {
        tenant_id: String,
        backup_id: String,
    },
    BackupFailed {
        tenant_id: String,
        reason: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::TenantProvisioned { .. } => EventKind::TenantProvisioned,
            DomainEvent::TenantProvisioningFailed { .. } => EventKind::TenantProvisioningFailed,
            DomainEvent::TenantDeleted { .. } => EventKind::TenantDeleted,
            DomainEvent::PaymentConfirmed { .. } => EventKind::PaymentConfirmed,
            DomainEvent::PaymentReversed { .. } => EventKind::PaymentReversed,
            DomainEvent::SubscriptionCancelled { .. } => EventKind::SubscriptionCancelled,
            DomainEvent::OverdueD3 { .. } => EventKind::OverdueD3,
            DomainEvent::OverdueD7 { .. } => EventKind::OverdueD7,
            DomainEvent::OverdueD15 { .. } => EventKind::OverdueD15,
            DomainEvent::OverdueD30 { .. } => EventKind::OverdueD30,
            DomainEvent::DeletionDueElapsed { .. } => EventKind::DeletionDueElapsed,
            DomainEvent::BackupCompleted { .. } => EventKind::BackupCompleted,
            DomainEvent::BackupFailed { .. } => EventKind::BackupFailed,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            DomainEvent::TenantProvisioned { tenant_id }
            | DomainEvent::TenantProvisioningFailed { tenant_id, .. }
            | DomainEvent::TenantDeleted { tenant_id }
            | DomainEvent::PaymentConfirmed { tenant_id, .. }
            | DomainEvent::PaymentReversed { tenant_id, .. }
            | DomainEvent::SubscriptionCancelled { tenant_id }
            | DomainEvent::OverdueD3 { tenant_id, .. }
            | DomainEvent::OverdueD7 { tenant_id, .. }
            | DomainEvent::OverdueD15 { tenant_id, .. }
            | DomainEvent::OverdueD30 { tenant_id, .. }
            | DomainEvent::DeletionDueElapsed { tenant_id }
            | DomainEvent::BackupCompleted { tenant_id, .. }
            | DomainEvent::BackupFailed { tenant_id, .. } => tenant_id,
        }
    }

    /// Whether the event is one of the dunning escalations. A queued overdue
    /// event is invalidated by a later `PaymentConfirmed` for the same
    /// tenant.
    pub fn is_overdue(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::OverdueD3
                | EventKind::OverdueD7
                | EventKind::OverdueD15
                | EventKind::OverdueD30
        )
    }
}

/// An event together with its bus bookkeeping. The `event_id` doubles as the
/// correlation id for everything a handler logs or emits while processing it.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub event: DomainEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_round_trip_covers_the_closed_set() {
        let events = vec![
            DomainEvent::TenantProvisioned { tenant_id: "t".into() },
            DomainEvent::TenantProvisioningFailed { tenant_id: "t".into(), reason: "r".into() },
            DomainEvent::TenantDeleted { tenant_id: "t".into() },
            DomainEvent::PaymentConfirmed { tenant_id: "t".into(), invoice_id: "i".into() },
            DomainEvent::PaymentReversed { tenant_id: "t".into(), invoice_id: "i".into() },
            DomainEvent::SubscriptionCancelled { tenant_id: "t".into() },
            DomainEvent::OverdueD3 { tenant_id: "t".into(), invoice_id: "i".into(), days_overdue: 3 },
            DomainEvent::OverdueD7 { tenant_id: "t".into(), invoice_id: "i".into(), days_overdue: 7 },
            DomainEvent::OverdueD15 { tenant_id: "t".into(), invoice_id: "i".into(), days_overdue: 15 },
            DomainEvent::OverdueD30 { tenant_id: "t".into(), invoice_id: "i".into(), days_overdue: 30 },
            DomainEvent::DeletionDueElapsed { tenant_id: "t".into() },
            DomainEvent::BackupCompleted { tenant_id: "t".into(), backup_id: "b".into() },
            DomainEvent::BackupFailed { tenant_id: "t".into(), reason: "r".into() },
        ];
        let kinds: Vec<EventKind> = events.iter().map(DomainEvent::kind).collect();
        assert_eq!(kinds, EventKind::ALL.to_vec());
        for event in &events {
            assert_eq!(event.tenant_id(), "t");
        }
    }

    #[test]
    fn test_only_dunning_escalations_are_overdue() {
        assert!(
            DomainEvent::OverdueD15 {
                tenant_id: "t".into(),
                invoice_id: "i".into(),
                days_overdue: 16
            }
            .is_overdue()
        );
        assert!(
            !DomainEvent::PaymentConfirmed {
                tenant_id: "t".into(),
                invoice_id: "i".into()
            }
            .is_overdue()
        );
    }
}
