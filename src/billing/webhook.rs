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
use crate::common::clock::Clock;
use crate::common::metrics::SystemCounters;
use crate::events::{DomainEvent, EventBus, EventKind};
use crate::gateway::PaymentGateway;
use crate::tenants::repository::TenantsRepository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tracing::{debug, info, warn};

const DEDUP_WINDOW_HOURS: i64 = 24;

/// What the ingestor did with a webhook. Everything except a parse failure
/// answers HTTP 200; the gateway is never given a reason to retry.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Published(EventKind),
    InvalidSignature,
    Duplicate,
    Ignored(&'static str),
    UnknownTenant,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payment: Option<WebhookPayment>,
    #[serde(default)]
    subscription: Option<WebhookSubscription>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayment {
    id: String,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    value: Option<bigdecimal::BigDecimal>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, rename = "dueDate")]
    due_date: Option<chrono::NaiveDate>,
    #[serde(default, rename = "externalReference")]
    external_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookSubscription {
    id: String,
    #[serde(default, rename = "externalReference")]
    external_reference: Option<String>,
}

/// Verifies and normalizes payment-gateway notifications into internal
/// events. Unknown event types and unknown fields are logged and dropped,
/// never propagated.
pub struct WebhookIngestor {
    gateway: Arc<dyn PaymentGateway>,
    tenants: Arc<dyn TenantsRepository>,
    invoices: Arc<dyn InvoicesRepository>,
    bus: Arc<EventBus>,
    counters: Arc<SystemCounters>,
    clock: Arc<dyn Clock>,
    seen: StdMutex<HashMap<String, DateTime<Utc>>>,
}

impl WebhookIngestor {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        tenants: Arc<dyn TenantsRepository>,
        invoices: Arc<dyn InvoicesRepository>,
        bus: Arc<EventBus>,
        counters: Arc<SystemCounters>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            tenants,
            invoices,
            bus,
            counters,
            clock,
            seen: StdMutex::new(HashMap::new()),
        }
    }

    /// Processes one raw webhook body. `Err` means the body was not
    /// parseable JSON; everything else is an accepted-and-handled outcome.
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, serde_json::Error> {
        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)?;

        if !self
            .gateway
            .verify_webhook_signature(raw_body, signature.unwrap_or_default())
        {
            // The gateway is not a trusted retry source for our mutations;
            // drop silently and answer 200.
            self.counters.webhook_invalid_signature();
            warn!("Webhook signature mismatch for event {}", envelope.event);
            return Ok(WebhookOutcome::InvalidSignature);
        }

        let Some(tenant_id) = self.resolve_tenant(&envelope).await else {
            warn!("Webhook {} does not resolve to a tenant", envelope.event);
            return Ok(WebhookOutcome::UnknownTenant);
        };

        let invoice_id = envelope
            .payment
            .as_ref()
            .map(|payment| payment.id.clone())
            .unwrap_or_default();
        let event_id = envelope
            .id
            .clone()
            .unwrap_or_else(|| hex::encode(Sha256::digest(raw_body)));
        if self.is_duplicate(&event_id, &tenant_id, &invoice_id) {
            self.counters.webhook_duplicate();
            debug!("Duplicate webhook {event_id} for tenant {tenant_id}");
            return Ok(WebhookOutcome::Duplicate);
        }

        match envelope.event.as_str() {
            "PAYMENT_CONFIRMED" | "PAYMENT_RECEIVED" => {
                self.record_invoice(&tenant_id, &envelope, InvoiceStatus::Confirmed)
                    .await;
                let event = DomainEvent::PaymentConfirmed {
                    tenant_id,
                    invoice_id,
                };
                info!("Webhook {} accepted as PaymentConfirmed", envelope.event);
                self.bus.publish(event).await;
                Ok(WebhookOutcome::Published(EventKind::PaymentConfirmed))
            }
            "PAYMENT_REFUNDED" | "PAYMENT_CHARGEBACK_REQUESTED" => {
                self.record_invoice(&tenant_id, &envelope, InvoiceStatus::Refunded)
                    .await;
                let event = DomainEvent::PaymentReversed {
                    tenant_id,
                    invoice_id,
                };
                self.bus.publish(event).await;
                Ok(WebhookOutcome::Published(EventKind::PaymentReversed))
            }
            "SUBSCRIPTION_DELETED" => {
                self.bus
                    .publish(DomainEvent::SubscriptionCancelled { tenant_id })
                    .await;
                Ok(WebhookOutcome::Published(EventKind::SubscriptionCancelled))
            }
            "PAYMENT_OVERDUE" => {
                // The dunning scheduler is authoritative for overdue state.
                debug!("Ignoring PAYMENT_OVERDUE for {tenant_id}");
                Ok(WebhookOutcome::Ignored("dunning scheduler is authoritative"))
            }
            other => {
                self.counters.webhook_ignored();
                info!("Unhandled webhook event: {other}");
                Ok(WebhookOutcome::Ignored("unhandled event type"))
            }
        }
    }

    async fn resolve_tenant(&self, envelope: &WebhookEnvelope) -> Option<String> {
        let subscription_ref = envelope
            .payment
            .as_ref()
            .and_then(|payment| payment.subscription.clone())
            .or_else(|| envelope.subscription.as_ref().map(|s| s.id.clone()));
        if let Some(subscription_ref) = subscription_ref
            && let Ok(Some(tenant)) = self
                .tenants
                .find_by_subscription_ref(&subscription_ref)
                .await
        {
            return Some(tenant.id);
        }
        // Fallback: the gateway's externalReference carries our tenant id.
        let external = envelope
            .payment
            .as_ref()
            .and_then(|payment| payment.external_reference.clone())
            .or_else(|| {
                envelope
                    .subscription
                    .as_ref()
                    .and_then(|s| s.external_reference.clone())
            })?;
        match self.tenants.get_by_id(&external).await {
            Ok(tenant) => Some(tenant.id),
            Err(_) => None,
        }
    }

    fn is_duplicate(&self, event_id: &str, tenant_id: &str, invoice_id: &str) -> bool {
        let now = self.clock.now();
        let horizon = now - ChronoDuration::hours(DEDUP_WINDOW_HOURS);
        let key = format!("{event_id}:{tenant_id}:{invoice_id}");
        let mut seen = self.seen.lock().expect("webhook dedup map is poisoned");
        seen.retain(|_, at| *at > horizon);
        if seen.contains_key(&key) {
            return true;
        }
        seen.insert(key, now);
        false
    }

    async fn record_invoice(
        &self,
        tenant_id: &str,
        envelope: &WebhookEnvelope,
        status: InvoiceStatus,
    ) {
        let Some(payment) = &envelope.payment else {
            return;
        };
        let Some(value) = payment.value.clone() else {
            // Without an amount we only flip the status of a known mirror
            // row.
            if let Err(e) = self.invoices.mark_status(&payment.id, status).await {
                warn!("Could not mark invoice {}: {e}", payment.id);
            }
            return;
        };
        let due_date = payment
            .due_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or_else(|| self.clock.now());
        let result = self
            .invoices
            .upsert(crate::billing::model::NewInvoice {
                id: payment.id.clone(),
                tenant_id: tenant_id.to_string(),
                amount: value,
                currency: payment.currency.clone().unwrap_or_else(|| "BRL".to_string()),
                due_date,
                status,
            })
            .await;
        if let Err(e) = result {
            warn!("Could not mirror invoice {}: {e}", payment.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::repository::MockInvoicesRepository;
    use crate::common::clock::SystemClock;
    use crate::gateway::MockPaymentGateway;
    use crate::tenants::repository::MockTenantsRepository;
    use pretty_assertions::assert_eq;

    fn tenant() -> crate::tenants::model::Tenant {
        crate::tenants::model::Tenant {
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

    struct Setup {
        gateway: MockPaymentGateway,
        tenants: MockTenantsRepository,
        invoices: MockInvoicesRepository,
        counters: Arc<SystemCounters>,
        bus: Arc<EventBus>,
    }

    impl Setup {
        fn new() -> Self {
            let counters = Arc::new(SystemCounters::new());
            let bus = Arc::new(EventBus::new(
                16,
                24,
                2,
                Arc::new(SystemClock),
                counters.clone(),
            ));
            Self {
                gateway: MockPaymentGateway::new(),
                tenants: MockTenantsRepository::new(),
                invoices: MockInvoicesRepository::new(),
                counters,
                bus,
            }
        }

        fn build(self) -> (WebhookIngestor, Arc<EventBus>, Arc<SystemCounters>) {
            let bus = self.bus.clone();
            let counters = self.counters.clone();
            (
                WebhookIngestor::new(
                    Arc::new(self.gateway),
                    Arc::new(self.tenants),
                    Arc::new(self.invoices),
                    self.bus,
                    self.counters,
                    Arc::new(SystemClock),
                ),
                bus,
                counters,
            )
        }
    }

    const CONFIRMED_BODY: &[u8] = br#"{
        "event": "PAYMENT_CONFIRMED",
        "id": "evt_1",
        "payment": { "id": "pay_1", "subscription": "sub_1", "value": 149.90, "dueDate": "2025-07-01" }
    }"#;

    #[tokio::test]
    async fn test_confirmed_payment_is_published() {
        let mut setup = Setup::new();
        setup
            .gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| true);
        setup
            .tenants
            .expect_find_by_subscription_ref()
            .returning(|_| Ok(Some(tenant())));
        setup.invoices.expect_upsert().times(1).returning(|_| Ok(()));
        let (ingestor, bus, _) = setup.build();

        let outcome = ingestor.ingest(CONFIRMED_BODY, Some("sig")).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Published(EventKind::PaymentConfirmed)
        );
        assert_eq!(bus.queued(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_is_dropped_with_counter() {
        let mut setup = Setup::new();
        setup
            .gateway
            .expect_verify_webhook_signature()
            .returning(|_, signature| signature != "deadbeef");
        let (ingestor, bus, counters) = setup.build();

        let body = br#"{"event":"PAYMENT_CONFIRMED","payment":{"id":"p1"}}"#;
        let outcome = ingestor.ingest(body, Some("deadbeef")).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::InvalidSignature);
        assert_eq!(bus.queued(), 0);
        assert_eq!(counters.snapshot().webhook_invalid_signature, 1);
    }

    #[tokio::test]
    async fn test_overdue_webhook_is_ignored() {
        let mut setup = Setup::new();
        setup
            .gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| true);
        setup
            .tenants
            .expect_find_by_subscription_ref()
            .returning(|_| Ok(Some(tenant())));
        let (ingestor, bus, _) = setup.build();

        let body = br#"{
            "event": "PAYMENT_OVERDUE",
            "payment": { "id": "pay_1", "subscription": "sub_1" }
        }"#;
        let outcome = ingestor.ingest(body, None).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        assert_eq!(bus.queued(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_deduplicated() {
        let mut setup = Setup::new();
        setup
            .gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| true);
        setup
            .tenants
            .expect_find_by_subscription_ref()
            .returning(|_| Ok(Some(tenant())));
        setup.invoices.expect_upsert().times(1).returning(|_| Ok(()));
        let (ingestor, bus, counters) = setup.build();

        let first = ingestor.ingest(CONFIRMED_BODY, None).await.unwrap();
        assert_eq!(first, WebhookOutcome::Published(EventKind::PaymentConfirmed));
        let second = ingestor.ingest(CONFIRMED_BODY, None).await.unwrap();
        assert_eq!(second, WebhookOutcome::Duplicate);
        assert_eq!(bus.queued(), 1);
        assert_eq!(counters.snapshot().webhook_duplicate, 1);
    }

    #[tokio::test]
    async fn test_event_id_is_synthesized_from_body_when_missing() {
        let mut setup = Setup::new();
        setup
            .gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| true);
        setup
            .tenants
            .expect_find_by_subscription_ref()
            .returning(|_| Ok(Some(tenant())));
        setup.invoices.expect_mark_status().returning(|_, _| Ok(()));
        let (ingestor, bus, _) = setup.build();

        let body = br#"{"event":"PAYMENT_CONFIRMED","payment":{"id":"pay_9","subscription":"sub_1"}}"#;
        assert_eq!(
            ingestor.ingest(body, None).await.unwrap(),
            WebhookOutcome::Published(EventKind::PaymentConfirmed)
        );
        // Byte-identical body, no explicit id: the synthesized hash catches
        // the replay.
        assert_eq!(
            ingestor.ingest(body, None).await.unwrap(),
            WebhookOutcome::Duplicate
        );
        assert_eq!(bus.queued(), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_is_logged_and_dropped() {
        let mut setup = Setup::new();
        setup
            .gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| true);
        setup
            .tenants
            .expect_find_by_subscription_ref()
            .returning(|_| Ok(Some(tenant())));
        let (ingestor, bus, counters) = setup.build();

        let body = br#"{
            "event": "PAYMENT_CREATED",
            "payment": { "id": "pay_1", "subscription": "sub_1" }
        }"#;
        let outcome = ingestor.ingest(body, None).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        assert_eq!(bus.queued(), 0);
        assert_eq!(counters.snapshot().webhook_ignored, 1);
    }

    #[tokio::test]
    async fn test_unparseable_body_is_an_error() {
        let setup = Setup::new();
        let (ingestor, _, _) = setup.build();
        assert!(ingestor.ingest(b"not json", None).await.is_err());
    }
}
