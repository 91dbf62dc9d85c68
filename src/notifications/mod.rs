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

use crate::common::MailTransporter;
use crate::tenants::model::Tenant;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use lettre::message::{Mailbox, header::ContentType};
use lettre::{Message, address::AddressError};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Address error: {0}")]
    Address(String),

    #[error("Mail transport error: {0}")]
    Transport(String),
}

pub type NotificationResult<T> = Result<T, NotificationError>;

/// Context for the dunning notifications.
#[derive(Debug, Clone)]
pub struct OverdueNotice {
    pub invoice_id: String,
    pub amount: Option<BigDecimal>,
    pub days_overdue: i64,
    pub payment_link: String,
}

/// Side-channel notifications are fire-and-forget: a send failure is logged
/// by the caller and never reverts a lifecycle transition.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_reminder(
        &self,
        tenant: &Tenant,
        notice: &OverdueNotice,
    ) -> NotificationResult<()>;

    async fn site_suspended(
        &self,
        tenant: &Tenant,
        notice: &OverdueNotice,
    ) -> NotificationResult<()>;

    async fn final_warning(
        &self,
        tenant: &Tenant,
        notice: &OverdueNotice,
    ) -> NotificationResult<()>;

    async fn deletion_scheduled(
        &self,
        tenant: &Tenant,
        deletion_due_at: DateTime<Utc>,
    ) -> NotificationResult<()>;

    async fn site_reactivated(&self, tenant: &Tenant) -> NotificationResult<()>;
}

/// Optional out-of-band channel (instant messaging). Configured per tenant
/// through the `whatsapp_contact` column; absent contact means no send.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OutOfBandSender: Send + Sync {
    async fn send(&self, contact: &str, message: &str) -> NotificationResult<()>;
}

/// Stand-in used until a real messaging integration is configured.
pub struct LogOnlyOutOfBand;

#[async_trait]
impl OutOfBandSender for LogOnlyOutOfBand {
    async fn send(&self, contact: &str, message: &str) -> NotificationResult<()> {
        info!("[log-only] would send out-of-band message to {contact}: {message}");
        Ok(())
    }
}

/// Renders and sends the lifecycle e-mails through the shared SMTP
/// transport.
pub struct EmailNotifier {
    mailer: Arc<dyn MailTransporter>,
    out_of_band: Arc<dyn OutOfBandSender>,
}

impl EmailNotifier {
    pub fn new(mailer: Arc<dyn MailTransporter>, out_of_band: Arc<dyn OutOfBandSender>) -> Self {
        Self { mailer, out_of_band }
    }

    async fn send_html(
        &self,
        recipient: &str,
        subject: &str,
        template: &str,
        data: &serde_json::Value,
    ) -> NotificationResult<()> {
        let handlebars = Handlebars::new();
        let email = Message::builder()
            .from(Mailbox::new(
                Some(self.mailer.config().mail().default_from_name().to_owned()),
                self.mailer
                    .config()
                    .mail()
                    .default_from()
                    .parse()
                    .map_err(|e: AddressError| NotificationError::Address(e.to_string()))?,
            ))
            .to(Mailbox::new(
                None,
                recipient
                    .parse()
                    .map_err(|e: AddressError| NotificationError::Address(e.to_string()))?,
            ))
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(
                handlebars
                    .render_template(template, data)
                    .map_err(|e| NotificationError::Template(e.to_string()))?,
            )
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;
        Ok(())
    }

    fn notice_data(tenant: &Tenant, notice: &OverdueNotice) -> serde_json::Value {
        json!({
            "business_name": tenant.business_name,
            "domain": tenant.domain,
            "amount": notice.amount.as_ref().map(|a| a.to_string()),
            "days_overdue": notice.days_overdue,
            "payment_link": notice.payment_link,
        })
    }
}

const PAYMENT_REMINDER_TEMPLATE: &str = r##"
<p style="font-weight: bold; margin-bottom: 25px;">
    Dear {{business_name}},
</p>
<p>
    The invoice for <b>{{domain}}</b> is {{days_overdue}} days overdue.
    To keep your site online, please settle it here:<br>
    <a href="{{payment_link}}">{{payment_link}}</a>
</p>
"##;

const SITE_SUSPENDED_TEMPLATE: &str = r##"
<p style="font-weight: bold; margin-bottom: 25px;">
    Dear {{business_name}},
</p>
<p>
    Your site <b>{{domain}}</b> has been suspended because its invoice is
    {{days_overdue}} days overdue. It will be reactivated automatically after
    payment:<br>
    <a href="{{payment_link}}">{{payment_link}}</a>
</p>
"##;

const FINAL_WARNING_TEMPLATE: &str = r##"
<p style="font-weight: bold; margin-bottom: 25px;">
    Dear {{business_name}},
</p>
<p>
    <b>Final notice:</b> the site {{domain}} will be scheduled for deletion
    unless the open invoice is settled. This is the last reminder before the
    site and its data are removed:<br>
    <a href="{{payment_link}}">{{payment_link}}</a>
</p>
"##;

const DELETION_SCHEDULED_TEMPLATE: &str = r##"
<p style="font-weight: bold; margin-bottom: 25px;">
    Dear {{business_name}},
</p>
<p>
    The site {{domain}} is scheduled for deletion on {{deletion_due_at}}.
    A final backup has been stored and can be recovered by support until
    that date.
</p>
"##;

const REACTIVATED_TEMPLATE: &str = r##"
<p style="font-weight: bold; margin-bottom: 25px;">
    Dear {{business_name}},
</p>
<p>
    Payment received, thank you! Your site <b>{{domain}}</b> is online again.
</p>
"##;

#[async_trait]
impl Notifier for EmailNotifier {
    async fn payment_reminder(
        &self,
        tenant: &Tenant,
        notice: &OverdueNotice,
    ) -> NotificationResult<()> {
        self.send_html(
            &tenant.contact_email,
            &format!("Payment reminder - {}", tenant.domain),
            PAYMENT_REMINDER_TEMPLATE,
            &Self::notice_data(tenant, notice),
        )
        .await
    }

    async fn site_suspended(
        &self,
        tenant: &Tenant,
        notice: &OverdueNotice,
    ) -> NotificationResult<()> {
        self.send_html(
            &tenant.contact_email,
            &format!("Site suspended - {}", tenant.domain),
            SITE_SUSPENDED_TEMPLATE,
            &Self::notice_data(tenant, notice),
        )
        .await
    }

    async fn final_warning(
        &self,
        tenant: &Tenant,
        notice: &OverdueNotice,
    ) -> NotificationResult<()> {
        self.send_html(
            &tenant.contact_email,
            &format!("FINAL NOTICE - {} will be deleted", tenant.domain),
            FINAL_WARNING_TEMPLATE,
            &Self::notice_data(tenant, notice),
        )
        .await?;

        if let Some(contact) = &tenant.whatsapp_contact {
            self.out_of_band
                .send(
                    contact,
                    &format!(
                        "Final notice: {} will be deleted unless the open invoice is paid: {}",
                        tenant.domain, notice.payment_link
                    ),
                )
                .await?;
        }
        Ok(())
    }

    async fn deletion_scheduled(
        &self,
        tenant: &Tenant,
        deletion_due_at: DateTime<Utc>,
    ) -> NotificationResult<()> {
        self.send_html(
            &tenant.contact_email,
            &format!("Site scheduled for deletion - {}", tenant.domain),
            DELETION_SCHEDULED_TEMPLATE,
            &json!({
                "business_name": tenant.business_name,
                "domain": tenant.domain,
                "deletion_due_at": deletion_due_at.to_rfc3339(),
            }),
        )
        .await
    }

    async fn site_reactivated(&self, tenant: &Tenant) -> NotificationResult<()> {
        self.send_html(
            &tenant.contact_email,
            &format!("Site reactivated - {}", tenant.domain),
            REACTIVATED_TEMPLATE,
            &json!({
                "business_name": tenant.business_name,
                "domain": tenant.domain,
            }),
        )
        .await
    }
}
