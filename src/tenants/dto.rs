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

use crate::common::error::FormErrorResponse;
use crate::common::types::Email;
use crate::common::types::value_object::{ValueObject, ValueObjectable};
use crate::tenants::model::{LifecycleState, SiteCredentials, Tenant};
use crate::tenants::types::{BusinessName, DomainName, Industry, PlanTier};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Wire shape of the provision request, before validation.
#[derive(Debug, Deserialize)]
pub struct ProvisionRequestHelper {
    pub business_name: String,
    pub domain: String,
    pub industry: String,
    pub plan_tier: String,
    pub owner_user_id: String,
    pub contact_email: Option<String>,
    pub whatsapp_contact: Option<String>,
    pub template_id: Option<String>,
    pub field_overrides: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Default)]
pub struct ProvisionRequestError {
    pub business_name: Option<String>,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub plan_tier: Option<String>,
    pub owner_user_id: Option<String>,
    pub contact_email: Option<String>,
}

impl ProvisionRequestError {
    pub fn is_empty(&self) -> bool {
        self.business_name.is_none()
            && self.domain.is_none()
            && self.industry.is_none()
            && self.plan_tier.is_none()
            && self.owner_user_id.is_none()
            && self.contact_email.is_none()
    }
}

impl Display for ProvisionRequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "ProvisionRequestError: {}", json),
            Err(e) => write!(f, "ProvisionRequestError: {}", e),
        }
    }
}

impl FormErrorResponse for ProvisionRequestError {}

impl IntoResponse for ProvisionRequestError {
    fn into_response(self) -> Response {
        self.get_error_response()
    }
}

/// Validated provision request.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub business_name: ValueObject<BusinessName>,
    pub domain: ValueObject<DomainName>,
    pub industry: ValueObject<Industry>,
    pub plan_tier: ValueObject<PlanTier>,
    pub owner_user_id: String,
    pub contact_email: Option<Email>,
    pub whatsapp_contact: Option<String>,
    pub template_id: Option<String>,
    pub field_overrides: Option<serde_json::Value>,
}

impl ProvisionRequest {
    /// The notification address: the explicit contact or the site admin
    /// mailbox derived from the domain.
    pub fn contact_email(&self) -> String {
        match &self.contact_email {
            Some(email) => email.as_str().to_string(),
            None => format!("admin@{}", self.domain.extract().get_value()),
        }
    }
}

impl TryFrom<ProvisionRequestHelper> for ProvisionRequest {
    type Error = ProvisionRequestError;

    fn try_from(value: ProvisionRequestHelper) -> Result<Self, Self::Error> {
        let mut error = ProvisionRequestError::default();

        let business_name = ValueObject::new(BusinessName(value.business_name))
            .inspect_err(|e| error.business_name = Some(e.to_string()));
        let domain = ValueObject::new(DomainName(value.domain.to_lowercase()))
            .inspect_err(|e| error.domain = Some(e.to_string()));
        let industry = ValueObject::new(Industry(value.industry.to_lowercase()))
            .inspect_err(|e| error.industry = Some(e.to_string()));
        let plan_tier = ValueObject::new(PlanTier(value.plan_tier))
            .inspect_err(|e| error.plan_tier = Some(e.to_string()));

        if value.owner_user_id.trim().is_empty() {
            error.owner_user_id = Some(String::from("Owner user id must not be empty"));
        }

        let contact_email = match value.contact_email {
            None => None,
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => match raw.parse::<Email>() {
                Ok(email) => Some(email),
                Err(e) => {
                    error.contact_email = Some(e);
                    None
                }
            },
        };

        if error.is_empty() {
            Ok(ProvisionRequest {
                business_name: business_name.map_err(|_| ProvisionRequestError::default())?,
                domain: domain.map_err(|_| ProvisionRequestError::default())?,
                industry: industry.map_err(|_| ProvisionRequestError::default())?,
                plan_tier: plan_tier.map_err(|_| ProvisionRequestError::default())?,
                owner_user_id: value.owner_user_id,
                contact_email,
                whatsapp_contact: value.whatsapp_contact,
                template_id: value.template_id,
                field_overrides: value.field_overrides,
            })
        } else {
            Err(error)
        }
    }
}

/// Tenant view returned by the admin API. Never carries credentials.
#[derive(Debug, Serialize)]
pub struct PublicTenant {
    pub id: String,
    pub business_name: String,
    pub domain: String,
    pub industry: String,
    pub plan: String,
    pub owner_id: String,
    pub state: String,
    pub state_since: DateTime<Utc>,
    pub grace_anchor: Option<DateTime<Utc>>,
    pub deletion_due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Tenant> for PublicTenant {
    fn from(tenant: Tenant) -> Self {
        Self {
            id: tenant.id,
            business_name: tenant.business_name,
            domain: tenant.domain,
            industry: tenant.industry,
            plan: tenant.plan,
            owner_id: tenant.owner_id,
            state: tenant.state,
            state_since: tenant.state_since,
            grace_anchor: tenant.grace_anchor,
            deletion_due_at: tenant.deletion_due_at,
            created_at: tenant.created_at,
        }
    }
}

/// Response of a successful provision call. `credentials` is present exactly
/// once, on the call that completed the workflow; it is not recoverable
/// afterwards.
#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub tenant: PublicTenant,
    pub credentials: Option<SiteCredentials>,
}

/// Dunning dashboard projection.
#[derive(Debug, Serialize)]
pub struct DunningDashboard {
    pub provisioning: i64,
    pub active: i64,
    pub warning_sent: i64,
    pub suspended: i64,
    pub final_warning_sent: i64,
    pub scheduled_for_deletion: i64,
    pub deleted: i64,
    pub provisioning_failed: i64,
    pub delinquent_tenants: Vec<PublicTenant>,
}

impl DunningDashboard {
    pub fn from_counts(counts: &[(String, i64)], delinquent: Vec<PublicTenant>) -> Self {
        let count_for = |state: LifecycleState| {
            counts
                .iter()
                .find(|(name, _)| name == state.as_str())
                .map(|(_, count)| *count)
                .unwrap_or(0)
        };
        Self {
            provisioning: count_for(LifecycleState::Provisioning),
            active: count_for(LifecycleState::Active),
            warning_sent: count_for(LifecycleState::WarningSent),
            suspended: count_for(LifecycleState::Suspended),
            final_warning_sent: count_for(LifecycleState::FinalWarningSent),
            scheduled_for_deletion: count_for(LifecycleState::ScheduledForDeletion),
            deleted: count_for(LifecycleState::Deleted),
            provisioning_failed: count_for(LifecycleState::ProvisioningFailed),
            delinquent_tenants: delinquent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn helper() -> ProvisionRequestHelper {
        ProvisionRequestHelper {
            business_name: "Padaria Rosa".to_string(),
            domain: "rosa.ex.com".to_string(),
            industry: "restaurant".to_string(),
            plan_tier: "professional".to_string(),
            owner_user_id: "u42".to_string(),
            contact_email: None,
            whatsapp_contact: None,
            template_id: None,
            field_overrides: None,
        }
    }

    #[test]
    fn test_valid_request_converts() {
        let request = ProvisionRequest::try_from(helper()).unwrap();
        assert_eq!(request.domain.extract().get_value(), "rosa.ex.com");
        assert_eq!(request.contact_email(), "admin@rosa.ex.com");
    }

    #[test]
    fn test_explicit_contact_email_wins() {
        let mut raw = helper();
        raw.contact_email = Some("owner@rosa.ex.com".to_string());
        let request = ProvisionRequest::try_from(raw).unwrap();
        assert_eq!(request.contact_email(), "owner@rosa.ex.com");
    }

    #[test]
    fn test_field_errors_are_collected() {
        let mut raw = helper();
        raw.plan_tier = "platinum".to_string();
        raw.owner_user_id = "  ".to_string();
        let error = ProvisionRequest::try_from(raw).unwrap_err();
        assert!(error.plan_tier.is_some());
        assert!(error.owner_user_id.is_some());
        assert!(error.business_name.is_none());
    }
}
