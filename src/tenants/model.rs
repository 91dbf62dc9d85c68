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
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The billing-linked lifecycle of a tenant. Stored as text in the tenants
/// row; every transition goes through the state machine's closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Provisioning,
    Active,
    WarningSent,
    Suspended,
    FinalWarningSent,
    ScheduledForDeletion,
    Deleted,
    ProvisioningFailed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Active => "active",
            LifecycleState::WarningSent => "warning_sent",
            LifecycleState::Suspended => "suspended",
            LifecycleState::FinalWarningSent => "final_warning_sent",
            LifecycleState::ScheduledForDeletion => "scheduled_for_deletion",
            LifecycleState::Deleted => "deleted",
            LifecycleState::ProvisioningFailed => "provisioning_failed",
        }
    }

    /// States the dunning scheduler scans on every tick.
    pub fn in_dunning(&self) -> bool {
        matches!(
            self,
            LifecycleState::Active
                | LifecycleState::WarningSent
                | LifecycleState::Suspended
                | LifecycleState::FinalWarningSent
        )
    }

    /// States a confirmed payment recovers from.
    pub fn reactivatable(&self) -> bool {
        matches!(
            self,
            LifecycleState::WarningSent
                | LifecycleState::Suspended
                | LifecycleState::FinalWarningSent
                | LifecycleState::ScheduledForDeletion
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(LifecycleState::Provisioning),
            "active" => Ok(LifecycleState::Active),
            "warning_sent" => Ok(LifecycleState::WarningSent),
            "suspended" => Ok(LifecycleState::Suspended),
            "final_warning_sent" => Ok(LifecycleState::FinalWarningSent),
            "scheduled_for_deletion" => Ok(LifecycleState::ScheduledForDeletion),
            "deleted" => Ok(LifecycleState::Deleted),
            "provisioning_failed" => Ok(LifecycleState::ProvisioningFailed),
            other => Err(format!("Unknown lifecycle state: '{other}'")),
        }
    }
}

/// Checkpoints of the provisioning workflow. Stored on the tenant row so a
/// resumed workflow skips everything already completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i16)]
pub enum ProvisionStep {
    Pending = 0,
    CredentialsStored = 1,
    NamespaceReady = 2,
    DatabaseReady = 3,
    WordPressReady = 4,
    IngressReady = 5,
    CoreInstalled = 6,
    PluginsInstalled = 7,
    HooksApplied = 8,
    BackupCronScheduled = 9,
    Completed = 10,
}

impl ProvisionStep {
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }
}

impl From<i16> for ProvisionStep {
    fn from(value: i16) -> Self {
        match value {
            1 => ProvisionStep::CredentialsStored,
            2 => ProvisionStep::NamespaceReady,
            3 => ProvisionStep::DatabaseReady,
            4 => ProvisionStep::WordPressReady,
            5 => ProvisionStep::IngressReady,
            6 => ProvisionStep::CoreInstalled,
            7 => ProvisionStep::PluginsInstalled,
            8 => ProvisionStep::HooksApplied,
            9 => ProvisionStep::BackupCronScheduled,
            10 => ProvisionStep::Completed,
            _ => ProvisionStep::Pending,
        }
    }
}

/// Generated once at provisioning, write-once afterwards. Never logged; the
/// `Debug` representation is redacted.
#[derive(Clone, Serialize, Deserialize)]
pub struct SiteCredentials {
    pub admin_user: String,
    pub admin_password: String,
    pub admin_email: String,
    pub db_user: String,
    pub db_password: String,
    pub db_root_password: String,
    pub db_name: String,
    pub cache_password: String,
}

impl fmt::Debug for SiteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteCredentials")
            .field("admin_user", &self.admin_user)
            .field("admin_email", &self.admin_email)
            .field("db_user", &self.db_user)
            .field("db_name", &self.db_name)
            .field("admin_password", &"<redacted>")
            .field("db_password", &"<redacted>")
            .field("db_root_password", &"<redacted>")
            .field("cache_password", &"<redacted>")
            .finish()
    }
}

/// The primary aggregate: one paying customer's isolated WordPress instance
/// and its lifecycle record.
#[derive(Clone, sqlx::FromRow)]
pub struct Tenant {
    pub id: String,
    pub business_name: String,
    pub domain: String,
    pub industry: String,
    pub plan: String,
    pub owner_id: String,
    pub contact_email: String,
    pub whatsapp_contact: Option<String>,
    pub state: String,
    pub state_since: DateTime<Utc>,
    pub grace_anchor: Option<DateTime<Utc>>,
    pub deletion_due_at: Option<DateTime<Utc>>,
    pub subscription_ref: Option<String>,
    pub customer_ref: Option<String>,
    pub credentials_blob: Option<serde_json::Value>,
    pub credentials_revealed: bool,
    pub provision_step: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn lifecycle_state(&self) -> Result<LifecycleState, String> {
        self.state.parse()
    }

    pub fn provision_step(&self) -> ProvisionStep {
        ProvisionStep::from(self.provision_step)
    }

    pub fn credentials(&self) -> Option<SiteCredentials> {
        self.credentials_blob
            .as_ref()
            .and_then(|blob| serde_json::from_value(blob.clone()).ok())
    }
}

// Manual Debug: the credentials blob must never leak through error context
// or tracing output.
impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("id", &self.id)
            .field("business_name", &self.business_name)
            .field("domain", &self.domain)
            .field("industry", &self.industry)
            .field("plan", &self.plan)
            .field("owner_id", &self.owner_id)
            .field("state", &self.state)
            .field("state_since", &self.state_since)
            .field("grace_anchor", &self.grace_anchor)
            .field("deletion_due_at", &self.deletion_due_at)
            .field("subscription_ref", &self.subscription_ref)
            .field("provision_step", &self.provision_step)
            .field(
                "credentials_blob",
                &self.credentials_blob.as_ref().map(|_| "<redacted>"),
            )
            .finish_non_exhaustive()
    }
}

/// Append-only audit row of a lifecycle transition.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LifecycleEventRow {
    pub seq: i64,
    pub tenant_id: String,
    pub from_state: String,
    pub to_state: String,
    pub reason: String,
    pub cause: String,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lifecycle_state_string_round_trip() {
        for state in [
            LifecycleState::Provisioning,
            LifecycleState::Active,
            LifecycleState::WarningSent,
            LifecycleState::Suspended,
            LifecycleState::FinalWarningSent,
            LifecycleState::ScheduledForDeletion,
            LifecycleState::Deleted,
            LifecycleState::ProvisioningFailed,
        ] {
            assert_eq!(LifecycleState::from_str(state.as_str()).unwrap(), state);
        }
        assert!(LifecycleState::from_str("limbo").is_err());
    }

    #[test]
    fn test_dunning_and_reactivatable_sets() {
        assert!(LifecycleState::Active.in_dunning());
        assert!(LifecycleState::FinalWarningSent.in_dunning());
        assert!(!LifecycleState::ScheduledForDeletion.in_dunning());
        assert!(LifecycleState::ScheduledForDeletion.reactivatable());
        assert!(!LifecycleState::Active.reactivatable());
        assert!(!LifecycleState::Deleted.reactivatable());
    }

    #[test]
    fn test_provision_step_round_trip() {
        assert_eq!(ProvisionStep::from(4_i16), ProvisionStep::WordPressReady);
        assert_eq!(ProvisionStep::from(99_i16), ProvisionStep::Pending);
        assert_eq!(ProvisionStep::Completed.as_i16(), 10);
        assert!(ProvisionStep::Pending < ProvisionStep::CredentialsStored);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = SiteCredentials {
            admin_user: "admin".into(),
            admin_password: "p4ss!word".into(),
            admin_email: "admin@rosa.ex.com".into(),
            db_user: "wp_padariarosa_a1b2c3".into(),
            db_password: "db-secret".into(),
            db_root_password: "root-secret".into(),
            db_name: "wordpress_padariarosa_a1b2c3".into(),
            cache_password: "cache-secret".into(),
        };
        let rendered = format!("{credentials:?}");
        for secret in ["p4ss!word", "db-secret", "root-secret", "cache-secret"] {
            assert!(!rendered.contains(secret));
        }
    }
}
