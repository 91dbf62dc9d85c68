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
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Daily,
    Weekly,
    Monthly,
    Final,
}

impl BackupKind {
    pub const ALL: [BackupKind; 4] = [
        BackupKind::Daily,
        BackupKind::Weekly,
        BackupKind::Monthly,
        BackupKind::Final,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Daily => "daily",
            BackupKind::Weekly => "weekly",
            BackupKind::Monthly => "monthly",
            BackupKind::Final => "final",
        }
    }

    /// Object-store expiration in days. `None` means the store never
    /// lifecycles the object out; only an explicit admin delete removes it.
    pub fn retention_days(&self) -> Option<i32> {
        match self {
            BackupKind::Daily => Some(30),
            BackupKind::Weekly => Some(8 * 7),
            BackupKind::Monthly => Some(12 * 30),
            BackupKind::Final => None,
        }
    }

    /// How many records per tenant are kept in the catalog before the oldest
    /// surplus ones are pruned after a successful backup.
    pub fn retained_count(&self) -> usize {
        match self {
            BackupKind::Daily => 30,
            BackupKind::Weekly => 8,
            BackupKind::Monthly => 12,
            BackupKind::Final => usize::MAX,
        }
    }

    pub fn retention_class(&self) -> String {
        match self.retention_days() {
            Some(days) => format!("{days}-days"),
            None => "until-admin-delete".to_string(),
        }
    }
}

impl Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(BackupKind::Daily),
            "weekly" => Ok(BackupKind::Weekly),
            "monthly" => Ok(BackupKind::Monthly),
            "final" => Ok(BackupKind::Final),
            other => Err(format!("Unknown backup kind: '{other}'")),
        }
    }
}

/// `<tenantID>_<kind>_<YYYYmmddHHMMSS>` — doubles as the archive file stem.
pub fn backup_id(tenant_id: &str, kind: BackupKind, at: DateTime<Utc>) -> String {
    format!("{tenant_id}_{kind}_{}", at.format("%Y%m%d%H%M%S"))
}

/// `<kind>/<tenantID>/<backup_id>.tar.gz` — the bit-exact store layout.
pub fn object_key(tenant_id: &str, kind: BackupKind, backup_id: &str) -> String {
    format!("{kind}/{tenant_id}/{backup_id}.tar.gz")
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BackupRecord {
    pub id: String,
    pub tenant_id: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub checksum: String,
    pub object_key: String,
    pub retention_class: String,
}

#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    pub id: String,
    pub tenant_id: String,
    pub kind: BackupKind,
    pub size_bytes: i64,
    pub checksum: String,
    pub object_key: String,
}

/// Which parts of the site the archive contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupContents {
    pub database: bool,
    pub files: bool,
    pub include_uploads: bool,
    pub include_plugins: bool,
    pub include_themes: bool,
}

/// The `metadata.json` entry stored inside every archive. Field names are a
/// stable contract with the restore path and external tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_id: String,
    pub tenant_id: String,
    pub timestamp: String,
    pub wordpress_version: String,
    pub php_version: String,
    pub mysql_version: String,
    pub backup_contents: BackupContents,
    pub retention_policy: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_object_key_layout_is_bit_exact() {
        let at = Utc.with_ymd_and_hms(2025, 7, 1, 2, 3, 4).unwrap();
        let id = backup_id("padariarosa_a1b2c3", BackupKind::Final, at);
        assert_eq!(id, "padariarosa_a1b2c3_final_20250701020304");
        assert_eq!(
            object_key("padariarosa_a1b2c3", BackupKind::Final, &id),
            "final/padariarosa_a1b2c3/padariarosa_a1b2c3_final_20250701020304.tar.gz"
        );
    }

    #[test]
    fn test_retention_policy_per_kind() {
        assert_eq!(BackupKind::Daily.retention_days(), Some(30));
        assert_eq!(BackupKind::Weekly.retention_days(), Some(56));
        assert_eq!(BackupKind::Monthly.retention_days(), Some(360));
        assert_eq!(BackupKind::Final.retention_days(), None);
        assert_eq!(BackupKind::Final.retention_class(), "until-admin-delete");
    }

    #[test]
    fn test_kind_round_trips_through_strings() {
        for kind in BackupKind::ALL {
            assert_eq!(BackupKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(BackupKind::from_str("hourly").is_err());
    }

    #[test]
    fn test_metadata_serializes_contract_fields() {
        let metadata = BackupMetadata {
            backup_id: "t_daily_20250701020304".into(),
            tenant_id: "t".into(),
            timestamp: "2025-07-01T02:03:04+00:00".into(),
            wordpress_version: "6.5.2".into(),
            php_version: "8.2".into(),
            mysql_version: "8.0".into(),
            backup_contents: BackupContents {
                database: true,
                files: true,
                include_uploads: true,
                include_plugins: true,
                include_themes: false,
            },
            retention_policy: "30-days".into(),
        };
        let value = serde_json::to_value(&metadata).unwrap();
        for field in [
            "backup_id",
            "tenant_id",
            "timestamp",
            "wordpress_version",
            "php_version",
            "mysql_version",
            "backup_contents",
            "retention_policy",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
    }
}
