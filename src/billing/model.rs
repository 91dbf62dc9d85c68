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

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;

/// Local mirror of a gateway invoice. The gateway stays the source of truth
/// for billing history; this row only feeds dunning decisions and audit.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Invoice {
    pub id: String,
    pub tenant_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub due_date: DateTime<Utc>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub id: String,
    pub tenant_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub due_date: DateTime<Utc>,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Pending,
    Confirmed,
    Overdue,
    Refunded,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Confirmed => "confirmed",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Refunded => "refunded",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

impl Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "confirmed" => Ok(InvoiceStatus::Confirmed),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "refunded" => Ok(InvoiceStatus::Refunded),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(format!("Unknown invoice status: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_round_trip() {
        for status in [
            InvoiceStatus::Pending,
            InvoiceStatus::Confirmed,
            InvoiceStatus::Overdue,
            InvoiceStatus::Refunded,
            InvoiceStatus::Cancelled,
        ] {
            assert_eq!(InvoiceStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(InvoiceStatus::from_str("open").is_err());
    }
}
