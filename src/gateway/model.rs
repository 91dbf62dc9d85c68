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
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Mirror of a gateway invoice ("payment" in the gateway's own vocabulary).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayInvoice {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    pub value: BigDecimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(rename = "dueDate")]
    pub due_date: NaiveDate,
    pub status: String,
    #[serde(default, rename = "externalReference")]
    pub external_reference: Option<String>,
}

fn default_currency() -> String {
    "BRL".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerRequest {
    pub name: String,
    pub email: String,
    #[serde(rename = "externalReference")]
    pub external_reference: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest {
    pub customer: String,
    pub value: BigDecimal,
    pub cycle: String,
    pub description: String,
    #[serde(rename = "externalReference")]
    pub external_reference: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<BigDecimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn test_invoice_deserializes_gateway_payload() {
        let invoice: GatewayInvoice = serde_json::from_str(
            r#"{
                "id": "pay_000001",
                "subscription": "sub_000001",
                "customer": "cus_000001",
                "value": 150,
                "dueDate": "2025-07-01",
                "status": "OVERDUE",
                "externalReference": "padariarosa_a1b2c3"
            }"#,
        )
        .unwrap();
        assert_eq!(invoice.id, "pay_000001");
        assert_eq!(invoice.currency, "BRL");
        assert_eq!(invoice.due_date, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert_eq!(invoice.value, BigDecimal::from_str("150").unwrap());
        assert_eq!(
            invoice.external_reference.as_deref(),
            Some("padariarosa_a1b2c3")
        );
    }
}
