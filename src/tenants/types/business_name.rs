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

use crate::common::types::value_object::{ValueObject, ValueObjectable};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct BusinessName(pub String);

impl ValueObjectable for BusinessName {
    type DataType = String;

    fn validate(&self) -> Result<(), String> {
        let trimmed = self.0.trim();
        if trimmed.is_empty() {
            return Err(String::from("Business name must not be empty"));
        }
        if trimmed.len() > 120 {
            return Err(String::from("Business name must not exceed 120 characters"));
        }
        Ok(())
    }

    fn get_value(&self) -> &Self::DataType {
        &self.0
    }
}

impl Display for BusinessName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ValueObject<BusinessName> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ValueObject::new(BusinessName(s)).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_business_name() {
        let name: ValueObject<BusinessName> = serde_json::from_str(r#""Padaria Rosa""#).unwrap();
        assert_eq!(name.extract().get_value(), "Padaria Rosa");
    }

    #[test]
    fn test_empty_business_name_is_rejected() {
        let name: Result<ValueObject<BusinessName>, _> = serde_json::from_str(r#""   ""#);
        assert!(name.is_err());
    }

    #[test]
    fn test_overlong_business_name_is_rejected() {
        let long = format!("\"{}\"", "x".repeat(121));
        let name: Result<ValueObject<BusinessName>, _> = serde_json::from_str(&long);
        assert!(name.is_err());
    }
}
