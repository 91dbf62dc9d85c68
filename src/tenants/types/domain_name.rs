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
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A fully qualified domain name. Unique across tenants; uniqueness is
/// enforced by the database, shape is enforced here.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct DomainName(pub String);

impl ValueObjectable for DomainName {
    type DataType = String;

    fn validate(&self) -> Result<(), String> {
        if self.0.len() > 253 {
            return Err(String::from("Domain name is too long"));
        }
        let pattern =
            Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)+$")
                .map_err(|e| e.to_string())?;
        if pattern.is_match(&self.0) {
            Ok(())
        } else {
            Err(String::from("Invalid domain name"))
        }
    }

    fn get_value(&self) -> &Self::DataType {
        &self.0
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ValueObject<DomainName> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ValueObject::new(DomainName(s.to_lowercase())).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_domain() {
        let domain: ValueObject<DomainName> = serde_json::from_str(r#""rosa.ex.com""#).unwrap();
        assert_eq!(domain.extract().get_value(), "rosa.ex.com");
    }

    #[test]
    fn test_domain_is_lowercased_on_parse() {
        let domain: ValueObject<DomainName> = serde_json::from_str(r#""Rosa.Ex.COM""#).unwrap();
        assert_eq!(domain.extract().get_value(), "rosa.ex.com");
    }

    #[test]
    fn test_bare_label_is_rejected() {
        let domain: Result<ValueObject<DomainName>, _> = serde_json::from_str(r#""localhost""#);
        assert!(domain.is_err());
    }

    #[test]
    fn test_invalid_characters_are_rejected() {
        let domain: Result<ValueObject<DomainName>, _> =
            serde_json::from_str(r#""rosa_.ex.com""#);
        assert!(domain.is_err());
    }
}
