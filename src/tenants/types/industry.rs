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

/// Free-form industry key. Not a closed set: unknown industries simply get
/// no industry-specific plugins.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct Industry(pub String);

impl ValueObjectable for Industry {
    type DataType = String;

    fn validate(&self) -> Result<(), String> {
        let pattern = Regex::new(r"^[a-z0-9_]{1,40}$").map_err(|e| e.to_string())?;
        if pattern.is_match(&self.0) {
            Ok(())
        } else {
            Err(String::from(
                "Industry must be 1-40 lowercase characters, digits or underscores",
            ))
        }
    }

    fn get_value(&self) -> &Self::DataType {
        &self.0
    }
}

impl Display for Industry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ValueObject<Industry> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ValueObject::new(Industry(s.to_lowercase())).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_industry() {
        let industry: ValueObject<Industry> = serde_json::from_str(r#""restaurant""#).unwrap();
        assert_eq!(industry.extract().get_value(), "restaurant");
    }

    #[test]
    fn test_industry_is_lowercased() {
        let industry: ValueObject<Industry> = serde_json::from_str(r#""Restaurant""#).unwrap();
        assert_eq!(industry.extract().get_value(), "restaurant");
    }

    #[test]
    fn test_industry_with_spaces_is_rejected() {
        let industry: Result<ValueObject<Industry>, _> =
            serde_json::from_str(r#""real estate""#);
        assert!(industry.is_err());
    }
}
