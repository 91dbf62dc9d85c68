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

use serde::{Serialize, Serializer};
use std::fmt::Display;

/// A trait representing a container for value object data.
///
/// Implementors carry a single piece of validated domain data. `validate` is
/// invoked once on construction through [`ValueObject::new`]; afterwards the
/// wrapped value is guaranteed to satisfy its invariant.
pub trait ValueObjectable: Display {
    type DataType;

    /// Validates the contained data.
    ///
    /// # Returns
    /// - `Ok(())` if the data is valid.
    /// - `Err(String)` containing a human readable error message otherwise.
    fn validate(&self) -> Result<(), String>;

    /// Retrieves a reference to the contained data.
    fn get_value(&self) -> &Self::DataType;
}

/// A generic wrapper that enforces validation of its inner type on
/// construction. It is used to give type safety to domain concepts where
/// primitive types alone would not provide adequate constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueObject<DataType>(DataType);

impl<DataType> ValueObject<DataType>
where
    DataType: ValueObjectable,
{
    /// Creates a new `ValueObject` if the provided data passes validation.
    pub fn new(data: DataType) -> Result<ValueObject<DataType>, String> {
        data.validate()?;
        Ok(ValueObject(data))
    }
}

impl<DataType> ValueObject<DataType> {
    /// Retrieves a reference to the inner data.
    pub fn extract(&self) -> &DataType {
        &self.0
    }
}

impl<DataType> Display for ValueObject<DataType>
where
    DataType: Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<DataType> Serialize for ValueObject<DataType>
where
    DataType: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}
