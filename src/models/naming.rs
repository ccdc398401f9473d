// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Application naming: the 4-tuple identifying an application process (or a
//! DIF) inside a RINA network.
//!
//! Equality and hashing are structural over all four fields; the total order
//! is lexicographic over the tuple, which matches ordering by the
//! concatenated rendering used in RIB object names.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ControlError, ControlResult};

/// The naming information of an application process.
///
/// An all-empty name is the wire encoding for "unspecified"; a usable name
/// has at least one non-empty field. DIF names are `ApplicationName`s whose
/// `process_name` carries the DIF name and whose other fields are empty.
#[derive(
    Debug,
    Default,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub struct ApplicationName {
    #[serde(default, rename = "ProcessName")]
    pub process_name: String,
    #[serde(default, rename = "ProcessInstance")]
    pub process_instance: String,
    #[serde(default, rename = "EntityName")]
    pub entity_name: String,
    #[serde(default, rename = "EntityInstance")]
    pub entity_instance: String,
}

impl ApplicationName {
    /// Build a usable application name. The constructor enforces what the
    /// wire decoder cannot: the process-name field must be set. Decoded
    /// "unspecified" tuples are built field-wise instead.
    pub fn new(
        process_name: impl Into<String>,
        process_instance: impl Into<String>,
        entity_name: impl Into<String>,
        entity_instance: impl Into<String>,
    ) -> ControlResult<Self> {
        let name = Self {
            process_name: process_name.into(),
            process_instance: process_instance.into(),
            entity_name: entity_name.into(),
            entity_instance: entity_instance.into(),
        };
        name.validate()?;
        Ok(name)
    }

    /// A DIF name: only the process-name field is used.
    pub fn dif(name: impl Into<String>) -> Self {
        Self {
            process_name: name.into(),
            ..Default::default()
        }
    }

    /// True when every field is empty (the wire "unspecified" tuple).
    pub fn is_unspecified(&self) -> bool {
        self.process_name.is_empty()
            && self.process_instance.is_empty()
            && self.entity_name.is_empty()
            && self.entity_instance.is_empty()
    }

    /// Validates the name for use as an application name. `process_name` may
    /// be empty only for DIF names, and at least one field must be set.
    pub fn validate(&self) -> ControlResult<()> {
        if self.is_unspecified() {
            return Err(ControlError::MalformedMessage(
                "application name has no non-empty field".into(),
            ));
        }
        if self.process_name.is_empty() {
            return Err(ControlError::MalformedMessage(
                "application name is missing the process-name field".into(),
            ));
        }
        Ok(())
    }

    /// Single-string rendering used in RIB object names and logs.
    pub fn encoded(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.process_name,
            self.process_instance,
            self.entity_name,
            self.entity_instance
        )
    }
}

impl fmt::Display for ApplicationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded())
    }
}
