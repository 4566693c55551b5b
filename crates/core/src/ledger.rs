//! Per-component units ledger identifiers.
//!
//! Every component owns a dedicated table holding its units. Table names are
//! derived from the component id and re-validated against a fixed character
//! set before they reach a DDL/DML statement.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AdminError;
use crate::id::PrincipalId;

const PREFIX: &str = "component_units_";
// Keeps the suffix within i64 and the whole name under the 63-byte identifier limit.
const MAX_SUFFIX_DIGITS: usize = 18;

/// Validated name of a component's units table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitsLedger(String);

impl UnitsLedger {
    pub fn for_component(component: PrincipalId) -> Self {
        Self(format!("{PREFIX}{}", component.get()))
    }

    /// Accept a stored name only if it has exactly the shape `for_component` produces.
    pub fn parse(raw: &str) -> Result<Self, AdminError> {
        let suffix = raw
            .strip_prefix(PREFIX)
            .ok_or_else(|| AdminError::invalid_input("units ledger name has the wrong prefix"))?;
        let well_formed = !suffix.is_empty()
            && suffix.len() <= MAX_SUFFIX_DIGITS
            && !suffix.starts_with('0')
            && suffix.bytes().all(|b| b.is_ascii_digit());
        if !well_formed {
            return Err(AdminError::invalid_input("units ledger name is not a valid identifier"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitsLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UnitsLedger {
    type Error = AdminError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UnitsLedger> for String {
    fn from(value: UnitsLedger) -> Self {
        value.0
    }
}
