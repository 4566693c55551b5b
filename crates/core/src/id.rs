//! Strongly-typed identifiers used across the domain.
//!
//! Every row in the relational store is keyed by a `BIGSERIAL`, so all
//! identifiers wrap an `i64`.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::AdminError;

/// Identifier of a principal row (within its role table).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(i64);

/// Identifier of a hierarchy node (branch, department, warehouse).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(i64);

/// Identifier of an append-only record (succession record, unit entry).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

macro_rules! impl_i64_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = AdminError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = i64::from_str(s)
                    .map_err(|_| AdminError::invalid_input(format!("{} must be an integer", $name)))?;
                if raw <= 0 {
                    return Err(AdminError::invalid_input(format!("{} must be positive", $name)));
                }
                Ok(Self(raw))
            }
        }
    };
}

impl_i64_newtype!(PrincipalId, "principal id");
impl_i64_newtype!(NodeId, "node id");
impl_i64_newtype!(RecordId, "record id");
