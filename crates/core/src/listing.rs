//! Listing parameters.
//!
//! Sort keys are an allow-list: each logical key maps to one fixed physical
//! column, so nothing the caller sends is ever interpolated into SQL.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AdminError;

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Id,
    Name,
    CreatedAt,
}

impl SortKey {
    pub fn column(self) -> &'static str {
        match self {
            SortKey::Id => "id",
            SortKey::Name => "name",
            SortKey::CreatedAt => "created_at",
        }
    }
}

impl FromStr for SortKey {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortKey::Id),
            "name" => Ok(SortKey::Name),
            "created_at" => Ok(SortKey::CreatedAt),
            _ => Err(AdminError::invalid_input("sort must be one of: id, name, created_at")),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(AdminError::invalid_input("order must be asc or desc")),
        }
    }
}

/// A validated page request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub sort: SortKey,
    pub order: SortOrder,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            sort: SortKey::default(),
            order: SortOrder::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl ListQuery {
    /// Build from raw query-string values; the limit is clamped to `1..=MAX_LIMIT`.
    pub fn parse(
        sort: Option<&str>,
        order: Option<&str>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Self, AdminError> {
        Ok(Self {
            sort: sort.map(str::parse).transpose()?.unwrap_or_default(),
            order: order.map(str::parse).transpose()?.unwrap_or_default(),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: offset.unwrap_or(0),
        })
    }
}
