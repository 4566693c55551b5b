use serde::{Deserialize, Serialize};

use stratum_auth::Identity;
use stratum_core::{AdminError, Entity, ListQuery, NodeKind, PrincipalId, Role, SubordinateKind};
use stratum_infra::{CreateSubordinate, ReplaceHead};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubordinateRequest {
    pub kind: SubordinateKind,
    pub node_name: Option<String>,
    pub head_name: String,
    pub head_email: String,
}

impl From<CreateSubordinateRequest> for CreateSubordinate {
    fn from(req: CreateSubordinateRequest) -> Self {
        CreateSubordinate {
            kind: req.kind,
            node_name: req.node_name,
            head_name: req.head_name,
            head_email: req.head_email,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplaceHeadRequest {
    pub old_head_email: String,
    pub new_head_name: String,
    pub new_head_email: String,
}

impl From<ReplaceHeadRequest> for ReplaceHead {
    fn from(req: ReplaceHeadRequest) -> Self {
        ReplaceHead {
            old_head_email: req.old_head_email,
            new_head_name: req.new_head_name,
            new_head_email: req.new_head_email,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordUnitRequest {
    pub serial: String,
    pub note: Option<String>,
}

/// `?sort=&order=&limit=&offset=`
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListParams {
    pub fn to_query(&self) -> Result<ListQuery, AdminError> {
        ListQuery::parse(self.sort.as_deref(), self.order.as_deref(), self.limit, self.offset)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub principal_id: PrincipalId,
    pub email: String,
    pub role: Role,
}

impl From<Identity> for WhoAmI {
    fn from(identity: Identity) -> Self {
        WhoAmI {
            principal_id: identity.principal_id,
            email: identity.email,
            role: identity.role,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Items<T> {
    pub items: Vec<T>,
}

// -------------------------
// Path parsing
// -------------------------

/// `branch`, `department`, `warehouse`, or any principal role name.
pub fn parse_entity(raw: &str) -> Result<Entity, axum::response::Response> {
    if let Ok(kind) = raw.parse::<NodeKind>() {
        return Ok(Entity::Node(kind));
    }
    raw.parse::<Role>()
        .map(Entity::Principal)
        .map_err(|_| errors::bad_request(format!("unknown kind '{raw}'")))
}

pub fn parse_node_kind(raw: &str) -> Result<NodeKind, axum::response::Response> {
    raw.parse::<NodeKind>()
        .map_err(|_| errors::bad_request("kind must be one of: branch, department, warehouse"))
}
