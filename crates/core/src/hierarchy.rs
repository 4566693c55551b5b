//! The organisational hierarchy, declared once.
//!
//! ```text
//! Company ─ Organisation ─ SuperAdmin ─ Branch ┬ BranchHead
//!                                              ├ Department ┬ DepartmentHead
//!                                              │            └ Workspace
//!                                              └ Warehouse  ┬ WarehouseHead
//!                                                           └ Component ─ units
//! ```
//!
//! Principals (rows that can log in) have a [`Role`]; structural rows are
//! [`NodeKind`]s. Each non-root row carries exactly one foreign key to its
//! [`Parent`]. Table and column names returned here are the only identifiers
//! storage adapters may interpolate into SQL.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AdminError;

/// Principal role. One role-specific table per variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Company,
    Organisation,
    SuperAdmin,
    BranchHead,
    DepartmentHead,
    WarehouseHead,
    Workspace,
    Component,
}

/// Structural (non-principal) node kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Branch,
    Department,
    Warehouse,
}

/// What a row's supervisor column points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Parent {
    Role(Role),
    Node(NodeKind),
}

/// Any row of the hierarchy: either a principal table or a node table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    Principal(Role),
    Node(NodeKind),
}

/// Which column of the claimant's own row a target's parent column must
/// equal for the claimant to own the target.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// `target.parent = claimant.id`
    Principal,
    /// `target.parent = claimant.supervisor`
    Supervisor,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Company,
        Role::Organisation,
        Role::SuperAdmin,
        Role::BranchHead,
        Role::DepartmentHead,
        Role::WarehouseHead,
        Role::Workspace,
        Role::Component,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Company => "company",
            Role::Organisation => "organisation",
            Role::SuperAdmin => "super_admin",
            Role::BranchHead => "branch_head",
            Role::DepartmentHead => "department_head",
            Role::WarehouseHead => "warehouse_head",
            Role::Workspace => "workspace",
            Role::Component => "component",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Role::Company => "companies",
            Role::Organisation => "organisations",
            Role::SuperAdmin => "super_admins",
            Role::BranchHead => "branch_heads",
            Role::DepartmentHead => "department_heads",
            Role::WarehouseHead => "warehouse_heads",
            Role::Workspace => "workspaces",
            Role::Component => "components",
        }
    }

    /// Supervisor edge. `None` only for the root.
    pub fn supervisor(self) -> Option<Parent> {
        match self {
            Role::Company => None,
            Role::Organisation => Some(Parent::Role(Role::Company)),
            Role::SuperAdmin => Some(Parent::Role(Role::Organisation)),
            Role::BranchHead => Some(Parent::Node(NodeKind::Branch)),
            Role::DepartmentHead | Role::Workspace => Some(Parent::Node(NodeKind::Department)),
            Role::WarehouseHead | Role::Component => Some(Parent::Node(NodeKind::Warehouse)),
        }
    }

    pub fn supervisor_column(self) -> Option<&'static str> {
        self.supervisor().map(Parent::column)
    }

    /// The node this role heads, for roles that are replaced by succession.
    pub fn heads(self) -> Option<NodeKind> {
        NodeKind::ALL.into_iter().find(|k| k.head_role() == self)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AdminError::invalid_input(format!("unknown role '{s}'")))
    }
}

impl NodeKind {
    pub const ALL: [NodeKind; 3] = [NodeKind::Branch, NodeKind::Department, NodeKind::Warehouse];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Branch => "branch",
            NodeKind::Department => "department",
            NodeKind::Warehouse => "warehouse",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            NodeKind::Branch => "branches",
            NodeKind::Department => "departments",
            NodeKind::Warehouse => "warehouses",
        }
    }

    pub fn parent(self) -> Parent {
        match self {
            NodeKind::Branch => Parent::Role(Role::SuperAdmin),
            NodeKind::Department | NodeKind::Warehouse => Parent::Node(NodeKind::Branch),
        }
    }

    pub fn parent_column(self) -> &'static str {
        self.parent().column()
    }

    pub fn head_role(self) -> Role {
        match self {
            NodeKind::Branch => Role::BranchHead,
            NodeKind::Department => Role::DepartmentHead,
            NodeKind::Warehouse => Role::WarehouseHead,
        }
    }
}

impl core::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AdminError::invalid_input(format!("unknown node kind '{s}'")))
    }
}

impl Parent {
    /// Foreign-key column name used by rows pointing at this parent.
    pub fn column(self) -> &'static str {
        match self {
            Parent::Role(Role::Company) => "company_id",
            Parent::Role(Role::Organisation) => "organisation_id",
            Parent::Role(Role::SuperAdmin) => "super_admin_id",
            Parent::Node(NodeKind::Branch) => "branch_id",
            Parent::Node(NodeKind::Department) => "department_id",
            Parent::Node(NodeKind::Warehouse) => "warehouse_id",
            // No table references these roles as a supervisor.
            Parent::Role(_) => "supervisor_id",
        }
    }

    pub fn entity(self) -> Entity {
        match self {
            Parent::Role(r) => Entity::Principal(r),
            Parent::Node(k) => Entity::Node(k),
        }
    }
}

impl Entity {
    pub fn table(self) -> &'static str {
        match self {
            Entity::Principal(r) => r.table(),
            Entity::Node(k) => k.table(),
        }
    }

    pub fn parent(self) -> Option<Parent> {
        match self {
            Entity::Principal(r) => r.supervisor(),
            Entity::Node(k) => Some(k.parent()),
        }
    }

    pub fn parent_column(self) -> Option<&'static str> {
        self.parent().map(Parent::column)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Entity::Principal(r) => r.as_str(),
            Entity::Node(k) => k.as_str(),
        }
    }

    /// Entities whose parent edge points directly at this one.
    pub fn children(self) -> Vec<Entity> {
        let principals = Role::ALL
            .into_iter()
            .filter(|r| r.supervisor().map(Parent::entity) == Some(self))
            .map(Entity::Principal);
        let nodes = NodeKind::ALL
            .into_iter()
            .filter(|k| k.parent().entity() == self)
            .map(Entity::Node);
        principals.chain(nodes).collect()
    }

    /// Whether an owner may delete this entity outright.
    ///
    /// Heads are never removed directly, only replaced by succession.
    pub fn removable(self) -> bool {
        matches!(
            self,
            Entity::Node(_) | Entity::Principal(Role::Workspace) | Entity::Principal(Role::Component)
        )
    }

    /// How a principal of `claimant` role would own a row of this entity,
    /// if it can at all. Ownership is always a single hop.
    pub fn anchor_for(self, claimant: Role) -> Option<Anchor> {
        match self.parent()? {
            Parent::Role(r) if r == claimant => Some(Anchor::Principal),
            parent @ Parent::Node(_) if claimant.supervisor() == Some(parent) => Some(Anchor::Supervisor),
            _ => None,
        }
    }
}

impl core::fmt::Display for Entity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a create-subordinate operation provisions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubordinateKind {
    Organisation,
    SuperAdmin,
    Branch,
    Department,
    Warehouse,
    Workspace,
    Component,
}

impl SubordinateKind {
    pub const ALL: [SubordinateKind; 7] = [
        SubordinateKind::Organisation,
        SubordinateKind::SuperAdmin,
        SubordinateKind::Branch,
        SubordinateKind::Department,
        SubordinateKind::Warehouse,
        SubordinateKind::Workspace,
        SubordinateKind::Component,
    ];

    /// The only role allowed to create this kind.
    pub fn creator(self) -> Role {
        match self {
            SubordinateKind::Organisation => Role::Company,
            SubordinateKind::SuperAdmin => Role::Organisation,
            SubordinateKind::Branch => Role::SuperAdmin,
            SubordinateKind::Department | SubordinateKind::Warehouse => Role::BranchHead,
            SubordinateKind::Workspace => Role::DepartmentHead,
            SubordinateKind::Component => Role::WarehouseHead,
        }
    }

    /// Structural node inserted alongside the principal, if any.
    pub fn node(self) -> Option<NodeKind> {
        match self {
            SubordinateKind::Branch => Some(NodeKind::Branch),
            SubordinateKind::Department => Some(NodeKind::Department),
            SubordinateKind::Warehouse => Some(NodeKind::Warehouse),
            _ => None,
        }
    }

    /// Role of the principal provisioned by this operation.
    pub fn principal_role(self) -> Role {
        match self.node() {
            Some(node) => node.head_role(),
            None => match self {
                SubordinateKind::Organisation => Role::Organisation,
                SubordinateKind::SuperAdmin => Role::SuperAdmin,
                SubordinateKind::Workspace => Role::Workspace,
                _ => Role::Component,
            },
        }
    }

    /// The row the creator owns afterwards.
    pub fn entity(self) -> Entity {
        match self.node() {
            Some(node) => Entity::Node(node),
            None => Entity::Principal(self.principal_role()),
        }
    }

    pub fn provisions_ledger(self) -> bool {
        self == SubordinateKind::Component
    }

    pub fn as_str(self) -> &'static str {
        self.entity().as_str()
    }
}
