//! Identity mutations: the only way roles and overrides change

use crate::types::{
    NodeId, OverrideEffect, OverrideEntry, PrincipalRecord, RoleAssignment, RoleKey,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Permission required to change a principal's roles
pub const ASSIGN_ROLE_PERMISSION: &str = "user:assign_role";
/// Permission required to change a principal's overrides
pub const MANAGE_PERMISSIONS_PERMISSION: &str = "user:manage_permissions";
/// Permission required to delete a principal
pub const DELETE_PRINCIPAL_PERMISSION: &str = "user:delete";

/// A change to one principal's roles or overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityMutation {
    /// Add one role assignment
    AssignRole {
        role: RoleKey,
        #[serde(default)]
        node: Option<NodeId>,
    },

    /// Remove one role assignment
    RevokeRole {
        role: RoleKey,
        #[serde(default)]
        node: Option<NodeId>,
    },

    /// Replace the whole assignment set (promotion/demotion)
    ReplaceRoles { assignments: BTreeSet<RoleAssignment> },

    /// Set (or replace) a grant/deny override for one permission
    SetOverride {
        permission: String,
        effect: OverrideEffect,
        #[serde(default)]
        node: Option<NodeId>,
    },

    /// Remove an override slot
    ClearOverride {
        permission: String,
        #[serde(default)]
        node: Option<NodeId>,
    },

    /// Delete the principal and everything it holds
    DeletePrincipal,
}

impl IdentityMutation {
    /// Node context in which the acting principal's privileges are evaluated
    pub fn node(&self) -> Option<NodeId> {
        match self {
            IdentityMutation::AssignRole { node, .. }
            | IdentityMutation::RevokeRole { node, .. }
            | IdentityMutation::SetOverride { node, .. }
            | IdentityMutation::ClearOverride { node, .. } => *node,
            IdentityMutation::ReplaceRoles { .. } | IdentityMutation::DeletePrincipal => None,
        }
    }

    /// Permission the generic check requires of the acting principal
    pub fn required_permission(&self) -> &'static str {
        match self {
            IdentityMutation::AssignRole { .. }
            | IdentityMutation::RevokeRole { .. }
            | IdentityMutation::ReplaceRoles { .. } => ASSIGN_ROLE_PERMISSION,
            IdentityMutation::SetOverride { .. } | IdentityMutation::ClearOverride { .. } => {
                MANAGE_PERMISSIONS_PERMISSION
            }
            IdentityMutation::DeletePrincipal => DELETE_PRINCIPAL_PERMISSION,
        }
    }

    /// Short name for logs and audit events
    pub fn kind(&self) -> &'static str {
        match self {
            IdentityMutation::AssignRole { .. } => "assign_role",
            IdentityMutation::RevokeRole { .. } => "revoke_role",
            IdentityMutation::ReplaceRoles { .. } => "replace_roles",
            IdentityMutation::SetOverride { .. } => "set_override",
            IdentityMutation::ClearOverride { .. } => "clear_override",
            IdentityMutation::DeletePrincipal => "delete_principal",
        }
    }

    /// Whether the mutation touches role assignments (as opposed to overrides)
    pub fn changes_roles(&self) -> bool {
        matches!(
            self,
            IdentityMutation::AssignRole { .. }
                | IdentityMutation::RevokeRole { .. }
                | IdentityMutation::ReplaceRoles { .. }
        )
    }

    /// The record as it would look after the mutation; `None` once deleted.
    pub fn apply_to(&self, record: &PrincipalRecord) -> Option<PrincipalRecord> {
        let mut next = record.clone();

        match self {
            IdentityMutation::AssignRole { role, node } => {
                next.assignments.insert(RoleAssignment {
                    role: role.clone(),
                    node: *node,
                });
            }
            IdentityMutation::RevokeRole { role, node } => {
                next.assignments.remove(&RoleAssignment {
                    role: role.clone(),
                    node: *node,
                });
                // The legacy scalar is a global assignment too
                if node.is_none() && next.active_role.as_ref() == Some(role) {
                    next.active_role = None;
                }
            }
            IdentityMutation::ReplaceRoles { assignments } => {
                next.assignments = assignments.clone();
                next.active_role = None;
            }
            IdentityMutation::SetOverride {
                permission,
                effect,
                node,
            } => {
                next.overrides.retain(|o| !o.same_slot(permission, *node));
                next.overrides.push(OverrideEntry {
                    permission: permission.clone(),
                    effect: *effect,
                    node: *node,
                });
            }
            IdentityMutation::ClearOverride { permission, node } => {
                next.overrides.retain(|o| !o.same_slot(permission, *node));
            }
            IdentityMutation::DeletePrincipal => return None,
        }

        Some(next)
    }
}
