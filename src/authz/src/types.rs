//! Core authorization types

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Resolved permission set (ordered so results compare deterministically)
pub type PermissionSet = BTreeSet<Permission>;

/// Principal (user) identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PrincipalId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Organizational node (course, group, tenant) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Returns true when an entry scoped to `scope` applies in the evaluation `context`.
///
/// Global entries (`None`) apply everywhere; node-scoped entries only apply when the
/// context names the same node.
pub fn scope_applies(scope: Option<NodeId>, context: Option<NodeId>) -> bool {
    match scope {
        None => true,
        Some(node) => context == Some(node),
    }
}

/// Role key as stored in the directory (normalized to upper case)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RoleKey(String);

impl RoleKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(key.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RoleKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<&str> for RoleKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<RoleKey> for String {
    fn from(key: RoleKey) -> Self {
        key.0
    }
}

/// Canonical capability string of the form `resource:action`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

impl Permission {
    /// Parse and canonicalize a permission string.
    ///
    /// Canonical form is lower case, at least two `:`-separated segments, each made of
    /// ASCII alphanumerics, `_`, `-` or `.`.
    pub fn parse(raw: &str) -> Result<Self> {
        let canonical = raw.trim().to_ascii_lowercase();
        let mut segments = 0;
        for segment in canonical.split(':') {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
            if !valid {
                return Err(AuthzError::InvalidInput(format!(
                    "'{}' is not a canonical permission",
                    raw
                )));
            }
            segments += 1;
        }

        if segments < 2 {
            return Err(AuthzError::InvalidInput(format!(
                "'{}' is missing a resource or action segment",
                raw
            )));
        }

        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Permission {
    type Error = AuthzError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.0
    }
}

/// A role held by a principal, optionally scoped to one node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: RoleKey,

    /// `None` means global scope
    #[serde(default)]
    pub node: Option<NodeId>,
}

impl RoleAssignment {
    pub fn global(role: impl Into<RoleKey>) -> Self {
        Self {
            role: role.into(),
            node: None,
        }
    }

    pub fn scoped(role: impl Into<RoleKey>, node: NodeId) -> Self {
        Self {
            role: role.into(),
            node: Some(node),
        }
    }

    pub fn applies_to(&self, context: Option<NodeId>) -> bool {
        scope_applies(self.node, context)
    }
}

/// Effect of a per-principal override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideEffect {
    Grant,
    Deny,
}

impl fmt::Display for OverrideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideEffect::Grant => f.write_str("grant"),
            OverrideEffect::Deny => f.write_str("deny"),
        }
    }
}

/// Explicit grant or deny of one permission for one principal
///
/// `permission` is the stored reference as-is. Stores report a reference to a
/// deleted permission as an empty or non-canonical string; resolution skips it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub permission: String,
    pub effect: OverrideEffect,
    #[serde(default)]
    pub node: Option<NodeId>,
}

impl OverrideEntry {
    pub fn grant(permission: impl Into<String>, node: Option<NodeId>) -> Self {
        Self {
            permission: permission.into(),
            effect: OverrideEffect::Grant,
            node,
        }
    }

    pub fn deny(permission: impl Into<String>, node: Option<NodeId>) -> Self {
        Self {
            permission: permission.into(),
            effect: OverrideEffect::Deny,
            node,
        }
    }

    pub fn applies_to(&self, context: Option<NodeId>) -> bool {
        scope_applies(self.node, context)
    }

    /// True when both entries target the same permission in the same scope
    pub fn same_slot(&self, permission: &str, node: Option<NodeId>) -> bool {
        self.node == node && self.permission.trim().eq_ignore_ascii_case(permission.trim())
    }
}

/// Principal as held by the principal store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub id: PrincipalId,

    /// Legacy single "active role" column; treated as a global assignment
    #[serde(default)]
    pub active_role: Option<RoleKey>,

    #[serde(default)]
    pub assignments: BTreeSet<RoleAssignment>,

    #[serde(default)]
    pub overrides: Vec<OverrideEntry>,
}

impl PrincipalRecord {
    pub fn new(id: impl Into<PrincipalId>) -> Self {
        Self {
            id: id.into(),
            active_role: None,
            assignments: BTreeSet::new(),
            overrides: Vec::new(),
        }
    }

    pub fn with_role(mut self, assignment: RoleAssignment) -> Self {
        self.assignments.insert(assignment);
        self
    }

    pub fn with_active_role(mut self, role: impl Into<RoleKey>) -> Self {
        self.active_role = Some(role.into());
        self
    }

    pub fn with_override(mut self, entry: OverrideEntry) -> Self {
        self.overrides.push(entry);
        self
    }

    /// Canonical assignment set: the legacy scalar folded in as a global row
    pub fn role_assignments(&self) -> BTreeSet<RoleAssignment> {
        let mut all = self.assignments.clone();
        if let Some(role) = &self.active_role {
            all.insert(RoleAssignment::global(role.clone()));
        }
        all
    }

    /// Whether the principal holds `role` globally
    pub fn holds_globally(&self, role: &RoleKey) -> bool {
        self.role_assignments()
            .iter()
            .any(|a| a.node.is_none() && &a.role == role)
    }
}
