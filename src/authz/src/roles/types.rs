//! Role set, well-known LMS roles and privilege tiers

use crate::types::{NodeId, PrincipalRecord, RoleAssignment, RoleKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Top-level administrator role
pub const ADMIN: &str = "ADMIN";
/// Instructor allowed to manage other instructors' courses
pub const SUPER_INSTRUCTOR: &str = "SUPER_INSTRUCTOR";
/// Course instructor
pub const INSTRUCTOR: &str = "INSTRUCTOR";
/// Enrolled learner
pub const STUDENT: &str = "STUDENT";

/// Human-readable role name used in guardrail reasons
pub fn display_name(role: &RoleKey) -> String {
    match role.as_str() {
        ADMIN => "Administrator".to_string(),
        SUPER_INSTRUCTOR => "Super Instructor".to_string(),
        INSTRUCTOR => "Instructor".to_string(),
        STUDENT => "Student".to_string(),
        other => other
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|word| {
                let lower = word.to_ascii_lowercase();
                let mut chars = lower.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// De-duplicated set of role assignments held by one principal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet {
    assignments: BTreeSet<RoleAssignment>,
}

impl RoleSet {
    pub fn new(assignments: impl IntoIterator<Item = RoleAssignment>) -> Self {
        Self {
            assignments: assignments.into_iter().collect(),
        }
    }

    /// Union of the legacy active-role scalar and the assignment rows
    pub fn from_record(record: &PrincipalRecord) -> Self {
        Self {
            assignments: record.role_assignments(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleAssignment> {
        self.assignments.iter()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn contains(&self, assignment: &RoleAssignment) -> bool {
        self.assignments.contains(assignment)
    }

    /// Role keys whose assignment applies in the evaluation context
    pub fn applicable(&self, context: Option<NodeId>) -> BTreeSet<RoleKey> {
        self.assignments
            .iter()
            .filter(|a| a.applies_to(context))
            .map(|a| a.role.clone())
            .collect()
    }

    /// Highest privilege tier held in the evaluation context.
    ///
    /// Roles without a configured tier confer the lowest tier here.
    pub fn max_tier(&self, context: Option<NodeId>, tiers: &RoleTiers) -> Option<u8> {
        self.applicable(context)
            .iter()
            .map(|role| tiers.held_tier(role))
            .max()
    }
}

/// Privilege tier per role; a higher tier may grant every lower or equal tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleTiers(BTreeMap<RoleKey, u8>);

impl RoleTiers {
    pub fn new(tiers: impl IntoIterator<Item = (RoleKey, u8)>) -> Self {
        Self(tiers.into_iter().collect())
    }

    /// Highest configured tier
    pub fn top(&self) -> u8 {
        self.0.values().copied().max().unwrap_or(0)
    }

    /// Lowest configured tier
    pub fn bottom(&self) -> u8 {
        self.0.values().copied().min().unwrap_or(0)
    }

    /// Tier needed to grant `role`; roles without a configured tier rank as the top tier
    pub fn tier(&self, role: &RoleKey) -> u8 {
        self.0.get(role).copied().unwrap_or_else(|| self.top())
    }

    /// Tier conferred by holding `role`; roles without a configured tier confer the
    /// lowest tier
    pub fn held_tier(&self, role: &RoleKey) -> u8 {
        self.0.get(role).copied().unwrap_or_else(|| self.bottom())
    }
}

impl Default for RoleTiers {
    fn default() -> Self {
        Self::new([
            (RoleKey::from(STUDENT), 0),
            (RoleKey::from(INSTRUCTOR), 1),
            (RoleKey::from(SUPER_INSTRUCTOR), 2),
            (RoleKey::from(ADMIN), 3),
        ])
    }
}
