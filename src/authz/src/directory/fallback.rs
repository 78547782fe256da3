//! Compiled-in role→permission table used by permissive mode only

use crate::roles::{ADMIN, INSTRUCTOR, STUDENT, SUPER_INSTRUCTOR};
use crate::types::{Permission, PermissionSet, RoleKey};
use std::collections::BTreeSet;

const FALLBACK_TABLE: &[(&str, &[&str])] = &[
    (
        ADMIN,
        &[
            "user:create",
            "user:read",
            "user:update",
            "user:delete",
            "user:assign_role",
            "user:manage_permissions",
            "course:create",
            "course:read",
            "course:update",
            "course:delete",
            "group:create",
            "group:read",
            "group:update",
            "group:delete",
            "audit:read",
        ],
    ),
    (
        SUPER_INSTRUCTOR,
        &[
            "user:read",
            "user:assign_role",
            "course:create",
            "course:read",
            "course:update",
            "course:delete",
            "group:create",
            "group:read",
            "group:update",
            "group:delete",
        ],
    ),
    (
        INSTRUCTOR,
        &[
            "user:read",
            "course:read",
            "course:update",
            "group:read",
            "group:update",
        ],
    ),
    (STUDENT, &["course:read", "group:read"]),
];

/// Permissions the fallback table grants to `roles`
pub fn permissions_for(roles: &BTreeSet<RoleKey>) -> PermissionSet {
    FALLBACK_TABLE
        .iter()
        .filter(|(role, _)| roles.contains(&RoleKey::from(*role)))
        .flat_map(|(_, perms)| perms.iter())
        .filter_map(|p| Permission::parse(p).ok())
        .collect()
}
