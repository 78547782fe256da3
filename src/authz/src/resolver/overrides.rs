//! Per-principal override application
//!
//! Pure function over the base set: grants are unioned in, denies are subtracted
//! last, so a deny wins over any grant whether it came from a role or an override.

use crate::error::AuthzError;
use crate::types::{NodeId, OverrideEffect, OverrideEntry, Permission, PermissionSet};
use tracing::debug;

/// Apply the overrides that match `context` on top of `base`.
///
/// Entries with a dangling or malformed permission reference are skipped.
pub fn apply_overrides(
    base: PermissionSet,
    overrides: &[OverrideEntry],
    context: Option<NodeId>,
) -> PermissionSet {
    let mut grants = PermissionSet::new();
    let mut denies = PermissionSet::new();

    for entry in overrides.iter().filter(|o| o.applies_to(context)) {
        let permission = match Permission::parse(&entry.permission) {
            Ok(permission) => permission,
            Err(_) => {
                let skipped = AuthzError::MalformedOverrideReference(format!(
                    "{} override '{}'",
                    entry.effect, entry.permission
                ));
                debug!("Skipping override: {}", skipped);
                continue;
            }
        };

        match entry.effect {
            OverrideEffect::Grant => grants.insert(permission),
            OverrideEffect::Deny => denies.insert(permission),
        };
    }

    let mut result = base;
    result.extend(grants);
    result.retain(|p| !denies.contains(p));
    result
}
