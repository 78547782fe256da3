//! Safety guardrails for identity mutations
//!
//! Two checks layered on top of the generic permission check:
//!
//! 1. **No escalation**: a mutation may only give the target roles whose privilege
//!    tier the actor already holds in that scope, and grant (or un-deny) only
//!    permissions the actor itself effectively holds.
//! 2. **No lockout**: a mutation may not take a required top-level role away from its
//!    last global holder.
//!
//! The checker only decides; the engine serializes check and commit, and the store
//! re-verifies the lockout guard atomically with the write.

use crate::engine::decision::SafetyDecision;
use crate::error::Result;
use crate::mutation::IdentityMutation;
use crate::roles::{display_name, AggregatedPrincipal, RoleTiers};
use crate::store::PrincipalStore;
use crate::types::{OverrideEffect, Permission, PermissionSet, PrincipalRecord, RoleKey};
use tracing::debug;

/// Required top-level roles that must keep at least one global holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutGuard {
    required: Vec<RoleKey>,
}

impl LockoutGuard {
    pub fn new(required: Vec<RoleKey>) -> Self {
        Self { required }
    }

    pub fn required(&self) -> &[RoleKey] {
        &self.required
    }

    /// Required roles held globally before the mutation and not after it
    pub fn roles_lost(&self, before: &PrincipalRecord, after: Option<&PrincipalRecord>) -> Vec<RoleKey> {
        self.required
            .iter()
            .filter(|role| before.holds_globally(role))
            .filter(|role| !after.map(|a| a.holds_globally(role)).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Rejection reason for losing the last holder of `role`
    pub fn reason(&self, role: &RoleKey) -> String {
        format!("cannot remove last {}", display_name(role).to_lowercase())
    }
}

/// Safety constraint checker
pub struct SafetyChecker {
    tiers: RoleTiers,
    guard: LockoutGuard,
}

impl SafetyChecker {
    pub fn new(tiers: RoleTiers, guard: LockoutGuard) -> Self {
        Self { tiers, guard }
    }

    pub fn guard(&self) -> &LockoutGuard {
        &self.guard
    }

    pub fn tiers(&self) -> &RoleTiers {
        &self.tiers
    }

    /// Decide whether `actor` may apply `mutation` to `target`.
    ///
    /// `actor_permissions` are the actor's effective permissions in the mutation's
    /// node context. Only store read failures are returned as errors.
    pub async fn check(
        &self,
        actor: &AggregatedPrincipal,
        actor_permissions: &PermissionSet,
        target: &PrincipalRecord,
        mutation: &IdentityMutation,
        store: &dyn PrincipalStore,
    ) -> Result<SafetyDecision> {
        let after = mutation.apply_to(target);

        if let Some(reason) = self.escalation(actor, actor_permissions, target, mutation, after.as_ref()) {
            debug!(
                "Escalation guard rejected {} by {} on {}: {}",
                mutation.kind(),
                actor.id,
                target.id,
                reason
            );
            return Ok(SafetyDecision::deny(reason));
        }

        for role in self.guard.roles_lost(target, after.as_ref()) {
            let others = store.count_global_holders(&role, &target.id).await?;
            if others == 0 {
                let reason = self.guard.reason(&role);
                debug!(
                    "Lockout guard rejected {} by {} on {}: {}",
                    mutation.kind(),
                    actor.id,
                    target.id,
                    reason
                );
                return Ok(SafetyDecision::deny(reason));
            }
        }

        Ok(SafetyDecision::allow())
    }

    fn escalation(
        &self,
        actor: &AggregatedPrincipal,
        actor_permissions: &PermissionSet,
        before: &PrincipalRecord,
        mutation: &IdentityMutation,
        after: Option<&PrincipalRecord>,
    ) -> Option<String> {
        let after = after?;

        // Roles the target gains, each judged in its own scope
        let held_before = before.role_assignments();
        for added in after.role_assignments().difference(&held_before) {
            let needed = self.tiers.tier(&added.role);
            let has = actor.roles.max_tier(added.node, &self.tiers);
            if has.map_or(true, |tier| tier < needed) {
                return Some(format!(
                    "insufficient privilege to grant {}",
                    display_name(&added.role)
                ));
            }
        }

        // Permissions the target may gain through the override path
        let unlocked = match mutation {
            IdentityMutation::SetOverride {
                permission,
                effect: OverrideEffect::Grant,
                ..
            } => Some(permission),
            IdentityMutation::ClearOverride { permission, node } => before
                .overrides
                .iter()
                .any(|o| o.effect == OverrideEffect::Deny && o.same_slot(permission, *node))
                .then_some(permission),
            _ => None,
        };

        if let Some(raw) = unlocked {
            let held = Permission::parse(raw)
                .map(|p| actor_permissions.contains(&p))
                .unwrap_or(false);
            if !held {
                return Some(format!("insufficient privilege to grant permission {}", raw.trim()));
            }
        }

        None
    }
}
