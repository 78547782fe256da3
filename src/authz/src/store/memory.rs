//! In-memory principal store

use super::PrincipalStore;
use crate::error::{AuthzError, Result};
use crate::mutation::IdentityMutation;
use crate::safety::LockoutGuard;
use crate::types::{PrincipalId, PrincipalRecord, RoleKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory principal store implementation
pub struct InMemoryPrincipalStore {
    principals: Arc<RwLock<HashMap<PrincipalId, PrincipalRecord>>>,
}

impl InMemoryPrincipalStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            principals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or replace a principal (seeding; bypasses the safety gate)
    pub async fn insert(&self, record: PrincipalRecord) {
        let mut principals = self.principals.write().await;
        principals.insert(record.id.clone(), record);
    }

    /// Number of stored principals
    pub async fn len(&self) -> usize {
        self.principals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.principals.read().await.is_empty()
    }

    fn other_holders(
        principals: &HashMap<PrincipalId, PrincipalRecord>,
        role: &RoleKey,
        excluding: &PrincipalId,
    ) -> usize {
        principals
            .values()
            .filter(|p| &p.id != excluding && p.holds_globally(role))
            .count()
    }
}

impl Default for InMemoryPrincipalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn load(&self, id: &PrincipalId) -> Result<Option<PrincipalRecord>> {
        let principals = self.principals.read().await;
        Ok(principals.get(id).cloned())
    }

    async fn count_global_holders(
        &self,
        role: &RoleKey,
        excluding: &PrincipalId,
    ) -> Result<usize> {
        let principals = self.principals.read().await;
        Ok(Self::other_holders(&principals, role, excluding))
    }

    async fn commit(
        &self,
        target: &PrincipalId,
        mutation: &IdentityMutation,
        guard: &LockoutGuard,
    ) -> Result<()> {
        // Count and write under one write lock
        let mut principals = self.principals.write().await;

        let before = principals
            .get(target)
            .ok_or_else(|| AuthzError::PrincipalNotFound(target.to_string()))?;
        let after = mutation.apply_to(before);

        for role in guard.roles_lost(before, after.as_ref()) {
            if Self::other_holders(&principals, &role, target) == 0 {
                return Err(AuthzError::safety(guard.reason(&role)));
            }
        }

        match after {
            Some(record) => {
                principals.insert(target.clone(), record);
            }
            None => {
                principals.remove(target);
            }
        }

        Ok(())
    }
}
