//! In-memory role directory

use super::RoleDirectory;
use crate::error::{AuthzError, Result};
use crate::types::{Permission, PermissionSet, RoleKey};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory role→permission directory
///
/// Availability can be switched off to exercise outage handling.
pub struct InMemoryRoleDirectory {
    roles: Arc<RwLock<HashMap<RoleKey, PermissionSet>>>,
    available: AtomicBool,
    reads: AtomicU64,
}

impl InMemoryRoleDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self {
            roles: Arc::new(RwLock::new(HashMap::new())),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
        }
    }

    /// Define (or redefine) a role's permissions
    pub async fn define_role<I, P>(&self, role: impl Into<RoleKey>, permissions: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let permissions = permissions
            .into_iter()
            .map(|p| Permission::parse(p.as_ref()))
            .collect::<Result<PermissionSet>>()?;

        let mut roles = self.roles.write().await;
        roles.insert(role.into(), permissions);
        Ok(())
    }

    /// Simulate the directory going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `permissions_for` calls served
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryRoleDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleDirectory for InMemoryRoleDirectory {
    async fn permissions_for(&self, roles: &BTreeSet<RoleKey>) -> Result<PermissionSet> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(AuthzError::PermissionSourceUnavailable(
                "in-memory directory marked unavailable".to_string(),
            ));
        }

        let directory = self.roles.read().await;
        Ok(roles
            .iter()
            .filter_map(|role| directory.get(role))
            .flat_map(|perms| perms.iter().cloned())
            .collect())
    }
}
