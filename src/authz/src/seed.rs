//! JSON seed for the in-memory directory and principal store
//!
//! ```json
//! {
//!   "roles": { "INSTRUCTOR": ["course:read", "course:update"] },
//!   "principals": [
//!     { "id": "user:alice", "assignments": [{ "role": "ADMIN", "node": null }] }
//!   ]
//! }
//! ```

use crate::directory::{fallback, InMemoryRoleDirectory};
use crate::error::{AuthzError, Result};
use crate::roles::{ADMIN, INSTRUCTOR, STUDENT, SUPER_INSTRUCTOR};
use crate::store::InMemoryPrincipalStore;
use crate::types::{PrincipalRecord, RoleKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// Directory definitions plus principals to preload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub roles: BTreeMap<RoleKey, Vec<String>>,
    pub principals: Vec<PrincipalRecord>,
}

impl SeedData {
    /// Parse a seed document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AuthzError::InvalidInput(format!("Invalid seed document: {}", e)))
    }

    /// Read and parse a seed file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&raw)
    }

    /// Seed holding the stock LMS roles and no principals
    pub fn stock_roles() -> Self {
        let roles = [ADMIN, SUPER_INSTRUCTOR, INSTRUCTOR, STUDENT]
            .into_iter()
            .map(|role| {
                let key = RoleKey::from(role);
                let granted = fallback::permissions_for(&BTreeSet::from([key.clone()]))
                    .into_iter()
                    .map(|p| p.as_str().to_string())
                    .collect();
                (key, granted)
            })
            .collect();

        Self {
            roles,
            principals: Vec::new(),
        }
    }

    /// Load the seed into the in-memory adapters
    ///
    /// # Errors
    ///
    /// `InvalidInput` if a role lists a non-canonical permission.
    pub async fn apply(
        &self,
        directory: &InMemoryRoleDirectory,
        store: &InMemoryPrincipalStore,
    ) -> Result<()> {
        for (role, permissions) in &self.roles {
            directory.define_role(role.clone(), permissions).await?;
        }

        for record in &self.principals {
            store.insert(record.clone()).await;
        }

        info!(
            "Seeded {} role(s) and {} principal(s)",
            self.roles.len(),
            self.principals.len()
        );
        Ok(())
    }
}
