//! Role→permission directory contract and adapters
//!
//! The directory is the authoritative source of what each role grants. It is read
//! only, and each resolution reads it once for exactly the roles that apply.

use crate::error::Result;
use crate::types::{PermissionSet, RoleKey};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub mod fallback;
pub mod memory;

pub use memory::InMemoryRoleDirectory;

/// Authoritative role→permission directory
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Union of the permissions granted by `roles`, in one logical read.
    ///
    /// Roles unknown to the directory contribute nothing. Any failure to read must be
    /// reported as `PermissionSourceUnavailable`.
    async fn permissions_for(&self, roles: &BTreeSet<RoleKey>) -> Result<PermissionSet>;
}
