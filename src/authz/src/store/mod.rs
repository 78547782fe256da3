//! Principal store contract and adapters
//!
//! The store owns role assignments and overrides. Reads feed resolution; writes only
//! happen through [`PrincipalStore::commit`], which the engine calls after the
//! permission and safety checks have passed.

use crate::error::Result;
use crate::mutation::IdentityMutation;
use crate::safety::LockoutGuard;
use crate::types::{PrincipalId, PrincipalRecord, RoleKey};
use async_trait::async_trait;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryPrincipalStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Principal store trait
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Load a principal with its assignments and overrides
    async fn load(&self, id: &PrincipalId) -> Result<Option<PrincipalRecord>>;

    /// Count principals holding `role` globally, not counting `excluding`
    async fn count_global_holders(&self, role: &RoleKey, excluding: &PrincipalId)
        -> Result<usize>;

    /// Apply a mutation atomically.
    ///
    /// Implementations must re-verify `guard` against current holder counts in the
    /// same critical section (or serializable transaction) as the write, returning
    /// `SafetyViolation` without writing anything if it fails.
    async fn commit(
        &self,
        target: &PrincipalId,
        mutation: &IdentityMutation,
        guard: &LockoutGuard,
    ) -> Result<()>;
}
