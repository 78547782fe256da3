//! # LMS Authorization Engine
//!
//! Decides what a principal may do inside the learning-management system and keeps
//! identity changes from escalating privilege or locking administrators out.
//!
//! ## Features
//!
//! - **Role aggregation** over global and node-scoped assignments
//! - **Policy modes** for directory outages: strict (fail closed) or permissive (fallback table)
//! - **Per-principal overrides** where an explicit deny always wins
//! - **Decision cache** with TTL and per-principal invalidation, no global lock
//! - **Safety checks** against privilege escalation and last-administrator removal
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use lms_authz::{
//!     AuthzEngine, EngineConfig, InMemoryPrincipalStore, InMemoryRoleDirectory,
//!     PrincipalRecord, RoleAssignment, INSTRUCTOR,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(InMemoryRoleDirectory::new());
//!     directory.define_role(INSTRUCTOR, ["course:read", "course:update"]).await?;
//!
//!     let store = Arc::new(InMemoryPrincipalStore::new());
//!     store
//!         .insert(PrincipalRecord::new("user:alice").with_role(RoleAssignment::global(INSTRUCTOR)))
//!         .await;
//!
//!     let engine = AuthzEngine::new(EngineConfig::default(), directory, store);
//!
//!     if engine.has_permission(&"user:alice".into(), "course:update", None).await? {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod mutation;
pub mod resolver;
pub mod roles;
pub mod safety;
pub mod seed;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{EngineConfig, PolicyMode};
pub use directory::{InMemoryRoleDirectory, RoleDirectory};
pub use engine::{
    AuditEvent, AuditLogger, AuditSink, AuthzEngine, CacheConfig, CacheStats, InMemoryAuditSink,
    SafetyDecision,
};
pub use error::{AuthzError, Result};
pub use mutation::IdentityMutation;
pub use roles::{RoleTiers, ADMIN, INSTRUCTOR, STUDENT, SUPER_INSTRUCTOR};
pub use seed::SeedData;
pub use store::{InMemoryPrincipalStore, PrincipalStore};
pub use types::{
    NodeId, OverrideEffect, OverrideEntry, Permission, PermissionSet, PrincipalId,
    PrincipalRecord, RoleAssignment, RoleKey,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
