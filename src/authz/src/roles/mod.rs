//! Role aggregation and privilege tiers
//!
//! A principal may hold several roles at once, each global or scoped to one node.
//! The aggregator folds the legacy "active role" column and the assignment rows into
//! one canonical [`RoleSet`]; the display role is computed from it.

pub mod aggregator;
pub mod types;

pub use aggregator::{AggregatedPrincipal, RoleAggregator};
pub use types::{display_name, RoleSet, RoleTiers, ADMIN, INSTRUCTOR, STUDENT, SUPER_INSTRUCTOR};
