//! Role aggregation: every role a principal holds, from one store read

use super::types::{RoleSet, RoleTiers};
use crate::error::{AuthzError, Result};
use crate::store::PrincipalStore;
use crate::types::{OverrideEntry, PrincipalId, PrincipalRecord, RoleKey};
use std::sync::Arc;
use tracing::debug;

/// Everything resolution needs about one principal
#[derive(Debug, Clone)]
pub struct AggregatedPrincipal {
    pub id: PrincipalId,
    pub roles: RoleSet,
    pub overrides: Vec<OverrideEntry>,

    /// Display/session default; derived, never stored separately
    pub display_role: Option<RoleKey>,
}

/// Collects role assignments for a principal
#[derive(Clone)]
pub struct RoleAggregator {
    store: Arc<dyn PrincipalStore>,
    tiers: RoleTiers,
}

impl RoleAggregator {
    pub fn new(store: Arc<dyn PrincipalStore>, tiers: RoleTiers) -> Self {
        Self { store, tiers }
    }

    /// Load the principal and fold its roles into one de-duplicated set
    ///
    /// # Errors
    ///
    /// `PrincipalNotFound` when the id does not resolve.
    pub async fn aggregate(&self, id: &PrincipalId) -> Result<AggregatedPrincipal> {
        let record = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| AuthzError::PrincipalNotFound(id.to_string()))?;

        let aggregated = self.from_record(record);
        debug!(
            "Aggregated {} role assignment(s) for {}",
            aggregated.roles.len(),
            id
        );
        Ok(aggregated)
    }

    /// Same as [`aggregate`](Self::aggregate) for an already loaded record
    pub fn from_record(&self, record: PrincipalRecord) -> AggregatedPrincipal {
        let roles = RoleSet::from_record(&record);
        let display_role = self.display_role(&record, &roles);

        AggregatedPrincipal {
            id: record.id,
            roles,
            overrides: record.overrides,
            display_role,
        }
    }

    /// Legacy scalar when present, otherwise the highest-tier global role
    fn display_role(&self, record: &PrincipalRecord, roles: &RoleSet) -> Option<RoleKey> {
        if let Some(active) = &record.active_role {
            return Some(active.clone());
        }

        roles
            .iter()
            .filter(|a| a.node.is_none())
            .max_by_key(|a| self.tiers.held_tier(&a.role))
            .map(|a| a.role.clone())
    }
}
