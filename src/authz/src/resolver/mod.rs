//! Permission resolution
//!
//! Maps the roles that apply in an evaluation context to a base permission set by
//! reading the authoritative [`RoleDirectory`] once. What happens when that read
//! fails is decided by the injected [`PolicyMode`]:
//!
//! - **Strict**: the answer is the empty set, and an alert is raised.
//! - **Permissive**: the compiled-in fallback table answers, with a warning.
//!
//! Overrides are layered on afterwards by [`apply_overrides`].

pub mod overrides;

pub use overrides::apply_overrides;

use crate::config::PolicyMode;
use crate::directory::{fallback, RoleDirectory};
use crate::engine::audit::{AuditEvent, AuditLogger};
use crate::roles::RoleSet;
use crate::types::{NodeId, PermissionSet, PrincipalId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Where a resolved base set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSource {
    /// Authoritative directory answered
    Directory,
    /// Directory failed; permissive fallback table answered
    Fallback,
    /// Directory failed in strict mode; fail closed
    Unavailable,
}

impl PermissionSource {
    /// Only authoritative answers may be cached
    pub fn is_authoritative(&self) -> bool {
        matches!(self, PermissionSource::Directory)
    }
}

/// Base permission set with its provenance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub permissions: PermissionSet,
    pub source: PermissionSource,
}

/// Role set → base permission set
pub struct PermissionResolver {
    directory: Arc<dyn RoleDirectory>,
    mode: PolicyMode,
    audit: AuditLogger,
}

impl PermissionResolver {
    pub fn new(directory: Arc<dyn RoleDirectory>, mode: PolicyMode, audit: AuditLogger) -> Self {
        Self {
            directory,
            mode,
            audit,
        }
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    /// Resolve the base permissions of `roles` in `context`.
    ///
    /// Never fails: directory errors are absorbed according to the policy mode.
    pub async fn resolve(
        &self,
        principal: &PrincipalId,
        roles: &RoleSet,
        context: Option<NodeId>,
    ) -> Resolution {
        let applicable = roles.applicable(context);
        if applicable.is_empty() {
            return Resolution {
                permissions: PermissionSet::new(),
                source: PermissionSource::Directory,
            };
        }

        match self.directory.permissions_for(&applicable).await {
            Ok(permissions) => {
                debug!(
                    "Directory resolved {} permission(s) from {} role(s) for {}",
                    permissions.len(),
                    applicable.len(),
                    principal
                );
                Resolution {
                    permissions,
                    source: PermissionSource::Directory,
                }
            }
            Err(e) => match self.mode {
                PolicyMode::Strict => {
                    error!(
                        "Permission directory unavailable resolving {}: {} (strict mode, failing closed)",
                        principal, e
                    );
                    self.audit.log(AuditEvent::PermissionSourceUnavailable {
                        principal: principal.clone(),
                        mode: self.mode,
                        error: e.to_string(),
                    });
                    Resolution {
                        permissions: PermissionSet::new(),
                        source: PermissionSource::Unavailable,
                    }
                }
                PolicyMode::Permissive => {
                    warn!(
                        "Permission directory unavailable resolving {}: {} (permissive mode, using fallback table)",
                        principal, e
                    );
                    Resolution {
                        permissions: fallback::permissions_for(&applicable),
                        source: PermissionSource::Fallback,
                    }
                }
            },
        }
    }
}
