//! Engine configuration
//!
//! Everything is decided at construction time. Only [`EngineConfig::from_env`] reads
//! the environment, and only the server binary calls it.

use crate::engine::cache::CacheConfig;
use crate::error::{AuthzError, Result};
use crate::roles::{RoleTiers, ADMIN};
use crate::types::RoleKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Behavior when the role→permission directory cannot be read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Fail closed: empty permission set plus an alert
    #[default]
    Strict,
    /// Fall back to the compiled-in table with a warning (development only)
    Permissive,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::Strict => f.write_str("strict"),
            PolicyMode::Permissive => f.write_str("permissive"),
        }
    }
}

impl FromStr for PolicyMode {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(PolicyMode::Strict),
            "permissive" => Ok(PolicyMode::Permissive),
            other => Err(AuthzError::InvalidInput(format!(
                "unknown policy mode '{}', expected 'strict' or 'permissive'",
                other
            ))),
        }
    }
}

/// Authorization engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory failure posture
    pub policy_mode: PolicyMode,

    /// Decision cache configuration
    pub cache: CacheConfig,

    /// Roles that must always keep at least one global holder
    pub required_roles: Vec<RoleKey>,

    /// Privilege tier per role for escalation checks
    pub role_tiers: RoleTiers,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy_mode: PolicyMode::Strict,
            cache: CacheConfig::default(),
            required_roles: vec![RoleKey::from(ADMIN)],
            role_tiers: RoleTiers::default(),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Config with the given policy mode and defaults elsewhere
    pub fn with_mode(policy_mode: PolicyMode) -> Self {
        Self {
            policy_mode,
            ..Default::default()
        }
    }

    /// Load overrides from environment variables
    ///
    /// - `AUTHZ_POLICY_MODE` - `strict` | `permissive` (default: strict)
    /// - `AUTHZ_CACHE_TTL_SECS` - decision cache TTL (default: 60)
    /// - `AUTHZ_CACHE_SIZE` - maximum cached principals (default: 10000)
    /// - `AUTHZ_CACHE_ENABLED` - `true` | `false` (default: true)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(mode) = lookup("AUTHZ_POLICY_MODE") {
            config.policy_mode = mode.parse()?;
        }

        if let Some(ttl) = lookup("AUTHZ_CACHE_TTL_SECS") {
            let secs: u64 = ttl.trim().parse().map_err(|_| {
                AuthzError::InvalidInput(format!("AUTHZ_CACHE_TTL_SECS must be an integer, got '{}'", ttl))
            })?;
            config.cache.ttl = Duration::from_secs(secs);
        }

        if let Some(size) = lookup("AUTHZ_CACHE_SIZE") {
            config.cache.capacity = size.trim().parse().map_err(|_| {
                AuthzError::InvalidInput(format!("AUTHZ_CACHE_SIZE must be an integer, got '{}'", size))
            })?;
        }

        if let Some(enabled) = lookup("AUTHZ_CACHE_ENABLED") {
            config.cache.enabled = enabled.trim().parse().map_err(|_| {
                AuthzError::InvalidInput(format!("AUTHZ_CACHE_ENABLED must be true or false, got '{}'", enabled))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.policy_mode, PolicyMode::Strict);
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.required_roles, vec![RoleKey::from(ADMIN)]);
    }

    #[test]
    fn test_policy_mode_parsing() {
        assert_eq!("STRICT".parse::<PolicyMode>().unwrap(), PolicyMode::Strict);
        assert_eq!(" permissive".parse::<PolicyMode>().unwrap(), PolicyMode::Permissive);
        assert!("lenient".parse::<PolicyMode>().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("AUTHZ_POLICY_MODE", "permissive"),
            ("AUTHZ_CACHE_TTL_SECS", "5"),
            ("AUTHZ_CACHE_SIZE", "42"),
            ("AUTHZ_CACHE_ENABLED", "false"),
        ]);

        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.policy_mode, PolicyMode::Permissive);
        assert_eq!(config.cache.ttl, Duration::from_secs(5));
        assert_eq!(config.cache.capacity, 42);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = EngineConfig::from_lookup(|k| {
            (k == "AUTHZ_CACHE_TTL_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(AuthzError::InvalidInput(_))));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"policy_mode":"permissive","required_roles":["admin","owner"]}"#)
                .unwrap();
        assert_eq!(config.policy_mode, PolicyMode::Permissive);
        assert_eq!(config.required_roles.len(), 2);
        assert!(config.enable_metrics);
    }
}
