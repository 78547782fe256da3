//! Configuration and seed loading tests

use lms_authz::{
    AuthzEngine, AuthzError, EngineConfig, InMemoryPrincipalStore, InMemoryRoleDirectory,
    PolicyMode, PrincipalId, SeedData,
};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

// ============================================================================
// ENVIRONMENT CONFIGURATION
// ============================================================================

#[test]
fn test_env_overrides() {
    let config = EngineConfig::from_lookup(lookup(&[
        ("AUTHZ_POLICY_MODE", "Permissive"),
        ("AUTHZ_CACHE_TTL_SECS", "5"),
        ("AUTHZ_CACHE_SIZE", "250"),
        ("AUTHZ_CACHE_ENABLED", "false"),
    ]))
    .unwrap();

    assert_eq!(config.policy_mode, PolicyMode::Permissive);
    assert_eq!(config.cache.ttl, Duration::from_secs(5));
    assert_eq!(config.cache.capacity, 250);
    assert!(!config.cache.enabled);
}

#[test]
fn test_env_rejects_unknown_mode() {
    let result = EngineConfig::from_lookup(lookup(&[("AUTHZ_POLICY_MODE", "lenient")]));
    assert!(matches!(result, Err(AuthzError::InvalidInput(_))));
}

#[test]
fn test_config_from_json_uses_defaults() {
    let config: EngineConfig = serde_json::from_str(r#"{ "policy_mode": "permissive" }"#).unwrap();

    assert_eq!(config.policy_mode, PolicyMode::Permissive);
    assert_eq!(config.cache.capacity, 10_000);
    assert_eq!(config.required_roles.len(), 1);
}

// ============================================================================
// SEED FILES
// ============================================================================

#[tokio::test]
async fn test_seed_file_drives_engine() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "roles": {{
                "ADMIN": ["user:assign_role", "user:delete"],
                "STUDENT": ["course:read"]
            }},
            "principals": [
                {{ "id": "user:root", "assignments": [{{ "role": "ADMIN" }}] }},
                {{ "id": "user:kim", "active_role": "student",
                   "overrides": [{{ "permission": "course:read", "effect": "deny", "node": 2 }}] }}
            ]
        }}"#
    )
    .unwrap();

    let seed = SeedData::from_file(file.path()).await.unwrap();
    let directory = Arc::new(InMemoryRoleDirectory::new());
    let store = Arc::new(InMemoryPrincipalStore::new());
    seed.apply(&directory, &store).await.unwrap();

    let engine = AuthzEngine::new(EngineConfig::default(), directory, store);
    let kim = PrincipalId::new("user:kim");

    assert!(engine.has_permission(&kim, "course:read", None).await.unwrap());
    assert!(!engine
        .has_permission(&kim, "course:read", Some(lms_authz::NodeId(2)))
        .await
        .unwrap());
    assert!(engine
        .has_permission(&PrincipalId::new("user:root"), "user:delete", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_seed_with_bad_permission_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "roles": {{ "STUDENT": ["read everything"] }} }}"#).unwrap();

    let seed = SeedData::from_file(file.path()).await.unwrap();
    let result = seed
        .apply(&InMemoryRoleDirectory::new(), &InMemoryPrincipalStore::new())
        .await;

    assert!(matches!(result, Err(AuthzError::InvalidInput(_))));
}

#[tokio::test]
async fn test_missing_seed_file() {
    let result = SeedData::from_file("/nonexistent/lms-seed.json").await;
    assert!(matches!(result, Err(AuthzError::Io(_))));
}
