//! Engine integration tests
//!
//! Resolution with overrides and node scoping, policy modes under directory outage,
//! safety pre-checks and the full mutation gate.

use lms_authz::engine::{AuditRecord, AuditSink};
use lms_authz::{
    AuditEvent, AuditLogger, AuthzEngine, AuthzError, EngineConfig, IdentityMutation,
    InMemoryAuditSink, InMemoryPrincipalStore, InMemoryRoleDirectory, NodeId, OverrideEffect,
    OverrideEntry, Permission, PermissionSet, PolicyMode, PrincipalId, PrincipalRecord,
    RoleAssignment, RoleKey, SeedData, ADMIN, INSTRUCTOR, STUDENT, SUPER_INSTRUCTOR,
};
use std::sync::Arc;

struct Harness {
    engine: AuthzEngine,
    directory: Arc<InMemoryRoleDirectory>,
    store: Arc<InMemoryPrincipalStore>,
    audit: Arc<InMemoryAuditSink>,
}

async fn harness(config: EngineConfig, principals: Vec<PrincipalRecord>) -> Harness {
    let directory = Arc::new(InMemoryRoleDirectory::new());
    let store = Arc::new(InMemoryPrincipalStore::new());

    let mut seed = SeedData::stock_roles();
    seed.principals = principals;
    seed.apply(&directory, &store).await.unwrap();

    let audit = Arc::new(InMemoryAuditSink::new());
    let engine = AuthzEngine::with_audit(
        config,
        directory.clone(),
        store.clone(),
        AuditLogger::new(audit.clone()),
    );

    Harness {
        engine,
        directory,
        store,
        audit,
    }
}

fn perms(list: &[&str]) -> PermissionSet {
    list.iter().map(|p| Permission::parse(p).unwrap()).collect()
}

fn id(raw: &str) -> PrincipalId {
    PrincipalId::new(raw)
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[tokio::test]
async fn test_scenario_a_node_scoped_deny() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:u")
            .with_role(RoleAssignment::global(INSTRUCTOR))
            .with_override(OverrideEntry::deny("course:update", Some(NodeId(7))))],
    )
    .await;
    h.directory
        .define_role(INSTRUCTOR, ["course:read", "course:update"])
        .await
        .unwrap();

    let at_7 = h.engine.resolve_permissions(&id("user:u"), Some(NodeId(7))).await.unwrap();
    let at_8 = h.engine.resolve_permissions(&id("user:u"), Some(NodeId(8))).await.unwrap();

    assert_eq!(at_7, perms(&["course:read"]));
    assert_eq!(at_8, perms(&["course:read", "course:update"]));
}

#[tokio::test]
async fn test_unknown_principal_is_not_found() {
    let h = harness(EngineConfig::default(), vec![]).await;

    let result = h.engine.resolve_permissions(&id("user:ghost"), None).await;
    assert!(matches!(result, Err(AuthzError::PrincipalNotFound(_))));
}

#[tokio::test]
async fn test_principal_without_roles_resolves_empty() {
    let h = harness(EngineConfig::default(), vec![PrincipalRecord::new("user:new")]).await;

    let resolved = h.engine.resolve_permissions(&id("user:new"), None).await.unwrap();
    assert!(resolved.is_empty());
    assert_eq!(h.directory.read_count(), 0, "no roles means no directory read");
}

#[tokio::test]
async fn test_multiple_roles_union() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:u")
            .with_role(RoleAssignment::global(STUDENT))
            .with_role(RoleAssignment::scoped(INSTRUCTOR, NodeId(3)))],
    )
    .await;

    let global = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    let course = h.engine.resolve_permissions(&id("user:u"), Some(NodeId(3))).await.unwrap();

    assert_eq!(global, perms(&["course:read", "group:read"]));
    assert!(course.contains(&Permission::parse("course:update").unwrap()));
    assert!(course.is_superset(&global));
}

#[tokio::test]
async fn test_legacy_active_role_gates_decisions() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:legacy").with_active_role(INSTRUCTOR)],
    )
    .await;

    assert!(h
        .engine
        .has_permission(&id("user:legacy"), "course:update", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_grant_override_and_deny_wins() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:u")
            .with_role(RoleAssignment::global(STUDENT))
            .with_override(OverrideEntry::grant("audit:read", None))
            .with_override(OverrideEntry::grant("course:create", None))
            .with_override(OverrideEntry::deny("course:create", None))],
    )
    .await;

    let resolved = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert!(resolved.contains(&Permission::parse("audit:read").unwrap()));
    assert!(!resolved.contains(&Permission::parse("course:create").unwrap()));
}

#[tokio::test]
async fn test_malformed_override_is_skipped() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:u")
            .with_role(RoleAssignment::global(STUDENT))
            .with_override(OverrideEntry::deny("", None))
            .with_override(OverrideEntry::grant("not a permission", None))],
    )
    .await;

    let resolved = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert_eq!(resolved, perms(&["course:read", "group:read"]));
}

#[tokio::test]
async fn test_has_permission_with_malformed_string() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:u").with_role(RoleAssignment::global(ADMIN))],
    )
    .await;

    assert!(!h.engine.has_permission(&id("user:u"), "delete everything", None).await.unwrap());
    assert!(h.engine.has_permission(&id("user:u"), "USER:DELETE", None).await.unwrap());
}

#[tokio::test]
async fn test_denied_check_is_audited() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:learner").with_role(RoleAssignment::global(STUDENT))],
    )
    .await;

    assert!(!h
        .engine
        .has_permission(&id("user:learner"), "course:delete", Some(NodeId(4)))
        .await
        .unwrap());
    assert!(h.engine.has_permission(&id("user:learner"), "course:read", None).await.unwrap());

    let denied: Vec<AuditEvent> = h
        .audit
        .query_by_principal(&id("user:learner"), 10)
        .into_iter()
        .map(|r| r.event)
        .filter(|e| matches!(e, AuditEvent::PermissionDenied { .. }))
        .collect();

    assert_eq!(
        denied,
        vec![AuditEvent::PermissionDenied {
            principal: id("user:learner"),
            permission: "course:delete".to_string(),
            node: Some(NodeId(4)),
        }]
    );
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:u").with_role(RoleAssignment::global(INSTRUCTOR))],
    )
    .await;

    let first = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    let second = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    h.engine.invalidate(&id("user:u"));
    let third = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, third);
}

// ============================================================================
// CACHE INTERPLAY
// ============================================================================

#[tokio::test]
async fn test_invalidate_forces_recompute() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:u").with_role(RoleAssignment::global(STUDENT))],
    )
    .await;

    h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert_eq!(h.directory.read_count(), 1);

    // Out-of-band store change is invisible until invalidation
    h.store
        .insert(PrincipalRecord::new("user:u").with_role(RoleAssignment::global(INSTRUCTOR)))
        .await;
    let stale = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert!(!stale.contains(&Permission::parse("course:update").unwrap()));

    h.engine.invalidate(&id("user:u"));
    let fresh = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert!(fresh.contains(&Permission::parse("course:update").unwrap()));
    assert_eq!(h.directory.read_count(), 2);
}

#[tokio::test]
async fn test_invalidate_all_after_directory_change() {
    let h = harness(
        EngineConfig::default(),
        vec![PrincipalRecord::new("user:u").with_role(RoleAssignment::global(STUDENT))],
    )
    .await;

    h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    h.directory
        .define_role(STUDENT, ["course:read", "group:read", "forum:post"])
        .await
        .unwrap();
    h.engine.invalidate_all();

    assert!(h
        .engine
        .has_permission(&id("user:u"), "forum:post", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_disabled_cache_always_reads_directory() {
    let mut config = EngineConfig::default();
    config.cache.enabled = false;
    let h = harness(
        config,
        vec![PrincipalRecord::new("user:u").with_role(RoleAssignment::global(STUDENT))],
    )
    .await;

    for _ in 0..3 {
        h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    }
    assert_eq!(h.directory.read_count(), 3);
}

// ============================================================================
// POLICY MODES
// ============================================================================

#[tokio::test]
async fn test_scenario_d_strict_outage_fails_closed() {
    let h = harness(
        EngineConfig::with_mode(PolicyMode::Strict),
        vec![PrincipalRecord::new("user:u")
            .with_role(RoleAssignment::global(INSTRUCTOR))
            .with_override(OverrideEntry::grant("audit:read", None))],
    )
    .await;
    h.directory.set_available(false);

    let resolved = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert!(resolved.is_empty(), "strict outage must yield the empty set");

    let alerts: Vec<_> = h
        .audit
        .records()
        .into_iter()
        .filter(|r| matches!(r.event, AuditEvent::PermissionSourceUnavailable { .. }))
        .collect();
    assert_eq!(alerts.len(), 1);

    let metrics = h.engine.metrics().await.unwrap();
    assert_eq!(metrics.directory_failures, 1);
    assert_eq!(metrics.fallback_resolutions, 0);
}

#[tokio::test]
async fn test_permissive_outage_uses_fallback_table() {
    let h = harness(
        EngineConfig::with_mode(PolicyMode::Permissive),
        vec![PrincipalRecord::new("user:u")
            .with_role(RoleAssignment::global(STUDENT))
            .with_override(OverrideEntry::deny("group:read", None))],
    )
    .await;
    h.directory.set_available(false);

    let resolved = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert_eq!(resolved, perms(&["course:read"]));

    let metrics = h.engine.metrics().await.unwrap();
    assert_eq!(metrics.fallback_resolutions, 1);
}

#[tokio::test]
async fn test_degraded_results_are_not_cached() {
    let h = harness(
        EngineConfig::with_mode(PolicyMode::Permissive),
        vec![PrincipalRecord::new("user:u").with_role(RoleAssignment::global(STUDENT))],
    )
    .await;
    h.directory
        .define_role(STUDENT, ["course:read", "group:read", "forum:post"])
        .await
        .unwrap();

    h.directory.set_available(false);
    let degraded = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert!(!degraded.contains(&Permission::parse("forum:post").unwrap()));

    h.directory.set_available(true);
    let recovered = h.engine.resolve_permissions(&id("user:u"), None).await.unwrap();
    assert!(recovered.contains(&Permission::parse("forum:post").unwrap()));
    assert_eq!(h.engine.cache_stats().hits, 0);
}

// ============================================================================
// SAFETY CHECKS
// ============================================================================

fn lms_population() -> Vec<PrincipalRecord> {
    vec![
        PrincipalRecord::new("user:admin").with_role(RoleAssignment::global(ADMIN)),
        PrincipalRecord::new("user:super").with_role(RoleAssignment::global(SUPER_INSTRUCTOR)),
        PrincipalRecord::new("user:instructor").with_role(RoleAssignment::global(INSTRUCTOR)),
        PrincipalRecord::new("user:learner").with_role(RoleAssignment::global(STUDENT)),
    ]
}

#[tokio::test]
async fn test_scenario_b_no_escalation_to_admin() {
    let h = harness(EngineConfig::default(), lms_population()).await;

    let decision = h
        .engine
        .check_safety(
            &id("user:super"),
            &IdentityMutation::AssignRole {
                role: RoleKey::from(ADMIN),
                node: None,
            },
            &id("user:learner"),
        )
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(
        decision.reason.as_deref(),
        Some("insufficient privilege to grant Administrator")
    );
}

#[tokio::test]
async fn test_scenario_c_last_admin_self_delete() {
    let h = harness(EngineConfig::default(), lms_population()).await;

    let decision = h
        .engine
        .check_safety(
            &id("user:admin"),
            &IdentityMutation::DeletePrincipal,
            &id("user:admin"),
        )
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some("cannot remove last administrator"));

    let rejected = h
        .audit
        .query_by_principal(&id("user:admin"), 10)
        .into_iter()
        .any(|r| matches!(r.event, AuditEvent::SafetyRejected { .. }));
    assert!(rejected);
}

#[tokio::test]
async fn test_lateral_assignment_allowed() {
    let h = harness(EngineConfig::default(), lms_population()).await;

    let decision = h
        .engine
        .check_safety(
            &id("user:super"),
            &IdentityMutation::AssignRole {
                role: RoleKey::from(INSTRUCTOR),
                node: Some(NodeId(12)),
            },
            &id("user:learner"),
        )
        .await
        .unwrap();

    assert!(decision.allowed);
    assert!(decision.reason.is_none());
}

#[tokio::test]
async fn test_untiered_role_cannot_grant_admin() {
    let mut population = lms_population();
    population.push(PrincipalRecord::new("user:registrar").with_role(RoleAssignment::global("REGISTRAR")));
    let h = harness(EngineConfig::default(), population).await;
    h.directory
        .define_role("REGISTRAR", ["user:read", "user:assign_role"])
        .await
        .unwrap();

    let result = h
        .engine
        .apply_mutation(
            &id("user:registrar"),
            IdentityMutation::AssignRole {
                role: RoleKey::from(ADMIN),
                node: None,
            },
            &id("user:registrar"),
        )
        .await;

    match result {
        Err(AuthzError::SafetyViolation { reason }) => {
            assert_eq!(reason, "insufficient privilege to grant Administrator");
        }
        other => panic!("expected safety violation, got {:?}", other),
    }
    assert!(!h.engine.has_permission(&id("user:registrar"), "user:delete", None).await.unwrap());

    // The role still confers the lowest tier
    h.engine
        .apply_mutation(
            &id("user:registrar"),
            IdentityMutation::AssignRole {
                role: RoleKey::from(STUDENT),
                node: Some(NodeId(9)),
            },
            &id("user:instructor"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_safety_check_unknown_target() {
    let h = harness(EngineConfig::default(), lms_population()).await;

    let result = h
        .engine
        .check_safety(&id("user:admin"), &IdentityMutation::DeletePrincipal, &id("user:ghost"))
        .await;
    assert!(matches!(result, Err(AuthzError::PrincipalNotFound(_))));
}

// ============================================================================
// MUTATION GATE
// ============================================================================

#[tokio::test]
async fn test_mutation_then_resolve_sees_new_set() {
    let h = harness(EngineConfig::default(), lms_population()).await;
    let learner = id("user:learner");

    assert!(!h.engine.has_permission(&learner, "course:update", None).await.unwrap());

    h.engine
        .apply_mutation(
            &id("user:admin"),
            IdentityMutation::AssignRole {
                role: RoleKey::from(INSTRUCTOR),
                node: None,
            },
            &learner,
        )
        .await
        .unwrap();

    assert!(h.engine.has_permission(&learner, "course:update", None).await.unwrap());

    let changed = h
        .audit
        .query_by_principal(&learner, 10)
        .into_iter()
        .any(|r| matches!(r.event, AuditEvent::RoleChanged { .. }));
    assert!(changed);
}

#[tokio::test]
async fn test_override_mutation_then_resolve() {
    let h = harness(EngineConfig::default(), lms_population()).await;
    let instructor = id("user:instructor");

    assert!(h.engine.has_permission(&instructor, "course:update", Some(NodeId(4))).await.unwrap());

    h.engine
        .apply_mutation(
            &id("user:admin"),
            IdentityMutation::SetOverride {
                permission: "course:update".to_string(),
                effect: OverrideEffect::Deny,
                node: Some(NodeId(4)),
            },
            &instructor,
        )
        .await
        .unwrap();

    assert!(!h.engine.has_permission(&instructor, "course:update", Some(NodeId(4))).await.unwrap());
    assert!(h.engine.has_permission(&instructor, "course:update", Some(NodeId(5))).await.unwrap());
}

#[tokio::test]
async fn test_mutation_requires_generic_permission() {
    let h = harness(EngineConfig::default(), lms_population()).await;

    let result = h
        .engine
        .apply_mutation(
            &id("user:instructor"),
            IdentityMutation::AssignRole {
                role: RoleKey::from(STUDENT),
                node: None,
            },
            &id("user:learner"),
        )
        .await;

    assert!(matches!(result, Err(AuthzError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_rejected_mutation_carries_reason_and_changes_nothing() {
    let h = harness(EngineConfig::default(), lms_population()).await;

    let result = h
        .engine
        .apply_mutation(
            &id("user:admin"),
            IdentityMutation::ReplaceRoles {
                assignments: [RoleAssignment::global(STUDENT)].into(),
            },
            &id("user:admin"),
        )
        .await;

    match result {
        Err(AuthzError::SafetyViolation { reason }) => {
            assert_eq!(reason, "cannot remove last administrator");
        }
        other => panic!("expected safety violation, got {:?}", other),
    }

    assert!(h.engine.has_permission(&id("user:admin"), "user:delete", None).await.unwrap());
}

#[tokio::test]
async fn test_delete_second_admin_allowed() {
    let mut population = lms_population();
    population.push(PrincipalRecord::new("user:admin2").with_role(RoleAssignment::global(ADMIN)));
    let h = harness(EngineConfig::default(), population).await;

    h.engine
        .apply_mutation(&id("user:admin"), IdentityMutation::DeletePrincipal, &id("user:admin2"))
        .await
        .unwrap();

    let result = h.engine.resolve_permissions(&id("user:admin2"), None).await;
    assert!(matches!(result, Err(AuthzError::PrincipalNotFound(_))));
    assert_eq!(h.engine.metrics().await.unwrap().mutations_committed, 1);
}

// ============================================================================
// AUDIT FAILURE TOLERANCE
// ============================================================================

struct BrokenSink;

impl AuditSink for BrokenSink {
    fn emit(&self, _record: &AuditRecord) -> lms_authz::Result<()> {
        Err(AuthzError::Internal("audit backend down".to_string()))
    }
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_operations() {
    let directory = Arc::new(InMemoryRoleDirectory::new());
    let store = Arc::new(InMemoryPrincipalStore::new());
    let mut seed = SeedData::stock_roles();
    seed.principals = lms_population();
    seed.apply(&directory, &store).await.unwrap();

    let engine = AuthzEngine::with_audit(
        EngineConfig::default(),
        directory.clone(),
        store,
        AuditLogger::new(Arc::new(BrokenSink)),
    );

    engine
        .apply_mutation(
            &id("user:admin"),
            IdentityMutation::AssignRole {
                role: RoleKey::from(INSTRUCTOR),
                node: None,
            },
            &id("user:learner"),
        )
        .await
        .unwrap();

    directory.set_available(false);
    let resolved = engine.resolve_permissions(&id("user:instructor"), None).await.unwrap();
    assert!(resolved.is_empty());
}
