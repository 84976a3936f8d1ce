mod common;

use proxy_control::audit::{AuditAction, AuditOutcome};
use proxy_control::backup::SnapshotTrigger;
use proxy_control::certificates::ObservedCertificate;
use proxy_control::error::{ControlError, FailureKind, ViolationKind};
use proxy_control::manager::Actor;
use proxy_control::routing::RequestAttrs;
use proxy_control::tree::{CertificateRequest, CertificateStatus, Route};

use common::{api_route, operator, rate_limit_middleware, Harness};

#[tokio::test]
async fn test_create_route_reads_back_and_audits_once() {
    let h = Harness::new().await;

    let created = h.manager.create_route(&operator(), api_route()).await.unwrap();
    assert_eq!(created, api_route());
    assert_eq!(h.manager.get_route("api").unwrap(), api_route());

    // a fresh load from disk sees the same route
    let on_disk = h.manager.repository().load().await.unwrap();
    assert_eq!(on_disk.routes.get("api"), Some(&api_route()));

    let records = h.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, AuditAction::RouteCreate);
    assert_eq!(records[0].outcome, AuditOutcome::Success);
    assert_eq!(records[0].actor, "alice");
    assert_eq!(records[0].resource_id, "api");
    assert!(records[0].snapshot_id.is_some());
    assert!(records[0].after.is_some());
    assert_eq!(h.reload.calls(), 1);
}

#[tokio::test]
async fn test_invalid_rule_is_rejected_without_write_or_reload() {
    let h = Harness::new().await;
    let before = h.disk_state().await;

    let route = Route::new("broken", "bogus", "api-service");
    let err = h.manager.create_route(&operator(), route).await.unwrap_err();

    match err {
        ControlError::Validation(violations) => {
            assert!(violations.iter().any(|v| v.kind == ViolationKind::InvalidRule));
            assert!(violations.iter().any(|v| v.path == "routes[broken].rule"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(h.disk_state().await, before);
    assert_eq!(h.reload.calls(), 0);
    assert!(h.manager.list_routes().is_empty());

    let records = h.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Failure);
    assert!(records[0].error_detail.as_deref().unwrap().contains("routes[broken].rule"));
}

#[tokio::test]
async fn test_sixth_mutation_in_window_is_rate_limited() {
    let h = Harness::new().await;
    let actor = operator();

    for i in 0..5 {
        h.manager
            .create_middleware(&actor, rate_limit_middleware(&format!("limit-{i}")))
            .await
            .unwrap();
    }
    let before = h.disk_state().await;

    let err = h
        .manager
        .create_middleware(&actor, rate_limit_middleware("limit-5"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::RateLimitExceeded { ref actor, .. } if actor == "alice"));
    assert_eq!(h.disk_state().await, before);
    assert_eq!(h.manager.list_middlewares().len(), 5);

    let records = h.records().await;
    let last = records.last().unwrap();
    assert_eq!(last.outcome, AuditOutcome::Denied);
    assert_eq!(last.resource_id, "limit-5");
    assert!(last.snapshot_id.is_none());

    // other actors have their own window
    h.manager
        .create_middleware(&Actor::new("bob", true), rate_limit_middleware("limit-5"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_restore_removes_later_route_and_takes_safety_snapshot() {
    let h = Harness::with_config(|c| c.rate_limit.max_mutations = 20).await;
    let actor = operator();

    let early = h.manager.create_snapshot(&actor).await.unwrap();
    assert_eq!(early.trigger, SnapshotTrigger::Manual);
    h.manager.create_route(&actor, api_route()).await.unwrap();
    assert!(h.manager.get_route("api").is_ok());

    let restore_called_at = chrono::Utc::now();
    let restored = h.manager.restore(&actor, &early.id).await.unwrap();
    assert_eq!(restored.id, early.id);

    assert!(matches!(
        h.manager.get_route("api"),
        Err(ControlError::NotFound { .. })
    ));
    assert!(h.manager.repository().load().await.unwrap().routes.get("api").is_none());

    let snapshots = h.manager.list_snapshots().await.unwrap();
    let safety: Vec<_> = snapshots
        .iter()
        .filter(|s| s.trigger == SnapshotTrigger::PreRestoreSafety)
        .collect();
    assert_eq!(safety.len(), 1);
    assert!(safety[0].created_at >= restore_called_at - chrono::Duration::milliseconds(1));

    let last = h.records().await.pop().unwrap();
    assert_eq!(last.action, AuditAction::BackupRestore);
    assert_eq!(last.outcome, AuditOutcome::Success);
    assert_eq!(last.snapshot_id.as_deref(), Some(safety[0].id.as_str()));
}

#[tokio::test]
async fn test_restore_unknown_snapshot_is_not_found() {
    let h = Harness::new().await;
    let err = h.manager.restore(&operator(), "20200101T000000000000Z").await.unwrap_err();
    assert!(matches!(err, ControlError::NotFound { .. }));
}

#[tokio::test]
async fn test_reload_failure_rolls_back() {
    let h = Harness::new().await;
    let before = h.disk_state().await;
    h.reload.set_failing(true);

    let err = h.manager.create_route(&operator(), api_route()).await.unwrap_err();
    let reference = match err {
        ControlError::Failed {
            kind: FailureKind::Reload,
            reference,
        } => reference,
        other => panic!("expected reload failure, got {other:?}"),
    };

    assert_eq!(h.disk_state().await, before);
    assert!(h.manager.list_routes().is_empty());

    let records = h.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Failure);
    assert_eq!(records[0].correlation_id, reference);
    assert!(records[0].error_detail.as_deref().unwrap().contains("refused"));
}

#[tokio::test]
async fn test_reload_timeout_rolls_back() {
    let h = Harness::new().await;
    let before = h.disk_state().await;
    h.reload.set_hanging(true);

    let err = h.manager.create_route(&operator(), api_route()).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Failed {
            kind: FailureKind::ReloadTimeout,
            ..
        }
    ));
    assert_eq!(h.disk_state().await, before);
    assert!(h.manager.list_routes().is_empty());
}

#[tokio::test]
async fn test_identical_update_is_idempotent() {
    let h = Harness::with_config(|c| c.rate_limit.max_mutations = 20).await;
    let actor = operator();
    h.manager.create_route(&actor, api_route()).await.unwrap();

    h.manager.update_route(&actor, "api", api_route()).await.unwrap();
    let once = (h.manager.tree(), h.disk_state().await);
    h.manager.update_route(&actor, "api", api_route()).await.unwrap();
    let twice = (h.manager.tree(), h.disk_state().await);

    assert_eq!(once.0, twice.0);
    assert_eq!(once.1, twice.1);
}

#[tokio::test]
async fn test_duplicate_name_is_conflict() {
    let h = Harness::new().await;
    let actor = operator();
    h.manager.create_route(&actor, api_route()).await.unwrap();
    let tree = h.manager.tree();

    let err = h
        .manager
        .create_route(&actor, Route::new("api", "PathPrefix(`/other`)", "other"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Conflict(_)));
    assert_eq!(h.manager.tree(), tree);
}

#[tokio::test]
async fn test_rename_onto_existing_name_is_conflict() {
    let h = Harness::with_config(|c| c.rate_limit.max_mutations = 20).await;
    let actor = operator();
    h.manager.create_route(&actor, api_route()).await.unwrap();
    h.manager
        .create_route(&actor, Route::new("web", "Host(`www.example.com`)", "web"))
        .await
        .unwrap();

    let mut renamed = api_route();
    renamed.name = "web".into();
    let err = h.manager.update_route(&actor, "api", renamed).await.unwrap_err();
    assert!(matches!(err, ControlError::Conflict(_)));

    let mut renamed = api_route();
    renamed.name = "api-v2".into();
    h.manager.update_route(&actor, "api", renamed).await.unwrap();
    assert!(h.manager.get_route("api-v2").is_ok());
    assert!(h.manager.get_route("api").is_err());
}

#[tokio::test]
async fn test_equal_priority_overlap_is_conflict() {
    let h = Harness::new().await;
    let actor = operator();
    h.manager.create_route(&actor, api_route()).await.unwrap();

    let overlapping = Route::new("api-shadow", "Host(`api.example.com`)", "other").with_priority(10);
    let err = h.manager.create_route(&actor, overlapping).await.unwrap_err();
    match err {
        ControlError::Conflict(v) => assert!(v.iter().any(|v| v.kind == ViolationKind::AmbiguousPriority)),
        other => panic!("expected conflict, got {other:?}"),
    }

    let higher = Route::new("api-shadow", "Host(`api.example.com`)", "other").with_priority(20);
    h.manager.create_route(&actor, higher).await.unwrap();
}

#[tokio::test]
async fn test_unknown_middleware_reference_is_conflict() {
    let h = Harness::new().await;
    let route = api_route().with_middleware("missing");
    let err = h.manager.create_route(&operator(), route).await.unwrap_err();
    match err {
        ControlError::Conflict(v) => assert!(v.iter().any(|v| v.kind == ViolationKind::UnresolvedReference)),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_referenced_middleware_cannot_be_deleted() {
    let h = Harness::new().await;
    let actor = operator();
    h.manager.create_middleware(&actor, rate_limit_middleware("limit")).await.unwrap();
    h.manager
        .create_route(&actor, api_route().with_middleware("limit"))
        .await
        .unwrap();

    let err = h.manager.delete_middleware(&actor, "limit").await.unwrap_err();
    assert!(matches!(err, ControlError::Conflict(_)));
    assert!(err.to_string().contains("api"));

    h.manager.delete_route(&actor, "api").await.unwrap();
    h.manager.delete_middleware(&actor, "limit").await.unwrap();
    assert!(h.manager.list_middlewares().is_empty());
}

#[tokio::test]
async fn test_forbidden_actor_is_denied_before_rate_limiting() {
    let h = Harness::new().await;
    let mallory = Actor::new("mallory", false);

    let err = h.manager.create_route(&mallory, api_route()).await.unwrap_err();
    assert!(matches!(err, ControlError::Forbidden(ref id) if id == "mallory"));
    assert_eq!(h.manager.status().rate_limited_actors, 0);
    assert_eq!(h.reload.calls(), 0);

    let records = h.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Denied);
}

#[tokio::test]
async fn test_audit_failure_does_not_undo_mutation() {
    let h = Harness::new().await;
    h.audit.set_failing(true);

    h.manager.create_route(&operator(), api_route()).await.unwrap();
    assert!(h.manager.get_route("api").is_ok());
    assert_eq!(h.manager.status().audit_alerts, 1);
}

#[tokio::test]
async fn test_certificate_request_then_observed_issuance() {
    let h = Harness::with_config(|c| c.rate_limit.max_mutations = 20).await;
    let actor = operator();

    let settings = h.manager.settings().with_resolver("letsencrypt", "acme.json");
    h.manager.update_settings(&actor, settings).await.unwrap();

    let cert = h
        .manager
        .request_certificate(
            &actor,
            CertificateRequest {
                domain: "api.example.com".into(),
                alternate_names: vec!["www.example.com".into()],
                resolver: "letsencrypt".into(),
                contact: Some("ops@example.com".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(cert.status, CertificateStatus::Pending);

    let now = chrono::Utc::now();
    let changes = h
        .manager
        .reconcile_certificates(vec![ObservedCertificate {
            domain: "api.example.com".into(),
            issued_at: Some(now),
            expires_at: Some(now + chrono::Duration::days(90)),
            revoked: false,
        }])
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(h.manager.get_certificate("api.example.com").unwrap().status, CertificateStatus::Valid);

    let last = h.records().await.pop().unwrap();
    assert_eq!(last.action, AuditAction::CertificateReconcile);
    assert_eq!(last.actor, Actor::SYSTEM_ID);

    // unchanged observations write nothing
    let audited = h.records().await.len();
    h.manager
        .reconcile_certificates(vec![ObservedCertificate {
            domain: "api.example.com".into(),
            issued_at: Some(now),
            expires_at: Some(now + chrono::Duration::days(90)),
            revoked: false,
        }])
        .await
        .unwrap();
    assert_eq!(h.records().await.len(), audited);

    h.manager.revoke_certificate(&actor, "api.example.com").await.unwrap();
    assert!(h.manager.list_certificates().is_empty());
}

#[tokio::test]
async fn test_certificate_with_unknown_resolver_is_conflict() {
    let h = Harness::new().await;
    let err = h
        .manager
        .request_certificate(
            &operator(),
            CertificateRequest {
                domain: "api.example.com".into(),
                alternate_names: Vec::new(),
                resolver: "nowhere".into(),
                contact: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Conflict(_)));
}

#[tokio::test]
async fn test_settings_cannot_drop_used_entry_point() {
    let h = Harness::new().await;
    let actor = operator();
    h.manager.create_route(&actor, api_route()).await.unwrap();

    let mut settings = h.manager.settings();
    settings.entry_points.remove("websecure");
    let err = h.manager.update_settings(&actor, settings).await.unwrap_err();
    assert!(matches!(err, ControlError::Conflict(_)));
    assert!(h.manager.settings().entry_points.contains_key("websecure"));
}

#[tokio::test]
async fn test_match_preview_prefers_higher_priority() {
    let h = Harness::new().await;
    let actor = operator();
    h.manager.create_route(&actor, api_route()).await.unwrap();
    h.manager
        .create_route(
            &actor,
            Route::new("catch-all", "PathPrefix(`/`)", "fallback").with_priority(1),
        )
        .await
        .unwrap();

    let hit = h
        .manager
        .match_request(Some("websecure"), &RequestAttrs::new("api.example.com", "/v1/users"))
        .unwrap();
    assert_eq!(hit.name, "api");

    let hit = h
        .manager
        .match_request(Some("web"), &RequestAttrs::new("api.example.com", "/v1/users"))
        .unwrap();
    assert_eq!(hit.name, "catch-all");
}

#[tokio::test]
async fn test_external_edit_is_picked_up_as_drift() {
    let h = Harness::new().await;
    let actor = operator();
    h.manager.create_route(&actor, api_route()).await.unwrap();

    // someone edits the document by hand
    let path = h.manager.repository().resolve("routes/default.toml");
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replace("api-service", "api-service-v2")).unwrap();

    h.manager
        .create_route(&actor, Route::new("web", "Host(`www.example.com`)", "web"))
        .await
        .unwrap();
    assert_eq!(h.manager.get_route("api").unwrap().service, "api-service-v2");
}

#[tokio::test]
async fn test_snapshot_retention_keeps_newest() {
    let h = Harness::with_config(|c| {
        c.rate_limit.max_mutations = 20;
        c.backup.max_snapshots = 2;
    })
    .await;
    let actor = operator();

    for i in 0..4 {
        h.manager
            .create_middleware(&actor, rate_limit_middleware(&format!("limit-{i}")))
            .await
            .unwrap();
    }

    let snapshots = h.manager.list_snapshots().await.unwrap();
    assert_eq!(snapshots.len(), 2);
    // newest first; the last mutation's snapshot holds three middlewares
    let newest = &snapshots[0];
    assert_eq!(newest.trigger, SnapshotTrigger::PreMutation);
    assert_eq!(h.manager.list_middlewares().len(), 4);
}

#[tokio::test]
async fn test_connectivity_check_is_audited() {
    let h = Harness::new().await;
    let addr = common::start_tcp_sink().await;

    let report = h
        .manager
        .test_connectivity(&operator(), &format!("http://{addr}"))
        .await
        .unwrap();
    assert!(report.reachable);
    assert_eq!(report.address, addr.to_string());
    assert!(report.error.is_none());

    let err = h.manager.test_connectivity(&operator(), "not a target").await.unwrap_err();
    assert!(matches!(err, ControlError::Validation(_)));

    let records = h.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].action, AuditAction::ConnectivityTest);
    assert_eq!(records[0].outcome, AuditOutcome::Success);
    assert_eq!(records[1].outcome, AuditOutcome::Failure);
    // checks never touch the tree
    assert_eq!(h.reload.calls(), 0);
}

#[tokio::test]
async fn test_rollback_with_zero_max_age_restores_disk() {
    let h = Harness::with_config(|c| {
        c.rate_limit.max_mutations = 20;
        c.backup.max_age_days = 0;
    })
    .await;
    let actor = operator();
    h.manager.create_route(&actor, api_route()).await.unwrap();
    let before = h.disk_state().await;

    h.reload.set_failing(true);
    let err = h
        .manager
        .create_route(&actor, Route::new("web", "Host(`www.example.com`)", "web"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Failed { kind: FailureKind::Reload, .. }));

    assert_eq!(h.disk_state().await, before);
    assert!(h.manager.get_route("web").is_err());
    assert!(h.manager.get_route("api").is_ok());
}

#[tokio::test]
async fn test_concurrent_mutations_both_survive() {
    let h = Harness::new().await;
    let actor = operator();

    let (a, b) = tokio::join!(
        h.manager.create_route(&actor, api_route()),
        h.manager
            .create_route(&actor, Route::new("web", "Host(`www.example.com`)", "web")),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(h.manager.list_routes().len(), 2);
    let on_disk = h.manager.repository().load().await.unwrap();
    assert!(on_disk.routes.get("api").is_some());
    assert!(on_disk.routes.get("web").is_some());

    let snapshots: Vec<_> = h
        .records()
        .await
        .into_iter()
        .filter_map(|r| r.snapshot_id)
        .collect();
    assert_eq!(snapshots.len(), 2);
    assert_ne!(snapshots[0], snapshots[1]);
}

#[tokio::test]
async fn test_long_safety_exemption_keeps_mutations_working() {
    let h = Harness::with_config(|c| {
        c.rate_limit.max_mutations = 20;
        c.backup.safety_exemption_hours = u32::MAX;
    })
    .await;
    let actor = operator();

    let early = h.manager.create_snapshot(&actor).await.unwrap();
    h.manager.restore(&actor, &early.id).await.unwrap();
    h.manager.create_route(&actor, api_route()).await.unwrap();

    let last = h.records().await.pop().unwrap();
    assert_eq!(last.action, AuditAction::RouteCreate);
    assert_eq!(last.outcome, AuditOutcome::Success);
}
