//! Approval workflow integration tests

mod common;

use chrono::Duration;
use tokio_test::assert_ok;

use oversight::audit::LedgerQuery;
use oversight::clock::Clock;
use oversight::error::OversightError;
use oversight::workflow::engine::{actions, SWEEP_ACTOR, WORKFLOW_CATEGORY};
use oversight::workflow::{ApprovalStatus, Decision, PendingFilter, RiskLevel, SweepAction, WorkflowAlert};

use common::{seller_suspension, setup_oversight};

#[tokio::test]
async fn test_critical_request_policy() {
    let o = setup_oversight().await;
    let request = o
        .engine
        .create_request(seller_suspension(RiskLevel::Critical, &["a", "b", "c", "d", "e"]))
        .await
        .unwrap();

    assert_eq!(request.required_approval_count, 4);
    assert_eq!(request.created_at, o.clock.now());
    assert_eq!(request.sla_deadline, request.created_at + Duration::hours(2));
    assert_eq!(request.status, ApprovalStatus::Pending);
}

#[tokio::test]
async fn test_quorum_reached_exactly_on_last_approval() {
    let o = setup_oversight().await;
    let request = o
        .engine
        .create_request(seller_suspension(RiskLevel::High, &["a", "b", "c", "d"]))
        .await
        .unwrap();

    for (i, approver) in ["a", "b"].iter().enumerate() {
        let updated = o
            .engine
            .submit_decision(&request.id, approver, Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(updated.status, ApprovalStatus::Pending);
        assert_eq!(updated.approval_progress(), (i + 1, 3));
    }

    let approved = o
        .engine
        .submit_decision(&request.id, "c", Decision::Approve, Some("evidence reviewed".to_string()))
        .await
        .unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert!(approved.resolved_at.is_some());

    let late = o.engine.submit_decision(&request.id, "d", Decision::Approve, None).await;
    assert!(matches!(late, Err(OversightError::InvalidState(_))));
}

#[tokio::test]
async fn test_idempotent_approval() {
    let o = setup_oversight().await;
    let request = o
        .engine
        .create_request(seller_suspension(RiskLevel::Medium, &["a", "b"]))
        .await
        .unwrap();

    for _ in 0..3 {
        let updated = o
            .engine
            .submit_decision(&request.id, "a", Decision::Approve, None)
            .await
            .unwrap();
        assert_eq!(updated.approval_progress(), (1, 2));
        assert_eq!(updated.status, ApprovalStatus::Pending);
    }
    assert_eq!(o.engine.get_request(&request.id).await.unwrap().approvals.len(), 1);
}

#[tokio::test]
async fn test_single_rejection_is_terminal() {
    let o = setup_oversight().await;
    let request = o
        .engine
        .create_request(seller_suspension(RiskLevel::Critical, &["a", "b", "c", "d"]))
        .await
        .unwrap();

    let rejected = o
        .engine
        .submit_decision(&request.id, "d", Decision::Reject, Some("insufficient evidence".to_string()))
        .await
        .unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert_eq!(rejected.rejections.len(), 1);

    let after = o.engine.submit_decision(&request.id, "a", Decision::Approve, None).await;
    assert!(matches!(after, Err(OversightError::InvalidState(_))));
}

#[tokio::test]
async fn test_escalation_creates_linked_successor() {
    let o = setup_oversight().await;
    let original = o
        .engine
        .create_request(seller_suspension(RiskLevel::High, &["a", "b", "c", "d"]))
        .await
        .unwrap();
    o.engine
        .submit_decision(&original.id, "a", Decision::Approve, None)
        .await
        .unwrap();

    o.clock.advance(Duration::hours(1));
    let escalated = o
        .engine
        .submit_decision(&original.id, "b", Decision::Escalate, Some("needs director sign-off".to_string()))
        .await
        .unwrap();
    assert_eq!(escalated.status, ApprovalStatus::EscalatedFurther);
    let successor_id = escalated.escalated_to.clone().unwrap();

    let successor = o.engine.get_request(&successor_id).await.unwrap();
    assert_eq!(successor.risk_level, RiskLevel::Critical);
    assert_eq!(successor.required_approval_count, 4);
    assert_eq!(successor.status, ApprovalStatus::Pending);
    assert_eq!(successor.parent_request_id.as_deref(), Some(original.id.as_str()));
    assert_eq!(successor.created_at, o.clock.now());
    assert_eq!(successor.sla_deadline, o.clock.now() + Duration::hours(2));
    assert!(successor.approvals.is_empty());
    assert_eq!(successor.target_entity_id, original.target_entity_id);
    assert_eq!(successor.action_details, original.action_details);

    let chain = o.engine.get_chain(&successor_id).await.unwrap();
    let ids: Vec<&str> = chain.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![successor_id.as_str(), original.id.as_str()]);

    let from_root = o.engine.get_chain(&original.id).await.unwrap();
    assert_eq!(from_root.len(), 2);
    assert_eq!(from_root[1].id, successor_id);
}

#[tokio::test]
async fn test_critical_escalates_to_critical() {
    let o = setup_oversight().await;
    let original = o
        .engine
        .create_request(seller_suspension(RiskLevel::Critical, &["a", "b", "c", "d"]))
        .await
        .unwrap();

    let escalated = o
        .engine
        .submit_decision(&original.id, "a", Decision::Escalate, None)
        .await
        .unwrap();
    let successor = o
        .engine
        .get_request(escalated.escalated_to.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(successor.risk_level, RiskLevel::Critical);
}

#[tokio::test]
async fn test_every_transition_is_audited() {
    let o = setup_oversight().await;
    let request = o
        .engine
        .create_request(seller_suspension(RiskLevel::Medium, &["a", "b", "c"]))
        .await
        .unwrap();
    o.clock.advance(Duration::minutes(1));
    o.engine
        .submit_decision(&request.id, "c", Decision::RequestChanges, None)
        .await
        .unwrap();
    o.clock.advance(Duration::minutes(1));
    o.engine.submit_decision(&request.id, "a", Decision::Approve, None).await.unwrap();
    o.clock.advance(Duration::minutes(1));
    o.engine.submit_decision(&request.id, "b", Decision::Approve, None).await.unwrap();

    let page = o
        .ledger
        .query(&LedgerQuery::new().entity("approval_request", &request.id))
        .await
        .unwrap();
    let actions_newest_first: Vec<&str> = page.records.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(
        actions_newest_first,
        vec![
            actions::APPROVED,
            actions::APPROVAL_RECORDED,
            actions::CHANGES_REQUESTED,
            actions::REQUEST_CREATED,
        ]
    );
    assert!(page.records.iter().all(|r| r.category == WORKFLOW_CATEGORY));
    assert!(page.records[0].before_state.is_some());
    assert!(o.ledger.validate().await.unwrap().valid);
}

#[tokio::test]
async fn test_list_pending_ordering_and_filters() {
    let o = setup_oversight().await;
    let low = o
        .engine
        .create_request(seller_suspension(RiskLevel::Low, &["a"]))
        .await
        .unwrap();
    o.clock.advance(Duration::minutes(10));
    let critical = o
        .engine
        .create_request(seller_suspension(RiskLevel::Critical, &["a", "b", "c", "d"]))
        .await
        .unwrap();
    o.clock.advance(Duration::minutes(10));
    let medium = o
        .engine
        .create_request(seller_suspension(RiskLevel::Medium, &["b", "c"]))
        .await
        .unwrap();
    o.clock.advance(Duration::minutes(10));
    let second_medium = o
        .engine
        .create_request(seller_suspension(RiskLevel::Medium, &["b", "c"]))
        .await
        .unwrap();

    let all = o.engine.list_pending(&PendingFilter::default()).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|p| p.request.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            critical.id.as_str(),
            medium.id.as_str(),
            second_medium.id.as_str(),
            low.id.as_str()
        ]
    );

    // Critical SLA (2h) lapses first.
    o.clock.advance(Duration::hours(2));
    let with_overdue = o
        .engine
        .list_pending(&PendingFilter {
            include_past_due: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(with_overdue[0].request.id, critical.id);
    assert!(with_overdue[0].is_overdue);
    assert!(with_overdue[0].hours_remaining < 0.0);

    let without_overdue = o.engine.list_pending(&PendingFilter::default()).await.unwrap();
    assert_eq!(without_overdue.len(), 3);
    assert!(without_overdue.iter().all(|p| !p.is_overdue));

    let assigned_to_a = o
        .engine
        .list_pending(&PendingFilter {
            assigned_to: Some("a".to_string()),
            include_past_due: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(assigned_to_a.len(), 2);

    let medium_only = o
        .engine
        .list_pending(&PendingFilter {
            risk_level: Some(RiskLevel::Medium),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(medium_only.len(), 2);
}

#[tokio::test]
async fn test_sweep_expires_overdue_requests() {
    let mut o = setup_oversight().await;
    let critical = o
        .engine
        .create_request(seller_suspension(RiskLevel::Critical, &["a", "b", "c", "d"]))
        .await
        .unwrap();
    let low = o
        .engine
        .create_request(seller_suspension(RiskLevel::Low, &["a"]))
        .await
        .unwrap();

    o.clock.advance(Duration::hours(3));
    let outcome = o.engine.sweep_overdue(SweepAction::Expire, SWEEP_ACTOR).await.unwrap();
    assert_eq!(outcome.expired, vec![critical.id.clone()]);
    assert!(outcome.escalated.is_empty());

    assert_eq!(
        o.engine.get_request(&critical.id).await.unwrap().status,
        ApprovalStatus::Expired
    );
    assert_eq!(o.engine.get_request(&low.id).await.unwrap().status, ApprovalStatus::Pending);

    let expired = o
        .ledger
        .query(&LedgerQuery::new().action(actions::EXPIRED))
        .await
        .unwrap();
    assert_eq!(expired.total_count, 1);
    assert_eq!(expired.records[0].actor_id, SWEEP_ACTOR);

    let mut saw_expiry = false;
    while let Ok(alert) = o.alerts.try_recv() {
        if let WorkflowAlert::RequestExpired { request_id } = alert {
            assert_eq!(request_id, critical.id);
            saw_expiry = true;
        }
    }
    assert!(saw_expiry);
}

#[tokio::test]
async fn test_sweep_escalates_overdue_requests() {
    let o = setup_oversight().await;
    let high = o
        .engine
        .create_request(seller_suspension(RiskLevel::High, &["a", "b", "c"]))
        .await
        .unwrap();

    o.clock.advance(Duration::hours(7));
    let outcome = o.engine.sweep_overdue(SweepAction::Escalate, SWEEP_ACTOR).await.unwrap();
    assert_eq!(outcome.escalated.len(), 1);
    assert_eq!(outcome.escalated[0].from, high.id);

    let successor = o.engine.get_request(&outcome.escalated[0].to).await.unwrap();
    assert_eq!(successor.risk_level, RiskLevel::Critical);
    assert!(!successor.is_overdue(o.clock.now()));

    let original = o.engine.get_request(&high.id).await.unwrap();
    assert_eq!(original.status, ApprovalStatus::EscalatedFurther);
    assert_eq!(original.escalations[0].approver_id, SWEEP_ACTOR);

    // Nothing left to sweep.
    let second = o.engine.sweep_overdue(SweepAction::Escalate, SWEEP_ACTOR).await.unwrap();
    assert!(second.escalated.is_empty());
}

#[tokio::test]
async fn test_past_due_request_accepts_only_reject_or_escalate() {
    let o = setup_oversight().await;
    let request = o
        .engine
        .create_request(seller_suspension(RiskLevel::Low, &["a"]))
        .await
        .unwrap();

    o.clock.advance(Duration::hours(25));
    let listed = o.engine.get_request(&request.id).await.unwrap();
    assert!(listed.is_overdue(o.clock.now()));

    assert!(matches!(
        o.engine.submit_decision(&request.id, "a", Decision::Approve, None).await,
        Err(OversightError::InvalidState(_))
    ));
    assert!(matches!(
        o.engine.submit_decision(&request.id, "a", Decision::RequestChanges, None).await,
        Err(OversightError::InvalidState(_))
    ));

    let rejected = o
        .engine
        .submit_decision(&request.id, "a", Decision::Reject, None)
        .await
        .unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
}

#[tokio::test]
async fn test_concurrent_approvals_count_once() {
    let o = setup_oversight().await;
    let approvers = ["a", "b", "c", "d"];
    let request = o
        .engine
        .create_request(seller_suspension(RiskLevel::Critical, &approvers))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for round in 0..3 {
        for approver in approvers {
            let engine = o.engine.clone();
            let id = request.id.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .submit_decision(&id, approver, Decision::Approve, Some(format!("round {}", round)))
                    .await
            }));
        }
    }

    let mut invalid_state = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => {}
            Err(OversightError::InvalidState(_)) => invalid_state += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let settled = o.engine.get_request(&request.id).await.unwrap();
    assert_eq!(settled.status, ApprovalStatus::Approved);
    assert_eq!(settled.approvals.len(), 4);
    assert!(invalid_state <= 8);

    let approved = o
        .ledger
        .query(&LedgerQuery::new().action(actions::APPROVED))
        .await
        .unwrap();
    assert_eq!(approved.total_count, 1);
    assert_ok!(o.ledger.validate().await);
}

#[tokio::test]
async fn test_validation_failures_leave_no_trace() {
    let o = setup_oversight().await;

    let mut no_reason = seller_suspension(RiskLevel::Low, &["a"]);
    no_reason.reason = String::new();
    assert!(matches!(
        o.engine.create_request(no_reason).await,
        Err(OversightError::Validation(_))
    ));

    assert!(matches!(
        o.engine.create_request(seller_suspension(RiskLevel::Low, &[])).await,
        Err(OversightError::Validation(_))
    ));

    assert!(o.ledger.is_empty().await.unwrap());
    assert!(o.engine.list_requests(None).await.unwrap().is_empty());
}
