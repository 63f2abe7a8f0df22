#![allow(clippy::unwrap_used, clippy::expect_used)]

use auditflow_core::task::{estimate_hours, DEFAULT_PRIORITY};
use auditflow_core::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 1. risk_score is derived, never trusted from input
// ---------------------------------------------------------------------------

#[test]
fn serialized_risk_score_is_ignored_on_input() {
    let task = AuditTask::new("acme", TaskLevel::High, "Revenue", RiskLevel::Critical);
    let mut value = serde_json::to_value(&task).unwrap();
    assert_eq!(value["risk_score"], 95);

    value["risk_score"] = serde_json::json!(3);
    value["risk_level"] = serde_json::json!("low");
    let back: AuditTask = serde_json::from_value(value).unwrap();
    assert_eq!(back.risk_level, RiskLevel::Low);
    assert_eq!(back.risk_score(), 25);
}

// ---------------------------------------------------------------------------
// 2. Task round trip keeps the recorded urgency
// ---------------------------------------------------------------------------

#[test]
fn task_round_trip_keeps_urgency() {
    let mut task = AuditTask::new("acme", TaskLevel::Mid, "Revenue - Cut-off", RiskLevel::High)
        .with_assertion(Assertion::Cutoff)
        .with_ega_id(Some("EGA-1".into()))
        .with_amount(Some(12_500.0));
    task.record_urgency(71.5).unwrap();

    let json = serde_json::to_string(&task).unwrap();
    let back: AuditTask = serde_json::from_str(&json).unwrap();
    assert_eq!(back, task);
    assert_eq!(back.urgency_score(), Some(71.5));
}

// ---------------------------------------------------------------------------
// 3. Status lifecycle
// ---------------------------------------------------------------------------

#[test]
fn status_moves_forward_only() {
    let mut task = AuditTask::new("acme", TaskLevel::Low, "[EX] Count", RiskLevel::Medium);
    task.transition_to(TaskStatus::InProgress).unwrap();
    task.transition_to(TaskStatus::ReviewRequired).unwrap();
    assert!(task.transition_to(TaskStatus::Pending).is_err());

    task.reset_for_guided_retry().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);

    task.transition_to(TaskStatus::Completed).unwrap();
    let err = task.reset_for_guided_retry().unwrap_err();
    assert!(matches!(err, AuditflowError::InvalidTransition { .. }));
    assert!(task
        .transition_to(TaskStatus::Failed {
            reason: "late".into()
        })
        .is_err());
}

#[test]
fn failed_status_serializes_with_reason() {
    let status = TaskStatus::Failed {
        reason: "evidence missing".into(),
    };
    let json = serde_json::to_string(&status).unwrap();
    assert!(json.contains("evidence missing"));
    let back: TaskStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(back, status);
}

// ---------------------------------------------------------------------------
// 4. Objective parsing is lenient
// ---------------------------------------------------------------------------

#[test]
fn objective_from_minimal_json() {
    let obj: Objective = serde_json::from_str(
        r#"{"id": "EGA-3", "name": "Payroll", "risk_level": "Significant",
            "metadata": {"category": "Payroll", "amount": 40000}}"#,
    )
    .unwrap();
    assert_eq!(
        RiskLevel::parse(obj.risk_level.as_deref().unwrap()),
        Some(RiskLevel::High)
    );
    assert_eq!(obj.priority, None);
    assert_eq!(obj.metadata.amount, Some(40_000.0));
}

#[test]
fn defaults_and_hours_table() {
    let task = AuditTask::new("acme", TaskLevel::Mid, "x", RiskLevel::Critical);
    assert_eq!(task.priority, DEFAULT_PRIORITY);
    assert_eq!(task.estimated_hours, 16.0);
    assert_eq!(estimate_hours(TaskLevel::High, RiskLevel::Low), 16.0);
    assert_eq!(estimate_hours(TaskLevel::Low, RiskLevel::High), 6.0);
    assert_eq!(task.with_priority(500).priority, 100);
}

// ---------------------------------------------------------------------------
// 5. HITL request lifecycle
// ---------------------------------------------------------------------------

#[test]
fn hitl_request_serialization() {
    let mut req = HitlRequest::new(
        Uuid::new_v4(),
        "acme",
        HitlRequestType::RetryExhausted,
        88.0,
        "Guidance needed",
    )
    .with_context("3 attempts");
    assert_eq!(req.urgency_level, UrgencyLevel::Critical);
    req.transition(HitlRequestStatus::Rejected).unwrap();
    req.response = Some(HitlResponse::reject("lead", "out of scope"));

    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["request_type"], "retry_exhausted");
    assert_eq!(value["status"], "rejected");
    assert_eq!(value["urgency_level"], "critical");

    let back: HitlRequest = serde_json::from_value(value).unwrap();
    assert_eq!(back, req);
}

// ---------------------------------------------------------------------------
// 6. Error display
// ---------------------------------------------------------------------------

#[test]
fn error_display() {
    let err = AuditflowError::Validation("weights sum to 1.5".into());
    assert_eq!(err.to_string(), "Validation error: weights sum to 1.5");

    let io: AuditflowError = std::io::Error::other("disk full").into();
    assert!(io.to_string().contains("disk full"));

    let json: AuditflowError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert!(matches!(json, AuditflowError::Json(_)));
}
