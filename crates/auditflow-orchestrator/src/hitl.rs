//! Human-in-the-loop interrupt policy and request desk.
//!
//! [`HitlPolicy`] decides which requests to file; [`HitlDesk`] keeps them,
//! notifies the human through a [`HumanChannel`] and applies responses to
//! both the request and the task it concerns.

use crate::conversation::MessageType;
use crate::retry::LoopReport;
use crate::urgency::UrgencyReport;
use async_trait::async_trait;
use auditflow_core::{
    AuditTask, AuditflowError, AuditflowResult, HitlDecision, HitlRequest, HitlRequestStatus,
    HitlRequestType, HitlResponse, HumanChannel, TaskStatus, UrgencyLevel,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Builds HITL requests for the three interrupt reasons.
pub struct HitlPolicy;

impl HitlPolicy {
    /// One urgency-threshold request per candidate, most urgent first.
    pub fn requests_for(report: &UrgencyReport) -> Vec<HitlRequest> {
        report
            .hitl_candidates
            .iter()
            .map(|scored| {
                let f = scored.factors;
                HitlRequest::new(
                    scored.task.id,
                    scored.task.project_id.clone(),
                    HitlRequestType::UrgencyThreshold,
                    scored.urgency_score,
                    format!("Review required: {}", scored.task.name),
                )
                .with_context(format!(
                    "Urgency {:.2} (materiality {:.2}, risk {:.2}, confidence {:.2})",
                    scored.urgency_score, f.materiality, f.risk, f.confidence
                ))
            })
            .collect()
    }

    /// Request filed when a retry loop ran out of attempts, escalated or
    /// settled for a partial result.
    pub fn for_exhaustion(task: &AuditTask, report: &LoopReport) -> HitlRequest {
        let strategies: Vec<&str> = report.strategies_tried.iter().map(|s| s.name()).collect();
        let entries = report.conversation.entries();
        let last_problem = entries
            .iter()
            .rev()
            .find(|e| e.message_type == MessageType::Escalation)
            .or_else(|| entries.last())
            .map(|e| e.content.clone())
            .unwrap_or_default();

        HitlRequest::new(
            task.id,
            task.project_id.clone(),
            HitlRequestType::RetryExhausted,
            base_score(task),
            format!("Guidance needed: {}", task.name),
        )
        .with_context(format!(
            "{} attempts made with strategies [{}]. {last_problem}",
            report.attempts_made,
            strategies.join(", ")
        ))
    }

    /// Request filed when someone spots a logical flaw. Always at least high urgency.
    pub fn for_logical_flaw(task: &AuditTask, description: &str) -> HitlRequest {
        let score = base_score(task);
        let level = UrgencyLevel::from_score(score).max(UrgencyLevel::High);
        HitlRequest::new(
            task.id,
            task.project_id.clone(),
            HitlRequestType::LogicalFlaw,
            score,
            format!("Logical flaw: {}", task.name),
        )
        .with_context(description)
        .with_urgency_level(level)
    }
}

/// Recorded urgency if the scorer has run, otherwise the risk score.
fn base_score(task: &AuditTask) -> f64 {
    task.urgency_score()
        .unwrap_or_else(|| f64::from(task.risk_score()))
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Channel that only writes the request to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingChannel;

#[async_trait]
impl HumanChannel for LoggingChannel {
    async fn notify(&self, request: &HitlRequest) -> AuditflowResult<()> {
        info!(
            request_id = %request.id,
            task_id = %request.task_id,
            project_id = %request.project_id,
            kind = %request.request_type,
            urgency = %request.urgency_level,
            score = request.urgency_score,
            title = %request.title,
            "HITL request awaiting human decision"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Desk
// ---------------------------------------------------------------------------

/// What a response did.
#[derive(Debug, Clone)]
pub struct HitlResolution {
    /// The answered request, in its new state.
    pub request: HitlRequest,
    /// The re-scoped request created by an escalation.
    pub follow_up: Option<HitlRequest>,
}

/// In-memory holder of HITL requests.
pub struct HitlDesk {
    requests: RwLock<Vec<HitlRequest>>,
    channel: Arc<dyn HumanChannel>,
}

impl HitlDesk {
    /// Empty desk notifying through `channel`.
    pub fn new(channel: Arc<dyn HumanChannel>) -> Self {
        Self {
            requests: RwLock::new(Vec::new()),
            channel,
        }
    }

    /// Store a request and notify the human. A failed notification is logged, not returned.
    pub async fn submit(&self, request: HitlRequest) -> Uuid {
        let id = request.id;
        if let Err(e) = self.channel.notify(&request).await {
            warn!(request_id = %id, error = %e, "HITL notification failed");
        }
        self.requests.write().await.push(request);
        id
    }

    /// Load previously stored requests without notifying. Known ids are skipped.
    pub async fn restore(&self, stored: Vec<HitlRequest>) -> usize {
        let mut requests = self.requests.write().await;
        let mut added = 0;
        for request in stored {
            if requests.iter().all(|r| r.id != request.id) {
                requests.push(request);
                added += 1;
            }
        }
        added
    }

    /// Look up a request by id.
    pub async fn get(&self, id: Uuid) -> Option<HitlRequest> {
        self.requests.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Pending requests, most urgent first, then oldest first.
    pub async fn pending(&self) -> Vec<HitlRequest> {
        let mut pending: Vec<HitlRequest> = self
            .requests
            .read()
            .await
            .iter()
            .filter(|r| r.status == HitlRequestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.urgency_level
                .cmp(&a.urgency_level)
                .then(b.urgency_score.total_cmp(&a.urgency_score))
                .then(a.created_at.cmp(&b.created_at))
        });
        pending
    }

    /// Every request of one project, in filing order.
    pub async fn for_project(&self, project_id: &str) -> Vec<HitlRequest> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect()
    }

    /// Every request filed for one task, in filing order.
    pub async fn for_task(&self, task_id: Uuid) -> Vec<HitlRequest> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Apply a human decision.
    ///
    /// - approve: the request is approved, the task is left as is.
    /// - reject: the request is rejected and the task fails with the reviewer's reason.
    /// - escalate: the request is escalated and a new pending request, one
    ///   urgency tier higher, is filed for the same task.
    ///
    /// Nothing changes if the request or the task refuses the transition.
    pub async fn respond(
        &self,
        id: Uuid,
        response: HitlResponse,
        task: &mut AuditTask,
    ) -> AuditflowResult<HitlResolution> {
        let follow_up = {
            let mut requests = self.requests.write().await;
            let request = requests
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| AuditflowError::RequestNotFound(id.to_string()))?;

            if request.task_id != task.id {
                return Err(AuditflowError::Hitl(format!(
                    "request {id} belongs to task {}, not {}",
                    request.task_id, task.id
                )));
            }

            let target = response.decision.target_status();
            if !request.status.can_transition_to(target) {
                return Err(AuditflowError::InvalidTransition {
                    from: request.status.to_string(),
                    to: target.to_string(),
                });
            }

            if let Some(score) = response.rescored_urgency {
                if !(0.0..=100.0).contains(&score) {
                    return Err(AuditflowError::Validation(format!(
                        "rescored urgency {score} outside [0, 100]"
                    )));
                }
            }

            if response.decision == HitlDecision::Reject {
                let reason = response
                    .comment
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| format!("Rejected by {}", response.reviewer));
                task.transition_to(TaskStatus::Failed { reason })?;
            }

            request.transition(target)?;
            request.response = Some(response.clone());

            info!(
                request_id = %id,
                task_id = %task.id,
                decision = ?response.decision,
                reviewer = %response.reviewer,
                "HITL request answered"
            );

            if response.decision == HitlDecision::Escalate {
                let score = response.rescored_urgency.unwrap_or(request.urgency_score);
                let mut next = HitlRequest::new(
                    request.task_id,
                    request.project_id.clone(),
                    request.request_type,
                    score,
                    request.title.clone(),
                )
                .with_context(match &response.comment {
                    Some(comment) => format!(
                        "{}\nEscalated by {}: {comment}",
                        request.context, response.reviewer
                    ),
                    None => format!("{}\nEscalated by {}", request.context, response.reviewer),
                })
                .with_urgency_level(request.urgency_level.raised());
                next.escalated_from = Some(request.id);
                Some(next)
            } else {
                None
            }
        };

        let request = self
            .get(id)
            .await
            .ok_or_else(|| AuditflowError::RequestNotFound(id.to_string()))?;

        if let Some(next) = &follow_up {
            self.submit(next.clone()).await;
        }

        Ok(HitlResolution { request, follow_up })
    }

    /// Put an escalated request back in the pending queue.
    pub async fn requeue(&self, id: Uuid) -> AuditflowResult<HitlRequest> {
        let mut requests = self.requests.write().await;
        let request = requests
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AuditflowError::RequestNotFound(id.to_string()))?;
        request.transition(HitlRequestStatus::Pending)?;
        Ok(request.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::urgency::{score_urgency, UrgencyConfig};
    use auditflow_core::{RiskLevel, TaskLevel};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingChannel {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl HumanChannel for CountingChannel {
        async fn notify(&self, _request: &HitlRequest) -> AuditflowResult<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn review_task() -> AuditTask {
        let mut task = AuditTask::new("p1", TaskLevel::Mid, "Revenue - Cut-off", RiskLevel::High);
        task.transition_to(TaskStatus::ReviewRequired).unwrap();
        task
    }

    async fn desk_with(task: &AuditTask, score: f64) -> (HitlDesk, Uuid, Arc<CountingChannel>) {
        let channel = Arc::new(CountingChannel::default());
        let desk = HitlDesk::new(channel.clone());
        let id = desk
            .submit(HitlRequest::new(
                task.id,
                "p1",
                HitlRequestType::UrgencyThreshold,
                score,
                "Review",
            ))
            .await;
        (desk, id, channel)
    }

    #[tokio::test]
    async fn approve_leaves_task_alone() {
        let mut task = review_task();
        let (desk, id, channel) = desk_with(&task, 80.0).await;
        let res = desk
            .respond(id, HitlResponse::approve("senior"), &mut task)
            .await
            .unwrap();
        assert_eq!(res.request.status, HitlRequestStatus::Approved);
        assert!(res.request.resolved_at.is_some());
        assert_eq!(task.status, TaskStatus::ReviewRequired);
        assert!(desk.pending().await.is_empty());
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reject_fails_task_with_reason() {
        let mut task = review_task();
        let (desk, id, _) = desk_with(&task, 80.0).await;
        desk.respond(id, HitlResponse::reject("senior", "sample too small"), &mut task)
            .await
            .unwrap();
        assert_eq!(
            task.status,
            TaskStatus::Failed {
                reason: "sample too small".into()
            }
        );
    }

    #[tokio::test]
    async fn approved_request_cannot_be_rejected() {
        let mut task = review_task();
        let (desk, id, _) = desk_with(&task, 80.0).await;
        desk.respond(id, HitlResponse::approve("a"), &mut task).await.unwrap();
        let err = desk
            .respond(id, HitlResponse::reject("b", "no"), &mut task)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditflowError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::ReviewRequired);
        assert_eq!(desk.get(id).await.unwrap().status, HitlRequestStatus::Approved);
    }

    #[tokio::test]
    async fn escalation_files_follow_up_one_tier_higher() {
        let mut task = review_task();
        let (desk, id, channel) = desk_with(&task, 72.0).await;
        let res = desk
            .respond(
                id,
                HitlResponse::escalate("junior").with_comment("needs partner sign-off"),
                &mut task,
            )
            .await
            .unwrap();

        assert_eq!(res.request.status, HitlRequestStatus::Escalated);
        let next = res.follow_up.unwrap();
        assert_eq!(next.escalated_from, Some(id));
        assert_eq!(next.status, HitlRequestStatus::Pending);
        assert_eq!(next.urgency_level, UrgencyLevel::Critical);
        assert_eq!(next.urgency_score, 72.0);
        assert!(next.context.contains("partner sign-off"));
        assert_eq!(desk.pending().await.len(), 1);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn escalation_uses_rescore() {
        let mut task = review_task();
        let (desk, id, _) = desk_with(&task, 45.0).await;
        let res = desk
            .respond(id, HitlResponse::escalate("x").with_rescore(60.0), &mut task)
            .await
            .unwrap();
        let next = res.follow_up.unwrap();
        assert_eq!(next.urgency_score, 60.0);
        assert_eq!(next.urgency_level, UrgencyLevel::High);

        let bad = desk
            .respond(next.id, HitlResponse::escalate("x").with_rescore(120.0), &mut task)
            .await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn requeue_only_from_escalated() {
        let mut task = review_task();
        let (desk, id, _) = desk_with(&task, 80.0).await;
        assert!(desk.requeue(id).await.is_err());
        desk.respond(id, HitlResponse::escalate("x"), &mut task).await.unwrap();
        let back = desk.requeue(id).await.unwrap();
        assert_eq!(back.status, HitlRequestStatus::Pending);
        assert_eq!(desk.pending().await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_request_and_wrong_task() {
        let mut task = review_task();
        let (desk, id, _) = desk_with(&task, 80.0).await;
        let err = desk
            .respond(Uuid::new_v4(), HitlResponse::approve("x"), &mut task)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditflowError::RequestNotFound(_)));

        let mut other = review_task();
        let err = desk
            .respond(id, HitlResponse::approve("x"), &mut other)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditflowError::Hitl(_)));
    }

    #[tokio::test]
    async fn restore_skips_known_requests_and_stays_quiet() {
        let task = review_task();
        let (desk, id, channel) = desk_with(&task, 80.0).await;
        let stored = desk.for_project("p1").await;
        let other = HitlRequest::new(
            Uuid::new_v4(),
            "p2",
            HitlRequestType::LogicalFlaw,
            90.0,
            "Flaw",
        );

        let added = desk.restore(vec![stored[0].clone(), other.clone()]).await;
        assert_eq!(added, 1);
        assert_eq!(desk.get(id).await.unwrap(), stored[0]);
        assert_eq!(desk.for_project("p2").await, vec![other]);
        assert_eq!(desk.pending().await.len(), 2);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_builds_one_request_per_candidate() {
        let config = UrgencyConfig::default().with_materiality(1_000.0);
        let hot = AuditTask::new("p1", TaskLevel::Mid, "Hot", RiskLevel::Critical)
            .with_amount(Some(5_000.0))
            .with_confidence(0.1);
        let cold = AuditTask::new("p1", TaskLevel::Mid, "Cold", RiskLevel::Low)
            .with_amount(Some(1.0))
            .with_confidence(0.99);
        let report = score_urgency(&[hot.clone(), cold], &config).unwrap();
        let requests = HitlPolicy::requests_for(&report);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].task_id, hot.id);
        assert_eq!(requests[0].request_type, HitlRequestType::UrgencyThreshold);
    }

    #[test]
    fn logical_flaw_is_at_least_high() {
        let task = AuditTask::new("p1", TaskLevel::Low, "Recount", RiskLevel::Low);
        let request = HitlPolicy::for_logical_flaw(&task, "sample drawn from wrong period");
        assert_eq!(request.urgency_level, UrgencyLevel::High);
        assert_eq!(request.urgency_score, 25.0);
        assert_eq!(request.context, "sample drawn from wrong period");
    }
}
