//! Human-in-the-loop (HITL) request types.
//!
//! These types live in `auditflow-core` so that the orchestrator (which
//! files and resolves requests) and any notification channel implementation
//! can share them without depending on each other.

use crate::{AuditflowError, AuditflowResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Urgency band over the 0–100 urgency score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    /// Score below 40.
    Low,
    /// Score in [40, 70).
    Medium,
    /// Score in [70, 85).
    High,
    /// Score of 85 or more.
    Critical,
}

impl UrgencyLevel {
    /// Band a score: critical >= 85, high >= 70, medium >= 40, otherwise low.
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            UrgencyLevel::Critical
        } else if score >= 70.0 {
            UrgencyLevel::High
        } else if score >= 40.0 {
            UrgencyLevel::Medium
        } else {
            UrgencyLevel::Low
        }
    }

    /// One tier up, saturating at critical.
    pub fn raised(self) -> Self {
        match self {
            UrgencyLevel::Low => UrgencyLevel::Medium,
            UrgencyLevel::Medium => UrgencyLevel::High,
            UrgencyLevel::High | UrgencyLevel::Critical => UrgencyLevel::Critical,
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrgencyLevel::Low => write!(f, "low"),
            UrgencyLevel::Medium => write!(f, "medium"),
            UrgencyLevel::High => write!(f, "high"),
            UrgencyLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Why a HITL request was filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlRequestType {
    /// The task's urgency score crossed the HITL threshold.
    UrgencyThreshold,
    /// The retry loop ran out of attempts.
    RetryExhausted,
    /// A reviewer or validator found a logical flaw in the work.
    LogicalFlaw,
}

impl std::fmt::Display for HitlRequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HitlRequestType::UrgencyThreshold => write!(f, "urgency_threshold"),
            HitlRequestType::RetryExhausted => write!(f, "retry_exhausted"),
            HitlRequestType::LogicalFlaw => write!(f, "logical_flaw"),
        }
    }
}

/// Lifecycle status of a HITL request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlRequestStatus {
    /// Waiting for a reviewer.
    Pending,
    /// Accepted; the task may proceed.
    Approved,
    /// Refused; the task fails.
    Rejected,
    /// Handed up to a more senior reviewer.
    Escalated,
}

impl HitlRequestStatus {
    /// `pending -> {approved, rejected, escalated}` and `escalated -> pending`.
    pub fn can_transition_to(self, next: HitlRequestStatus) -> bool {
        matches!(
            (self, next),
            (HitlRequestStatus::Pending, HitlRequestStatus::Approved)
                | (HitlRequestStatus::Pending, HitlRequestStatus::Rejected)
                | (HitlRequestStatus::Pending, HitlRequestStatus::Escalated)
                | (HitlRequestStatus::Escalated, HitlRequestStatus::Pending)
        )
    }

    /// Approved and rejected requests are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, HitlRequestStatus::Approved | HitlRequestStatus::Rejected)
    }
}

impl std::fmt::Display for HitlRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HitlRequestStatus::Pending => write!(f, "pending"),
            HitlRequestStatus::Approved => write!(f, "approved"),
            HitlRequestStatus::Rejected => write!(f, "rejected"),
            HitlRequestStatus::Escalated => write!(f, "escalated"),
        }
    }
}

/// The decision a human reviewer made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlDecision {
    /// Let the task proceed.
    Approve,
    /// Fail the task.
    Reject,
    /// Pass the request to a more senior reviewer.
    Escalate,
}

impl HitlDecision {
    /// Request status this decision leads to.
    pub fn target_status(self) -> HitlRequestStatus {
        match self {
            HitlDecision::Approve => HitlRequestStatus::Approved,
            HitlDecision::Reject => HitlRequestStatus::Rejected,
            HitlDecision::Escalate => HitlRequestStatus::Escalated,
        }
    }
}

/// A human reviewer's answer to a [`HitlRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlResponse {
    /// What the reviewer decided.
    pub decision: HitlDecision,
    /// Who answered.
    pub reviewer: String,
    /// Free-text comment. Used as the failure reason on rejection.
    #[serde(default)]
    pub comment: Option<String>,
    /// Fresh urgency score for the re-scoped request on escalation.
    #[serde(default)]
    pub rescored_urgency: Option<f64>,
    /// When the answer was given.
    pub responded_at: DateTime<Utc>,
}

impl HitlResponse {
    /// Response with no comment and no rescore.
    pub fn new(decision: HitlDecision, reviewer: impl Into<String>) -> Self {
        Self {
            decision,
            reviewer: reviewer.into(),
            comment: None,
            rescored_urgency: None,
            responded_at: Utc::now(),
        }
    }

    /// Approval by `reviewer`.
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self::new(HitlDecision::Approve, reviewer)
    }

    /// Rejection with the reason the task fails with.
    pub fn reject(reviewer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(HitlDecision::Reject, reviewer).with_comment(reason)
    }

    /// Escalation by `reviewer`.
    pub fn escalate(reviewer: impl Into<String>) -> Self {
        Self::new(HitlDecision::Escalate, reviewer)
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Attach a fresh urgency score for the escalated request.
    pub fn with_rescore(mut self, score: f64) -> Self {
        self.rescored_urgency = Some(score);
        self
    }
}

/// A pause point that requires a human decision before the task proceeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlRequest {
    /// Request id.
    pub id: Uuid,
    /// Task the request is about.
    pub task_id: Uuid,
    /// Project of the task.
    pub project_id: String,
    /// Why the request was filed.
    pub request_type: HitlRequestType,
    /// Current lifecycle status.
    pub status: HitlRequestStatus,
    /// Urgency band shown to the reviewer.
    pub urgency_level: UrgencyLevel,
    /// Urgency score in `[0, 100]`.
    pub urgency_score: f64,
    /// One-line summary.
    pub title: String,
    /// Details for the reviewer.
    pub context: String,
    /// The request this one re-scopes, when created by an escalation.
    #[serde(default)]
    pub escalated_from: Option<Uuid>,
    /// The reviewer's answer, once given.
    #[serde(default)]
    pub response: Option<HitlResponse>,
    /// When the request was filed.
    pub created_at: DateTime<Utc>,
    /// When the request left the pending state for good.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl HitlRequest {
    /// Pending request, banded from `urgency_score`.
    pub fn new(
        task_id: Uuid,
        project_id: impl Into<String>,
        request_type: HitlRequestType,
        urgency_score: f64,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            project_id: project_id.into(),
            request_type,
            status: HitlRequestStatus::Pending,
            urgency_level: UrgencyLevel::from_score(urgency_score),
            urgency_score,
            title: title.into(),
            context: String::new(),
            escalated_from: None,
            response: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Set the reviewer-facing details.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Override the band derived from the score.
    pub fn with_urgency_level(mut self, level: UrgencyLevel) -> Self {
        self.urgency_level = level;
        self
    }

    /// Apply a status change, refusing anything the state machine forbids.
    pub fn transition(&mut self, next: HitlRequestStatus) -> AuditflowResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AuditflowError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.resolved_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Channel through which HITL requests reach a human.
/// Implementations can be log sinks, chat bots, ticket queues, etc.
/// Responses come back later through the orchestrator, not through this call.
#[async_trait]
pub trait HumanChannel: Send + Sync {
    /// Tell a human that `request` awaits a decision.
    async fn notify(&self, request: &HitlRequest) -> AuditflowResult<()>;
}
