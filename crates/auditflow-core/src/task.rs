use crate::{AuditflowError, AuditflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority assigned when an objective does not carry one.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Category assigned when neither the objective nor a parent supplies one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Level of a task inside the three-level audit hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLevel {
    /// Objective-level task, root of a sub-tree.
    High,
    /// Assertion-level task under a High task.
    Mid,
    /// Procedure-level task under a Mid task.
    Low,
}

impl TaskLevel {
    /// The level a parent of this task must have, if any.
    pub fn parent_level(self) -> Option<TaskLevel> {
        match self {
            TaskLevel::High => None,
            TaskLevel::Mid => Some(TaskLevel::High),
            TaskLevel::Low => Some(TaskLevel::Mid),
        }
    }
}

impl std::fmt::Display for TaskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskLevel::High => write!(f, "high"),
            TaskLevel::Mid => write!(f, "mid"),
            TaskLevel::Low => write!(f, "low"),
        }
    }
}

/// Assessed risk of an audit area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine area.
    Low,
    /// Default when nothing better is known.
    Medium,
    /// Significant risk.
    High,
    /// Highest risk; scored 95.
    Critical,
}

impl RiskLevel {
    /// Parse free text into a risk level. Returns `None` for anything unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "low" | "minor" => Some(RiskLevel::Low),
            "medium" | "moderate" | "med" => Some(RiskLevel::Medium),
            "high" | "significant" => Some(RiskLevel::High),
            "critical" | "very high" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    /// Lenient parse that falls back to [`RiskLevel::Medium`].
    pub fn parse_level(s: &str) -> Self {
        Self::parse(s).unwrap_or(RiskLevel::Medium)
    }

    /// Fixed 0–100 score for this level.
    pub fn score(self) -> u8 {
        match self {
            RiskLevel::Critical => 95,
            RiskLevel::High => 75,
            RiskLevel::Medium => 50,
            RiskLevel::Low => 25,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Lifecycle status of an audit task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    Pending,
    /// A worker is on it.
    InProgress,
    /// Waiting for a human decision.
    ReviewRequired,
    /// Done.
    Completed,
    /// Given up, with the reason.
    Failed { reason: String },
}

impl TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::ReviewRequired => 2,
            TaskStatus::Completed | TaskStatus::Failed { .. } => 3,
        }
    }

    /// Completed and failed tasks accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed { .. })
    }

    /// Forward-only check. Guided retries use [`AuditTask::reset_for_guided_retry`].
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::ReviewRequired => write!(f, "review_required"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { .. } => write!(f, "failed"),
        }
    }
}

/// The six standard financial-statement assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assertion {
    /// Recorded items exist.
    Existence,
    /// Everything that should be recorded is.
    Completeness,
    /// Amounts are stated correctly.
    Valuation,
    /// Rights and obligations.
    Rights,
    /// Presentation and disclosure.
    Presentation,
    /// Transactions land in the right period.
    Cutoff,
}

impl Assertion {
    /// All assertions in catalog order.
    pub const ALL: [Assertion; 6] = [
        Assertion::Existence,
        Assertion::Completeness,
        Assertion::Valuation,
        Assertion::Rights,
        Assertion::Presentation,
        Assertion::Cutoff,
    ];

    /// Two-letter code used for traceability on procedure tasks.
    pub fn code(self) -> &'static str {
        match self {
            Assertion::Existence => "EX",
            Assertion::Completeness => "CO",
            Assertion::Valuation => "VA",
            Assertion::Rights => "RO",
            Assertion::Presentation => "PD",
            Assertion::Cutoff => "CU",
        }
    }

    /// Human readable name.
    pub fn label(self) -> &'static str {
        match self {
            Assertion::Existence => "Existence",
            Assertion::Completeness => "Completeness",
            Assertion::Valuation => "Valuation",
            Assertion::Rights => "Rights and Obligations",
            Assertion::Presentation => "Presentation and Disclosure",
            Assertion::Cutoff => "Cut-off",
        }
    }

    /// Find the assertion a piece of text refers to, by label or code.
    pub fn infer(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        let found = Self::ALL.into_iter().find(|a| match a {
            Assertion::Existence => lower.contains("existence"),
            Assertion::Completeness => lower.contains("completeness"),
            Assertion::Valuation => lower.contains("valuation"),
            Assertion::Rights => lower.contains("rights"),
            Assertion::Presentation => {
                lower.contains("presentation") || lower.contains("disclosure")
            }
            Assertion::Cutoff => {
                lower.contains("cut-off") || lower.contains("cutoff") || lower.contains("cut off")
            }
        });
        found.or_else(|| {
            let upper = text.to_uppercase();
            Self::ALL
                .into_iter()
                .find(|a| upper.split(|c: char| !c.is_alphanumeric()).any(|w| w == a.code()))
        })
    }
}

impl std::fmt::Display for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Free-form metadata attached to an objective.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveMetadata {
    /// Account or business area the objective covers.
    #[serde(default)]
    pub category: Option<String>,
    /// Monetary amount at stake, compared against materiality when scoring urgency.
    #[serde(default)]
    pub amount: Option<f64>,
}

/// A top-level audit objective (EGA) parsed from an engagement document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// Objective id, e.g. `EGA-1`.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Free-text risk level; unparsable values default to medium.
    #[serde(default)]
    pub risk_level: Option<String>,
    /// Priority; clamped to `1..=100` when tasks are generated.
    #[serde(default)]
    pub priority: Option<u32>,
    /// Category and amount.
    #[serde(default)]
    pub metadata: ObjectiveMetadata,
}

impl Objective {
    /// Objective with no risk, priority or metadata; the generator fills the defaults.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            risk_level: None,
            priority: None,
            metadata: ObjectiveMetadata::default(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Free-text risk, parsed leniently when the hierarchy is generated.
    pub fn with_risk(mut self, risk: impl Into<String>) -> Self {
        self.risk_level = Some(risk.into());
        self
    }

    /// Raw priority; clamped to `1..=100` on the generated tasks.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Account or business area, copied to every generated task.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = Some(category.into());
        self
    }

    /// Monetary amount at stake.
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.metadata.amount = Some(amount);
        self
    }
}

/// Estimated effort for a task, by level and risk. Higher risk and higher level mean more hours.
pub fn estimate_hours(level: TaskLevel, risk: RiskLevel) -> f32 {
    match (level, risk) {
        (TaskLevel::High, RiskLevel::Critical) => 40.0,
        (TaskLevel::High, RiskLevel::High) => 32.0,
        (TaskLevel::High, RiskLevel::Medium) => 24.0,
        (TaskLevel::High, RiskLevel::Low) => 16.0,
        (TaskLevel::Mid, RiskLevel::Critical) => 16.0,
        (TaskLevel::Mid, RiskLevel::High) => 12.0,
        (TaskLevel::Mid, RiskLevel::Medium) => 8.0,
        (TaskLevel::Mid, RiskLevel::Low) => 6.0,
        (TaskLevel::Low, RiskLevel::Critical) => 8.0,
        (TaskLevel::Low, RiskLevel::High) => 6.0,
        (TaskLevel::Low, RiskLevel::Medium) => 4.0,
        (TaskLevel::Low, RiskLevel::Low) => 2.0,
    }
}

/// Clamp an arbitrary priority into the valid `1..=100` range.
pub fn clamp_priority(priority: i64) -> u8 {
    priority.clamp(1, 100) as u8
}

/// One node of the High → Mid → Low audit task hierarchy.
///
/// `risk_score` is not stored: it is always derived from `risk_level`, and a
/// serialized `risk_score` is ignored when reading a task back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TaskRecord", into = "TaskRecord")]
pub struct AuditTask {
    /// Task id.
    pub id: Uuid,
    /// Owning project.
    pub project_id: String,
    /// Parent task; `None` only for High tasks.
    pub parent_task_id: Option<Uuid>,
    /// Position in the hierarchy.
    pub level: TaskLevel,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Account or business area.
    pub category: String,
    /// Assessed risk.
    pub risk_level: RiskLevel,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Priority in `1..=100`.
    pub priority: u8,
    /// Assertion tested, for Mid and Low tasks.
    pub assertion: Option<Assertion>,
    /// Procedure performed, for Low tasks.
    pub procedure_type: Option<String>,
    /// Estimated effort in hours.
    pub estimated_hours: f32,
    /// Source objective id, preserved through all descendants.
    pub ega_id: Option<String>,
    /// Monetary amount associated with the task, if known.
    pub amount: Option<f64>,
    /// AI-assessed confidence in the current result, in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    urgency_score: Option<f64>,
}

impl AuditTask {
    /// Pending task with default category, priority and the estimated hours
    /// for its level and risk.
    pub fn new(
        project_id: impl Into<String>,
        level: TaskLevel,
        name: impl Into<String>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            parent_task_id: None,
            level,
            name: name.into(),
            description: String::new(),
            category: DEFAULT_CATEGORY.to_string(),
            risk_level,
            status: TaskStatus::Pending,
            priority: DEFAULT_PRIORITY,
            assertion: None,
            procedure_type: None,
            estimated_hours: estimate_hours(level, risk_level),
            ega_id: None,
            amount: None,
            confidence: None,
            created_at: Utc::now(),
            urgency_score: None,
        }
    }

    /// Attach the task under `parent_id`.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_id);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the priority, clamped to `1..=100`.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    /// Tie the task to one financial-statement assertion.
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertion = Some(assertion);
        self
    }

    /// Name the audit procedure a Low task performs.
    pub fn with_procedure(mut self, procedure: impl Into<String>) -> Self {
        self.procedure_type = Some(procedure.into());
        self
    }

    /// Set the source objective id.
    pub fn with_ega_id(mut self, ega_id: Option<String>) -> Self {
        self.ega_id = ega_id;
        self
    }

    /// Set the monetary amount.
    pub fn with_amount(mut self, amount: Option<f64>) -> Self {
        self.amount = amount;
        self
    }

    /// Set the AI-assessed confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Score derived from `risk_level`.
    pub fn risk_score(&self) -> u8 {
        self.risk_level.score()
    }

    /// Urgency recorded by the urgency scorer, if it has run.
    pub fn urgency_score(&self) -> Option<f64> {
        self.urgency_score
    }

    /// Record an urgency score. Called by the urgency scorer only.
    pub fn record_urgency(&mut self, score: f64) -> AuditflowResult<()> {
        if !(0.0..=100.0).contains(&score) {
            return Err(AuditflowError::Validation(format!(
                "urgency score {score} outside [0, 100]"
            )));
        }
        self.urgency_score = Some(score);
        Ok(())
    }

    /// Move the task forward in its lifecycle.
    pub fn transition_to(&mut self, next: TaskStatus) -> AuditflowResult<()> {
        if !self.status.can_transition_to(&next) {
            return Err(AuditflowError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Put the task back in progress for a human-guided retry.
    ///
    /// This is the only backwards transition and is refused for completed tasks.
    pub fn reset_for_guided_retry(&mut self) -> AuditflowResult<()> {
        if self.status == TaskStatus::Completed {
            return Err(AuditflowError::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::InProgress.to_string(),
            });
        }
        self.status = TaskStatus::InProgress;
        Ok(())
    }

    /// Let a task whose review was approved go back to work.
    ///
    /// Only `review_required -> in_progress`; the caller checks the approval.
    pub fn resume_after_review(&mut self) -> AuditflowResult<()> {
        if self.status != TaskStatus::ReviewRequired {
            return Err(AuditflowError::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::InProgress.to_string(),
            });
        }
        self.status = TaskStatus::InProgress;
        Ok(())
    }
}

/// Wire form of [`AuditTask`]: carries the derived `risk_score` on output.
#[derive(Serialize, Deserialize)]
struct TaskRecord {
    id: Uuid,
    project_id: String,
    #[serde(default)]
    parent_task_id: Option<Uuid>,
    level: TaskLevel,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    risk_level: RiskLevel,
    #[serde(default)]
    risk_score: u8,
    status: TaskStatus,
    priority: u8,
    #[serde(default)]
    assertion: Option<Assertion>,
    #[serde(default)]
    procedure_type: Option<String>,
    #[serde(default)]
    estimated_hours: f32,
    #[serde(default)]
    urgency_score: Option<f64>,
    #[serde(default)]
    ega_id: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    created_at: DateTime<Utc>,
}

impl From<TaskRecord> for AuditTask {
    fn from(r: TaskRecord) -> Self {
        Self {
            id: r.id,
            project_id: r.project_id,
            parent_task_id: r.parent_task_id,
            level: r.level,
            name: r.name,
            description: r.description,
            category: r.category,
            risk_level: r.risk_level,
            status: r.status,
            priority: clamp_priority(i64::from(r.priority)),
            assertion: r.assertion,
            procedure_type: r.procedure_type,
            estimated_hours: r.estimated_hours,
            ega_id: r.ega_id,
            amount: r.amount,
            confidence: r.confidence,
            created_at: r.created_at,
            urgency_score: r.urgency_score.filter(|s| (0.0..=100.0).contains(s)),
        }
    }
}

impl From<AuditTask> for TaskRecord {
    fn from(t: AuditTask) -> Self {
        Self {
            risk_score: t.risk_score(),
            id: t.id,
            project_id: t.project_id,
            parent_task_id: t.parent_task_id,
            level: t.level,
            name: t.name,
            description: t.description,
            category: t.category,
            risk_level: t.risk_level,
            status: t.status,
            priority: t.priority,
            assertion: t.assertion,
            procedure_type: t.procedure_type,
            estimated_hours: t.estimated_hours,
            urgency_score: t.urgency_score,
            ega_id: t.ega_id,
            amount: t.amount,
            confidence: t.confidence,
            created_at: t.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_score_mapping() {
        assert_eq!(RiskLevel::Critical.score(), 95);
        assert_eq!(RiskLevel::High.score(), 75);
        assert_eq!(RiskLevel::Medium.score(), 50);
        assert_eq!(RiskLevel::Low.score(), 25);
    }

    #[test]
    fn test_parse_risk_level() {
        assert_eq!(RiskLevel::parse("HIGH"), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse(" very_high "), Some(RiskLevel::Critical));
        assert_eq!(RiskLevel::parse("whatever"), None);
        assert_eq!(RiskLevel::parse_level("whatever"), RiskLevel::Medium);
    }

    #[test]
    fn test_risk_score_follows_risk_level() {
        let mut task = AuditTask::new("p1", TaskLevel::High, "Revenue", RiskLevel::Low);
        assert_eq!(task.risk_score(), 25);
        task.risk_level = RiskLevel::Critical;
        assert_eq!(task.risk_score(), 95);
    }

    #[test]
    fn test_serialized_risk_score_is_ignored_on_input() {
        let task = AuditTask::new("p1", TaskLevel::Mid, "Cash", RiskLevel::High);
        let mut json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["risk_score"], 75);

        json["risk_score"] = serde_json::json!(3);
        let back: AuditTask = serde_json::from_value(json).unwrap();
        assert_eq!(back.risk_score(), 75);
        assert_eq!(back, task);
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        let mut task = AuditTask::new("p1", TaskLevel::Low, "Confirm", RiskLevel::Medium);
        task.transition_to(TaskStatus::InProgress).unwrap();
        task.transition_to(TaskStatus::ReviewRequired).unwrap();
        assert!(task.transition_to(TaskStatus::Pending).is_err());
        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task
            .transition_to(TaskStatus::Failed {
                reason: "late".into()
            })
            .is_err());
    }

    #[test]
    fn test_guided_reset() {
        let mut task = AuditTask::new("p1", TaskLevel::Low, "Confirm", RiskLevel::Medium);
        task.transition_to(TaskStatus::ReviewRequired).unwrap();
        task.reset_for_guided_retry().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);

        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.reset_for_guided_retry().is_err());
    }

    #[test]
    fn test_resume_after_review_only_from_review() {
        let mut task = AuditTask::new("p1", TaskLevel::Mid, "Revenue - Cut-off", RiskLevel::High);
        assert!(task.resume_after_review().is_err());
        assert!(task.transition_to(TaskStatus::ReviewRequired).is_ok());
        assert!(task.transition_to(TaskStatus::InProgress).is_err());

        task.resume_after_review().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.resume_after_review().is_err());
    }

    #[test]
    fn test_record_urgency_range() {
        let mut task = AuditTask::new("p1", TaskLevel::High, "Inventory", RiskLevel::High);
        assert!(task.urgency_score().is_none());
        task.record_urgency(72.5).unwrap();
        assert_eq!(task.urgency_score(), Some(72.5));
        assert!(task.record_urgency(101.0).is_err());
        assert!(task.record_urgency(f64::NAN).is_err());
    }

    #[test]
    fn test_estimate_hours_ordering() {
        assert!(
            estimate_hours(TaskLevel::High, RiskLevel::High)
                > estimate_hours(TaskLevel::Mid, RiskLevel::High)
        );
        assert!(
            estimate_hours(TaskLevel::Low, RiskLevel::Critical)
                > estimate_hours(TaskLevel::Low, RiskLevel::Low)
        );
    }

    #[test]
    fn test_assertion_infer() {
        assert_eq!(
            Assertion::infer("Revenue - Cut-off testing"),
            Some(Assertion::Cutoff)
        );
        assert_eq!(Assertion::infer("[VA] inventory"), Some(Assertion::Valuation));
        assert_eq!(Assertion::infer("walkthrough"), None);
    }

    #[test]
    fn test_clamp_priority() {
        assert_eq!(clamp_priority(0), 1);
        assert_eq!(clamp_priority(250), 100);
        assert_eq!(clamp_priority(42), 42);
    }

    #[test]
    fn test_objective_deserializes_with_defaults() {
        let obj: Objective = serde_json::from_str(r#"{"id": "EGA-1", "name": "Revenue"}"#).unwrap();
        assert_eq!(obj.priority, None);
        assert_eq!(obj.metadata, ObjectiveMetadata::default());
    }
}
