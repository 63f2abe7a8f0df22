//! Audit orchestration engine: retry/escalation loop, task hierarchy
//! generation, urgency scoring and human-in-the-loop review.
//!
//! Workers and validators are injected as capability traits; the engine only
//! decides when to retry, when to degrade the strategy and when to stop and
//! ask a human.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Ties the components below to a [`TaskStore`].
//! - [`RetryLoop`] — Iterate-until-resolved loop around a [`Worker`] and a [`Validator`].
//! - [`HierarchyGenerator`] — Expands objectives into High → Mid → Low tasks.
//! - [`score_urgency`] — Composite materiality/risk/confidence scoring.
//! - [`HitlDesk`] — Holds review requests and applies human decisions.

/// Procedure catalog: assertions per category, procedures per assertion.
pub mod catalog;
/// Append-only conversation log of a retry loop.
pub mod conversation;
/// Orchestrator shell over a task store.
pub mod engine;
/// Task hierarchy generation, merge, enrichment and tree utilities.
pub mod hierarchy;
/// HITL interrupt policy and request desk.
pub mod hitl;
/// Retry/escalation loop and the worker/validator traits.
pub mod retry;
/// Task and conversation persistence.
pub mod task_store;
/// Urgency scoring.
pub mod urgency;

pub use catalog::ProcedureCatalog;
pub use conversation::{ConversationEntry, ConversationLog, MessageType};
pub use engine::{Orchestrator, OrchestratorSettings, PlanMode, PlanReport, TriageReport};
pub use hierarchy::{
    build_tree, check_hierarchy, enrich_existing, merge_with_existing, EnrichmentOutcome,
    HierarchyGenerator, HierarchyOutcome, MergeSummary, TaskNode,
};
pub use hitl::{HitlDesk, HitlPolicy, HitlResolution, LoggingChannel};
pub use retry::{
    run_loop, FnValidator, LoopConfig, LoopOutcome, LoopReport, LoopState, RetryLoop,
    RetryStrategy, ValidationResult, ValidationStatus, Validator, Worker,
};
pub use task_store::{FileTaskStore, InMemoryTaskStore, TaskStore};
pub use urgency::{
    score_urgency, MaterialityCurve, ScoredTask, UrgencyConfig, UrgencyFactors, UrgencyReport,
    UrgencyWeights,
};
