//! Core types and error definitions for the Auditflow engine.
//!
//! This crate provides the domain model shared across all Auditflow crates:
//! the audit task hierarchy, source objectives, human-in-the-loop request
//! types, and the unified error enum.
//!
//! # Main types
//!
//! - [`AuditflowError`] — Unified error enum for all Auditflow subsystems.
//! - [`AuditflowResult`] — Convenience alias for `Result<T, AuditflowError>`.
//! - [`AuditTask`] — One node of the High → Mid → Low task hierarchy.
//! - [`Objective`] — A top-level audit objective (EGA) that roots a sub-tree.
//! - [`HitlRequest`] — A pause point awaiting a human decision.

/// Human-in-the-loop request types and the notification channel trait.
pub mod approval;
/// Audit task model: levels, statuses, risk levels and assertions.
pub mod task;

pub use approval::{
    HitlDecision, HitlRequest, HitlRequestStatus, HitlRequestType, HitlResponse, HumanChannel,
    UrgencyLevel,
};
pub use task::{
    Assertion, AuditTask, Objective, ObjectiveMetadata, RiskLevel, TaskLevel, TaskStatus,
};

// --- Error types ---

/// Top-level error type for the Auditflow engine.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum AuditflowError {
    /// An input contract was violated (bad weights, empty batch, out-of-range value).
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error raised while building a task hierarchy.
    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    /// An error returned by a worker capability during one attempt.
    #[error("Worker error: {0}")]
    Worker(String),

    /// An error from a task or conversation store.
    #[error("Store error: {0}")]
    Store(String),

    /// An error from the human-in-the-loop desk or notification channel.
    #[error("HITL error: {0}")]
    Hitl(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A state machine refused a transition.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// State the entity was in.
        from: String,
        /// State that was requested.
        to: String,
    },

    /// No task with the given id exists in the project.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// No HITL request with the given id exists.
    #[error("HITL request not found: {0}")]
    RequestNotFound(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`AuditflowError`].
pub type AuditflowResult<T> = Result<T, AuditflowError>;
