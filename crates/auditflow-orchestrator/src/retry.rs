//! Iterate-until-resolved retry loop.
//!
//! A [`RetryLoop`] drives one [`Worker`] invocation per attempt, validates the
//! result, degrades the strategy after every unsuccessful attempt and hands
//! the task to a human once attempts are exhausted. Worker errors and
//! validation failures are recorded in the conversation log and never escape
//! the loop.

use crate::conversation::{
    ConversationEntry, ConversationLog, MessageType, HUMAN_AGENT, MANAGER_AGENT, VALIDATOR_AGENT,
};
use async_trait::async_trait;
use auditflow_core::AuditflowResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Attempts made by a fresh loop.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Attempts made after a human has supplied guidance.
pub const GUIDED_MAX_ATTEMPTS: u32 = 2;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// How a worker should approach an attempt. Later strategies are more degraded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RetryStrategy {
    /// Full-effort attempt.
    Default,
    /// Narrower scope, fewer checks.
    Simplified,
    /// Split the work into smaller steps.
    Decomposed,
    /// Worker-specific strategy, by name.
    Custom(String),
}

impl RetryStrategy {
    /// Name used in config and logs.
    pub fn name(&self) -> &str {
        match self {
            RetryStrategy::Default => "default",
            RetryStrategy::Simplified => "simplified",
            RetryStrategy::Decomposed => "decomposed",
            RetryStrategy::Custom(name) => name,
        }
    }
}

impl From<String> for RetryStrategy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "default" => RetryStrategy::Default,
            "simplified" => RetryStrategy::Simplified,
            "decomposed" => RetryStrategy::Decomposed,
            _ => RetryStrategy::Custom(s),
        }
    }
}

impl From<RetryStrategy> for String {
    fn from(s: RetryStrategy) -> Self {
        s.name().to_string()
    }
}

impl std::fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `default`, `simplified`, `decomposed`.
pub fn default_strategies() -> Vec<RetryStrategy> {
    vec![
        RetryStrategy::Default,
        RetryStrategy::Simplified,
        RetryStrategy::Decomposed,
    ]
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Verdict of a [`Validator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// The result is acceptable.
    Success,
    /// Usable but incomplete.
    Partial,
    /// Unusable.
    Failure,
}

/// Verdict of a [`Validator`] on one attempt's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Verdict.
    pub status: ValidationStatus,
    /// Problems found in a partial result.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Why the result failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Hints for the next attempt.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    /// Accept the result.
    pub fn success() -> Self {
        Self {
            status: ValidationStatus::Success,
            issues: Vec::new(),
            error: None,
            suggestions: Vec::new(),
        }
    }

    /// Accept part of the result, listing what is missing.
    pub fn partial(issues: Vec<String>) -> Self {
        Self {
            status: ValidationStatus::Partial,
            issues,
            error: None,
            suggestions: Vec::new(),
        }
    }

    /// Reject the result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::Failure,
            issues: Vec::new(),
            error: Some(error.into()),
            suggestions: Vec::new(),
        }
    }

    /// Add hints for the next attempt.
    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    fn summary(&self) -> String {
        match (&self.error, self.issues.is_empty()) {
            (Some(err), _) => err.clone(),
            (None, false) => self.issues.join("; "),
            (None, true) => "no reason given".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// State handed to a worker on every attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    /// Task being worked, if any.
    #[serde(default)]
    pub task_id: Option<Uuid>,
    /// Task payload handed to the worker.
    #[serde(default)]
    pub input: Value,
    /// Human guidance, oldest first.
    #[serde(default)]
    pub guidance: Vec<String>,
}

impl LoopState {
    /// State with no task and no guidance.
    pub fn new(input: Value) -> Self {
        Self {
            task_id: None,
            input,
            guidance: Vec::new(),
        }
    }

    /// State for one task.
    pub fn for_task(task_id: Uuid, input: Value) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::new(input)
        }
    }

    /// A copy of this state with one more piece of guidance appended.
    pub fn with_guidance(&self, guidance: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.guidance.push(guidance.into());
        next
    }
}

/// Anything that can perform one attempt at a task: an LLM-backed agent, a rule engine, a person.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name used in the conversation log.
    fn name(&self) -> &str;

    /// Make one attempt using `strategy`.
    async fn run(&self, state: &LoopState, strategy: &RetryStrategy) -> AuditflowResult<Value>;
}

/// Judges the result of one attempt.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Judge one result.
    async fn validate(&self, result: &Value) -> ValidationResult;
}

/// Adapts a synchronous closure into a [`Validator`].
pub struct FnValidator<F> {
    check: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&Value) -> ValidationResult + Send + Sync,
{
    /// Wrap `check`.
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F> Validator for FnValidator<F>
where
    F: Fn(&Value) -> ValidationResult + Send + Sync,
{
    async fn validate(&self, result: &Value) -> ValidationResult {
        (self.check)(result)
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Terminal outcome of a loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopOutcome {
    /// A result passed validation.
    Success,
    /// Attempts ran out with a partial result kept.
    Partial,
    /// Attempts ran out with nothing usable.
    Failure,
    /// Attempts ran out and a human must decide.
    HitlRequired,
}

/// Retry loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Attempts per run.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Strategies to step through, one per attempt; the last repeats.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<RetryStrategy>,
    /// When false, exhaustion ends in `Partial`/`Failure` instead of `HitlRequired`.
    #[serde(default = "default_escalate")]
    pub escalate_on_exhaustion: bool,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_escalate() -> bool {
    true
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            strategies: default_strategies(),
            escalate_on_exhaustion: true,
        }
    }
}

/// Everything a loop run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopReport {
    /// How the run ended.
    pub outcome: LoopOutcome,
    /// State after the last attempt.
    pub final_state: LoopState,
    /// The validated result on success, otherwise the last partial or failed one.
    pub result: Option<Value>,
    /// Attempts actually made.
    pub attempts_made: u32,
    /// Strategies used, in order.
    pub strategies_tried: Vec<RetryStrategy>,
    /// Everything said during the run.
    pub conversation: ConversationLog,
}

impl LoopReport {
    /// Whether the run ended in success.
    pub fn is_success(&self) -> bool {
        self.outcome == LoopOutcome::Success
    }

    /// Whether the run ended waiting for a human.
    pub fn needs_human(&self) -> bool {
        self.outcome == LoopOutcome::HitlRequired
    }
}

/// Drives a worker through its strategies until validation succeeds or a human is needed.
///
/// Holds no mutable state, so one instance can serve many tasks concurrently.
pub struct RetryLoop {
    worker: Arc<dyn Worker>,
    validator: Arc<dyn Validator>,
    config: LoopConfig,
}

impl RetryLoop {
    /// Loop with the default config.
    pub fn new(worker: Arc<dyn Worker>, validator: Arc<dyn Validator>) -> Self {
        Self {
            worker,
            validator,
            config: LoopConfig::default(),
        }
    }

    /// Replace the whole config.
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    /// Set the strategy ladder.
    pub fn with_strategies(mut self, strategies: Vec<RetryStrategy>) -> Self {
        self.config.strategies = strategies;
        self
    }

    /// The config in use.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop from a fresh conversation.
    pub async fn run(&self, initial: LoopState) -> LoopReport {
        self.drive(initial, self.config.max_attempts, ConversationLog::new())
            .await
    }

    /// Rerun the loop with human guidance injected into the state.
    ///
    /// The guided phase starts a new conversation (opened by the human's
    /// answer) and is limited to [`GUIDED_MAX_ATTEMPTS`] attempts.
    pub async fn resume_with_guidance(&self, state: &LoopState, guidance: &str) -> LoopReport {
        let state = state.with_guidance(guidance);
        let mut log = ConversationLog::new();
        log.append(ConversationEntry::new(
            HUMAN_AGENT,
            MANAGER_AGENT,
            MessageType::Answer,
            guidance,
        ));
        info!(task_id = ?state.task_id, "Resuming loop with human guidance");
        self.drive(state, GUIDED_MAX_ATTEMPTS, log).await
    }

    async fn drive(&self, state: LoopState, max_attempts: u32, mut log: ConversationLog) -> LoopReport {
        let worker_name = self.worker.name().to_string();
        let strategies = &self.config.strategies;

        if max_attempts == 0 || strategies.is_empty() {
            let reason = if max_attempts == 0 {
                "max_attempts must be at least 1"
            } else {
                "no retry strategies configured"
            };
            warn!(task_id = ?state.task_id, reason, "Retry loop cannot start");
            log.append(ConversationEntry::new(
                MANAGER_AGENT,
                &worker_name,
                MessageType::Error,
                format!("Loop aborted: {reason}"),
            ));
            return LoopReport {
                outcome: LoopOutcome::Failure,
                final_state: state,
                result: None,
                attempts_made: 0,
                strategies_tried: Vec::new(),
                conversation: log,
            };
        }

        let mut attempt = 0u32;
        let mut strategy_index = 0usize;
        let mut tried: Vec<RetryStrategy> = Vec::new();
        let mut last_result: Option<Value> = None;
        let mut last_partial: Option<Value> = None;
        let mut last_problem = String::new();

        while attempt < max_attempts {
            attempt += 1;
            // Past the end of the list, keep using the most degraded strategy.
            let strategy = strategies[strategy_index.min(strategies.len() - 1)].clone();
            if !tried.contains(&strategy) {
                tried.push(strategy.clone());
            }

            log.append(
                ConversationEntry::new(
                    MANAGER_AGENT,
                    &worker_name,
                    MessageType::Instruction,
                    format!("Attempt {attempt}/{max_attempts} using the {strategy} strategy"),
                )
                .with_metadata("attempt", json!(attempt))
                .with_metadata("strategy", json!(strategy.name())),
            );

            match self.worker.run(&state, &strategy).await {
                Ok(result) => {
                    log.append(
                        ConversationEntry::new(
                            &worker_name,
                            MANAGER_AGENT,
                            MessageType::Response,
                            result.to_string(),
                        )
                        .with_metadata("attempt", json!(attempt)),
                    );

                    let validation = self.validator.validate(&result).await;
                    match validation.status {
                        ValidationStatus::Success => {
                            log.append(ConversationEntry::new(
                                VALIDATOR_AGENT,
                                &worker_name,
                                MessageType::Feedback,
                                "Validation passed",
                            ));
                            info!(
                                task_id = ?state.task_id,
                                attempt,
                                strategy = %strategy,
                                "Retry loop resolved"
                            );
                            return LoopReport {
                                outcome: LoopOutcome::Success,
                                final_state: state,
                                result: Some(result),
                                attempts_made: attempt,
                                strategies_tried: tried,
                                conversation: log,
                            };
                        }
                        ValidationStatus::Partial => {
                            last_problem = validation.summary();
                            log.append(
                                ConversationEntry::new(
                                    VALIDATOR_AGENT,
                                    &worker_name,
                                    MessageType::Feedback,
                                    format!("Partial result: {last_problem}"),
                                )
                                .with_metadata("issues", json!(validation.issues))
                                .with_metadata("suggestions", json!(validation.suggestions)),
                            );
                            last_partial = Some(result.clone());
                            last_result = Some(result);
                            strategy_index += 1;
                        }
                        ValidationStatus::Failure => {
                            last_problem = validation.summary();
                            log.append(
                                ConversationEntry::new(
                                    VALIDATOR_AGENT,
                                    &worker_name,
                                    MessageType::Error,
                                    format!("Validation failed: {last_problem}"),
                                )
                                .with_metadata("suggestions", json!(validation.suggestions)),
                            );
                            last_result = Some(result);
                            strategy_index += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        task_id = ?state.task_id,
                        attempt,
                        strategy = %strategy,
                        error = %e,
                        "Worker attempt failed"
                    );
                    last_problem = e.to_string();
                    log.append(
                        ConversationEntry::new(
                            &worker_name,
                            MANAGER_AGENT,
                            MessageType::Error,
                            format!("Worker error: {e}"),
                        )
                        .with_metadata("attempt", json!(attempt)),
                    );
                    strategy_index += 1;
                }
            }
        }

        if !self.config.escalate_on_exhaustion {
            let (outcome, result) = match last_partial {
                Some(partial) => (LoopOutcome::Partial, Some(partial)),
                None => (LoopOutcome::Failure, last_result),
            };
            info!(task_id = ?state.task_id, ?outcome, "Retry loop exhausted without escalation");
            return LoopReport {
                outcome,
                final_state: state,
                result,
                attempts_made: attempt,
                strategies_tried: tried,
                conversation: log,
            };
        }

        let tried_names: Vec<&str> = tried.iter().map(RetryStrategy::name).collect();
        log.append(
            ConversationEntry::new(
                MANAGER_AGENT,
                HUMAN_AGENT,
                MessageType::Escalation,
                format!(
                    "Unresolved after {attempt} attempts (strategies tried: {}). Last problem: {last_problem}. Human guidance required.",
                    tried_names.join(", ")
                ),
            )
            .with_metadata("attempts", json!(attempt))
            .with_metadata("strategies", json!(tried_names)),
        );
        warn!(
            task_id = ?state.task_id,
            attempts = attempt,
            "Retry loop exhausted, escalating to human"
        );

        LoopReport {
            outcome: LoopOutcome::HitlRequired,
            final_state: state,
            result: last_result,
            attempts_made: attempt,
            strategies_tried: tried,
            conversation: log,
        }
    }
}

/// Run a loop with optional overrides for the attempt budget and strategy list.
pub async fn run_loop(
    worker: Arc<dyn Worker>,
    initial_state: LoopState,
    validator: Arc<dyn Validator>,
    max_attempts: Option<u32>,
    strategies: Option<Vec<RetryStrategy>>,
) -> LoopReport {
    let mut config = LoopConfig::default();
    if let Some(max) = max_attempts {
        config.max_attempts = max;
    }
    if let Some(strategies) = strategies {
        config.strategies = strategies;
    }
    RetryLoop::new(worker, validator)
        .with_config(config)
        .run(initial_state)
        .await
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use auditflow_core::AuditflowError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A worker that returns a scripted sequence of results and records strategies.
    struct ScriptedWorker {
        results: tokio::sync::Mutex<Vec<AuditflowResult<Value>>>,
        strategies_seen: tokio::sync::Mutex<Vec<RetryStrategy>>,
        call_count: AtomicU32,
    }

    impl ScriptedWorker {
        fn new(results: Vec<AuditflowResult<Value>>) -> Arc<Self> {
            Arc::new(Self {
                results: tokio::sync::Mutex::new(results),
                strategies_seen: tokio::sync::Mutex::new(Vec::new()),
                call_count: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, _state: &LoopState, strategy: &RetryStrategy) -> AuditflowResult<Value> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.strategies_seen.lock().await.push(strategy.clone());
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Ok(json!({"ok": false}))
            } else {
                results.remove(0)
            }
        }
    }

    fn ok_field_validator() -> Arc<dyn Validator> {
        Arc::new(FnValidator::new(|v: &Value| match v["ok"].as_str() {
            Some("yes") => ValidationResult::success(),
            Some("partly") => ValidationResult::partial(vec!["two samples missing".into()]),
            _ => ValidationResult::failure("result not usable"),
        }))
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let worker = ScriptedWorker::new(vec![Ok(json!({"ok": "yes"}))]);
        let report = RetryLoop::new(worker.clone(), ok_field_validator())
            .run(LoopState::new(json!({})))
            .await;

        assert_eq!(report.outcome, LoopOutcome::Success);
        assert_eq!(report.attempts_made, 1);
        assert_eq!(worker.calls(), 1);
        let kinds: Vec<MessageType> = report
            .conversation
            .entries()
            .iter()
            .map(|e| e.message_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                MessageType::Instruction,
                MessageType::Response,
                MessageType::Feedback
            ]
        );
    }

    #[tokio::test]
    async fn always_failing_worker_escalates_once() {
        let worker = ScriptedWorker::new(vec![]);
        let report = RetryLoop::new(worker.clone(), ok_field_validator())
            .run(LoopState::new(json!({})))
            .await;

        assert_eq!(report.outcome, LoopOutcome::HitlRequired);
        assert_eq!(worker.calls(), 3);
        assert_eq!(report.attempts_made, 3);
        assert_eq!(report.conversation.count(MessageType::Escalation), 1);
        let last = report.conversation.last().unwrap();
        assert_eq!(last.to_agent, HUMAN_AGENT);
        assert!(last.content.contains("default, simplified, decomposed"));
        assert_eq!(report.result, Some(json!({"ok": false})));
    }

    #[tokio::test]
    async fn errors_then_success() {
        let worker = ScriptedWorker::new(vec![
            Err(AuditflowError::Worker("ledger unavailable".into())),
            Err(AuditflowError::Worker("timeout".into())),
            Ok(json!({"ok": "yes"})),
        ]);
        let report = RetryLoop::new(worker.clone(), ok_field_validator())
            .run(LoopState::new(json!({})))
            .await;

        assert_eq!(report.outcome, LoopOutcome::Success);
        assert_eq!(worker.calls(), 3);
        assert_eq!(report.conversation.count(MessageType::Error), 2);
        assert!(report.conversation.entries()[1]
            .content
            .contains("ledger unavailable"));
    }

    #[tokio::test]
    async fn strategies_degrade_and_stick_to_last() {
        let worker = ScriptedWorker::new(vec![]);
        let report = RetryLoop::new(worker.clone(), ok_field_validator())
            .with_max_attempts(5)
            .with_strategies(vec![RetryStrategy::Default, RetryStrategy::Simplified])
            .run(LoopState::new(json!({})))
            .await;

        let seen = worker.strategies_seen.lock().await.clone();
        assert_eq!(
            seen,
            vec![
                RetryStrategy::Default,
                RetryStrategy::Simplified,
                RetryStrategy::Simplified,
                RetryStrategy::Simplified,
                RetryStrategy::Simplified,
            ]
        );
        assert_eq!(report.strategies_tried.len(), 2);
    }

    #[tokio::test]
    async fn partial_result_is_kept_as_last_known() {
        let worker = ScriptedWorker::new(vec![
            Ok(json!({"ok": "partly", "n": 1})),
            Err(AuditflowError::Worker("boom".into())),
            Err(AuditflowError::Worker("boom".into())),
        ]);
        let report = RetryLoop::new(worker, ok_field_validator())
            .run(LoopState::new(json!({})))
            .await;

        assert_eq!(report.outcome, LoopOutcome::HitlRequired);
        assert_eq!(report.result, Some(json!({"ok": "partly", "n": 1})));
        let feedback = &report.conversation.entries()[2];
        assert_eq!(feedback.message_type, MessageType::Feedback);
        assert!(feedback.content.contains("two samples missing"));
    }

    #[tokio::test]
    async fn no_escalation_reports_partial_or_failure() {
        let config = LoopConfig {
            max_attempts: 2,
            escalate_on_exhaustion: false,
            ..LoopConfig::default()
        };

        let worker = ScriptedWorker::new(vec![Ok(json!({"ok": "partly"}))]);
        let report = RetryLoop::new(worker, ok_field_validator())
            .with_config(config.clone())
            .run(LoopState::new(json!({})))
            .await;
        assert_eq!(report.outcome, LoopOutcome::Partial);
        assert_eq!(report.conversation.count(MessageType::Escalation), 0);

        let worker = ScriptedWorker::new(vec![]);
        let report = RetryLoop::new(worker, ok_field_validator())
            .with_config(config)
            .run(LoopState::new(json!({})))
            .await;
        assert_eq!(report.outcome, LoopOutcome::Failure);
    }

    #[tokio::test]
    async fn invalid_config_fails_without_calling_worker() {
        let worker = ScriptedWorker::new(vec![]);
        let report = run_loop(
            worker.clone(),
            LoopState::new(json!({})),
            ok_field_validator(),
            Some(0),
            None,
        )
        .await;
        assert_eq!(report.outcome, LoopOutcome::Failure);
        assert_eq!(worker.calls(), 0);
        assert_eq!(report.conversation.count(MessageType::Error), 1);
    }

    #[tokio::test]
    async fn guided_resume_starts_fresh_with_two_attempts() {
        let worker = ScriptedWorker::new(vec![]);
        let lp = RetryLoop::new(worker.clone(), ok_field_validator());
        let first = lp.run(LoopState::new(json!({"account": "revenue"}))).await;
        assert!(first.needs_human());

        let guided = lp
            .resume_with_guidance(&first.final_state, "use the March bank statement")
            .await;
        assert_eq!(worker.calls(), 5);
        assert_eq!(guided.attempts_made, 2);
        assert_eq!(guided.final_state.guidance, vec!["use the March bank statement"]);
        let opening = &guided.conversation.entries()[0];
        assert_eq!(opening.message_type, MessageType::Answer);
        assert_eq!(opening.from_agent, HUMAN_AGENT);
        assert_eq!(guided.conversation.count(MessageType::Escalation), 1);
        assert_eq!(guided.conversation.count(MessageType::Instruction), 2);
    }

    #[test]
    fn strategy_serde_uses_plain_names() {
        let json = serde_json::to_string(&default_strategies()).unwrap();
        assert_eq!(json, r#"["default","simplified","decomposed"]"#);
        let custom: RetryStrategy = serde_json::from_str(r#""sample_only""#).unwrap();
        assert_eq!(custom, RetryStrategy::Custom("sample_only".into()));
    }
}
