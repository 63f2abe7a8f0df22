use crate::catalog::ProcedureCatalog;
use crate::conversation::{MessageType, HUMAN_AGENT};
use crate::hierarchy::{enrich_existing, merge_with_existing, HierarchyGenerator};
use crate::hitl::{HitlDesk, HitlPolicy, HitlResolution};
use crate::retry::{LoopConfig, LoopOutcome, LoopReport, LoopState, RetryLoop, Validator, Worker};
use crate::task_store::TaskStore;
use crate::urgency::{score_urgency, UrgencyConfig};
use auditflow_core::{
    AuditTask, AuditflowError, AuditflowResult, HitlRequest, HitlRequestStatus, HitlRequestType,
    HitlResponse, HumanChannel, Objective, TaskStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default number of retry loops run at once by [`Orchestrator::execute_many`].
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Everything the orchestrator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Weights, materiality and threshold used by [`Orchestrator::triage`].
    pub urgency: UrgencyConfig,
    /// Attempt budget and strategy ladder for every retry loop.
    pub retry: LoopConfig,
    /// Procedures used to expand objectives.
    pub catalog: ProcedureCatalog,
    /// Whether planning generates Low-level procedure tasks by default.
    pub include_low_level: bool,
    /// Default parallelism of [`Orchestrator::execute_many`].
    pub max_concurrency: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            urgency: UrgencyConfig::default(),
            retry: LoopConfig::default(),
            catalog: ProcedureCatalog::default(),
            include_low_level: true,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// How [`Orchestrator::plan`] built the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Hierarchies generated from objectives and merged into the project.
    Generated,
    /// Stored tasks back-filled in place.
    Enriched,
}

/// Summary of one [`Orchestrator::plan`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    /// Project the plan applies to.
    pub project_id: String,
    /// Whether anything was stored.
    pub success: bool,
    pub mode: PlanMode,
    /// High tasks generated.
    pub high_level_count: usize,
    /// Mid tasks generated.
    pub mid_level_count: usize,
    /// Low tasks generated.
    pub low_level_count: usize,
    /// Stored tasks removed because their objective was regenerated.
    pub replaced: usize,
    /// Stored tasks kept untouched.
    pub preserved: usize,
    /// Stored tasks that had at least one field back-filled.
    pub enriched: usize,
    /// Tasks in the project after the call.
    pub total_tasks: usize,
    /// Problems that stopped objectives or the whole run.
    pub errors: Vec<String>,
    /// Problems that were worked around.
    pub warnings: Vec<String>,
}

impl PlanReport {
    fn new(project_id: &str, mode: PlanMode) -> Self {
        Self {
            project_id: project_id.to_string(),
            success: false,
            mode,
            high_level_count: 0,
            mid_level_count: 0,
            low_level_count: 0,
            replaced: 0,
            preserved: 0,
            enriched: 0,
            total_tasks: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Summary of one [`Orchestrator::triage`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageReport {
    /// Project that was triaged.
    pub project_id: String,
    /// Tasks that received an urgency score.
    pub scored: usize,
    /// Requests filed by this run, most urgent first.
    pub requests: Vec<HitlRequest>,
    /// Scoring and filing notes.
    pub warnings: Vec<String>,
}

/// Ties the generator, scorer, retry loop and HITL desk to a task store.
///
/// Cloning is cheap; clones share the store, the desk and the project locks.
/// Every read-modify-write of a project's tasks or requests holds that
/// project's lock, so concurrent calls on clones do not overwrite each other.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    desk: Arc<HitlDesk>,
    generator: HierarchyGenerator,
    settings: Arc<OrchestratorSettings>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    // Projects whose stored requests are already in the desk.
    loaded: Arc<Mutex<HashSet<String>>>,
}

impl Orchestrator {
    /// Orchestrator over `store`, notifying reviewers through `channel`.
    pub fn new(
        store: Arc<dyn TaskStore>,
        channel: Arc<dyn HumanChannel>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            desk: Arc::new(HitlDesk::new(channel)),
            generator: HierarchyGenerator::new(settings.catalog.clone()),
            settings: Arc::new(settings),
            locks: Arc::new(Mutex::new(HashMap::new())),
            loaded: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The backing task store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// The HITL desk shared by all clones.
    pub fn desk(&self) -> &Arc<HitlDesk> {
        &self.desk
    }

    /// The settings the orchestrator was built with.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// Build or refresh a project's task list.
    ///
    /// With objectives, their hierarchies are generated and merged into the
    /// stored list, replacing tasks of the same objectives. Without, the
    /// stored tasks are enriched in place.
    pub async fn plan(
        &self,
        project_id: &str,
        objectives: &[Objective],
        include_low_level: Option<bool>,
    ) -> AuditflowResult<PlanReport> {
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;
        let existing = self.store.tasks(project_id).await?;

        if objectives.is_empty() {
            let mut report = PlanReport::new(project_id, PlanMode::Enriched);
            if existing.is_empty() {
                warn!(project_id, "Nothing to plan: no objectives and no stored tasks");
                report
                    .errors
                    .push("No objectives supplied and the project has no tasks".into());
                return Ok(report);
            }
            let outcome = enrich_existing(existing);
            self.store.save_tasks(project_id, &outcome.tasks).await?;
            report.success = true;
            report.enriched = outcome.enriched;
            report.preserved = outcome.tasks.len();
            report.total_tasks = outcome.tasks.len();
            report.warnings = outcome.warnings;
            return Ok(report);
        }

        let include_low = include_low_level.unwrap_or(self.settings.include_low_level);
        let outcome = self.generator.generate(objectives, project_id, include_low);
        let mut report = PlanReport::new(project_id, PlanMode::Generated);
        report.high_level_count = outcome.high_level_count;
        report.mid_level_count = outcome.mid_level_count;
        report.low_level_count = outcome.low_level_count;
        report.errors = outcome.errors;
        report.warnings = outcome.warnings;
        if !outcome.success {
            return Ok(report);
        }

        let merged = merge_with_existing(existing, outcome.tasks);
        self.store.save_tasks(project_id, &merged.tasks).await?;
        report.success = true;
        report.replaced = merged.replaced;
        report.preserved = merged.preserved;
        report.total_tasks = merged.tasks.len();

        info!(
            project_id,
            total = report.total_tasks,
            replaced = report.replaced,
            preserved = report.preserved,
            "Project planned"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Triage
    // -----------------------------------------------------------------------

    /// Score every stored task and file a review for each one over the threshold.
    ///
    /// Candidates that are finished or under review, and candidates with a
    /// pending request, are scored but not filed again.
    pub async fn triage(&self, project_id: &str) -> AuditflowResult<TriageReport> {
        self.load_requests(project_id).await?;
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let tasks = self.store.tasks(project_id).await?;
        let report = score_urgency(&tasks, &self.settings.urgency)?;
        let mut warnings = report.warnings.clone();

        let mut scored: Vec<AuditTask> = report
            .scored_tasks
            .iter()
            .map(|s| s.task.clone())
            .collect();
        let pending: HashSet<Uuid> = self
            .desk
            .pending()
            .await
            .into_iter()
            .map(|r| r.task_id)
            .collect();

        let mut to_file = Vec::new();
        for request in HitlPolicy::requests_for(&report) {
            let Some(task) = scored.iter_mut().find(|t| t.id == request.task_id) else {
                continue;
            };
            if pending.contains(&task.id) {
                continue;
            }
            if task.status.is_terminal() || task.status == TaskStatus::ReviewRequired {
                warnings.push(format!(
                    "Task {} ({}) is {} and was not sent for review",
                    task.id, task.name, task.status
                ));
                continue;
            }
            task.transition_to(TaskStatus::ReviewRequired)?;
            to_file.push(request);
        }

        self.store.save_tasks(project_id, &scored).await?;
        for request in &to_file {
            self.desk.submit(request.clone()).await;
        }
        self.persist_requests(project_id).await?;

        info!(
            project_id,
            scored = scored.len(),
            filed = to_file.len(),
            "Triage complete"
        );
        Ok(TriageReport {
            project_id: project_id.to_string(),
            scored: scored.len(),
            requests: to_file,
            warnings,
        })
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run one task through the retry loop and record the outcome.
    ///
    /// A task under review runs only once its requests are answered and at
    /// least one was approved.
    pub async fn execute_task(
        &self,
        project_id: &str,
        task_id: Uuid,
        worker: Arc<dyn Worker>,
        validator: Arc<dyn Validator>,
    ) -> AuditflowResult<LoopReport> {
        self.load_requests(project_id).await?;
        let task = {
            let lock = self.project_lock(project_id).await;
            let _guard = lock.lock().await;
            let mut task = self.store.task(project_id, task_id).await?;
            if task.status == TaskStatus::ReviewRequired {
                self.ensure_review_approved(&task).await?;
                task.resume_after_review()?;
            } else {
                task.transition_to(TaskStatus::InProgress)?;
            }
            self.store.update_task(&task).await?;
            task
        };

        info!(project_id, task_id = %task_id, worker = worker.name(), "Executing task");
        let state = LoopState::for_task(task.id, serde_json::to_value(&task)?);
        let report = self.retry_loop(worker, validator).run(state).await;

        self.record_outcome(project_id, task_id, &report).await?;
        Ok(report)
    }

    /// Run several tasks concurrently, at most `max_concurrency` at a time.
    ///
    /// Results come back in the order of `task_ids`. One task's error does not
    /// stop the others.
    pub async fn execute_many(
        &self,
        project_id: &str,
        task_ids: &[Uuid],
        worker: Arc<dyn Worker>,
        validator: Arc<dyn Validator>,
        max_concurrency: Option<usize>,
    ) -> Vec<(Uuid, AuditflowResult<LoopReport>)> {
        let limit = max_concurrency
            .unwrap_or(self.settings.max_concurrency)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut set = JoinSet::new();

        info!(project_id, tasks = task_ids.len(), limit, "Executing tasks");

        for &task_id in task_ids {
            let this = self.clone();
            let project_id = project_id.to_string();
            let worker = worker.clone();
            let validator = validator.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        this.execute_task(&project_id, task_id, worker, validator)
                            .await
                    }
                    Err(e) => Err(AuditflowError::Worker(format!("semaphore closed: {e}"))),
                };
                (task_id, result)
            });
        }

        let mut results: HashMap<Uuid, AuditflowResult<LoopReport>> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((task_id, result)) => {
                    results.insert(task_id, result);
                }
                Err(e) => error!(error = %e, "Task execution aborted"),
            }
        }

        task_ids
            .iter()
            .map(|id| {
                let result = results.remove(id).unwrap_or_else(|| {
                    Err(AuditflowError::Worker(format!("execution of task {id} aborted")))
                });
                (*id, result)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Human interaction
    // -----------------------------------------------------------------------

    /// Apply a reviewer's answer to a pending request and persist the task.
    pub async fn respond(
        &self,
        project_id: &str,
        request_id: Uuid,
        response: HitlResponse,
    ) -> AuditflowResult<HitlResolution> {
        self.load_requests(project_id).await?;
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let request = self
            .desk
            .get(request_id)
            .await
            .filter(|r| r.project_id == project_id)
            .ok_or_else(|| AuditflowError::RequestNotFound(request_id.to_string()))?;
        let mut task = self.store.task(project_id, request.task_id).await?;
        let resolution = self.desk.respond(request_id, response, &mut task).await?;
        self.store.update_task(&task).await?;
        self.persist_requests(project_id).await?;
        Ok(resolution)
    }

    /// Rerun a task's loop with human guidance.
    ///
    /// Pending retry-exhausted requests for the task are approved with the
    /// guidance as comment. Earlier guidance found in the stored conversation
    /// is carried into the new attempts. A task that cannot be reset is
    /// refused before any request is touched.
    pub async fn resume_with_guidance(
        &self,
        project_id: &str,
        task_id: Uuid,
        guidance: &str,
        reviewer: &str,
        worker: Arc<dyn Worker>,
        validator: Arc<dyn Validator>,
    ) -> AuditflowResult<LoopReport> {
        self.load_requests(project_id).await?;
        let task = {
            let lock = self.project_lock(project_id).await;
            let _guard = lock.lock().await;
            let mut task = self.store.task(project_id, task_id).await?;
            task.reset_for_guided_retry()?;

            for request in self.desk.for_task(task_id).await {
                if request.status == HitlRequestStatus::Pending
                    && request.request_type == HitlRequestType::RetryExhausted
                {
                    self.desk
                        .respond(
                            request.id,
                            HitlResponse::approve(reviewer).with_comment(guidance),
                            &mut task,
                        )
                        .await?;
                }
            }

            self.store.update_task(&task).await?;
            self.persist_requests(project_id).await?;
            task
        };

        let earlier: Vec<String> = self
            .store
            .conversation(task_id)
            .await?
            .into_iter()
            .filter(|e| e.message_type == MessageType::Answer && e.from_agent == HUMAN_AGENT)
            .map(|e| e.content)
            .collect();
        let mut state = LoopState::for_task(task.id, serde_json::to_value(&task)?);
        state.guidance = earlier;

        info!(project_id, task_id = %task_id, reviewer, "Resuming task with guidance");
        let report = self
            .retry_loop(worker, validator)
            .resume_with_guidance(&state, guidance)
            .await;

        self.record_outcome(project_id, task_id, &report).await?;
        Ok(report)
    }

    /// Send a task back for review because its work is logically wrong.
    pub async fn flag_logical_flaw(
        &self,
        project_id: &str,
        task_id: Uuid,
        description: &str,
    ) -> AuditflowResult<HitlRequest> {
        self.load_requests(project_id).await?;
        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;

        let mut task = self.store.task(project_id, task_id).await?;
        if task.status.is_terminal() {
            return Err(AuditflowError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::ReviewRequired.to_string(),
            });
        }
        task.transition_to(TaskStatus::ReviewRequired)?;
        self.store.update_task(&task).await?;

        let request = HitlPolicy::for_logical_flaw(&task, description);
        self.desk.submit(request.clone()).await;
        self.persist_requests(project_id).await?;
        warn!(project_id, task_id = %task_id, "Logical flaw flagged");
        Ok(request)
    }

    /// Pending requests across every project loaded so far, most urgent first.
    pub async fn pending_requests(&self) -> Vec<HitlRequest> {
        self.desk.pending().await
    }

    /// Pending requests of one project, including those stored by earlier runs.
    pub async fn pending_for(&self, project_id: &str) -> AuditflowResult<Vec<HitlRequest>> {
        self.load_requests(project_id).await?;
        Ok(self
            .desk
            .pending()
            .await
            .into_iter()
            .filter(|r| r.project_id == project_id)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn retry_loop(&self, worker: Arc<dyn Worker>, validator: Arc<dyn Validator>) -> RetryLoop {
        RetryLoop::new(worker, validator).with_config(self.settings.retry.clone())
    }

    async fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Pull the project's stored requests into the desk, once per project.
    async fn load_requests(&self, project_id: &str) -> AuditflowResult<()> {
        let mut loaded = self.loaded.lock().await;
        if loaded.contains(project_id) {
            return Ok(());
        }
        let stored = self.store.requests(project_id).await?;
        let restored = self.desk.restore(stored).await;
        if restored > 0 {
            debug!(project_id, restored, "HITL requests restored from store");
        }
        loaded.insert(project_id.to_string());
        Ok(())
    }

    /// Callers hold the project lock.
    async fn persist_requests(&self, project_id: &str) -> AuditflowResult<()> {
        let requests = self.desk.for_project(project_id).await;
        self.store.save_requests(project_id, &requests).await
    }

    async fn ensure_review_approved(&self, task: &AuditTask) -> AuditflowResult<()> {
        let requests = self.desk.for_task(task.id).await;
        let open = requests
            .iter()
            .filter(|r| r.status == HitlRequestStatus::Pending)
            .count();
        let approved = requests
            .iter()
            .any(|r| r.status == HitlRequestStatus::Approved);
        if open > 0 || !approved {
            return Err(AuditflowError::Hitl(format!(
                "task {} is awaiting review ({open} pending request(s))",
                task.id
            )));
        }
        Ok(())
    }

    /// Re-reads the task under the project lock so concurrent updates survive.
    async fn record_outcome(
        &self,
        project_id: &str,
        task_id: Uuid,
        report: &LoopReport,
    ) -> AuditflowResult<AuditTask> {
        self.store
            .append_conversation(task_id, report.conversation.entries())
            .await?;

        let lock = self.project_lock(project_id).await;
        let _guard = lock.lock().await;
        let mut task = self.store.task(project_id, task_id).await?;

        let mut filed = false;
        match report.outcome {
            LoopOutcome::Success => task.transition_to(TaskStatus::Completed)?,
            LoopOutcome::Partial | LoopOutcome::HitlRequired => {
                task.transition_to(TaskStatus::ReviewRequired)?;
                self.desk
                    .submit(HitlPolicy::for_exhaustion(&task, report))
                    .await;
                filed = true;
            }
            LoopOutcome::Failure => {
                let reason = report
                    .conversation
                    .entries()
                    .iter()
                    .rev()
                    .find(|e| e.message_type == MessageType::Error)
                    .map(|e| e.content.clone())
                    .unwrap_or_else(|| "retry loop failed".to_string());
                task.transition_to(TaskStatus::Failed { reason })?;
            }
        }
        self.store.update_task(&task).await?;
        if filed {
            self.persist_requests(project_id).await?;
        }

        info!(
            task_id = %task.id,
            outcome = ?report.outcome,
            attempts = report.attempts_made,
            status = %task.status,
            "Task execution recorded"
        );
        Ok(task)
    }
}
