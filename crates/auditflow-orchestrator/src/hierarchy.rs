//! Three-level task hierarchy generation.
//!
//! Every objective becomes one High task, one Mid task per assertion the
//! catalog selects for its category, and (optionally) one Low task per
//! procedure of each assertion. The result is a flat list; parent links make
//! the tree reconstructable with [`build_tree`].

use crate::catalog::ProcedureCatalog;
use auditflow_core::task::{estimate_hours, DEFAULT_CATEGORY, DEFAULT_PRIORITY};
use auditflow_core::{
    Assertion, AuditTask, AuditflowError, AuditflowResult, Objective, RiskLevel, TaskLevel,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one generation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchyOutcome {
    /// False when no task could be generated.
    pub success: bool,
    /// Generated tasks, parents before children.
    pub tasks: Vec<AuditTask>,
    /// High tasks generated.
    pub high_level_count: usize,
    /// Mid tasks generated.
    pub mid_level_count: usize,
    /// Low tasks generated.
    pub low_level_count: usize,
    /// Per-objective or whole-batch errors.
    pub errors: Vec<String>,
    /// Defaults that were applied.
    pub warnings: Vec<String>,
}

impl HierarchyOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            ..Self::default()
        }
    }

    fn push(&mut self, task: AuditTask) {
        match task.level {
            TaskLevel::High => self.high_level_count += 1,
            TaskLevel::Mid => self.mid_level_count += 1,
            TaskLevel::Low => self.low_level_count += 1,
        }
        self.tasks.push(task);
    }
}

/// Expands objectives into audit tasks using a [`ProcedureCatalog`].
#[derive(Debug, Clone, Default)]
pub struct HierarchyGenerator {
    catalog: ProcedureCatalog,
}

impl HierarchyGenerator {
    /// Generator over `catalog`.
    pub fn new(catalog: ProcedureCatalog) -> Self {
        Self { catalog }
    }

    /// The catalog in use.
    pub fn catalog(&self) -> &ProcedureCatalog {
        &self.catalog
    }

    /// Generate the task hierarchy for a batch of objectives.
    ///
    /// An empty batch is the only hard failure. Problems with a single
    /// objective are recorded in `errors`/`warnings` and the batch continues.
    pub fn generate(
        &self,
        objectives: &[Objective],
        project_id: &str,
        include_low_level: bool,
    ) -> HierarchyOutcome {
        if objectives.is_empty() {
            warn!(project_id, "Hierarchy generation called without objectives");
            return HierarchyOutcome::failed("No objectives supplied; at least one is required");
        }

        let mut outcome = HierarchyOutcome {
            success: true,
            ..HierarchyOutcome::default()
        };

        for (index, objective) in objectives.iter().enumerate() {
            if objective.name.trim().is_empty() {
                outcome.warnings.push(format!(
                    "Objective #{index} ({}) has no name and was skipped",
                    display_id(&objective.id)
                ));
                continue;
            }

            match self.expand(objective, project_id, include_low_level, &mut outcome.warnings) {
                Ok(tasks) => {
                    debug!(objective = %objective.id, tasks = tasks.len(), "Objective expanded");
                    for task in tasks {
                        outcome.push(task);
                    }
                }
                Err(e) => {
                    warn!(objective = %objective.id, error = %e, "Objective could not be expanded");
                    outcome
                        .errors
                        .push(format!("Objective #{index} ({}): {e}", objective.name));
                }
            }
        }

        info!(
            project_id,
            high = outcome.high_level_count,
            mid = outcome.mid_level_count,
            low = outcome.low_level_count,
            errors = outcome.errors.len(),
            "Hierarchy generated"
        );
        outcome
    }

    fn expand(
        &self,
        objective: &Objective,
        project_id: &str,
        include_low_level: bool,
        warnings: &mut Vec<String>,
    ) -> AuditflowResult<Vec<AuditTask>> {
        if objective.id.trim().is_empty() {
            return Err(AuditflowError::Hierarchy("objective has no id".into()));
        }

        let risk = match objective.risk_level.as_deref() {
            Some(raw) => RiskLevel::parse(raw).unwrap_or_else(|| {
                warnings.push(format!(
                    "Objective {}: unrecognised risk level '{raw}', using medium",
                    objective.id
                ));
                RiskLevel::Medium
            }),
            None => {
                warnings.push(format!(
                    "Objective {}: no risk level, using medium",
                    objective.id
                ));
                RiskLevel::Medium
            }
        };

        let category = objective
            .metadata
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();

        let assertions = self.catalog.assertions_for(&category);
        if assertions.is_empty() {
            return Err(AuditflowError::Hierarchy(format!(
                "no assertions configured for category '{category}'"
            )));
        }

        let ega_id = Some(objective.id.clone());
        let amount = objective.metadata.amount;
        let priority = objective
            .priority
            .map(i64::from)
            .unwrap_or(i64::from(DEFAULT_PRIORITY));

        let high = AuditTask::new(project_id, TaskLevel::High, objective.name.trim(), risk)
            .with_description(objective.description.clone())
            .with_category(category.clone())
            .with_priority(priority)
            .with_ega_id(ega_id.clone())
            .with_amount(amount);

        let mut tasks = Vec::with_capacity(1 + assertions.len() * 5);
        let high_id = high.id;
        let high_priority = high.priority;
        tasks.push(high);

        for assertion in assertions {
            let mid = AuditTask::new(
                project_id,
                TaskLevel::Mid,
                format!("{} - {}", objective.name.trim(), assertion.label()),
                risk,
            )
            .with_description(format!(
                "Obtain evidence for the {} assertion of {}",
                assertion.label().to_lowercase(),
                objective.name.trim()
            ))
            .with_parent(high_id)
            .with_category(category.clone())
            .with_priority(i64::from(high_priority))
            .with_assertion(assertion)
            .with_ega_id(ega_id.clone())
            .with_amount(amount);

            let mid_id = mid.id;
            let mid_priority = i64::from(mid.priority);
            tasks.push(mid);

            if !include_low_level {
                continue;
            }

            for (ordinal, procedure) in self.catalog.procedures_for(assertion).iter().enumerate() {
                let low = AuditTask::new(
                    project_id,
                    TaskLevel::Low,
                    format!("[{}] {procedure}", assertion.code()),
                    risk,
                )
                .with_description(format!("{procedure} ({})", objective.name.trim()))
                .with_parent(mid_id)
                .with_category(category.clone())
                .with_priority(mid_priority - ordinal as i64)
                .with_assertion(assertion)
                .with_procedure(procedure.clone())
                .with_ega_id(ega_id.clone())
                .with_amount(amount);
                tasks.push(low);
            }
        }

        Ok(tasks)
    }
}

fn display_id(id: &str) -> &str {
    if id.trim().is_empty() {
        "<no id>"
    } else {
        id
    }
}

// ---------------------------------------------------------------------------
// Merge and enrichment
// ---------------------------------------------------------------------------

/// Outcome of merging freshly generated tasks into a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Preserved tasks first, then the generated ones.
    pub tasks: Vec<AuditTask>,
    /// Stored tasks dropped.
    pub replaced: usize,
    /// Stored tasks kept.
    pub preserved: usize,
    /// Generated tasks added.
    pub added: usize,
}

/// Replace every existing task whose objective was regenerated; keep the rest untouched.
pub fn merge_with_existing(existing: Vec<AuditTask>, generated: Vec<AuditTask>) -> MergeSummary {
    let regenerated: HashSet<String> = generated
        .iter()
        .filter_map(|t| t.ega_id.clone())
        .collect();

    let before = existing.len();
    let mut tasks: Vec<AuditTask> = existing
        .into_iter()
        .filter(|t| {
            t.ega_id
                .as_ref()
                .map_or(true, |ega| !regenerated.contains(ega))
        })
        .collect();
    let preserved = tasks.len();
    let added = generated.len();
    tasks.extend(generated);

    MergeSummary {
        tasks,
        replaced: before - preserved,
        preserved,
        added,
    }
}

/// Outcome of back-filling hierarchy fields onto stored tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentOutcome {
    /// All tasks, in input order.
    pub tasks: Vec<AuditTask>,
    /// Tasks that had a field back-filled.
    pub enriched: usize,
    /// Tasks that could not be enriched fully.
    pub warnings: Vec<String>,
}

#[derive(Clone)]
struct ParentFields {
    category: String,
    ega_id: Option<String>,
    assertion: Option<Assertion>,
}

/// Fill in hierarchy fields missing from tasks created outside the generator.
///
/// Parents are processed before children so inherited values propagate down
/// the whole chain in one call.
pub fn enrich_existing(mut tasks: Vec<AuditTask>) -> EnrichmentOutcome {
    let mut enriched = 0;
    let mut warnings = Vec::new();

    for level in [TaskLevel::High, TaskLevel::Mid, TaskLevel::Low] {
        let parents: HashMap<Uuid, ParentFields> = tasks
            .iter()
            .filter(|t| Some(t.level) == level.parent_level())
            .map(|t| {
                (
                    t.id,
                    ParentFields {
                        category: t.category.clone(),
                        ega_id: t.ega_id.clone(),
                        assertion: t.assertion,
                    },
                )
            })
            .collect();

        for task in tasks.iter_mut().filter(|t| t.level == level) {
            let parent = task.parent_task_id.and_then(|id| parents.get(&id)).cloned();
            let mut changed = false;

            if task.category.trim().is_empty() {
                task.category = parent
                    .as_ref()
                    .map(|p| p.category.clone())
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
                changed = true;
            }

            if task.ega_id.is_none() {
                if let Some(ega) = parent.as_ref().and_then(|p| p.ega_id.clone()) {
                    task.ega_id = Some(ega);
                    changed = true;
                }
            }

            if level != TaskLevel::High && task.assertion.is_none() {
                let inferred = Assertion::infer(&task.name)
                    .or_else(|| parent.as_ref().and_then(|p| p.assertion));
                match inferred {
                    Some(assertion) => {
                        task.assertion = Some(assertion);
                        changed = true;
                    }
                    None => warnings.push(format!(
                        "Task {} ({}) has no assertion and none could be inferred",
                        task.id, task.name
                    )),
                }
            }

            if level == TaskLevel::Low && task.procedure_type.is_none() {
                task.procedure_type = Some(task.name.clone());
                changed = true;
            }

            if task.estimated_hours.is_nan() || task.estimated_hours <= 0.0 {
                task.estimated_hours = estimate_hours(task.level, task.risk_level);
                changed = true;
            }

            if changed {
                enriched += 1;
            }
        }
    }

    info!(enriched, total = tasks.len(), "Existing tasks enriched");
    EnrichmentOutcome {
        tasks,
        enriched,
        warnings,
    }
}

// ---------------------------------------------------------------------------
// Read-side utilities
// ---------------------------------------------------------------------------

/// A task with its children, for display.
#[derive(Debug, Clone, Serialize)]
pub struct TaskNode {
    /// The task itself.
    pub task: AuditTask,
    /// Child nodes, in input order.
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    /// Number of tasks in this sub-tree, including the root.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TaskNode::size).sum::<usize>()
    }
}

/// Rebuild the tree from a flat task list.
///
/// Tasks without a parent, or whose parent is not in the list, become roots.
/// Children keep their input order.
pub fn build_tree(tasks: &[AuditTask]) -> Vec<TaskNode> {
    let ids: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
    let mut children: HashMap<Uuid, Vec<&AuditTask>> = HashMap::new();
    let mut roots = Vec::new();

    for task in tasks {
        match task.parent_task_id.filter(|p| ids.contains(p)) {
            Some(parent) => children.entry(parent).or_default().push(task),
            None => roots.push(task),
        }
    }

    let mut visited = HashSet::new();
    roots
        .into_iter()
        .map(|root| attach(root, &children, &mut visited))
        .collect()
}

fn attach(
    task: &AuditTask,
    children: &HashMap<Uuid, Vec<&AuditTask>>,
    visited: &mut HashSet<Uuid>,
) -> TaskNode {
    visited.insert(task.id);
    let mut kids = Vec::new();
    if let Some(list) = children.get(&task.id) {
        for child in list {
            if !visited.contains(&child.id) {
                kids.push(attach(child, children, visited));
            }
        }
    }
    TaskNode {
        task: task.clone(),
        children: kids,
    }
}

/// List every violation of the parent/level/traceability invariants.
pub fn check_hierarchy(tasks: &[AuditTask]) -> Vec<String> {
    let by_id: HashMap<Uuid, &AuditTask> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut violations = Vec::new();

    for task in tasks {
        match (task.level.parent_level(), task.parent_task_id) {
            (None, Some(_)) => violations.push(format!(
                "High task {} ({}) must not have a parent",
                task.id, task.name
            )),
            (None, None) => {}
            (Some(_), None) => violations.push(format!(
                "{} task {} ({}) has no parent",
                task.level, task.id, task.name
            )),
            (Some(expected), Some(parent_id)) => match by_id.get(&parent_id) {
                None => violations.push(format!(
                    "{} task {} points to missing parent {parent_id}",
                    task.level, task.id
                )),
                Some(parent) if parent.level != expected => violations.push(format!(
                    "{} task {} has a {} parent, expected {expected}",
                    task.level, task.id, parent.level
                )),
                Some(parent) if parent.ega_id != task.ega_id => violations.push(format!(
                    "Task {} objective {:?} differs from parent objective {:?}",
                    task.id, task.ega_id, parent.ega_id
                )),
                Some(_) => {}
            },
        }
    }

    violations
}
