//! `auditflow` command-line entry point: planning, triage and review of audit tasks.

mod config;

use auditflow_core::{AuditTask, HitlDecision, HitlResponse, Objective};
use auditflow_orchestrator::{
    build_tree, check_hierarchy, FileTaskStore, LoggingChannel, Orchestrator, TaskNode,
};
use clap::{Parser, Subcommand, ValueEnum};
use config::AuditflowConfig;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "auditflow", about = "Auditflow — audit task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "auditflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the task hierarchy for a set of objectives and merge it into the project
    Plan {
        #[arg(short, long)]
        project: String,
        /// JSON file holding an array of objectives
        #[arg(short, long)]
        objectives: PathBuf,
        /// Stop at Mid level (no procedure tasks)
        #[arg(long)]
        no_low_level: bool,
    },
    /// Back-fill hierarchy fields on the project's stored tasks
    Enrich {
        #[arg(short, long)]
        project: String,
    },
    /// Score urgency and file review requests for tasks over the threshold
    Triage {
        #[arg(short, long)]
        project: String,
    },
    /// List the project's pending review requests, most urgent first
    Pending {
        #[arg(short, long)]
        project: String,
    },
    /// Answer a pending review request
    Respond {
        #[arg(short, long)]
        project: String,
        /// Request id, as printed by `pending`
        #[arg(short, long)]
        request: Uuid,
        #[arg(short, long, value_enum)]
        decision: Decision,
        #[arg(long)]
        reviewer: String,
        /// Comment; the failure reason when rejecting
        #[arg(long)]
        comment: Option<String>,
        /// Fresh urgency score for an escalation
        #[arg(long)]
        rescore: Option<f64>,
    },
    /// Print the project's task tree
    Tree {
        #[arg(short, long)]
        project: String,
    },
    /// Report hierarchy invariant violations
    Check {
        #[arg(short, long)]
        project: String,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Decision {
    Approve,
    Reject,
    Escalate,
}

impl From<Decision> for HitlDecision {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Approve => HitlDecision::Approve,
            Decision::Reject => HitlDecision::Reject,
            Decision::Escalate => HitlDecision::Escalate,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = AuditflowConfig::load(&cli.config).await.map_err(|e| {
        anyhow::anyhow!("Failed to load config file '{}': {e}", cli.config.display())
    })?;
    let missing = loaded.is_none();
    let config = loaded.unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    if missing {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let store = FileTaskStore::new(config.data_dir.clone()).await?;
    let orchestrator = Orchestrator::new(
        Arc::new(store),
        Arc::new(LoggingChannel),
        config.settings(),
    );

    match cli.command {
        Commands::Plan {
            project,
            objectives,
            no_low_level,
        } => {
            let text = tokio::fs::read_to_string(&objectives).await.map_err(|e| {
                anyhow::anyhow!("Failed to read objectives '{}': {e}", objectives.display())
            })?;
            let objectives: Vec<Objective> = serde_json::from_str(&text)?;
            info!(project = %project, count = objectives.len(), "Planning project");

            let include_low = if no_low_level { Some(false) } else { None };
            let report = orchestrator.plan(&project, &objectives, include_low).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("planning failed: {}", report.errors.join("; "));
            }
        }
        Commands::Enrich { project } => {
            let report = orchestrator.plan(&project, &[], None).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("enrichment failed: {}", report.errors.join("; "));
            }
        }
        Commands::Triage { project } => {
            let report = orchestrator.triage(&project).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Pending { project } => {
            let pending = orchestrator.pending_for(&project).await?;
            if pending.is_empty() {
                println!("No pending requests for '{project}'.");
            }
            for request in &pending {
                println!(
                    "{}  [{}] {} ({}, score {:.2})",
                    request.id,
                    request.urgency_level,
                    request.title,
                    request.request_type,
                    request.urgency_score
                );
            }
        }
        Commands::Respond {
            project,
            request,
            decision,
            reviewer,
            comment,
            rescore,
        } => {
            let mut response = HitlResponse::new(decision.into(), reviewer);
            if let Some(comment) = comment {
                response = response.with_comment(comment);
            }
            if let Some(score) = rescore {
                response = response.with_rescore(score);
            }
            let resolution = orchestrator.respond(&project, request, response).await?;
            info!(request_id = %request, status = %resolution.request.status, "Request answered");
            println!("{}", serde_json::to_string_pretty(&resolution.request)?);
            if let Some(next) = resolution.follow_up {
                println!("Escalated as {} ({})", next.id, next.urgency_level);
            }
        }
        Commands::Tree { project } => {
            let tasks = orchestrator.store().tasks(&project).await?;
            if tasks.is_empty() {
                println!("Project '{project}' has no tasks.");
            } else {
                print!("{}", render_tree(&build_tree(&tasks)));
                println!("\nTotal: {} task(s)", tasks.len());
            }
        }
        Commands::Check { project } => {
            let tasks = orchestrator.store().tasks(&project).await?;
            let violations = check_hierarchy(&tasks);
            if violations.is_empty() {
                println!("OK: {} task(s), no violations", tasks.len());
            } else {
                for v in &violations {
                    println!("  {v}");
                }
                anyhow::bail!("{} hierarchy violation(s)", violations.len());
            }
        }
        Commands::Config => {}
    }

    Ok(())
}

fn render_tree(roots: &[TaskNode]) -> String {
    let mut out = String::new();
    for root in roots {
        render_node(root, 0, &mut out);
    }
    out
}

fn render_node(node: &TaskNode, depth: usize, out: &mut String) {
    let _ = writeln!(out, "{}{}", "  ".repeat(depth), describe(&node.task));
    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}

fn describe(task: &AuditTask) -> String {
    let urgency = task
        .urgency_score()
        .map(|u| format!(", urgency {u:.2}"))
        .unwrap_or_default();
    format!(
        "[{}] {} ({}, risk {}, priority {}, {}h{urgency})",
        task.level, task.name, task.status, task.risk_level, task.priority, task.estimated_hours
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use auditflow_orchestrator::HierarchyGenerator;

    #[test]
    fn cli_parses_plan() {
        let cli = Cli::try_parse_from([
            "auditflow",
            "plan",
            "--project",
            "acme",
            "--objectives",
            "egas.json",
            "--no-low-level",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plan { no_low_level: true, ref project, .. } if project == "acme"
        ));
        assert_eq!(cli.config, PathBuf::from("auditflow.toml"));
    }

    #[test]
    fn cli_parses_respond() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "auditflow",
            "respond",
            "-p",
            "acme",
            "--request",
            &id.to_string(),
            "--decision",
            "reject",
            "--reviewer",
            "partner",
            "--comment",
            "scope too narrow",
        ])
        .unwrap();
        match cli.command {
            Commands::Respond {
                request,
                decision,
                comment,
                rescore,
                ..
            } => {
                assert_eq!(request, id);
                assert_eq!(HitlDecision::from(decision), HitlDecision::Reject);
                assert_eq!(comment.as_deref(), Some("scope too narrow"));
                assert!(rescore.is_none());
            }
            _ => panic!("expected respond"),
        }
        assert!(Cli::try_parse_from(["auditflow", "respond", "-p", "acme"]).is_err());
    }

    #[test]
    fn tree_rendering_indents_children() {
        let outcome = HierarchyGenerator::default().generate(
            &[Objective::new("EGA-1", "Cash").with_risk("low")],
            "acme",
            false,
        );
        let text = render_tree(&build_tree(&outcome.tasks));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("[high] Cash (pending, risk low"));
        assert!(lines[1].starts_with("  [mid] Cash - Existence"));
    }
}
