//! `auditflow.toml` loading.
//!
//! Every section is optional; a missing file yields the defaults.

use auditflow_core::{Assertion, AuditflowError, AuditflowResult};
use auditflow_orchestrator::engine::DEFAULT_MAX_CONCURRENCY;
use auditflow_orchestrator::{LoopConfig, OrchestratorSettings, ProcedureCatalog, UrgencyConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditflowConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub urgency: UrgencyConfig,
    #[serde(default)]
    pub retry: LoopConfig,
    #[serde(default)]
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default = "default_include_low_level")]
    pub include_low_level: bool,
    /// Assertion subsets per category; categories not listed test all six.
    #[serde(default)]
    pub category_assertions: BTreeMap<String, Vec<Assertion>>,
    /// Procedure lists per assertion; unlisted assertions keep the built-in ones.
    #[serde(default)]
    pub procedures: BTreeMap<Assertion, Vec<String>>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            include_low_level: default_include_low_level(),
            category_assertions: BTreeMap::new(),
            procedures: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for AuditflowConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            urgency: UrgencyConfig::default(),
            retry: LoopConfig::default(),
            hierarchy: HierarchyConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_include_low_level() -> bool {
    true
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl AuditflowConfig {
    pub fn parse(text: &str) -> AuditflowResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| AuditflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read the config file. Returns `Ok(None)` when it does not exist.
    pub async fn load(path: &Path) -> AuditflowResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text).map(Some)
    }

    pub fn validate(&self) -> AuditflowResult<()> {
        self.urgency
            .validate()
            .map_err(|e| AuditflowError::Config(format!("[urgency] {e}")))?;
        if self.retry.max_attempts == 0 {
            return Err(AuditflowError::Config(
                "[retry] max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.strategies.is_empty() {
            return Err(AuditflowError::Config(
                "[retry] strategies must not be empty".into(),
            ));
        }
        if self.execution.max_concurrency == 0 {
            return Err(AuditflowError::Config(
                "[execution] max_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn settings(&self) -> OrchestratorSettings {
        let catalog = self
            .hierarchy
            .category_assertions
            .iter()
            .fold(ProcedureCatalog::default(), |catalog, (category, subset)| {
                catalog.with_category_assertions(category, subset.clone())
            });
        let catalog = self
            .hierarchy
            .procedures
            .iter()
            .fold(catalog, |catalog, (assertion, procedures)| {
                catalog.with_procedures(*assertion, procedures.clone())
            });
        OrchestratorSettings {
            urgency: self.urgency.clone(),
            retry: self.retry.clone(),
            catalog,
            include_low_level: self.hierarchy.include_low_level,
            max_concurrency: self.execution.max_concurrency,
        }
    }
}
