//! Urgency scoring.
//!
//! `urgency = materiality * w_m + risk * w_r + confidence * w_c`, each factor
//! on a 0–100 scale. Tasks at or above the HITL threshold become candidates
//! for a human review.

use auditflow_core::{AuditTask, AuditflowError, AuditflowResult, UrgencyLevel};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Relative weight of each urgency factor. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UrgencyWeights {
    /// Weight of the materiality factor (0.40 by default).
    #[serde(default = "default_materiality_weight")]
    pub materiality: f64,
    /// Weight of the risk factor (0.35 by default).
    #[serde(default = "default_risk_weight")]
    pub risk: f64,
    /// Weight of the confidence factor (0.25 by default).
    #[serde(default = "default_confidence_weight")]
    pub confidence: f64,
}

fn default_materiality_weight() -> f64 {
    0.40
}

fn default_risk_weight() -> f64 {
    0.35
}

fn default_confidence_weight() -> f64 {
    0.25
}

impl Default for UrgencyWeights {
    fn default() -> Self {
        Self {
            materiality: default_materiality_weight(),
            risk: default_risk_weight(),
            confidence: default_confidence_weight(),
        }
    }
}

impl UrgencyWeights {
    /// Weights as given; call [`UrgencyWeights::validate`] before use.
    pub fn new(materiality: f64, risk: f64, confidence: f64) -> Self {
        Self {
            materiality,
            risk,
            confidence,
        }
    }

    fn sum(&self) -> f64 {
        self.materiality + self.risk + self.confidence
    }

    /// Reject negative or non-finite weights, and weights that do not sum to 1.
    pub fn validate(&self) -> AuditflowResult<()> {
        let all = [self.materiality, self.risk, self.confidence];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AuditflowError::Validation(format!(
                "urgency weights must be finite and non-negative, got {all:?}"
            )));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(AuditflowError::Validation(format!(
                "urgency weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }

    /// Rescale the weights so they sum to 1.
    pub fn normalized(&self) -> AuditflowResult<Self> {
        let sum = self.sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Err(AuditflowError::Validation(
                "cannot normalise urgency weights with a non-positive sum".into(),
            ));
        }
        let scaled = Self::new(
            self.materiality / sum,
            self.risk / sum,
            self.confidence / sum,
        );
        scaled.validate()?;
        Ok(scaled)
    }

    /// Weighted sum of three factors already on the 0–100 scale.
    pub fn compose(&self, materiality: f64, risk: f64, confidence: f64) -> f64 {
        let raw =
            materiality * self.materiality + risk * self.risk + confidence * self.confidence;
        round2(raw.clamp(0.0, 100.0))
    }
}

/// How a monetary amount is turned into a materiality factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaterialityCurve {
    /// `|amount| / threshold * 100`, capped at 100.
    #[default]
    Linear,
    /// `(min_ratio, score)` bands; the first band whose `min_ratio` the
    /// ratio reaches wins. Ratios below every band score 0.
    Banded(Vec<(f64, f64)>),
}

impl MaterialityCurve {
    /// Materiality factor for `amount` against `threshold`, in `[0, 100]`.
    pub fn factor(&self, amount: f64, threshold: f64) -> f64 {
        let ratio = amount.abs() / threshold;
        match self {
            MaterialityCurve::Linear => (ratio * 100.0).clamp(0.0, 100.0),
            MaterialityCurve::Banded(bands) => {
                let mut sorted = bands.clone();
                sorted.sort_by(|a, b| b.0.total_cmp(&a.0));
                sorted
                    .iter()
                    .find(|(min_ratio, _)| ratio >= *min_ratio)
                    .map(|(_, score)| score.clamp(0.0, 100.0))
                    .unwrap_or(0.0)
            }
        }
    }
}

/// Urgency scorer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrgencyConfig {
    /// Factor weights.
    #[serde(default)]
    pub weights: UrgencyWeights,
    /// Score at or above which a task needs review.
    #[serde(default = "default_hitl_threshold")]
    pub hitl_threshold: f64,
    /// Engagement materiality. Without it every task gets the default factor.
    #[serde(default)]
    pub materiality_threshold: Option<f64>,
    /// How amounts map to the materiality factor.
    #[serde(default)]
    pub materiality_curve: MaterialityCurve,
    /// Materiality factor for tasks without an amount or threshold.
    #[serde(default = "default_factor")]
    pub default_materiality_factor: f64,
    /// Confidence factor for tasks without a confidence.
    #[serde(default = "default_factor")]
    pub default_confidence_factor: f64,
}

fn default_hitl_threshold() -> f64 {
    70.0
}

fn default_factor() -> f64 {
    50.0
}

impl Default for UrgencyConfig {
    fn default() -> Self {
        Self {
            weights: UrgencyWeights::default(),
            hitl_threshold: default_hitl_threshold(),
            materiality_threshold: None,
            materiality_curve: MaterialityCurve::default(),
            default_materiality_factor: default_factor(),
            default_confidence_factor: default_factor(),
        }
    }
}

impl UrgencyConfig {
    /// Set the engagement materiality.
    pub fn with_materiality(mut self, threshold: f64) -> Self {
        self.materiality_threshold = Some(threshold);
        self
    }

    /// Replace the weights.
    pub fn with_weights(mut self, weights: UrgencyWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the review threshold.
    pub fn with_threshold(mut self, hitl_threshold: f64) -> Self {
        self.hitl_threshold = hitl_threshold;
        self
    }

    /// Check weights, threshold and defaults.
    pub fn validate(&self) -> AuditflowResult<()> {
        self.weights.validate()?;
        if !(0.0..=100.0).contains(&self.hitl_threshold) {
            return Err(AuditflowError::Validation(format!(
                "hitl_threshold {} outside [0, 100]",
                self.hitl_threshold
            )));
        }
        if let Some(t) = self.materiality_threshold {
            if !t.is_finite() || t <= 0.0 {
                return Err(AuditflowError::Validation(format!(
                    "materiality threshold must be positive, got {t}"
                )));
            }
        }
        for (name, value) in [
            ("default_materiality_factor", self.default_materiality_factor),
            ("default_confidence_factor", self.default_confidence_factor),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(AuditflowError::Validation(format!(
                    "{name} {value} outside [0, 100]"
                )));
            }
        }
        Ok(())
    }
}

/// The three inputs of one score, each on the 0–100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UrgencyFactors {
    /// Materiality factor.
    pub materiality: f64,
    /// Risk factor.
    pub risk: f64,
    /// Confidence factor, `(1 - confidence) * 100`.
    pub confidence: f64,
}

/// One task with its score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTask {
    /// The task, with the score recorded.
    pub task: AuditTask,
    /// Inputs of the score.
    pub factors: UrgencyFactors,
    /// Score in `[0, 100]`.
    pub urgency_score: f64,
    /// Whether the score reached the threshold.
    pub needs_hitl: bool,
    /// Band of the score.
    pub urgency_level: UrgencyLevel,
}

/// Result of scoring a batch of tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrgencyReport {
    /// Every input task, in input order.
    pub scored_tasks: Vec<ScoredTask>,
    /// Tasks at or above the threshold, most urgent first.
    pub hitl_candidates: Vec<ScoredTask>,
    /// Defaults that were applied.
    pub warnings: Vec<String>,
}

impl UrgencyReport {
    /// Score of one task, if it was in the batch.
    pub fn score_of(&self, task_id: Uuid) -> Option<f64> {
        self.scored_tasks
            .iter()
            .find(|s| s.task.id == task_id)
            .map(|s| s.urgency_score)
    }
}

/// Score a batch of tasks. The input is not modified; scored copies are returned.
pub fn score_urgency(tasks: &[AuditTask], config: &UrgencyConfig) -> AuditflowResult<UrgencyReport> {
    config.validate()?;

    let mut warnings = Vec::new();
    let mut scored_tasks = Vec::with_capacity(tasks.len());

    for task in tasks {
        let factors = factors_for(task, config, &mut warnings);
        let score = config
            .weights
            .compose(factors.materiality, factors.risk, factors.confidence);

        let mut copy = task.clone();
        copy.record_urgency(score)?;

        scored_tasks.push(ScoredTask {
            task: copy,
            factors,
            urgency_score: score,
            needs_hitl: score >= config.hitl_threshold,
            urgency_level: UrgencyLevel::from_score(score),
        });
    }

    let mut hitl_candidates: Vec<ScoredTask> =
        scored_tasks.iter().filter(|s| s.needs_hitl).cloned().collect();
    // sort_by is stable, so equal scores keep input order.
    hitl_candidates.sort_by(|a, b| b.urgency_score.total_cmp(&a.urgency_score));

    info!(
        scored = scored_tasks.len(),
        candidates = hitl_candidates.len(),
        threshold = config.hitl_threshold,
        "Urgency scoring complete"
    );

    Ok(UrgencyReport {
        scored_tasks,
        hitl_candidates,
        warnings,
    })
}

fn factors_for(task: &AuditTask, config: &UrgencyConfig, warnings: &mut Vec<String>) -> UrgencyFactors {
    let materiality = match (task.amount, config.materiality_threshold) {
        (Some(amount), Some(threshold)) if amount.is_finite() => {
            config.materiality_curve.factor(amount, threshold)
        }
        (amount, threshold) => {
            let missing = if threshold.is_none() {
                "no materiality threshold configured"
            } else if amount.is_none() {
                "no amount"
            } else {
                "amount is not a finite number"
            };
            warn!(task_id = %task.id, missing, "Using default materiality factor");
            warnings.push(format!(
                "Task {} ({}): {missing}, materiality factor defaulted to {}",
                task.id, task.name, config.default_materiality_factor
            ));
            config.default_materiality_factor
        }
    };

    let confidence = match task.confidence.filter(|c| c.is_finite()) {
        Some(c) => (1.0 - c.clamp(0.0, 1.0)) * 100.0,
        None => {
            warn!(task_id = %task.id, "Using default confidence factor");
            warnings.push(format!(
                "Task {} ({}): no confidence, confidence factor defaulted to {}",
                task.id, task.name, config.default_confidence_factor
            ));
            config.default_confidence_factor
        }
    };

    UrgencyFactors {
        materiality,
        risk: f64::from(task.risk_score()),
        confidence,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use auditflow_core::{RiskLevel, TaskLevel};

    fn task(risk: RiskLevel, amount: Option<f64>, confidence: Option<f64>) -> AuditTask {
        let t = AuditTask::new("p1", TaskLevel::Mid, "Receivables - Existence", risk)
            .with_amount(amount);
        match confidence {
            Some(c) => t.with_confidence(c),
            None => t,
        }
    }

    #[test]
    fn compose_bounds() {
        let w = UrgencyWeights::default();
        assert_eq!(w.compose(100.0, 100.0, 100.0), 100.0);
        assert_eq!(w.compose(0.0, 0.0, 0.0), 0.0);
        assert_eq!(w.compose(50.0, 50.0, 50.0), 50.0);
    }

    #[test]
    fn worked_example() {
        // m = 100, r = 95, c = (1 - 0.2) * 100 = 80
        let config = UrgencyConfig::default().with_materiality(10_000.0);
        let report =
            score_urgency(&[task(RiskLevel::Critical, Some(25_000.0), Some(0.2))], &config).unwrap();
        let scored = &report.scored_tasks[0];
        assert_eq!(scored.urgency_score, 93.25);
        assert!(scored.needs_hitl);
        assert_eq!(scored.urgency_level, UrgencyLevel::Critical);
        assert_eq!(scored.task.urgency_score(), Some(93.25));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_data_defaults_to_fifty_with_warnings() {
        let report = score_urgency(&[task(RiskLevel::Medium, None, None)], &UrgencyConfig::default())
            .unwrap();
        let scored = &report.scored_tasks[0];
        assert_eq!(scored.factors.materiality, 50.0);
        assert_eq!(scored.factors.confidence, 50.0);
        assert_eq!(scored.urgency_score, 50.0);
        assert!(!scored.needs_hitl);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn bad_weights_are_rejected() {
        let config = UrgencyConfig::default().with_weights(UrgencyWeights::new(0.5, 0.5, 0.5));
        let err = score_urgency(&[], &config).unwrap_err();
        assert!(matches!(err, AuditflowError::Validation(_)));

        let negative = UrgencyWeights::new(1.2, -0.1, -0.1);
        assert!(negative.validate().is_err());
    }

    #[test]
    fn normalisation_is_opt_in() {
        let w = UrgencyWeights::new(2.0, 1.0, 1.0).normalized().unwrap();
        assert!((w.materiality - 0.5).abs() < 1e-12);
        assert!(w.validate().is_ok());
        assert!(UrgencyWeights::new(0.0, 0.0, 0.0).normalized().is_err());
    }

    #[test]
    fn candidates_sorted_descending_and_stable() {
        let config = UrgencyConfig::default().with_materiality(1_000.0);
        let a = task(RiskLevel::High, Some(1_000.0), Some(0.0));
        let b = task(RiskLevel::Critical, Some(1_000.0), Some(0.0));
        let c = task(RiskLevel::High, Some(1_000.0), Some(0.0));
        let low = task(RiskLevel::Low, Some(10.0), Some(1.0));
        let ids = [a.id, b.id, c.id];

        let report = score_urgency(&[a, b, low, c], &config).unwrap();
        let order: Vec<Uuid> = report.hitl_candidates.iter().map(|s| s.task.id).collect();
        assert_eq!(order, vec![ids[1], ids[0], ids[2]]);
        assert_eq!(report.scored_tasks.len(), 4);
    }

    #[test]
    fn linear_curve_is_capped() {
        let curve = MaterialityCurve::Linear;
        assert_eq!(curve.factor(500.0, 1_000.0), 50.0);
        assert_eq!(curve.factor(-5_000.0, 1_000.0), 100.0);
    }

    #[test]
    fn banded_curve() {
        let curve = MaterialityCurve::Banded(vec![(0.5, 60.0), (1.0, 100.0), (0.1, 20.0)]);
        assert_eq!(curve.factor(1_500.0, 1_000.0), 100.0);
        assert_eq!(curve.factor(700.0, 1_000.0), 60.0);
        assert_eq!(curve.factor(150.0, 1_000.0), 20.0);
        assert_eq!(curve.factor(10.0, 1_000.0), 0.0);
    }

    #[test]
    fn scores_stay_in_range() {
        let config = UrgencyConfig::default().with_materiality(1.0);
        let report = score_urgency(
            &[
                task(RiskLevel::Critical, Some(1e12), Some(-3.0)),
                task(RiskLevel::Low, Some(0.0), Some(7.0)),
            ],
            &config,
        )
        .unwrap();
        for s in &report.scored_tasks {
            assert!((0.0..=100.0).contains(&s.urgency_score));
        }
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: UrgencyConfig =
            serde_json::from_str(r#"{"materiality_threshold": 5000.0}"#).unwrap();
        assert_eq!(config.hitl_threshold, 70.0);
        assert_eq!(config.weights, UrgencyWeights::default());
        assert_eq!(config.materiality_curve, MaterialityCurve::Linear);
    }
}
