use auditflow_core::Assertion;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Static assertion → procedure catalog used to expand objectives into tasks.
///
/// By default every category tests all six assertions, each with four
/// procedures. Categories can narrow the assertion set and individual
/// assertions can carry their own procedure list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureCatalog {
    /// Assertion subsets keyed by category name (matched case-insensitively).
    #[serde(default)]
    category_assertions: HashMap<String, Vec<Assertion>>,
    /// Procedures per assertion. Configured entries replace the defaults of
    /// their assertion only.
    #[serde(default = "default_procedures", deserialize_with = "over_defaults")]
    procedures: BTreeMap<Assertion, Vec<String>>,
}

impl Default for ProcedureCatalog {
    fn default() -> Self {
        Self {
            category_assertions: HashMap::new(),
            procedures: default_procedures(),
        }
    }
}

impl ProcedureCatalog {
    /// The built-in catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict a category to a subset of assertions.
    pub fn with_category_assertions(
        mut self,
        category: impl AsRef<str>,
        assertions: Vec<Assertion>,
    ) -> Self {
        self.category_assertions
            .insert(category.as_ref().trim().to_lowercase(), assertions);
        self
    }

    /// Replace the procedures listed for one assertion.
    pub fn with_procedures(mut self, assertion: Assertion, procedures: Vec<String>) -> Self {
        self.procedures.insert(assertion, procedures);
        self
    }

    /// Assertions a task in `category` must test, in catalog order.
    pub fn assertions_for(&self, category: &str) -> Vec<Assertion> {
        let category = category.trim();
        let subset = self
            .category_assertions
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(category))
            .map(|(_, subset)| subset);
        match subset {
            Some(subset) => Assertion::ALL
                .into_iter()
                .filter(|a| subset.contains(a))
                .collect(),
            None => Assertion::ALL.to_vec(),
        }
    }

    /// Procedures listed for `assertion`, empty if it has none.
    pub fn procedures_for(&self, assertion: Assertion) -> &[String] {
        self.procedures
            .get(&assertion)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total procedures a fully expanded objective in `category` yields.
    pub fn procedure_count(&self, category: &str) -> usize {
        self.assertions_for(category)
            .into_iter()
            .map(|a| self.procedures_for(a).len())
            .sum()
    }
}

fn over_defaults<'de, D>(deserializer: D) -> Result<BTreeMap<Assertion, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let configured = BTreeMap::<Assertion, Vec<String>>::deserialize(deserializer)?;
    let mut procedures = default_procedures();
    procedures.extend(configured);
    Ok(procedures)
}

fn default_procedures() -> BTreeMap<Assertion, Vec<String>> {
    let table: [(Assertion, [&str; 4]); 6] = [
        (
            Assertion::Existence,
            [
                "Physically inspect or observe a sample of recorded items",
                "Send external confirmations for selected balances",
                "Vouch recorded entries to supporting source documents",
                "Review receipts and usage after period end",
            ],
        ),
        (
            Assertion::Completeness,
            [
                "Trace source documents into the accounting records",
                "Perform analytical review against prior period and budget",
                "Search for unrecorded liabilities and transactions",
                "Reconcile subsidiary ledgers to the general ledger",
            ],
        ),
        (
            Assertion::Valuation,
            [
                "Recompute balances and re-perform calculations",
                "Test valuation methods and key assumptions",
                "Assess allowances and impairment for adequacy",
                "Compare carrying amounts with net realisable value",
            ],
        ),
        (
            Assertion::Rights,
            [
                "Inspect contracts, titles and legal documents",
                "Confirm ownership and encumbrances with third parties",
                "Review board minutes for pledges and commitments",
                "Inquire of legal counsel about restrictions",
            ],
        ),
        (
            Assertion::Presentation,
            [
                "Review classification against the reporting framework",
                "Check disclosures for completeness and accuracy",
                "Agree statement amounts to the trial balance",
                "Review related-party and contingency disclosures",
            ],
        ),
        (
            Assertion::Cutoff,
            [
                "Test transactions either side of period end",
                "Inspect shipping and receiving documents near period end",
                "Review credit notes and reversals issued after period end",
                "Compare period-end accruals with subsequent invoices",
            ],
        ),
    ];

    table
        .into_iter()
        .map(|(assertion, procs)| (assertion, procs.iter().map(|p| p.to_string()).collect()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_is_six_by_four() {
        let catalog = ProcedureCatalog::default();
        assert_eq!(catalog.assertions_for("Revenue").len(), 6);
        for assertion in Assertion::ALL {
            assert_eq!(catalog.procedures_for(assertion).len(), 4);
        }
        assert_eq!(catalog.procedure_count("anything"), 24);
    }

    #[test]
    fn category_override_keeps_catalog_order() {
        let catalog = ProcedureCatalog::default().with_category_assertions(
            " Cash ",
            vec![Assertion::Cutoff, Assertion::Existence],
        );
        assert_eq!(
            catalog.assertions_for("cash"),
            vec![Assertion::Existence, Assertion::Cutoff]
        );
        assert_eq!(catalog.assertions_for("Inventory").len(), 6);
    }

    #[test]
    fn procedure_override() {
        let catalog = ProcedureCatalog::default()
            .with_procedures(Assertion::Valuation, vec!["Re-price inventory".into()]);
        assert_eq!(catalog.procedures_for(Assertion::Valuation), ["Re-price inventory"]);
        assert_eq!(catalog.procedure_count("x"), 21);
    }

    #[test]
    fn deserializes_partial_config() {
        let catalog: ProcedureCatalog =
            serde_json::from_str(r#"{"category_assertions": {"cash": ["existence"]}}"#).unwrap();
        assert_eq!(catalog.assertions_for("Cash"), vec![Assertion::Existence]);
        assert_eq!(catalog.procedures_for(Assertion::Existence).len(), 4);
    }

    #[test]
    fn configured_procedures_merge_over_defaults() {
        let catalog: ProcedureCatalog = serde_json::from_str(
            r#"{"procedures": {"cutoff": ["Test the last ten sales invoices"]}}"#,
        )
        .unwrap();
        assert_eq!(
            catalog.procedures_for(Assertion::Cutoff),
            ["Test the last ten sales invoices"]
        );
        for assertion in Assertion::ALL.into_iter().filter(|a| *a != Assertion::Cutoff) {
            assert_eq!(catalog.procedures_for(assertion).len(), 4, "{assertion}");
        }
        assert_eq!(catalog.procedure_count("Revenue"), 21);
    }
}
