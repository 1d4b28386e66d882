//! Constraint algebra over annotations.
//!
//! A [`Condition`] matches a single structure, a [`Criterion`] combines
//! conditions with a boolean operation, and a [`Filter`] is the top-level
//! query object, optionally scoped to a structural level and optionally
//! order-sensitive. Each layer renders three SQL fragments:
//!
//! - `to_sql`: row-level predicate (one structure matches),
//! - `to_prefilter_sql`: OR-widened superset used for the initial scan,
//! - `to_grouped_sql`: `HAVING` predicate over a per-parent aggregation.
//!
//! Filters deserialize straight from YAML specification files, mirroring
//! how shard configuration files load elsewhere in the ecosystem.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Quote a string value for inclusion in generated SQL.
pub(crate) fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Boolean joining operation for multi-member constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    And,
    Or,
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::And => write!(f, "AND"),
            Op::Or => write!(f, "OR"),
        }
    }
}

impl std::str::FromStr for Op {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "and" => Ok(Op::And),
            "or" => Ok(Op::Or),
            _ => Err(format!("Unknown operation: {}. Valid options: and, or", s)),
        }
    }
}

/// Structural scope of a filter: match substructures at `child` level
/// jointly constrained within a parent of type `parent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Scope {
    pub parent: String,
    pub child: String,
}

impl Scope {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }
}

impl From<(String, String)> for Scope {
    fn from((parent, child): (String, String)) -> Self {
        Self { parent, child }
    }
}

impl From<Scope> for (String, String) {
    fn from(scope: Scope) -> Self {
        (scope.parent, scope.child)
    }
}

/// Matches one structure by type, optionally by value set, surface text,
/// and (inside a structural scope) a minimum number of distinct matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub stype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    #[serde(default)]
    pub min_count: u32,
}

impl Condition {
    pub fn new(stype: impl Into<String>) -> Self {
        Self {
            stype: stype.into(),
            values: None,
            literal: None,
            min_count: 0,
        }
    }

    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_literal(mut self, literal: impl Into<String>) -> Self {
        self.literal = Some(literal.into());
        self
    }

    pub fn with_min_count(mut self, min_count: u32) -> Self {
        self.min_count = min_count;
        self
    }

    pub fn has_literal(&self) -> bool {
        self.literal.is_some()
    }

    fn value_set(&self) -> Option<String> {
        self.values
            .as_ref()
            .map(|vs| format!("({})", vs.iter().map(|v| sql_quote(v)).collect::<Vec<_>>().join(", ")))
    }

    /// Row-level predicate, including the literal check when present.
    pub fn to_sql(&self, prefix: &str) -> String {
        let mut sql = format!("{}type = {}", prefix, sql_quote(&self.stype));
        if let Some(set) = self.value_set() {
            sql.push_str(&format!(" AND {}value IN {}", prefix, set));
        }
        if let Some(literal) = &self.literal {
            sql.push_str(&format!(" AND {}literal = {}", prefix, sql_quote(literal)));
        }
        sql
    }

    /// Relaxed predicate for the broad scan. Literal checks are deferred to
    /// later layers, so the prefilter always retrieves a superset.
    pub fn to_prefilter_sql(&self, prefix: &str) -> String {
        let mut sql = format!("{}type = {}", prefix, sql_quote(&self.stype));
        if let Some(set) = self.value_set() {
            sql.push_str(&format!(" AND {}value IN {}", prefix, set));
        }
        sql
    }

    /// Per-value counted predicate for the grouped evaluation keyed by the
    /// parent structure.
    pub fn to_grouped_sql(&self) -> String {
        let counted = |matched: String| {
            format!(
                "SUM(CASE WHEN {} THEN 1 ELSE 0 END) > {}",
                matched, self.min_count
            )
        };
        let literal_clause = self
            .literal
            .as_ref()
            .map(|l| format!(" AND literal = {}", sql_quote(l)))
            .unwrap_or_default();
        match &self.values {
            Some(values) => values
                .iter()
                .map(|v| {
                    counted(format!(
                        "type = {} AND value = {}{}",
                        sql_quote(&self.stype),
                        sql_quote(v),
                        literal_clause
                    ))
                })
                .collect::<Vec<_>>()
                .join(" AND "),
            None => counted(format!(
                "type = {}{}",
                sql_quote(&self.stype),
                literal_clause
            )),
        }
    }
}

/// Boolean combination of conditions. `op` is required exactly when more
/// than one condition is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<Op>,
}

impl Criterion {
    pub fn single(condition: Condition) -> Self {
        Self {
            conditions: vec![condition],
            op: None,
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            op: Some(Op::And),
        }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            op: Some(Op::Or),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.conditions.is_empty() {
            return Err(Error::Configuration(
                "criterion has no conditions".to_string(),
            ));
        }
        if self.conditions.len() > 1 && self.op.is_none() {
            return Err(Error::Configuration(
                "criteria with more than one condition require a joining operation".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_literals(&self) -> bool {
        self.conditions.iter().any(Condition::has_literal)
    }

    fn joiner(&self) -> String {
        format!(" {} ", self.op.unwrap_or(Op::And))
    }

    pub fn to_sql(&self, prefix: &str) -> String {
        self.conditions
            .iter()
            .map(|c| format!("({})", c.to_sql(prefix)))
            .collect::<Vec<_>>()
            .join(&self.joiner())
    }

    /// Conjunctions are widened to disjunctions so the prefilter retrieves
    /// every potentially relevant match.
    pub fn to_prefilter_sql(&self, prefix: &str) -> String {
        self.conditions
            .iter()
            .map(|c| format!("({})", c.to_prefilter_sql(prefix)))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    pub fn to_grouped_sql(&self) -> String {
        self.conditions
            .iter()
            .map(|c| format!("({})", c.to_grouped_sql()))
            .collect::<Vec<_>>()
            .join(&self.joiner())
    }
}

/// Top-level query object: criteria joined by `op`, optionally requiring
/// matches in offset order (`sequential`) and optionally scoped to a
/// structural level (`hierarchy`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub criteria: Vec<Criterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<Op>,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<Scope>,
}

impl Filter {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self {
            criteria,
            op: None,
            sequential: false,
            hierarchy: None,
        }
    }

    pub fn with_op(mut self, op: Op) -> Self {
        self.op = Some(op);
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    pub fn with_hierarchy(mut self, parent: impl Into<String>, child: impl Into<String>) -> Self {
        self.hierarchy = Some(Scope::new(parent, child));
        self
    }

    /// Load a filter specification from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let filter: Filter = serde_yaml_ng::from_str(&raw)
            .map_err(|e| Error::Configuration(format!("invalid filter spec: {}", e)))?;
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<()> {
        if self.criteria.is_empty() {
            return Err(Error::Configuration("filter has no criteria".to_string()));
        }
        if self.criteria.len() > 1 && self.op.is_none() {
            return Err(Error::Configuration(
                "filters with more than one criterion require a joining operation".to_string(),
            ));
        }
        for criterion in &self.criteria {
            criterion.validate()?;
        }
        Ok(())
    }

    pub fn has_literals(&self) -> bool {
        self.criteria.iter().any(Criterion::has_literals)
    }

    /// Distinct condition types in first-appearance order. Used for
    /// co-occurrence labelling.
    pub fn types(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for criterion in &self.criteria {
            for condition in &criterion.conditions {
                if !seen.contains(&condition.stype) {
                    seen.push(condition.stype.clone());
                }
            }
        }
        seen
    }

    fn joiner(&self) -> String {
        format!(" {} ", self.op.unwrap_or(Op::And))
    }

    pub fn to_sql(&self, prefix: &str) -> String {
        self.criteria
            .iter()
            .map(|c| format!("({})", c.to_sql(prefix)))
            .collect::<Vec<_>>()
            .join(&self.joiner())
    }

    pub fn to_prefilter_sql(&self, prefix: &str) -> String {
        self.criteria
            .iter()
            .map(|c| format!("({})", c.to_prefilter_sql(prefix)))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    pub fn to_grouped_sql(&self) -> String {
        self.criteria
            .iter()
            .map(|c| format!("({})", c.to_grouped_sql()))
            .collect::<Vec<_>>()
            .join(&self.joiner())
    }

    /// Predicate satisfied by a row that fully matches *at least one*
    /// condition, literal checks included. Used to pick the matched
    /// substructures out of a surviving parent.
    pub fn to_match_sql(&self, prefix: &str) -> String {
        self.criteria
            .iter()
            .flat_map(|criterion| criterion.conditions.iter())
            .map(|c| format!("({})", c.to_sql(prefix)))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_to_sql() {
        let condition = Condition::new("upos").with_values(["NOUN", "ADJ"]);
        assert_eq!(
            condition.to_sql(""),
            "type = 'upos' AND value IN ('NOUN', 'ADJ')"
        );
    }

    #[test]
    fn test_condition_with_literal() {
        let condition = Condition::new("upos")
            .with_values(["ADJ"])
            .with_literal("second");
        assert_eq!(
            condition.to_sql("c0."),
            "c0.type = 'upos' AND c0.value IN ('ADJ') AND c0.literal = 'second'"
        );
        // The prefilter never checks literals.
        assert_eq!(
            condition.to_prefilter_sql(""),
            "type = 'upos' AND value IN ('ADJ')"
        );
    }

    #[test]
    fn test_condition_quoting() {
        let condition = Condition::new("token").with_literal("it's");
        assert_eq!(
            condition.to_sql(""),
            "type = 'token' AND literal = 'it''s'"
        );
    }

    #[test]
    fn test_grouped_sql_counts_each_value() {
        let condition = Condition::new("upos")
            .with_values(["NOUN", "ADJ"])
            .with_min_count(1);
        assert_eq!(
            condition.to_grouped_sql(),
            "SUM(CASE WHEN type = 'upos' AND value = 'NOUN' THEN 1 ELSE 0 END) > 1 \
             AND SUM(CASE WHEN type = 'upos' AND value = 'ADJ' THEN 1 ELSE 0 END) > 1"
        );
    }

    #[test]
    fn test_grouped_sql_without_values() {
        let condition = Condition::new("dependency");
        assert_eq!(
            condition.to_grouped_sql(),
            "SUM(CASE WHEN type = 'dependency' THEN 1 ELSE 0 END) > 0"
        );
    }

    #[test]
    fn test_criterion_requires_op() {
        let criterion = Criterion {
            conditions: vec![Condition::new("upos"), Condition::new("xpos")],
            op: None,
        };
        assert!(matches!(
            criterion.validate(),
            Err(crate::error::Error::Configuration(_))
        ));
        assert!(Criterion::all(vec![Condition::new("upos"), Condition::new("xpos")])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_criterion_prefilter_widens_to_or() {
        let criterion = Criterion::all(vec![
            Condition::new("upos").with_values(["ADJ"]),
            Condition::new("upos").with_values(["NOUN"]),
        ]);
        assert!(criterion.to_sql("").contains(" AND "));
        assert!(criterion.to_prefilter_sql("").contains(" OR "));
        assert!(!criterion.to_prefilter_sql("").contains(" AND value IN ('ADJ')) AND "));
    }

    #[test]
    fn test_filter_types_deduplicated_in_order() {
        let filter = Filter::new(vec![Criterion::all(vec![
            Condition::new("upos").with_values(["PRON"]),
            Condition::new("Gender").with_values(["Fem"]),
            Condition::new("upos").with_values(["NOUN"]),
        ])]);
        assert_eq!(filter.types(), vec!["upos".to_string(), "Gender".to_string()]);
    }

    #[test]
    fn test_filter_match_sql_is_any_condition() {
        let filter = Filter::new(vec![Criterion::all(vec![
            Condition::new("upos").with_values(["ADJ"]),
            Condition::new("upos").with_values(["NOUN"]),
        ])]);
        assert_eq!(
            filter.to_match_sql("fb."),
            "(fb.type = 'upos' AND fb.value IN ('ADJ')) OR (fb.type = 'upos' AND fb.value IN ('NOUN'))"
        );
    }

    #[test]
    fn test_filter_yaml_round_trip() {
        let yaml = r#"
criteria:
  - op: and
    conditions:
      - type: upos
        values: [ADJ]
        literal: second
      - type: upos
        values: [NOUN]
sequential: true
hierarchy: [sentence, token]
"#;
        let filter: Filter = serde_yaml_ng::from_str(yaml).unwrap();
        filter.validate().unwrap();
        assert!(filter.sequential);
        assert!(filter.has_literals());
        let scope = filter.hierarchy.as_ref().unwrap();
        assert_eq!(scope.parent, "sentence");
        assert_eq!(scope.child, "token");
        assert_eq!(filter.criteria[0].op, Some(Op::And));
    }
}
