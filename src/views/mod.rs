//! Compiles a [`Filter`] into a layered cascade of named views.
//!
//! Each layer is a common table expression refining the previous one:
//!
//! 1. `relevant_structures`: prefilter scan, joined with the parent scope
//!    when the filter carries a hierarchy.
//! 2. `literal_structures`: candidates annotated with the concatenated
//!    text of their literals (only when a condition checks surface text).
//! 3. `filtered_literals`: row-level filter over the annotated candidates.
//! 4. `filtered_sequences`: self-join enforcing offset order across
//!    criteria.
//! 5. `filtered_structures`: parents whose contained candidates jointly
//!    satisfy the grouped predicate.
//! 6. `filtered_constrained_substructures`: candidates inside surviving
//!    parents that fully match a condition.
//! 7. `filtered_substructures`: default terminal without a hierarchy.
//!
//! All view names take a prefix so two independently compiled filters can
//! coexist in a single query (co-occurrence).

use crate::constraints::{sql_quote, Filter};
use crate::error::{Error, Result};

/// Which structural level a query projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLevel {
    /// The matched substructures themselves.
    #[default]
    Substructures,
    /// The scoping parent structures.
    Structures,
}

impl std::str::FromStr for OutputLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "substructures" | "substructure" => Ok(OutputLevel::Substructures),
            "structures" | "structure" => Ok(OutputLevel::Structures),
            other => Err(Error::Configuration(format!(
                "unsupported output level '{}' (expected 'structures' or 'substructures')",
                other
            ))),
        }
    }
}

impl std::fmt::Display for OutputLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputLevel::Substructures => write!(f, "substructures"),
            OutputLevel::Structures => write!(f, "structures"),
        }
    }
}

/// The named views for one compiled filter, in dependency order.
pub fn construct_views(filter: &Filter, view_prefix: &str) -> Result<Vec<(String, String)>> {
    filter.validate()?;
    let p = view_prefix;
    let mut views: Vec<(String, String)> = Vec::new();

    // 1. Broad scan. With a hierarchy, every candidate is paired with its
    // enclosing parent structure by offset containment.
    let relevant = match &filter.hierarchy {
        None => format!(
            "SELECT id AS substructure_id, start AS substructure_start, \"end\" AS substructure_end, \
             type, value FROM structures WHERE {}",
            filter.to_prefilter_sql("")
        ),
        Some(scope) => format!(
            "SELECT sub.id AS substructure_id, sub.start AS substructure_start, \
             sub.\"end\" AS substructure_end, sub.type, sub.value, \
             sup.id AS structure_id, sup.start AS structure_start, sup.\"end\" AS structure_end \
             FROM structures AS sub \
             JOIN structures AS sup ON sup.type = {} \
             AND sup.start <= sub.start AND sub.\"end\" <= sup.\"end\" \
             WHERE {}",
            sql_quote(&scope.parent),
            filter.to_prefilter_sql("sub.")
        ),
    };
    views.push((format!("{}relevant_structures", p), relevant));

    // 2./3. Literal annotation, only when some condition checks surface text.
    if filter.has_literals() {
        let annotated = format!(
            "SELECT rs.*, st.literal FROM {}relevant_structures AS rs \
             LEFT JOIN (SELECT sl.structure AS substructure_id, \
             string_agg(l.value, '' ORDER BY l.start) AS literal \
             FROM structure_literals AS sl \
             JOIN literals AS l ON l.id = sl.literal \
             GROUP BY sl.structure) AS st \
             ON st.substructure_id = rs.substructure_id",
            p
        );
        views.push((format!("{}literal_structures", p), annotated));
        views.push((
            format!("{}filtered_literals", p),
            format!(
                "SELECT * FROM {}literal_structures WHERE {}",
                p,
                filter.to_sql("")
            ),
        ));
    }

    let base = if filter.has_literals() {
        format!("{}literal_structures", p)
    } else {
        format!("{}relevant_structures", p)
    };

    // 4. Sequences: one aliased copy of the candidate set per criterion,
    // chained by strictly increasing start offsets (within the same parent
    // when scoped). The resulting row spans the whole matched sequence.
    if filter.sequential {
        let n = filter.criteria.len();
        let mut select_cols = vec![
            "c0.substructure_id".to_string(),
            "c0.substructure_start".to_string(),
            format!("c{}.substructure_end AS substructure_end", n - 1),
            "c0.type".to_string(),
            "c0.value".to_string(),
        ];
        if filter.has_literals() {
            select_cols.push("c0.literal".to_string());
        }
        if filter.hierarchy.is_some() {
            select_cols.push("c0.structure_id".to_string());
            select_cols.push("c0.structure_start".to_string());
            select_cols.push("c0.structure_end".to_string());
        }
        let mut sql = format!("SELECT {} FROM {} AS c0", select_cols.join(", "), base);
        for (i, criterion) in filter.criteria.iter().enumerate().skip(1) {
            let alias = format!("c{}", i);
            let mut join_clauses = vec![
                format!("({})", criterion.to_sql(&format!("{}.", alias))),
                format!("{}.substructure_start > c{}.substructure_start", alias, i - 1),
            ];
            if filter.hierarchy.is_some() {
                join_clauses.push(format!("{}.structure_id = c0.structure_id", alias));
            }
            sql.push_str(&format!(
                " JOIN {} AS {} ON {}",
                base,
                alias,
                join_clauses.join(" AND ")
            ));
        }
        sql.push_str(&format!(" WHERE ({})", filter.criteria[0].to_sql("c0.")));
        views.push((format!("{}filtered_sequences", p), sql));
    }

    // 5./6. Structural scope: grouped evaluation per parent, then the
    // matched candidates inside surviving parents.
    if filter.hierarchy.is_some() {
        let mut having = filter.to_grouped_sql();
        if filter.sequential {
            having = format!(
                "({}) AND structure_id IN (SELECT structure_id FROM {}filtered_sequences)",
                having, p
            );
        }
        views.push((
            format!("{}filtered_structures", p),
            format!(
                "SELECT structure_id, structure_start, structure_end FROM {} \
                 GROUP BY structure_id, structure_start, structure_end HAVING {}",
                base, having
            ),
        ));
        views.push((
            format!("{}filtered_constrained_substructures", p),
            format!(
                "SELECT DISTINCT fb.* FROM {} AS fb \
                 JOIN {}filtered_structures AS fs ON fs.structure_id = fb.structure_id \
                 WHERE {}",
                base,
                p,
                filter.to_match_sql("fb.")
            ),
        ));
    }

    // 7. Default terminal without a hierarchy.
    if filter.hierarchy.is_none() && !filter.has_literals() && !filter.sequential {
        views.push((
            format!("{}filtered_substructures", p),
            format!(
                "SELECT * FROM {}relevant_structures WHERE {}",
                p,
                filter.to_sql("")
            ),
        ));
    }

    Ok(views)
}

/// The terminal view a query over this filter selects from, without the
/// view prefix.
pub fn terminal_view(filter: &Filter, output_level: OutputLevel) -> &'static str {
    match (&filter.hierarchy, output_level) {
        (Some(_), OutputLevel::Substructures) => "filtered_constrained_substructures",
        (Some(_), OutputLevel::Structures) => "filtered_structures",
        (None, _) => {
            if filter.sequential {
                "filtered_sequences"
            } else if filter.has_literals() {
                "filtered_literals"
            } else {
                "filtered_substructures"
            }
        }
    }
}

fn output_columns(filter: &Filter, output_level: OutputLevel) -> &'static str {
    match (&filter.hierarchy, output_level) {
        (Some(_), OutputLevel::Structures) => "structure_id, structure_start, structure_end",
        _ => "DISTINCT substructure_id, substructure_start, substructure_end",
    }
}

/// Render the `WITH` clause for a cascade.
pub fn with_clause(views: &[(String, String)]) -> String {
    let definitions = views
        .iter()
        .map(|(name, sql)| format!("{} AS ({})", name, sql))
        .collect::<Vec<_>>()
        .join(", ");
    format!("WITH {} ", definitions)
}

/// Compile the complete per-shard query for one filter: the view cascade
/// plus the final projection of `(id, start, end)` rows at the requested
/// output level.
pub fn compile_filter(
    filter: &Filter,
    output_level: OutputLevel,
    view_prefix: &str,
) -> Result<String> {
    let views = construct_views(filter, view_prefix)?;
    let terminal = terminal_view(filter, output_level);
    Ok(format!(
        "{}SELECT {} FROM {}{}",
        with_clause(&views),
        output_columns(filter, output_level),
        view_prefix,
        terminal
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{Condition, Criterion, Filter};

    fn flat_filter() -> Filter {
        Filter::new(vec![Criterion::single(
            Condition::new("upos").with_values(["NOUN"]),
        )])
    }

    fn scoped_filter() -> Filter {
        Filter::new(vec![Criterion::all(vec![
            Condition::new("upos").with_values(["ADJ"]),
            Condition::new("upos").with_values(["NOUN"]),
        ])])
        .with_hierarchy("sentence", "token")
    }

    #[test]
    fn test_flat_filter_terminal() {
        let filter = flat_filter();
        assert_eq!(
            terminal_view(&filter, OutputLevel::Substructures),
            "filtered_substructures"
        );
        let sql = compile_filter(&filter, OutputLevel::Substructures, "").unwrap();
        assert!(sql.starts_with("WITH relevant_structures AS ("));
        assert!(sql.ends_with("FROM filtered_substructures"));
        assert!(!sql.contains("literal_structures"));
        assert!(!sql.contains("filtered_structures "));
    }

    #[test]
    fn test_literal_filter_terminal() {
        let filter = Filter::new(vec![Criterion::single(
            Condition::new("token").with_literal("cat"),
        )]);
        assert_eq!(
            terminal_view(&filter, OutputLevel::Substructures),
            "filtered_literals"
        );
        let sql = compile_filter(&filter, OutputLevel::Substructures, "").unwrap();
        assert!(sql.contains("string_agg(l.value, '' ORDER BY l.start)"));
        assert!(sql.contains("literal = 'cat'"));
    }

    #[test]
    fn test_scoped_filter_views() {
        let filter = scoped_filter();
        let views = construct_views(&filter, "").unwrap();
        let names: Vec<&str> = views.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "relevant_structures",
                "filtered_structures",
                "filtered_constrained_substructures"
            ]
        );
        // Parent scoping is by offset containment against the parent type.
        assert!(views[0].1.contains("sup.type = 'sentence'"));
        assert!(views[0].1.contains("sup.start <= sub.start"));
        // The grouped predicate demands one match per conjunct.
        assert!(views[1].1.contains(
            "SUM(CASE WHEN type = 'upos' AND value = 'ADJ' THEN 1 ELSE 0 END) > 0"
        ));
    }

    #[test]
    fn test_scoped_output_levels() {
        let filter = scoped_filter();
        let subs = compile_filter(&filter, OutputLevel::Substructures, "").unwrap();
        assert!(subs.ends_with("FROM filtered_constrained_substructures"));
        assert!(subs.contains("DISTINCT substructure_id"));
        let parents = compile_filter(&filter, OutputLevel::Structures, "").unwrap();
        assert!(parents.ends_with("FROM filtered_structures"));
        assert!(parents.contains("SELECT structure_id, structure_start, structure_end FROM"));
    }

    #[test]
    fn test_sequential_filter_self_join() {
        let filter = Filter::new(vec![
            Criterion::single(Condition::new("upos").with_values(["ADJ"])),
            Criterion::single(Condition::new("upos").with_values(["NOUN"])),
        ])
        .with_op(crate::constraints::Op::And)
        .with_sequential(true)
        .with_hierarchy("sentence", "token");

        let views = construct_views(&filter, "").unwrap();
        let sequences = &views
            .iter()
            .find(|(n, _)| n == "filtered_sequences")
            .unwrap()
            .1;
        assert!(sequences.contains("c1.substructure_start > c0.substructure_start"));
        assert!(sequences.contains("c1.structure_id = c0.structure_id"));
        // The grouped view only keeps parents containing a full sequence.
        let structures = &views
            .iter()
            .find(|(n, _)| n == "filtered_structures")
            .unwrap()
            .1;
        assert!(structures.contains("structure_id IN (SELECT structure_id FROM filtered_sequences)"));
    }

    #[test]
    fn test_view_prefix_applies_to_every_view() {
        let filter = scoped_filter();
        let views = construct_views(&filter, "source_").unwrap();
        for (name, _) in &views {
            assert!(name.starts_with("source_"), "unprefixed view {}", name);
        }
        let sql = compile_filter(&filter, OutputLevel::Substructures, "source_").unwrap();
        assert!(sql.ends_with("FROM source_filtered_constrained_substructures"));
    }

    #[test]
    fn test_invalid_filter_is_configuration_error() {
        let filter = Filter::new(vec![]);
        assert!(matches!(
            compile_filter(&filter, OutputLevel::Substructures, ""),
            Err(crate::error::Error::Configuration(_))
        ));
    }
}
