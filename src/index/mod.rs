//! The DECAF index: the public query engine over a directory of shards.
//!
//! Querying compiles a [`Filter`] once and fans the resulting query out to
//! every shard in parallel; results merge associatively (counts sum per
//! key, concatenations keep per-shard order). Surface text is assembled on
//! demand from the literal store of the owning shard.

pub mod ingest;

pub use ingest::{IngestConfig, IngestStats};

use crate::constraints::{sql_quote, Filter};
use crate::error::{Error, Result};
use crate::shard::manager::{ShardManager, ShardQueries};
use crate::shard::{group_count_sql, ShardStore, Table};
use crate::views::{self, OutputLevel};
use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;

static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// One structure matched by a filter, without surface text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FilterRange {
    pub shard: usize,
    pub id: i64,
    pub start: i64,
    pub end: i64,
}

/// One structure matched by a filter, with its surface text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterMatch {
    pub shard: usize,
    pub id: i64,
    pub start: i64,
    pub end: i64,
    pub text: String,
}

/// Total record counts across all shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSize {
    pub literals: u64,
    pub structures: u64,
    pub hierarchies: u64,
}

impl std::fmt::Display for IndexSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} literal(s), {} structure(s), {} hierarchical relation(s)",
            self.literals, self.structures, self.hierarchies
        )
    }
}

/// Requested granularity for structure frequency statistics.
#[derive(Debug, Clone, Default)]
pub struct StructureCountSpec {
    /// Restrict to these structure types.
    pub types: Option<Vec<String>>,
    /// Split counts by annotation value.
    pub by_value: bool,
    /// Split counts by surface text.
    pub by_literal: bool,
}

/// One structure frequency bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureCount {
    pub stype: String,
    pub value: Option<String>,
    pub literal: Option<String>,
    pub count: u64,
}

/// One co-occurrence bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cooccurrence {
    pub source: String,
    pub target: String,
    pub frequency: u64,
}

/// An index directory of `shard-<N>.decaf` files.
pub struct DecafIndex {
    manager: ShardManager,
}

impl DecafIndex {
    /// Create a new index directory with an empty first shard.
    pub fn create(path: &Path) -> Result<Self> {
        let mut manager = ShardManager::create(path)?;
        manager.disconnect()?;
        Ok(Self { manager })
    }

    /// Open an existing index directory.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            manager: ShardManager::open(path)?,
        })
    }

    pub fn num_shards(&self) -> usize {
        self.manager.num_shards()
    }

    /// The compiled per-shard SQL for a filter, for inspection.
    pub fn compile_sql(&self, filter: &Filter, output_level: OutputLevel) -> Result<String> {
        views::compile_filter(filter, output_level, "")
    }

    /// Matched structures without surface text. Backs `filter`, `mask`, and
    /// structure export.
    pub fn get_filter_ranges(
        &self,
        filter: &Filter,
        output_level: OutputLevel,
    ) -> Result<Vec<FilterRange>> {
        let sql = views::compile_filter(filter, output_level, "")?;
        let rows = self.manager.query_shards(ShardQueries::Broadcast(sql), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut ranges = Vec::new();
        for row in rows {
            let (shard, (id, start, end)) = row?;
            ranges.push(FilterRange {
                shard,
                id,
                start,
                end,
            });
        }
        // Shards interleave arbitrarily; normalize to shard order while
        // keeping per-shard query order.
        ranges.sort_by_key(|r| r.shard);
        Ok(ranges)
    }

    /// Matched structures with their surface text, reconstructed from all
    /// literals inside the matched range.
    pub fn filter(&self, filter: &Filter, output_level: OutputLevel) -> Result<Vec<FilterMatch>> {
        let ranges = self.get_filter_ranges(filter, output_level)?;
        let mut matches = Vec::with_capacity(ranges.len());
        let mut reader: Option<ShardStore> = None;
        for range in ranges {
            if reader.as_ref().map(ShardStore::index) != Some(range.shard) {
                reader = Some(self.manager.reader(range.shard)?);
            }
            let store = reader.as_ref().ok_or(Error::NotConnected)?;
            let text = store.group_concat(range.start, range.end)?;
            matches.push(FilterMatch {
                shard: range.shard,
                id: range.id,
                start: range.start,
                end: range.end,
                text,
            });
        }
        Ok(matches)
    }

    /// Concatenated text of all literals inside each given range of one
    /// shard.
    pub fn export_ranges(&self, shard: usize, ranges: &[(i64, i64)]) -> Result<Vec<String>> {
        let store = self.manager.reader(shard)?;
        ranges
            .iter()
            .map(|&(start, end)| store.group_concat(start, end))
            .collect()
    }

    /// Concatenated text of all literals of one shard *outside* the given
    /// ranges.
    pub fn export_inverted(&self, shard: usize, ranges: &[(i64, i64)]) -> Result<String> {
        let store = self.manager.reader(shard)?;
        let spans = merge_spans(ranges.to_vec());
        Ok(masked_text(&store.literals_sorted()?, &spans))
    }

    /// Surface text of structures, following their `structure_literals`
    /// mapping (only literals formally part of the structure).
    pub fn export_structures(&self, structures: &[(usize, i64)]) -> Result<Vec<String>> {
        let mut texts = Vec::with_capacity(structures.len());
        let mut reader: Option<ShardStore> = None;
        for &(shard, id) in structures {
            if reader.as_ref().map(ShardStore::index) != Some(shard) {
                reader = Some(self.manager.reader(shard)?);
            }
            let store = reader.as_ref().ok_or(Error::NotConnected)?;
            texts.push(store.export_structure(id)?);
        }
        Ok(texts)
    }

    /// All structures of one type across all shards, in `(shard, id)` order.
    pub fn get_structures(&self, stype: &str) -> Result<Vec<FilterRange>> {
        let sql = format!(
            "SELECT id, start, \"end\" FROM structures WHERE type = {} ORDER BY id",
            sql_quote(stype)
        );
        let rows = self.manager.query_shards(ShardQueries::Broadcast(sql), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut structures = Vec::new();
        for row in rows {
            let (shard, (id, start, end)) = row?;
            structures.push(FilterRange {
                shard,
                id,
                start,
                end,
            });
        }
        structures.sort_by_key(|r| (r.shard, r.id));
        Ok(structures)
    }

    /// The full corpus text with the literals of matched structures
    /// removed, shard by shard in shard order. `clean_whitespace` collapses
    /// whitespace runs left behind by the removal.
    pub fn mask(
        &self,
        filter: &Filter,
        mask_level: OutputLevel,
        clean_whitespace: bool,
    ) -> Result<String> {
        let ranges = self.get_filter_ranges(filter, mask_level)?;
        let mut by_shard: AHashMap<usize, Vec<(i64, i64)>> = AHashMap::new();
        for range in ranges {
            by_shard
                .entry(range.shard)
                .or_default()
                .push((range.start, range.end));
        }

        let mut output = String::new();
        for shard in 0..self.manager.num_shards() {
            let spans = by_shard.remove(&shard).unwrap_or_default();
            output.push_str(&self.export_inverted(shard, &spans)?);
        }
        if clean_whitespace {
            output = WHITESPACE_RUNS.replace_all(&output, " ").trim().to_string();
        }
        Ok(output)
    }

    /// Pairwise co-occurrence of two filters. Both filters must carry the
    /// same hierarchy (joined per parent structure) or none (joined on
    /// exact offsets).
    pub fn get_cooccurrence(&self, source: &Filter, target: &Filter) -> Result<Vec<Cooccurrence>> {
        source.validate()?;
        target.validate()?;
        let (join, frequency) = match (&source.hierarchy, &target.hierarchy) {
            (Some(source_scope), Some(target_scope)) => {
                if source_scope != target_scope {
                    return Err(Error::Configuration(format!(
                        "source and target filters must be scoped to the same hierarchy: {:?} vs {:?}",
                        source_scope, target_scope
                    )));
                }
                (
                    "srv.structure_id = trv.structure_id",
                    "COUNT(DISTINCT srv.structure_id)",
                )
            }
            (None, None) => (
                "srv.substructure_start = trv.substructure_start \
                 AND srv.substructure_end = trv.substructure_end",
                "COUNT(*)",
            ),
            _ => {
                return Err(Error::Configuration(
                    "source and target filters must either both carry a hierarchy or neither"
                        .to_string(),
                ))
            }
        };

        let mut all_views = views::construct_views(source, "source_")?;
        all_views.extend(views::construct_views(target, "target_")?);
        let source_terminal = views::terminal_view(source, OutputLevel::Substructures);
        let target_terminal = views::terminal_view(target, OutputLevel::Substructures);

        let sql = format!(
            "{}SELECT {} AS sources, {} AS targets, {} AS frequency \
             FROM source_{} AS srv JOIN target_{} AS trv ON ({}) \
             GROUP BY sources, targets",
            views::with_clause(&all_views),
            label_column("srv", source),
            label_column("trv", target),
            frequency,
            source_terminal,
            target_terminal,
            join
        );

        let rows = self.manager.query_shards(ShardQueries::Broadcast(sql), |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut merged: AHashMap<(String, String), u64> = AHashMap::new();
        for row in rows {
            let (_, (source_label, target_label, frequency)) = row?;
            if let (Some(source_label), Some(target_label)) = (source_label, target_label) {
                *merged.entry((source_label, target_label)).or_default() += frequency as u64;
            }
        }
        let mut cooccurrences: Vec<Cooccurrence> = merged
            .into_iter()
            .map(|((source, target), frequency)| Cooccurrence {
                source,
                target,
                frequency,
            })
            .collect();
        cooccurrences.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
        Ok(cooccurrences)
    }

    /// Total record counts, summed across shards.
    pub fn get_size(&self) -> Result<IndexSize> {
        let sql = "SELECT (SELECT COUNT(*) FROM literals), \
                   (SELECT COUNT(*) FROM structures), \
                   (SELECT COUNT(*) FROM hierarchical_structures)"
            .to_string();
        let rows = self.manager.query_shards(ShardQueries::Broadcast(sql), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut size = IndexSize::default();
        for row in rows {
            let (_, (literals, structures, hierarchies)) = row?;
            size.literals += literals as u64;
            size.structures += structures as u64;
            size.hierarchies += hierarchies as u64;
        }
        Ok(size)
    }

    /// Frequency of each literal value, merged across shards.
    pub fn get_literal_counts(&self) -> Result<AHashMap<String, u64>> {
        let sql = group_count_sql(Table::Literals, &["value"]);
        let rows = self.manager.query_shards(ShardQueries::Broadcast(sql), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts: AHashMap<String, u64> = AHashMap::new();
        for row in rows {
            let (_, (value, count)) = row?;
            *counts.entry(value).or_default() += count as u64;
        }
        Ok(counts)
    }

    /// Structure frequencies at the requested granularity, merged across
    /// shards and sorted by descending count.
    pub fn get_structure_counts(&self, spec: &StructureCountSpec) -> Result<Vec<StructureCount>> {
        let mut group_cols = vec!["s.type"];
        if spec.by_value {
            group_cols.push("s.value");
        }
        if spec.by_literal {
            group_cols.push("lit.literal");
        }
        let literal_join = if spec.by_literal {
            " LEFT JOIN (SELECT sl.structure AS sid, \
             string_agg(l.value, '' ORDER BY l.start) AS literal \
             FROM structure_literals AS sl \
             JOIN literals AS l ON l.id = sl.literal \
             GROUP BY sl.structure) AS lit ON lit.sid = s.id"
        } else {
            ""
        };
        let type_clause = match &spec.types {
            Some(types) if !types.is_empty() => format!(
                " WHERE s.type IN ({})",
                types
                    .iter()
                    .map(|t| sql_quote(t))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => String::new(),
        };
        let cols = group_cols.join(", ");
        let sql = format!(
            "SELECT {}, COUNT(*) FROM structures AS s{}{} GROUP BY {}",
            cols, literal_join, type_clause, cols
        );

        let by_value = spec.by_value;
        let by_literal = spec.by_literal;
        let rows = self.manager.query_shards(ShardQueries::Broadcast(sql), move |row| {
            let stype: String = row.get(0)?;
            let mut column = 1;
            let value: Option<String> = if by_value {
                let v = row.get(column)?;
                column += 1;
                v
            } else {
                None
            };
            let literal: Option<String> = if by_literal {
                let v = row.get(column)?;
                column += 1;
                v
            } else {
                None
            };
            let count: i64 = row.get(column)?;
            Ok((stype, value, literal, count))
        })?;

        let mut merged: AHashMap<(String, Option<String>, Option<String>), u64> = AHashMap::new();
        for row in rows {
            let (_, (stype, value, literal, count)) = row?;
            *merged.entry((stype, value, literal)).or_default() += count as u64;
        }
        let mut counts: Vec<StructureCount> = merged
            .into_iter()
            .map(|((stype, value, literal), count)| StructureCount {
                stype,
                value,
                literal,
                count,
            })
            .collect();
        counts.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| (&a.stype, &a.value, &a.literal).cmp(&(&b.stype, &b.value, &b.literal)))
        });
        Ok(counts)
    }

    pub(crate) fn manager_mut(&mut self) -> &mut ShardManager {
        &mut self.manager
    }
}

/// Per-type label expression used by the co-occurrence projection, e.g.
/// `'upos=' || CASE WHEN srv.type = 'upos' THEN srv.value END`.
fn label_column(alias: &str, filter: &Filter) -> String {
    filter
        .types()
        .iter()
        .map(|stype| {
            format!(
                "{} || CASE WHEN {}.type = {} THEN {}.value END",
                sql_quote(&format!("{}=", stype)),
                alias,
                sql_quote(stype),
                alias
            )
        })
        .collect::<Vec<_>>()
        .join(" || ' | ' || ")
}

/// Sort and merge overlapping or touching spans.
fn merge_spans(mut spans: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    spans.sort();
    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = (*last_end).max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Concatenate literals not covered by any of the merged spans.
fn masked_text(literals: &[crate::model::Literal], spans: &[(i64, i64)]) -> String {
    let mut output = String::new();
    let mut span = 0;
    for literal in literals {
        while span < spans.len() && spans[span].1 <= literal.start {
            span += 1;
        }
        let covered = span < spans.len()
            && spans[span].0 <= literal.start
            && literal.end <= spans[span].1;
        if !covered {
            output.push_str(&literal.value);
        }
    }
    output
}
