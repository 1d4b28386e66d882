//! A single shard: one embedded DuckDB database file.
//!
//! A shard holds a document-boundary-aligned slice of the corpus in four
//! relations (`literals`, `structures`, `structure_literals`,
//! `hierarchical_structures`) plus helper indices, created from the bundled
//! `schema.sql`. Writes happen through [`ShardStore::add`], one transaction
//! per call: literals first, then structures (which must resolve every
//! literal reference), then hierarchy edges.

pub mod manager;

use crate::error::{Error, Result};
use crate::model::{IndexBatch, Literal};
use duckdb::{params, AccessMode, Config, Connection};
use log::debug;
use std::path::{Path, PathBuf};

/// Schema applied to every newly created shard.
const SCHEMA: &str = include_str!("schema.sql");

/// File name of shard `index` inside an index directory.
pub fn shard_file(index_dir: &Path, index: usize) -> PathBuf {
    index_dir.join(format!("shard-{}.decaf", index))
}

/// The persisted tables of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Literals,
    Structures,
    StructureLiterals,
    HierarchicalStructures,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Literals => "literals",
            Table::Structures => "structures",
            Table::StructureLiterals => "structure_literals",
            Table::HierarchicalStructures => "hierarchical_structures",
        }
    }
}

/// Row counts written by a single `add` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddCounts {
    pub literals: u64,
    pub structures: u64,
    pub hierarchies: u64,
}

/// SQL for a grouped count over `table`, used both per shard and for the
/// cross-shard statistics fan-out.
pub fn group_count_sql(table: Table, columns: &[&str]) -> String {
    let cols = columns.join(", ");
    format!(
        "SELECT {}, COUNT(*) FROM {} GROUP BY {}",
        cols,
        table.as_str(),
        cols
    )
}

/// One open shard connection.
pub struct ShardStore {
    conn: Connection,
    path: PathBuf,
    index: usize,
}

impl ShardStore {
    /// Create a fresh shard file and apply the schema. Idempotent on an
    /// existing shard.
    pub fn create(index_dir: &Path, index: usize) -> Result<Self> {
        let path = shard_file(index_dir, index);
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        debug!("created shard {} at {}", index, path.display());
        Ok(Self { conn, path, index })
    }

    /// Open an existing shard read-write (the active ingestion shard).
    pub fn open(index_dir: &Path, index: usize) -> Result<Self> {
        let path = shard_file(index_dir, index);
        if !path.exists() {
            return Err(Error::Configuration(format!(
                "shard {} does not exist at {}",
                index,
                path.display()
            )));
        }
        let conn = Connection::open(&path)?;
        Ok(Self { conn, path, index })
    }

    /// Open an existing shard for querying only.
    pub fn open_read_only(index_dir: &Path, index: usize) -> Result<Self> {
        let path = shard_file(index_dir, index);
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(&path, config)?;
        Ok(Self { conn, path, index })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Commit outstanding work to disk without closing (periodic backup
    /// commits during long ingestion runs).
    pub fn checkpoint(&self) -> Result<()> {
        self.conn.execute_batch("CHECKPOINT")?;
        Ok(())
    }

    /// Commit and close the connection.
    pub fn close(self) -> Result<()> {
        debug!("closing shard {}", self.index);
        self.conn
            .close()
            .map_err(|(_conn, e)| Error::Storage(e))?;
        Ok(())
    }

    /// Highest assigned ID in an ID-carrying table, used for bulk-friendly
    /// allocation (no per-row round trip).
    pub fn last_id(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COALESCE(MAX(id), 0) FROM {}", table.as_str());
        let id = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(id)
    }

    /// Width of the shard's virtual text: the highest literal end offset.
    pub fn text_length(&self) -> Result<i64> {
        let length = self.conn.query_row(
            "SELECT COALESCE(MAX(\"end\"), 0) FROM literals",
            [],
            |row| row.get(0),
        )?;
        Ok(length)
    }

    pub fn count(&self, table: Table) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Grouped counts, e.g. `group_count(Literals, &["value"])` for literal
    /// frequencies. NULL group values come back as empty strings.
    pub fn group_count(&self, table: Table, columns: &[&str]) -> Result<Vec<(Vec<String>, u64)>> {
        let sql = group_count_sql(table, columns);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next()? {
            let mut key = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let value: Option<String> = row.get(i)?;
                key.push(value.unwrap_or_default());
            }
            let count: i64 = row.get(columns.len())?;
            counts.push((key, count as u64));
        }
        Ok(counts)
    }

    /// Concatenated text of all literals inside `[start, end)`, in offset
    /// order.
    pub fn group_concat(&self, start: i64, end: i64) -> Result<String> {
        let text: Option<String> = self.conn.query_row(
            "SELECT string_agg(value, '' ORDER BY start) FROM literals \
             WHERE start >= ? AND \"end\" <= ?",
            params![start, end],
            |row| row.get(0),
        )?;
        Ok(text.unwrap_or_default())
    }

    /// Surface text of one structure, following the `structure_literals`
    /// mapping rather than raw offsets.
    pub fn export_structure(&self, id: i64) -> Result<String> {
        let text: Option<String> = self.conn.query_row(
            "SELECT string_agg(l.value, '' ORDER BY l.start) \
             FROM structure_literals AS sl \
             JOIN literals AS l ON l.id = sl.literal \
             WHERE sl.structure = ?",
            params![id],
            |row| row.get(0),
        )?;
        Ok(text.unwrap_or_default())
    }

    /// All literals of the shard in ascending offset order.
    pub fn literals_sorted(&self) -> Result<Vec<Literal>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, start, \"end\", value FROM literals ORDER BY start")?;
        let rows = stmt.query_map([], |row| {
            Ok(Literal {
                id: Some(row.get(0)?),
                start: row.get(1)?,
                end: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        let mut literals = Vec::new();
        for literal in rows {
            literals.push(literal?);
        }
        Ok(literals)
    }

    /// Persist a batch atomically: literals, then structures with their
    /// literal mapping, then hierarchy edges. Assigned IDs are written back
    /// into the batch, so re-adding the same batch is a no-op.
    ///
    /// Any failure rolls the whole call back; partial rows never become
    /// visible to later reads.
    pub fn add(&mut self, batch: &mut IndexBatch) -> Result<AddCounts> {
        let mut counts = AddCounts::default();
        let mut literal_ids: Vec<i64> = Vec::with_capacity(batch.literals.len());
        let mut structure_ids: Vec<i64> = Vec::with_capacity(batch.structures.len());

        let tx = self.conn.transaction()?;
        {
            let mut next_literal: i64 = tx.query_row(
                "SELECT COALESCE(MAX(id), 0) FROM literals",
                [],
                |row| row.get(0),
            )?;
            let mut next_structure: i64 = tx.query_row(
                "SELECT COALESCE(MAX(id), 0) FROM structures",
                [],
                |row| row.get(0),
            )?;

            let mut literal_stmt = tx.prepare(
                "INSERT INTO literals (id, start, \"end\", value) VALUES (?, ?, ?, ?)",
            )?;
            for literal in &batch.literals {
                match literal.id {
                    Some(id) => literal_ids.push(id),
                    None => {
                        next_literal += 1;
                        literal_stmt.execute(params![
                            next_literal,
                            literal.start,
                            literal.end,
                            literal.value
                        ])?;
                        literal_ids.push(next_literal);
                        counts.literals += 1;
                    }
                }
            }

            let mut structure_stmt = tx.prepare(
                "INSERT INTO structures (id, start, \"end\", type, value) VALUES (?, ?, ?, ?, ?)",
            )?;
            let mut mapping_stmt = tx.prepare(
                "INSERT INTO structure_literals (structure, literal) VALUES (?, ?)",
            )?;
            for structure in &batch.structures {
                match structure.id {
                    Some(id) => structure_ids.push(id),
                    None => {
                        next_structure += 1;
                        structure_stmt.execute(params![
                            next_structure,
                            structure.start,
                            structure.end,
                            structure.stype,
                            structure.value
                        ])?;
                        for &literal_ref in &structure.literals {
                            let literal_id =
                                literal_ids.get(literal_ref).copied().ok_or_else(|| {
                                    Error::Integrity(format!(
                                        "structure '{}' references literal {} outside the batch",
                                        structure.stype, literal_ref
                                    ))
                                })?;
                            mapping_stmt.execute(params![next_structure, literal_id])?;
                        }
                        structure_ids.push(next_structure);
                        counts.structures += 1;
                    }
                }
            }

            let mut edge_stmt = tx.prepare(
                "INSERT INTO hierarchical_structures (parent, child) VALUES (?, ?)",
            )?;
            for edge in &batch.hierarchies {
                let parent = batch.structures.get(edge.parent).ok_or_else(|| {
                    Error::Integrity(format!(
                        "hierarchy references structure {} outside the batch",
                        edge.parent
                    ))
                })?;
                let child = batch.structures.get(edge.child).ok_or_else(|| {
                    Error::Integrity(format!(
                        "hierarchy references structure {} outside the batch",
                        edge.child
                    ))
                })?;
                // Both endpoints persisted earlier means the edge is too.
                if parent.id.is_some() && child.id.is_some() {
                    continue;
                }
                edge_stmt.execute(params![
                    structure_ids[edge.parent],
                    structure_ids[edge.child]
                ])?;
                counts.hierarchies += 1;
            }
        }
        tx.commit()?;

        for (literal, id) in batch.literals.iter_mut().zip(&literal_ids) {
            literal.id = Some(*id);
        }
        for (structure, id) in batch.structures.iter_mut().zip(&structure_ids) {
            structure.id = Some(*id);
        }
        Ok(counts)
    }
}
