//! The universal data model: literals, structures, and hierarchies.
//!
//! A [`Literal`] is an atomic piece of surface text anchored at a half-open
//! character range. A [`Structure`] is a typed annotation covering a range
//! and owning a set of literals. A [`Hierarchy`] edge says "parent contains
//! child" at the annotation level, independent of offsets.
//!
//! Records travel between the parser and the shard store inside an
//! [`IndexBatch`]. Within a batch, structures reference literals and
//! hierarchy edges reference structures **by position**; database IDs are
//! assigned only at insertion time, so batches serialize without any
//! in-memory pointers.

/// Atomic text unit (a character or a token) with shard-local offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    /// Shard-scoped ID, assigned at insertion. `Some` means already persisted.
    pub id: Option<i64>,
    pub start: i64,
    pub end: i64,
    pub value: String,
}

impl Literal {
    pub fn new(start: i64, end: i64, value: impl Into<String>) -> Self {
        Self {
            id: None,
            start,
            end,
            value: value.into(),
        }
    }
}

/// Typed annotation covering `[start, end)`.
///
/// `value` is absent for purely constituent structures (e.g. a `sentence`
/// is reconstructed from its literals). `literals` holds positions into the
/// owning batch's literal vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    /// Shard-scoped ID, assigned at insertion. `Some` means already persisted.
    pub id: Option<i64>,
    pub start: i64,
    pub end: i64,
    pub stype: String,
    pub value: Option<String>,
    pub literals: Vec<usize>,
}

impl Structure {
    pub fn new(
        start: i64,
        end: i64,
        stype: impl Into<String>,
        value: Option<String>,
        literals: Vec<usize>,
    ) -> Self {
        Self {
            id: None,
            start,
            end,
            stype: stype.into(),
            value,
            literals,
        }
    }
}

/// Directed containment edge between two structures of the same batch,
/// referenced by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hierarchy {
    pub parent: usize,
    pub child: usize,
}

/// One parser output unit: everything produced for a run of sentences,
/// self-contained and ready for a single atomic shard write.
#[derive(Debug, Clone, Default)]
pub struct IndexBatch {
    pub literals: Vec<Literal>,
    pub structures: Vec<Structure>,
    pub hierarchies: Vec<Hierarchy>,
}

impl IndexBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.structures.is_empty() && self.hierarchies.is_empty()
    }

    /// Append a literal and return its position.
    pub fn push_literal(&mut self, literal: Literal) -> usize {
        self.literals.push(literal);
        self.literals.len() - 1
    }

    /// Append a structure and return its position.
    pub fn push_structure(&mut self, structure: Structure) -> usize {
        self.structures.push(structure);
        self.structures.len() - 1
    }

    pub fn link(&mut self, parent: usize, child: usize) {
        self.hierarchies.push(Hierarchy { parent, child });
    }

    /// Rebase all offsets by `offset`. Batches are parsed with a local
    /// cursor starting at zero and shifted to their shard position before
    /// the write.
    pub fn shift(&mut self, offset: i64) {
        if offset == 0 {
            return;
        }
        for literal in &mut self.literals {
            literal.start += offset;
            literal.end += offset;
        }
        for structure in &mut self.structures {
            structure.start += offset;
            structure.end += offset;
        }
    }

    /// Merge another batch into this one, re-targeting its positional
    /// references past the records already present.
    pub fn extend(&mut self, mut other: IndexBatch) {
        let literal_base = self.literals.len();
        let structure_base = self.structures.len();
        for structure in &mut other.structures {
            for literal in &mut structure.literals {
                *literal += literal_base;
            }
        }
        for edge in &mut other.hierarchies {
            edge.parent += structure_base;
            edge.child += structure_base;
        }
        self.literals.append(&mut other.literals);
        self.structures.append(&mut other.structures);
        self.hierarchies.append(&mut other.hierarchies);
    }
}
