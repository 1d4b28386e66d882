//! Converts tokenised sentences into the literal/structure/hierarchy model.
//!
//! Per sentence: token literals (character or token granularity), a `token`
//! structure plus one structure per annotation field, recursive
//! `dependency` structures spanning their transitive dependents, and a
//! `sentence` structure tying everything together. Inter-token whitespace
//! is either reconstructed from the sentence's `text` metadata
//! (force-alignment) or injected as single spaces.
//!
//! Across sentences a carryover state machine tracks paragraph, document,
//! and `meta::` metadata scopes: when a scope closes, the accumulated
//! literals and sentence structures become a `paragraph`/`document`
//! structure (with `paragraph_id`/`document_id` siblings when an ID was
//! given) plus hierarchy edges to everything the scope contained.

use crate::conllu::reader::{Sentence, Token};
use crate::error::{Error, Result};
use crate::model::{IndexBatch, Literal, Structure};
use ahash::{AHashMap, AHashSet};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Metadata keys carried over across sentences.
/// Patterns are matched against the key prefix; `None` keeps the key as is.
static METADATA_CARRYOVER: Lazy<Vec<(Regex, Option<&'static str>)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"^newdoc( id)?").unwrap(), Some("document")),
        (Regex::new(r"^newpar( id)?").unwrap(), Some("paragraph")),
        (Regex::new(r"^meta::.+").unwrap(), None),
    ]
});

/// Granularity of the literals produced for each token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralLevel {
    Character,
    #[default]
    Token,
}

impl std::str::FromStr for LiteralLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "character" => Ok(LiteralLevel::Character),
            "token" => Ok(LiteralLevel::Token),
            other => Err(Error::Configuration(format!(
                "unknown literal level '{}' (expected 'character' or 'token')",
                other
            ))),
        }
    }
}

impl std::fmt::Display for LiteralLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralLevel::Character => write!(f, "character"),
            LiteralLevel::Token => write!(f, "token"),
        }
    }
}

/// Result of parsing one run of sentences: a self-contained batch with a
/// local offset space starting at zero.
#[derive(Debug)]
pub struct ParsedBatch {
    pub batch: IndexBatch,
    /// Total character width of the batch.
    pub cursor: i64,
    pub sentences: usize,
}

#[derive(Debug, Clone)]
struct CarryoverEntry {
    value: Option<String>,
    start: i64,
}

/// Carryover metadata of one sentence (or the accumulated scope state),
/// in first-appearance order.
#[derive(Debug, Clone, Default)]
struct CarryoverFields(Vec<(String, CarryoverEntry)>);

impl CarryoverFields {
    fn get(&self, key: &str) -> Option<&CarryoverEntry> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn set(&mut self, key: &str, entry: CarryoverEntry) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = entry,
            None => self.0.push((key.to_string(), entry)),
        }
    }
}

/// Accumulated paragraph/document scope state between sentences.
#[derive(Debug, Default)]
struct CarryoverState {
    fields: CarryoverFields,
    paragraph_literals: Vec<usize>,
    paragraph_sentences: Vec<usize>,
    document_literals: Vec<usize>,
    document_sentences: Vec<usize>,
}

struct SentenceParts {
    sentence: usize,
    literals: Range<usize>,
    carryover: CarryoverFields,
    end_cursor: i64,
}

/// Maps the carryover key a metadata field belongs to, if any.
fn carryover_field(field: &str) -> Option<String> {
    for (pattern, target) in METADATA_CARRYOVER.iter() {
        if pattern.is_match(field) {
            return Some(match target {
                Some(name) => (*name).to_string(),
                None => field.to_string(),
            });
        }
    }
    None
}

fn char_width(s: &str) -> i64 {
    s.chars().count() as i64
}

/// Pattern locating `form` at the head of the remaining sentence text,
/// tolerating interspersed whitespace, and capturing trailing whitespace.
fn alignment_pattern(form: &str) -> String {
    let escaped: Vec<String> = form
        .chars()
        .map(|c| regex::escape(&c.to_string()))
        .collect();
    format!("^({})(\\s*)", escaped.join(r"\s*"))
}

/// Converts sentences into index batches.
#[derive(Debug, Clone)]
pub struct ConlluParser {
    literal_level: LiteralLevel,
    force_alignment: bool,
    sentence_terminator: Option<String>,
}

impl ConlluParser {
    pub fn new(literal_level: LiteralLevel) -> Self {
        Self {
            literal_level,
            force_alignment: false,
            sentence_terminator: None,
        }
    }

    /// Reconstruct exact spacing from the `text` metadata instead of
    /// injecting single spaces.
    pub fn with_force_alignment(mut self, force_alignment: bool) -> Self {
        self.force_alignment = force_alignment;
        self
    }

    /// Literal appended after every sentence.
    pub fn with_sentence_terminator(mut self, terminator: impl Into<String>) -> Self {
        let terminator = terminator.into();
        self.sentence_terminator = (!terminator.is_empty()).then_some(terminator);
        self
    }

    /// Parse a run of sentences into one batch, with offsets local to the
    /// batch. Paragraph/document scopes still open at the end are flushed
    /// against a synthetic end boundary.
    pub fn parse(&self, sentences: &[Sentence]) -> Result<ParsedBatch> {
        let mut batch = IndexBatch::new();
        let mut state = CarryoverState::default();
        let mut cursor: i64 = 0;

        for sentence in sentences {
            let parts = self.parse_sentence(sentence, cursor, &mut batch)?;
            self.apply_carryover(&mut state, parts.carryover, cursor, &mut batch);
            if state.fields.contains("paragraph") {
                state.paragraph_literals.extend(parts.literals.clone());
                state.paragraph_sentences.push(parts.sentence);
            }
            if state.fields.contains("document") {
                state.document_literals.extend(parts.literals.clone());
                state.document_sentences.push(parts.sentence);
            }
            cursor = parts.end_cursor;
        }

        let mut end_boundary = CarryoverFields::default();
        end_boundary.set(
            "document",
            CarryoverEntry {
                value: None,
                start: cursor,
            },
        );
        end_boundary.set(
            "paragraph",
            CarryoverEntry {
                value: None,
                start: cursor,
            },
        );
        self.apply_carryover(&mut state, end_boundary, cursor, &mut batch);

        Ok(ParsedBatch {
            batch,
            cursor,
            sentences: sentences.len(),
        })
    }

    fn parse_sentence(
        &self,
        sentence: &Sentence,
        cursor: i64,
        batch: &mut IndexBatch,
    ) -> Result<SentenceParts> {
        let literal_base = batch.literals.len();
        let text_meta = sentence.meta("text");
        let mut text_cursor: i64 = 0;
        let mut text_byte_pos: usize = 0;
        let mut tokens_by_id: Vec<(u32, usize)> = Vec::new();

        for token in sentence.words() {
            let token_start = cursor + text_cursor;
            let token_struct = self.parse_token(token, token_start, batch);
            if let crate::conllu::reader::TokenId::Single(id) = token.id {
                tokens_by_id.push((id, token_struct));
            }

            if self.force_alignment {
                let text = text_meta.ok_or_else(|| Error::Alignment {
                    token: token.form.clone(),
                    context: "<sentence without text metadata>".to_string(),
                })?;
                let continuation = &text[text_byte_pos.min(text.len())..];
                let pattern = Regex::new(&alignment_pattern(&token.form)).map_err(|_| {
                    Error::Alignment {
                        token: token.form.clone(),
                        context: continuation.to_string(),
                    }
                })?;
                let caps = pattern.captures(continuation).ok_or_else(|| Error::Alignment {
                    token: token.form.clone(),
                    context: continuation.to_string(),
                })?;
                let matched = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                text_cursor += char_width(matched);
                text_byte_pos += matched.len();

                let trailing = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                if !trailing.is_empty() {
                    let width = char_width(trailing);
                    if width > 5 && !trailing.chars().all(char::is_whitespace) {
                        warn!(
                            "overly long intermediate literal {:?} after token '{}' at character {}",
                            trailing,
                            token.form,
                            cursor + text_cursor
                        );
                    }
                    batch.push_literal(Literal::new(
                        cursor + text_cursor,
                        cursor + text_cursor + width,
                        trailing,
                    ));
                    text_cursor += width;
                    text_byte_pos += trailing.len();
                }
            } else {
                text_cursor += char_width(&token.form);
                batch.push_literal(Literal::new(
                    cursor + text_cursor,
                    cursor + text_cursor + 1,
                    " ",
                ));
                text_cursor += 1;
            }
        }

        if let Some(terminator) = &self.sentence_terminator {
            let width = char_width(terminator);
            batch.push_literal(Literal::new(
                cursor + text_cursor,
                cursor + text_cursor + width,
                terminator.clone(),
            ));
            text_cursor += width;
        }

        let dependencies = self.parse_dependencies(sentence, &tokens_by_id, batch);

        let sentence_start = cursor;
        let sentence_end = cursor + text_cursor;
        let sentence_literals: Vec<usize> = (literal_base..batch.literals.len()).collect();
        let sentence_struct = batch.push_structure(Structure::new(
            sentence_start,
            sentence_end,
            "sentence",
            None,
            sentence_literals.clone(),
        ));

        let mut carryover = CarryoverFields::default();
        let mut annotations = Vec::new();
        for (key, value) in &sentence.metadata {
            if let Some(field) = carryover_field(key) {
                carryover.set(
                    &field,
                    CarryoverEntry {
                        value: (!value.is_empty()).then(|| value.clone()),
                        start: sentence_start,
                    },
                );
                continue;
            }
            // `text` only anchors force-alignment.
            if key == "text" {
                continue;
            }
            annotations.push(batch.push_structure(Structure::new(
                sentence_start,
                sentence_end,
                key.clone(),
                Some(value.clone()),
                sentence_literals.clone(),
            )));
        }

        for &(_, token_struct) in &tokens_by_id {
            batch.link(sentence_struct, token_struct);
        }
        for &dependency in &dependencies {
            batch.link(sentence_struct, dependency);
        }
        for &annotation in &annotations {
            batch.link(sentence_struct, annotation);
        }

        Ok(SentenceParts {
            sentence: sentence_struct,
            literals: literal_base..batch.literals.len(),
            carryover,
            end_cursor: sentence_end,
        })
    }

    /// Literals and structures of one token: the surface literals, the
    /// `token` structure, and one structure per annotation field hanging
    /// off it.
    fn parse_token(&self, token: &Token, start: i64, batch: &mut IndexBatch) -> usize {
        let end = start + char_width(&token.form);
        let mut literals = Vec::new();
        match self.literal_level {
            LiteralLevel::Character => {
                let mut position = start;
                for character in token.form.chars() {
                    literals.push(batch.push_literal(Literal::new(
                        position,
                        position + 1,
                        character.to_string(),
                    )));
                    position += 1;
                }
            }
            LiteralLevel::Token => {
                literals.push(batch.push_literal(Literal::new(start, end, token.form.clone())));
            }
        }

        let token_struct =
            batch.push_structure(Structure::new(start, end, "token", None, literals.clone()));

        let annotate = |batch: &mut IndexBatch, stype: &str, value: String| {
            let annotation = batch.push_structure(Structure::new(
                start,
                end,
                stype,
                Some(value),
                literals.clone(),
            ));
            batch.link(token_struct, annotation);
        };
        if let Some(lemma) = &token.lemma {
            annotate(batch, "lemma", lemma.clone());
        }
        if let Some(upos) = &token.upos {
            annotate(batch, "upos", upos.clone());
        }
        if let Some(xpos) = &token.xpos {
            annotate(batch, "xpos", xpos.clone());
        }
        for (feature, value) in &token.feats {
            annotate(batch, feature, value.clone());
        }
        if let Some(head) = token.head {
            annotate(batch, "head", head.to_string());
        }
        if let Some(deprel) = &token.deprel {
            annotate(batch, "deprel", deprel.clone());
        }
        for (key, value) in &token.misc {
            annotate(batch, key, value.clone());
        }

        token_struct
    }

    /// One `dependency` structure per syntactic head, spanning the minimum
    /// start and maximum end of its transitive dependents, with edges to
    /// its head token and to each direct child dependency.
    fn parse_dependencies(
        &self,
        sentence: &Sentence,
        tokens_by_id: &[(u32, usize)],
        batch: &mut IndexBatch,
    ) -> Vec<usize> {
        let token_structs: AHashMap<u32, usize> = tokens_by_id.iter().copied().collect();
        let mut children: AHashMap<u32, Vec<u32>> = AHashMap::new();
        let mut roots = Vec::new();
        for token in sentence.words() {
            let id = match token.id {
                crate::conllu::reader::TokenId::Single(id) => id,
                _ => continue,
            };
            match token.head {
                Some(0) => roots.push(id),
                Some(head) if token_structs.contains_key(&head) => {
                    children.entry(head).or_default().push(id)
                }
                _ => {}
            }
        }
        let deprels: AHashMap<u32, Option<String>> = sentence
            .words()
            .filter_map(|t| match t.id {
                crate::conllu::reader::TokenId::Single(id) => Some((id, t.deprel.clone())),
                _ => None,
            })
            .collect();

        let mut all = Vec::new();
        let mut visited = AHashSet::new();
        for root in roots {
            self.build_dependency(
                root,
                &token_structs,
                &children,
                &deprels,
                batch,
                &mut all,
                &mut visited,
            );
        }
        all
    }

    #[allow(clippy::too_many_arguments)]
    fn build_dependency(
        &self,
        token_id: u32,
        token_structs: &AHashMap<u32, usize>,
        children: &AHashMap<u32, Vec<u32>>,
        deprels: &AHashMap<u32, Option<String>>,
        batch: &mut IndexBatch,
        all: &mut Vec<usize>,
        visited: &mut AHashSet<u32>,
    ) -> Option<(usize, i64, i64, Vec<usize>)> {
        if !visited.insert(token_id) {
            return None;
        }
        let &token_struct = token_structs.get(&token_id)?;
        let mut start = batch.structures[token_struct].start;
        let mut end = batch.structures[token_struct].end;
        let mut literals = batch.structures[token_struct].literals.clone();

        let mut child_dependencies = Vec::new();
        if let Some(child_ids) = children.get(&token_id) {
            for &child_id in child_ids {
                if let Some((child_dep, child_start, child_end, child_literals)) = self
                    .build_dependency(
                        child_id,
                        token_structs,
                        children,
                        deprels,
                        batch,
                        all,
                        visited,
                    )
                {
                    start = start.min(child_start);
                    end = end.max(child_end);
                    literals.extend(child_literals);
                    child_dependencies.push(child_dep);
                }
            }
        }

        let relation = deprels.get(&token_id).cloned().flatten();
        let dependency = batch.push_structure(Structure::new(
            start,
            end,
            "dependency",
            relation,
            literals.clone(),
        ));
        batch.link(dependency, token_struct);
        for child in child_dependencies {
            batch.link(dependency, child);
        }
        all.push(dependency);
        Some((dependency, start, end, literals))
    }

    /// Close and emit paragraph/document scopes when the next sentence
    /// opens new ones, then fold the remaining carryover metadata into the
    /// running state.
    fn apply_carryover(
        &self,
        state: &mut CarryoverState,
        next: CarryoverFields,
        cursor: i64,
        batch: &mut IndexBatch,
    ) {
        let next_par = next.contains("paragraph");
        let next_doc = next.contains("document");
        let mut emitted: Vec<usize> = Vec::new();

        if next_par || next_doc {
            if let Some(entry) = state.fields.get("paragraph").cloned() {
                let paragraph = batch.push_structure(Structure::new(
                    entry.start,
                    cursor,
                    "paragraph",
                    None,
                    state.paragraph_literals.clone(),
                ));
                emitted.push(paragraph);
                if let Some(id) = entry.value {
                    emitted.push(batch.push_structure(Structure::new(
                        entry.start,
                        cursor,
                        "paragraph_id",
                        Some(id),
                        state.paragraph_literals.clone(),
                    )));
                }
                for &sentence in &state.paragraph_sentences {
                    batch.link(paragraph, sentence);
                }
            }
            let opened = next.get("paragraph").cloned().unwrap_or(CarryoverEntry {
                value: None,
                start: cursor,
            });
            state.fields.set("paragraph", opened);
            state.paragraph_literals.clear();
            state.paragraph_sentences.clear();
        }

        if next_doc {
            let mut document: Option<usize> = None;
            let closing = std::mem::take(&mut state.fields);
            for (field, entry) in &closing.0 {
                if field == "paragraph" {
                    continue;
                }
                if field == "document" {
                    document = Some(batch.push_structure(Structure::new(
                        entry.start,
                        cursor,
                        "document",
                        None,
                        state.document_literals.clone(),
                    )));
                    if let Some(id) = &entry.value {
                        emitted.push(batch.push_structure(Structure::new(
                            entry.start,
                            cursor,
                            "document_id",
                            Some(id.clone()),
                            state.document_literals.clone(),
                        )));
                    }
                    continue;
                }
                // Free document metadata keeps its bare name.
                let stype = field.strip_prefix("meta::").unwrap_or(field.as_str());
                emitted.push(batch.push_structure(Structure::new(
                    entry.start,
                    cursor,
                    stype,
                    entry.value.clone(),
                    state.document_literals.clone(),
                )));
            }
            if let Some(document) = document {
                for &structure in &emitted {
                    batch.link(document, structure);
                }
                for &sentence in &state.document_sentences {
                    batch.link(document, sentence);
                }
            }

            let mut opened = next;
            if !opened.contains("paragraph") {
                opened.set(
                    "paragraph",
                    CarryoverEntry {
                        value: None,
                        start: cursor,
                    },
                );
            }
            state.fields = opened;
            state.document_literals.clear();
            state.document_sentences.clear();
        } else {
            // Document-scoped metadata arriving mid-document is carried
            // until the next document boundary.
            for (field, entry) in next.0 {
                if field != "paragraph" {
                    state.fields.set(&field, entry);
                }
            }
        }
    }
}
