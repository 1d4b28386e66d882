//! Groups a sentence stream into ingestion batches.
//!
//! Batches hold roughly `batch_size` sentences with one hard rule: once a
//! corpus has shown document markers, a full batch is only cut at the next
//! document start, so no batch (and therefore no shard) ever splits a
//! document. A `[start, end]` sentence-index window slices the stream for
//! distributed ingestion.

use crate::conllu::reader::{ConlluReader, Sentence};
use crate::conllu::open_corpus;
use crate::error::Result;
use std::io::BufRead;
use std::path::Path;

/// Sentence-window configuration for batching.
#[derive(Debug, Clone, Copy)]
pub struct ConlluBatcher {
    start: usize,
    end: usize,
}

impl Default for ConlluBatcher {
    fn default() -> Self {
        Self {
            start: 0,
            end: usize::MAX,
        }
    }
}

impl ConlluBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict batching to sentence indices in `[start, end]` (inclusive).
    pub fn with_window(mut self, start: usize, end: usize) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Total sentence count of a corpus file, without full parsing: each
    /// sentence has exactly one token line with index 1.
    pub fn get_size(file: &Path) -> Result<u64> {
        let reader = open_corpus(file)?;
        let mut count = 0u64;
        for line in reader.lines() {
            let line = line.map_err(|e| crate::error::Error::io(file, e))?;
            if line.starts_with("1\t") {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Batch iterator over an open sentence stream.
    pub fn batches<R: BufRead>(&self, sentences: ConlluReader<R>, batch_size: usize) -> Batches<R> {
        Batches {
            sentences,
            batch_size: batch_size.max(1),
            start: self.start,
            end: self.end,
            index: 0,
            pending: Vec::new(),
            seen_document_markers: false,
            done: false,
        }
    }
}

/// Iterator of sentence batches.
pub struct Batches<R> {
    sentences: ConlluReader<R>,
    batch_size: usize,
    start: usize,
    end: usize,
    index: usize,
    pending: Vec<Sentence>,
    seen_document_markers: bool,
    done: bool,
}

impl<R: BufRead> Iterator for Batches<R> {
    type Item = Result<Vec<Sentence>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let sentence = match self.sentences.next() {
                Some(Ok(sentence)) => sentence,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if self.pending.is_empty() {
                        return None;
                    }
                    return Some(Ok(std::mem::take(&mut self.pending)));
                }
            };

            let index = self.index;
            self.index += 1;
            if index < self.start {
                continue;
            }
            if index > self.end {
                self.done = true;
                if self.pending.is_empty() {
                    return None;
                }
                return Some(Ok(std::mem::take(&mut self.pending)));
            }

            if sentence.is_document_start() {
                self.seen_document_markers = true;
            }

            // A full batch is cut immediately in unmarked corpora, and at
            // the next document start otherwise.
            let complete = self.pending.len() >= self.batch_size
                && (!self.seen_document_markers || sentence.is_document_start());

            if complete {
                let batch = std::mem::take(&mut self.pending);
                self.pending.push(sentence);
                return Some(Ok(batch));
            }
            self.pending.push(sentence);
        }
    }
}
