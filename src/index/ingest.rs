//! Parallel ingestion driver: batches feed parser workers, whose results
//! are written to the active shard in order.
//!
//! Batches parse concurrently on a rayon pool, but results are written in
//! batch order by a single writer so offsets stay contiguous. The sharding
//! policy is evaluated on batch boundaries only; since batches never cross
//! document boundaries, no document is ever split across shards. Offsets
//! reset to zero whenever a new shard opens; there is no global offset
//! space.

use crate::conllu::{open_corpus, ConlluBatcher, ConlluParser, ConlluReader, LiteralLevel};
use crate::error::{Error, Result};
use crate::index::DecafIndex;
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// Ingestion options.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Granularity of the stored literals.
    pub literal_level: LiteralLevel,
    /// Reconstruct exact spacing from `text` metadata instead of injecting
    /// single spaces.
    pub force_alignment: bool,
    /// Literal appended after every sentence (none by default).
    pub sentence_terminator: Option<String>,
    /// Sentences per parser batch (capped by document boundaries).
    pub batch_size: usize,
    /// Approximate sentences per shard.
    pub shard_size: usize,
    /// Perform a backup commit every this many sentences.
    pub commit_steps: Option<usize>,
    /// Parser worker count.
    pub threads: usize,
    /// Optional `[start, end]` sentence-index window for sliced ingestion.
    pub window: Option<(usize, usize)>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            literal_level: LiteralLevel::Token,
            force_alignment: false,
            sentence_terminator: None,
            batch_size: 64,
            shard_size: 100_000,
            commit_steps: None,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            window: None,
        }
    }
}

/// Statistics from one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub sentences: u64,
    pub literals: u64,
    pub structures: u64,
    pub hierarchies: u64,
    pub shards: usize,
    pub duration_secs: f64,
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sentence(s) into {} shard(s): {} literals, {} structures, {} hierarchical relations in {:.2}s",
            self.sentences,
            self.shards,
            self.literals,
            self.structures,
            self.hierarchies,
            self.duration_secs
        )
    }
}

impl DecafIndex {
    /// Ingest a CoNLL-U corpus file.
    pub fn ingest(&mut self, input: &Path, config: &IngestConfig) -> Result<IngestStats> {
        self.ingest_with_progress(input, config, |_| {})
    }

    /// Ingest with a per-batch progress callback receiving the running
    /// sentence count.
    pub fn ingest_with_progress<F>(
        &mut self,
        input: &Path,
        config: &IngestConfig,
        progress: F,
    ) -> Result<IngestStats>
    where
        F: Fn(u64),
    {
        let started = Instant::now();
        let threads = config.threads.max(1);
        let shard_size = config.shard_size.max(1);

        let mut parser = ConlluParser::new(config.literal_level)
            .with_force_alignment(config.force_alignment);
        if let Some(terminator) = &config.sentence_terminator {
            parser = parser.with_sentence_terminator(terminator.clone());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build parser pool: {}", e)))?;

        let mut batcher = ConlluBatcher::new();
        if let Some((start, end)) = config.window {
            batcher = batcher.with_window(start, end);
        }
        let reader = ConlluReader::new(open_corpus(input)?);
        let mut batches = batcher.batches(reader, config.batch_size);

        let manager = self.manager_mut();
        manager.connect()?;
        let mut cursor = manager.active()?.text_length()?;

        let mut stats = IngestStats::default();
        let mut done = false;
        while !done {
            // Buffer a window of batches, then parse them concurrently.
            let mut pending = Vec::with_capacity(threads * 2);
            while pending.len() < threads * 2 {
                match batches.next() {
                    Some(batch) => pending.push(batch?),
                    None => {
                        done = true;
                        break;
                    }
                }
            }
            if pending.is_empty() {
                break;
            }

            let parsed: Vec<_> = pool.install(|| {
                pending
                    .par_iter()
                    .map(|batch| parser.parse(batch))
                    .collect()
            });

            // Write results in batch order so offsets stay contiguous.
            for result in parsed {
                let mut parsed_batch = result?;
                stats.sentences += parsed_batch.sentences as u64;

                // Sharding policy, evaluated on batch boundaries only.
                if stats.sentences as usize / shard_size > manager.num_shards() {
                    manager.add_shard()?;
                    cursor = 0;
                }

                parsed_batch.batch.shift(cursor);
                cursor += parsed_batch.cursor;

                let counts = manager.active()?.add(&mut parsed_batch.batch)?;
                stats.literals += counts.literals;
                stats.structures += counts.structures;
                stats.hierarchies += counts.hierarchies;

                if let Some(steps) = config.commit_steps {
                    if steps > 0 && stats.sentences % steps as u64 == 0 {
                        manager.active()?.checkpoint()?;
                    }
                }
                progress(stats.sentences);
            }
        }

        manager.disconnect()?;
        stats.shards = manager.num_shards();
        stats.duration_secs = started.elapsed().as_secs_f64();
        Ok(stats)
    }
}
