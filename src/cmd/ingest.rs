use crate::conllu::{ConlluBatcher, LiteralLevel};
use crate::index::{DecafIndex, IngestConfig};
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

pub struct IngestCommand {
    pub corpus: PathBuf,
    pub index: PathBuf,
    pub literal_level: String,
    pub force_alignment: bool,
    pub sentence_terminator: Option<String>,
    pub batch_size: usize,
    pub shard_size: usize,
    pub commit_steps: Option<usize>,
    pub threads: Option<usize>,
    pub window: Option<(usize, usize)>,
    pub progress: bool,
    pub json: bool,
}

pub fn run(cmd: IngestCommand) -> anyhow::Result<()> {
    let literal_level: LiteralLevel = cmd.literal_level.parse()?;
    let config = IngestConfig {
        literal_level,
        force_alignment: cmd.force_alignment,
        sentence_terminator: cmd.sentence_terminator.filter(|t| !t.is_empty()),
        batch_size: cmd.batch_size,
        shard_size: cmd.shard_size,
        commit_steps: cmd.commit_steps,
        threads: cmd.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }),
        window: cmd.window,
    };

    let mut index = DecafIndex::create(&cmd.index)
        .with_context(|| format!("Failed to open index at {}", cmd.index.display()))?;

    let num_sentences = ConlluBatcher::get_size(&cmd.corpus)
        .with_context(|| format!("Failed to read corpus {}", cmd.corpus.display()))?;
    if !cmd.json {
        eprintln!(
            "Ingesting {} sentence(s) from {} into {}...",
            num_sentences,
            cmd.corpus.display(),
            cmd.index.display()
        );
    }

    let progress_bar = if cmd.progress {
        let pb = ProgressBar::new(num_sentences);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sentences ({percent}%) {msg}",
            )
            .unwrap()
            .progress_chars("█▓▒░  "),
        );
        pb.set_message("Building index...");
        Some(pb)
    } else {
        None
    };

    let stats = {
        let pb = progress_bar.clone();
        index
            .ingest_with_progress(&cmd.corpus, &config, move |sentences| {
                if let Some(pb) = &pb {
                    pb.set_position(sentences);
                }
            })
            .with_context(|| format!("Failed to ingest {}", cmd.corpus.display()))?
    };

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Built index: {}", stats);
    }
    Ok(())
}
