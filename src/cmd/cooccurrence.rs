use crate::constraints::Filter;
use crate::index::DecafIndex;
use anyhow::Context;
use std::path::PathBuf;
use std::time::Instant;

pub struct CooccurrenceCommand {
    pub index: PathBuf,
    pub source: PathBuf,
    pub target: PathBuf,
    pub json: bool,
}

pub fn run(cmd: CooccurrenceCommand) -> anyhow::Result<()> {
    let source = Filter::load(&cmd.source)
        .with_context(|| format!("Failed to load source filter {}", cmd.source.display()))?;
    let target = Filter::load(&cmd.target)
        .with_context(|| format!("Failed to load target filter {}", cmd.target.display()))?;
    let index = DecafIndex::open(&cmd.index)
        .with_context(|| format!("Failed to open index at {}", cmd.index.display()))?;

    let started = Instant::now();
    let cooccurrences = index.get_cooccurrence(&source, &target)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&cooccurrences)?);
        return Ok(());
    }

    for entry in &cooccurrences {
        println!("{}\t{}\t{}", entry.source, entry.target, entry.frequency);
    }
    eprintln!(
        "Computed co-occurrence for {} type pair(s) in {:.2}s.",
        cooccurrences.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
