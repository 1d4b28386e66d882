use crate::constraints::Filter;
use crate::index::DecafIndex;
use crate::views::OutputLevel;
use anyhow::Context;
use std::path::PathBuf;
use std::time::Instant;

pub struct FilterCommand {
    pub spec: PathBuf,
    pub index: PathBuf,
    pub output_level: String,
    pub show_sql: bool,
    pub limit: Option<usize>,
    pub json: bool,
}

pub fn run(cmd: FilterCommand) -> anyhow::Result<()> {
    let filter = Filter::load(&cmd.spec)
        .with_context(|| format!("Failed to load filter spec {}", cmd.spec.display()))?;
    let output_level: OutputLevel = cmd.output_level.parse()?;
    let index = DecafIndex::open(&cmd.index)
        .with_context(|| format!("Failed to open index at {}", cmd.index.display()))?;

    if cmd.show_sql {
        eprintln!("Compiled per-shard query:");
        eprintln!("{}", index.compile_sql(&filter, output_level)?);
    }

    let started = Instant::now();
    let mut matches = index.filter(&filter, output_level)?;
    if let Some(limit) = cmd.limit {
        matches.truncate(limit);
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
        return Ok(());
    }

    for m in &matches {
        println!("[{}:{} | {}-{}] {:?}", m.shard, m.id, m.start, m.end, m.text);
    }
    eprintln!(
        "Retrieved {} match(es) in {:.2}s.",
        matches.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
