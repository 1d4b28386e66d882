use crate::constraints::Filter;
use crate::index::DecafIndex;
use crate::views::OutputLevel;
use anyhow::Context;
use std::path::PathBuf;

pub struct MaskCommand {
    pub spec: PathBuf,
    pub index: PathBuf,
    pub mask_level: String,
    pub clean_whitespace: bool,
    pub output: Option<PathBuf>,
}

pub fn run(cmd: MaskCommand) -> anyhow::Result<()> {
    let filter = Filter::load(&cmd.spec)
        .with_context(|| format!("Failed to load filter spec {}", cmd.spec.display()))?;
    let mask_level: OutputLevel = cmd.mask_level.parse()?;
    let index = DecafIndex::open(&cmd.index)
        .with_context(|| format!("Failed to open index at {}", cmd.index.display()))?;

    let masked = index.mask(&filter, mask_level, cmd.clean_whitespace)?;
    match &cmd.output {
        Some(path) => {
            std::fs::write(path, &masked)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {} character(s) to {}.", masked.len(), path.display());
        }
        None => println!("{}", masked),
    }
    Ok(())
}
