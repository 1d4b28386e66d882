use crate::index::DecafIndex;
use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub struct ExportCommand {
    pub index: PathBuf,
    pub structure: String,
    pub separator: String,
    pub output: Option<PathBuf>,
}

pub fn run(cmd: ExportCommand) -> anyhow::Result<()> {
    let index = DecafIndex::open(&cmd.index)
        .with_context(|| format!("Failed to open index at {}", cmd.index.display()))?;

    let structures = index.get_structures(&cmd.structure)?;
    eprintln!(
        "Retrieved {} {} structure(s).",
        structures.len(),
        cmd.structure
    );

    let refs: Vec<(usize, i64)> = structures.iter().map(|s| (s.shard, s.id)).collect();
    let texts = index.export_structures(&refs)?;

    let mut writer: Box<dyn Write> = match &cmd.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    for text in &texts {
        writer.write_all(text.as_bytes())?;
        writer.write_all(cmd.separator.as_bytes())?;
    }
    writer.flush()?;

    if let Some(path) = &cmd.output {
        eprintln!(
            "Exported {} structure(s) to {}.",
            texts.len(),
            path.display()
        );
    }
    Ok(())
}
