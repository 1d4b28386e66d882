use crate::index::{DecafIndex, StructureCountSpec};
use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;

pub struct StatsCommand {
    pub index: PathBuf,
    pub types: Option<Vec<String>>,
    pub values: bool,
    pub literals: bool,
    pub literal_counts: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct StatsReport {
    size: crate::index::IndexSize,
    structure_counts: Vec<crate::index::StructureCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    literal_counts: Option<Vec<(String, u64)>>,
}

pub fn run(cmd: StatsCommand) -> anyhow::Result<()> {
    let index = DecafIndex::open(&cmd.index)
        .with_context(|| format!("Failed to open index at {}", cmd.index.display()))?;

    let size = index.get_size()?;
    let spec = StructureCountSpec {
        types: cmd.types,
        by_value: cmd.values,
        by_literal: cmd.literals,
    };
    let structure_counts = index.get_structure_counts(&spec)?;

    let literal_counts = if cmd.literal_counts {
        let mut counts: Vec<(String, u64)> = index.get_literal_counts()?.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Some(counts)
    } else {
        None
    };

    if cmd.json {
        let report = StatsReport {
            size,
            structure_counts,
            literal_counts,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Index {} with {} shard(s): {}",
        cmd.index.display(),
        index.num_shards(),
        size
    );
    if !structure_counts.is_empty() {
        println!("\nStructure counts:");
        for count in &structure_counts {
            let mut label = count.stype.clone();
            if let Some(value) = &count.value {
                label.push_str(&format!("={}", value));
            }
            if let Some(literal) = &count.literal {
                label.push_str(&format!(" '{}'", literal));
            }
            println!("  {}: {}", label, count.count);
        }
    }
    if let Some(counts) = literal_counts {
        println!("\nLiteral counts ({} unique):", counts.len());
        for (value, count) in counts {
            println!("  {:?}: {}", value, count);
        }
    }
    Ok(())
}
