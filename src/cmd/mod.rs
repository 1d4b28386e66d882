mod cooccurrence;
mod export;
mod filter;
mod ingest;
mod mask;
mod stats;

use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

const AFTER_HELP: &str = "\x1b[1mCommon workflows:\x1b[0m
  Build an index from a treebank:
    decaf ingest corpus.conllu.gz --index corpus.decaf/

  Count annotation types:
    decaf stats --index corpus.decaf/ --values

  Find matches for a filter specification:
    decaf filter nouns.yaml --index corpus.decaf/ --output-level substructures

  Export all sentences as plain text:
    decaf export --index corpus.decaf/ --structure sentence -o sentences.txt

\x1b[1mMore info:\x1b[0m
  Run 'decaf <command> --help' for command-specific options.
  Enable completions: decaf completions <shell>";

#[derive(Parser)]
#[command(name = "decaf")]
#[command(version)]
#[command(about = "Indexing and query engine for large annotated text corpora")]
#[command(after_help = AFTER_HELP)]
#[command(arg_required_else_help = true)]
#[command(max_term_width = 100)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

// Help heading constants for consistency
const INPUT_OUTPUT: &str = "Input/Output";
const INDEXING: &str = "Indexing";
const QUERY: &str = "Query";
const OUTPUT_FORMAT: &str = "Output";

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a CoNLL-U treebank into an index
    #[command(visible_alias = "in")]
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  decaf ingest corpus.conllu --index corpus.decaf/
  decaf ingest corpus.conllu.gz --index corpus.decaf/ --literal-level character
  decaf ingest corpus.conllu --index corpus.decaf/ --force-alignment --shard-size 50000")]
    Ingest {
        /// Input treebank in CoNLL-U format (optionally compressed)
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        corpus: PathBuf,

        /// Index directory (created if missing)
        #[arg(short, long, value_hint = ValueHint::DirPath, help_heading = INPUT_OUTPUT)]
        index: PathBuf,

        /// Literal granularity: character, token
        #[arg(long, default_value = "token", help_heading = INDEXING)]
        literal_level: String,

        /// Reconstruct exact spacing from the sentence text metadata
        #[arg(long, help_heading = INDEXING)]
        force_alignment: bool,

        /// Literal appended after each sentence (none unless given)
        #[arg(long, help_heading = INDEXING)]
        sentence_terminator: Option<String>,

        /// Sentences per parser batch (capped by document boundaries)
        #[arg(long, default_value_t = 64, help_heading = INDEXING)]
        batch_size: usize,

        /// Approximate sentences per shard
        #[arg(long, default_value_t = 100_000, help_heading = INDEXING)]
        shard_size: usize,

        /// Backup commit every N sentences
        #[arg(long, help_heading = INDEXING)]
        commit_steps: Option<usize>,

        /// Parser worker count (default: hardware concurrency)
        #[arg(long, help_heading = INDEXING)]
        threads: Option<usize>,

        /// Only ingest sentences with indices in [START, END]
        #[arg(long, num_args = 2, value_names = ["START", "END"], help_heading = INDEXING)]
        window: Option<Vec<usize>>,

        /// Show progress bar
        #[arg(short, long, help_heading = OUTPUT_FORMAT)]
        progress: bool,

        /// Output results as JSON
        #[arg(long, help_heading = OUTPUT_FORMAT)]
        json: bool,
    },

    /// Show index size and annotation statistics
    #[command(visible_alias = "st")]
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  decaf stats --index corpus.decaf/
  decaf stats --index corpus.decaf/ --types upos,deprel --values
  decaf stats --index corpus.decaf/ --literal-counts --json")]
    Stats {
        /// Index directory
        #[arg(short, long, value_hint = ValueHint::DirPath, help_heading = INPUT_OUTPUT)]
        index: PathBuf,

        /// Only count these structure types (comma-separated)
        #[arg(short, long, help_heading = QUERY)]
        types: Option<String>,

        /// Split structure counts by annotation value
        #[arg(long, help_heading = QUERY)]
        values: bool,

        /// Split structure counts by surface text
        #[arg(long, help_heading = QUERY)]
        literals: bool,

        /// Also show per-literal frequencies
        #[arg(long, help_heading = QUERY)]
        literal_counts: bool,

        /// Output results as JSON
        #[arg(long, help_heading = OUTPUT_FORMAT)]
        json: bool,
    },

    /// Query the index with a filter specification
    #[command(visible_alias = "f")]
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  decaf filter nouns.yaml --index corpus.decaf/
  decaf filter adj-noun.yaml --index corpus.decaf/ --output-level structures
  decaf filter nouns.yaml --index corpus.decaf/ --show-sql")]
    Filter {
        /// Filter specification (YAML)
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        spec: PathBuf,

        /// Index directory
        #[arg(short, long, value_hint = ValueHint::DirPath, help_heading = INPUT_OUTPUT)]
        index: PathBuf,

        /// Output level: substructures, structures
        #[arg(short, long, default_value = "substructures", help_heading = QUERY)]
        output_level: String,

        /// Print the compiled SQL query before running it
        #[arg(long, help_heading = OUTPUT_FORMAT)]
        show_sql: bool,

        /// Stop after this many matches
        #[arg(short, long, help_heading = QUERY)]
        limit: Option<usize>,

        /// Output results as JSON
        #[arg(long, help_heading = OUTPUT_FORMAT)]
        json: bool,
    },

    /// Export the surface text of all structures of one type
    #[command(visible_alias = "ex")]
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  decaf export --index corpus.decaf/ --structure sentence
  decaf export --index corpus.decaf/ --structure document -o documents.txt")]
    Export {
        /// Index directory
        #[arg(short, long, value_hint = ValueHint::DirPath, help_heading = INPUT_OUTPUT)]
        index: PathBuf,

        /// Structural level to export
        #[arg(short, long, help_heading = QUERY)]
        structure: String,

        /// Separator between structures
        #[arg(long, default_value = "\n", help_heading = OUTPUT_FORMAT)]
        separator: String,

        /// Output file (stdout if omitted)
        #[arg(short, long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        output: Option<PathBuf>,
    },

    /// Export the corpus text with matched structures removed
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  decaf mask pronouns.yaml --index corpus.decaf/ --clean-whitespace
  decaf mask names.yaml --index corpus.decaf/ -o masked.txt")]
    Mask {
        /// Filter specification (YAML)
        #[arg(value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        spec: PathBuf,

        /// Index directory
        #[arg(short, long, value_hint = ValueHint::DirPath, help_heading = INPUT_OUTPUT)]
        index: PathBuf,

        /// Level whose matches are removed: substructures, structures
        #[arg(long, default_value = "substructures", help_heading = QUERY)]
        mask_level: String,

        /// Collapse whitespace runs left behind by the removal
        #[arg(long, help_heading = OUTPUT_FORMAT)]
        clean_whitespace: bool,

        /// Output file (stdout if omitted)
        #[arg(short, long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        output: Option<PathBuf>,
    },

    /// Pairwise co-occurrence counts of two filters
    #[command(visible_alias = "co")]
    #[command(after_help = "\x1b[1mExamples:\x1b[0m
  decaf cooccurrence --index corpus.decaf/ --source nouns.yaml --target adjectives.yaml
  decaf cooccurrence --index corpus.decaf/ --source nouns.yaml --target adjectives.yaml --json")]
    Cooccurrence {
        /// Index directory
        #[arg(short, long, value_hint = ValueHint::DirPath, help_heading = INPUT_OUTPUT)]
        index: PathBuf,

        /// Source filter specification (YAML)
        #[arg(long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        source: PathBuf,

        /// Target filter specification (YAML)
        #[arg(long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
        target: PathBuf,

        /// Output results as JSON
        #[arg(long, help_heading = OUTPUT_FORMAT)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Ingest {
            corpus,
            index,
            literal_level,
            force_alignment,
            sentence_terminator,
            batch_size,
            shard_size,
            commit_steps,
            threads,
            window,
            progress,
            json,
        } => ingest::run(ingest::IngestCommand {
            corpus,
            index,
            literal_level,
            force_alignment,
            sentence_terminator,
            batch_size,
            shard_size,
            commit_steps,
            threads,
            window: window.map(|w| (w[0], w[1])),
            progress,
            json,
        }),
        Commands::Stats {
            index,
            types,
            values,
            literals,
            literal_counts,
            json,
        } => stats::run(stats::StatsCommand {
            index,
            types: types.map(|t| t.split(',').map(|s| s.trim().to_string()).collect()),
            values,
            literals,
            literal_counts,
            json,
        }),
        Commands::Filter {
            spec,
            index,
            output_level,
            show_sql,
            limit,
            json,
        } => filter::run(filter::FilterCommand {
            spec,
            index,
            output_level,
            show_sql,
            limit,
            json,
        }),
        Commands::Export {
            index,
            structure,
            separator,
            output,
        } => export::run(export::ExportCommand {
            index,
            structure,
            separator,
            output,
        }),
        Commands::Mask {
            spec,
            index,
            mask_level,
            clean_whitespace,
            output,
        } => mask::run(mask::MaskCommand {
            spec,
            index,
            mask_level,
            clean_whitespace,
            output,
        }),
        Commands::Cooccurrence {
            index,
            source,
            target,
            json,
        } => cooccurrence::run(cooccurrence::CooccurrenceCommand {
            index,
            source,
            target,
            json,
        }),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
