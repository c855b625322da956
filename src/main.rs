//! `bibmerge` - merge BibTeX files into one, collapsing duplicates.
//!
//! ```text
//! bibmerge [-v|-d] [--pairwise] [--parallel] [--conflict-policy POLICY]
//!          [--report PATH] BIBFILE... MERGEDBIB
//! ```
//!
//! Inputs are processed in the order given; when entries collide, the one
//! from the earliest file keeps its key. Nothing is written if any input
//! fails to parse or holds a key twice.

use anyhow::{Context, Result, bail};
use bibmerge::{
    BibTexParser, ConflictPolicy, Diagnostic, MatchStrategy, MergeOutcome, Merger, MergerConfig,
    RecordParser, RecordStore, serialize,
};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bibmerge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Merge BibTeX files, keeping every citation key resolvable", long_about = None)]
struct Cli {
    /// Input .bib files followed by the output .bib file
    #[arg(required = true, num_args = 2.., value_name = "BIBFILE... MERGEDBIB")]
    paths: Vec<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Debug output
    #[arg(short, long)]
    debug: bool,

    /// Compare every pair of entries instead of indexing normalized fields
    #[arg(long)]
    pairwise: bool,

    /// Normalize entries on all cores
    #[arg(long)]
    parallel: bool,

    /// Which value to keep when duplicates disagree on a field
    #[arg(long, value_enum, default_value_t = ConflictPolicy::FirstSeen)]
    conflict_policy: ConflictPolicy,

    /// Write a JSON report of sources and merge diagnostics to this file
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[derive(Serialize)]
struct SourceSummary<'a> {
    name: &'a str,
    entries: usize,
}

#[derive(Serialize)]
struct Report<'a> {
    sources: Vec<SourceSummary<'a>>,
    entries_out: usize,
    aliases: usize,
    diagnostics: &'a [Diagnostic],
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let Some((output, inputs)) = cli.paths.split_last() else {
        bail!("Expected at least one input file and an output file");
    };

    let store = load_sources(inputs)?;
    if cli.verbose || cli.debug {
        print_info(&store);
    }

    let config = MergerConfig {
        strategy: if cli.pairwise {
            MatchStrategy::Pairwise
        } else {
            MatchStrategy::Indexed
        },
        run_in_parallel: cli.parallel,
        conflict_policy: cli.conflict_policy,
    };
    let outcome = Merger::new().with_config(config).merge(&store);
    report_diagnostics(&outcome);

    fs::write(output, serialize::to_string(&outcome.records))
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        entries = outcome.records.len(),
        aliases = outcome.collapsed(),
        output = %output.display(),
        "Wrote merged database"
    );

    if let Some(path) = &cli.report {
        write_report(path, &store, &outcome)?;
    }

    Ok(())
}

fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_sources(inputs: &[PathBuf]) -> Result<RecordStore> {
    let parser = BibTexParser::new();
    let mut builder = RecordStore::builder();

    for path in inputs {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let entries = parser
            .parse(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        builder.add_source(path.display().to_string(), entries)?;
    }

    Ok(builder.build())
}

fn print_info(store: &RecordStore) {
    println!("Bibs: {}", store.sources().len());
    for (name, entries) in store.source_summary() {
        println!("- {name} {entries} entries");
    }
}

fn report_diagnostics(outcome: &MergeOutcome) {
    for diagnostic in &outcome.diagnostics {
        let canonical = &outcome.records[diagnostic.class_id].canonical_key;
        warn!(
            entry = %canonical,
            kind = %diagnostic.kind,
            "{}",
            diagnostic.detail
        );
    }
}

fn write_report(path: &Path, store: &RecordStore, outcome: &MergeOutcome) -> Result<()> {
    let report = Report {
        sources: store
            .source_summary()
            .into_iter()
            .map(|(name, entries)| SourceSummary { name, entries })
            .collect(),
        entries_out: outcome.records.len(),
        aliases: outcome.collapsed(),
        diagnostics: &outcome.diagnostics,
    };

    let json = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
