use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spekta::config::{self, Number, State};
use spekta::ingest::{label_from_file_name, load_image, populate};
use spekta::pipeline::SaveQuery;
use spekta::snapshot::{read_snapshot, write_snapshot};
use spekta::{
    Fingerprinter, Identification, LmdbStore, Metadata, RecordId, SimilarityEngine,
    SimilarityResult, VectorStore,
};

#[derive(Parser)]
#[command(name = "spekta")]
#[command(version = "0.1")]
#[command(about = "Identify minerals by comparing EDS spectrum images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint an image and store it as a reference sample
    Add {
        image: PathBuf,
        /// Defaults to the mineral name in the file name
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        researcher: Option<String>,
    },
    /// Add every spectrum image in a directory
    Populate {
        dir: PathBuf,
        #[arg(long)]
        researcher: Option<String>,
    },
    /// Rank stored samples by similarity to an image
    Identify {
        image: PathBuf,
        #[arg(long)]
        threshold: Option<Number>,
        /// Rank against a snapshot file instead of the store
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Keep the query as an unknown sample
        #[arg(long)]
        save: bool,
    },
    /// Rank all other stored samples against a stored one
    Compare {
        id: RecordId,
        #[arg(long)]
        threshold: Option<Number>,
    },
    List,
    Show {
        id: RecordId,
    },
    Remove {
        id: RecordId,
    },
    Rename {
        id: RecordId,
        label: String,
    },
    Stats,
    /// Write the current corpus to a snapshot file
    Export {
        path: PathBuf,
    },
    Config,
}

fn open_store(state: &State) -> Result<LmdbStore> {
    LmdbStore::open(&state.path, state.dimensions)
        .with_context(|| format!("Failed to open store at '{}'", state.path))
}

fn fingerprinter(state: &State) -> Result<Fingerprinter> {
    Fingerprinter::new(state.extractor.clone(), state.dimensions)
        .context("Invalid extractor settings")
}

fn results_json(results: &[SimilarityResult]) -> Vec<serde_json::Value> {
    results
        .iter()
        .map(|r| {
            serde_json::json!({
                "id": r.id.0,
                "label": r.label,
                "similarity": r.score,
                "confidence": r.confidence(),
            })
        })
        .collect()
}

fn add_command(
    state: &State,
    image: &Path,
    label: Option<String>,
    researcher: Option<String>,
) -> Result<()> {
    let store = open_store(state)?;
    let fingerprinter = fingerprinter(state)?;
    let raster = load_image(image)?;

    let Some(vector) = fingerprinter.fingerprint(&raster)? else {
        anyhow::bail!(
            "No usable spectrum fingerprint in '{}'; nothing was stored",
            image.display()
        );
    };

    let label = label.unwrap_or_else(|| {
        label_from_file_name(&image.file_name().unwrap_or_default().to_string_lossy())
    });
    let metadata = Metadata::now(researcher, Some(image.display().to_string()));
    let id = store.insert(&label, vector, metadata)?;
    info!("Added sample '{}' from {}", label, image.display());
    println!("{}", id);
    Ok(())
}

fn populate_command(state: &State, dir: &Path, researcher: Option<String>) -> Result<()> {
    let store = open_store(state)?;
    let fingerprinter = fingerprinter(state)?;
    let summary = populate(&store, &fingerprinter, dir, researcher.as_deref())?;

    println!(
        "{}",
        serde_json::json!({
            "added": summary.added,
            "skipped": summary.skipped(),
            "duplicates": summary.duplicates,
            "unusable": summary.unusable,
            "total_records": store.count()?,
        })
    );
    Ok(())
}

fn identification_json(
    image: &Path,
    outcome: &Identification,
    saved_id: Option<RecordId>,
    corpus_len: usize,
    threshold: Number,
    top_k: usize,
) -> serde_json::Value {
    let status = match outcome {
        Identification::NoFingerprint => {
            return serde_json::json!({
                "status": "no_fingerprint",
                "message": "No usable spectrum was found in the image.",
                "image": image.display().to_string(),
            });
        }
        Identification::NoMatch { .. } => "no_match",
        Identification::Matches { .. } => "matches",
    };
    let vector = outcome.fingerprint().map(|f| &f[..5.min(f.len())]);
    let results = outcome.results();
    serde_json::json!({
        "status": status,
        "query": {
            "image": image.display().to_string(),
            "vector": vector,
            "saved_id": saved_id.map(|id| id.0),
        },
        "corpus_record_count": corpus_len,
        "threshold": threshold,
        "results": results_json(results),
        "actual_results_count": results.len(),
        "requested_results_count": top_k,
    })
}

fn identify_command(
    state: &State,
    image: &Path,
    threshold: Option<Number>,
    snapshot: Option<&Path>,
    save: bool,
) -> Result<()> {
    let threshold = threshold.unwrap_or(state.threshold);
    let fingerprinter = fingerprinter(state)?;
    let engine = SimilarityEngine::new(Some(state.top_k));
    let raster = load_image(image)?;

    let (outcome, saved_id, corpus_len) = match snapshot {
        Some(path) => {
            if save {
                warn!("--save is ignored when ranking against a snapshot");
            }
            let (corpus, dimensions) = read_snapshot(path)
                .with_context(|| format!("Failed to read snapshot '{}'", path.display()))?;
            if dimensions != state.dimensions {
                anyhow::bail!(
                    "Snapshot holds {}-dimensional vectors, configured dimensions are {}",
                    dimensions,
                    state.dimensions
                );
            }
            let outcome = fingerprinter.identify_with(&engine, &raster, &corpus, threshold)?;
            (outcome, None, corpus.len())
        }
        None => {
            let store = open_store(state)?;
            let save = save.then(|| SaveQuery::unknown(Some(image.display().to_string())));
            let identified =
                fingerprinter.identify_in_store(&engine, &raster, &store, threshold, save)?;
            (identified.outcome, identified.saved_id, identified.corpus_len)
        }
    };
    info!(
        "Identified {} against {} records: {} results",
        image.display(),
        corpus_len,
        outcome.results().len()
    );

    let output = identification_json(image, &outcome, saved_id, corpus_len, threshold, state.top_k);
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn compare_command(state: &State, id: RecordId, threshold: Option<Number>) -> Result<()> {
    let threshold = threshold.unwrap_or(state.compare_threshold);
    let store = open_store(state)?;
    let base = store
        .get_record(id)
        .with_context(|| format!("Sample {} has no stored spectrum", id))?;
    let corpus = store.corpus()?.without(id);

    let engine = SimilarityEngine::new(None);
    let (results, _) = engine.search(&base.vector, &corpus, threshold)?;

    let output = serde_json::json!({
        "status": if results.is_empty() { "no_match" } else { "matches" },
        "query": { "id": id.0, "label": base.label },
        "corpus_record_count": corpus.len(),
        "threshold": threshold,
        "results": results_json(&results),
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn list_command(state: &State) -> Result<()> {
    let store = open_store(state)?;
    for record in store.list_all()? {
        println!("{}\t{}", record.id, record.label);
    }
    Ok(())
}

fn show_command(state: &State, id: RecordId) -> Result<()> {
    let store = open_store(state)?;
    let record = store.get_record(id)?;
    let output = serde_json::json!({
        "id": record.id.0,
        "label": record.label,
        "metadata": record.metadata,
        "dimensions": record.vector.dimensions(),
        "vector": &record.vector[..5.min(record.vector.len())],
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn remove_command(state: &State, id: RecordId) -> Result<()> {
    let store = open_store(state)?;
    store.remove(id)?;
    info!("Removed sample {}", id);
    Ok(())
}

fn rename_command(state: &State, id: RecordId, label: &str) -> Result<()> {
    let store = open_store(state)?;
    let record = store.update(id, Some(label))?;
    println!("{}\t{}", record.id, record.label);
    Ok(())
}

fn stats_command(state: &State) -> Result<()> {
    let store = open_store(state)?;
    let records = store.list_all()?;
    let labels: HashSet<&str> = records.iter().map(|r| r.label.as_str()).collect();
    let output = serde_json::json!({
        "total_records": records.len(),
        "distinct_labels": labels.len(),
        "dimensions": store.dimensions(),
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn export_command(state: &State, path: &Path) -> Result<()> {
    let store = open_store(state)?;
    let corpus = store.corpus()?;
    let written = write_snapshot(path, &corpus, store.dimensions())
        .with_context(|| format!("Failed to write snapshot '{}'", path.display()))?;
    info!("Wrote {} records to {}", written, path.display());
    Ok(())
}

fn config_command(state: &State) -> Result<()> {
    state.print_config();
    Ok(())
}

fn init_logging() -> Result<()> {
    let directive = if config::verbose_enabled() {
        "spekta=debug"
    } else {
        "spekta=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    let args = Cli::parse();
    let state = State::new()?;

    match args.command {
        Commands::Add {
            image,
            label,
            researcher,
        } => add_command(&state, &image, label, researcher)?,
        Commands::Populate { dir, researcher } => populate_command(&state, &dir, researcher)?,
        Commands::Identify {
            image,
            threshold,
            snapshot,
            save,
        } => identify_command(&state, &image, threshold, snapshot.as_deref(), save)?,
        Commands::Compare { id, threshold } => compare_command(&state, id, threshold)?,
        Commands::List => list_command(&state)?,
        Commands::Show { id } => show_command(&state, id)?,
        Commands::Remove { id } => remove_command(&state, id)?,
        Commands::Rename { id, label } => rename_command(&state, id, &label)?,
        Commands::Stats => stats_command(&state)?,
        Commands::Export { path } => export_command(&state, &path)?,
        Commands::Config => config_command(&state)?,
    }
    Ok(())
}
