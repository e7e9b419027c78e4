//! BPCS mapper CLI
//!
//! Command-line interface for indexing BPCS schema documentation and mapping
//! Oracle FBDI templates onto it.

use anyhow::Context;
use bpcs_mapper::config::{parse_filter, DataPaths, Settings};
use bpcs_mapper::knowledge::{self, BpcsDocs, CandidateSource, KnowledgeBase};
use bpcs_mapper::llm::{GeminiClient, LlmMapper, TextGenerator};
use bpcs_mapper::mapping::{Explorer, MappingPipeline, MappingSheet, PipelineOptions};
use bpcs_mapper::store::{SearchHit, VectorSearchService};
use bpcs_mapper::telemetry::init_logging;
use bpcs_mapper::types::TableDescriptions;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// BPCS mapper - FBDI template to legacy BPCS column mapping
#[derive(Parser)]
#[command(name = "mapper")]
#[command(about = "Map Oracle FBDI templates onto legacy BPCS tables with embeddings and an LLM", long_about = None)]
#[command(version)]
struct Cli {
    /// Base data directory (overrides DATA_STORAGE_PATH)
    #[arg(long, env = "DATA_STORAGE_PATH", default_value = ".")]
    data_dir: PathBuf,

    /// Vector store file or directory (default: <data-dir>/Database/vector_store.db)
    #[arg(long, env = "MAPPER_DB_PATH")]
    db: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load schema CSVs and index them into the vector store
    Index {
        /// Table prefixes to load, comma-separated (e.g. AVM,APH)
        #[arg(long, env = "MAPPER_SCHEMA_FILTER")]
        filter: Option<String>,

        /// Clear the store before indexing
        #[arg(long)]
        rebuild: bool,
    },

    /// Search the vector store
    Search {
        /// Search query
        query: String,

        /// Number of results
        #[arg(long, default_value = "10")]
        top_k: usize,

        #[arg(long, value_enum, default_value = "vector")]
        mode: SearchMode,

        /// Extra keywords for keyword/hybrid mode, comma-separated
        #[arg(long)]
        keywords: Option<String>,
    },

    /// Map an FBDI template
    Map {
        /// Template CSV (absolute, or relative to "FBDI Template/")
        template: PathBuf,

        /// Skip the review pass
        #[arg(long)]
        no_refine: bool,

        /// Retrieve candidates from the vector store instead of the in-memory knowledge base
        #[arg(long)]
        use_store: bool,

        /// Table prefixes to load, comma-separated
        #[arg(long, env = "MAPPER_SCHEMA_FILTER")]
        filter: Option<String>,
    },

    /// Let the planner explore the indexed documentation for a template
    Explore {
        /// Template CSV
        template: PathBuf,

        /// Partially mapped version of the template
        #[arg(long)]
        current: Option<PathBuf>,
    },

    /// Merge bpcs.txt documentation into the schema CSVs
    EnrichDocs {
        /// BPCS text documentation
        docs: PathBuf,
    },

    /// List models available to the API key
    Models,

    /// Check API key and model with a one-line generation
    Ping,
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchMode {
    Vector,
    Keyword,
    Hybrid,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::from_filename("config.env").ok();
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let data_dir = PathBuf::from(shellexpand::tilde(&cli.data_dir.to_string_lossy()).to_string());
    let mut paths = DataPaths::new(data_dir);
    if let Some(db) = &cli.db {
        paths = paths.with_db_path(shellexpand::tilde(&db.to_string_lossy()).into_owned());
    }
    let mut settings = Settings::from_env();

    match cli.command {
        Commands::Index { filter, rebuild } => {
            if let Some(filter) = filter {
                settings.schema_filter = parse_filter(&filter);
            }
            cmd_index(&paths, &settings, rebuild).await?;
        }
        Commands::Search {
            query,
            top_k,
            mode,
            keywords,
        } => {
            let keywords = keywords.map(|k| split_list(&k)).unwrap_or_default();
            cmd_search(&paths, &settings, &query, top_k, mode, &keywords).await?;
        }
        Commands::Map {
            template,
            no_refine,
            use_store,
            filter,
        } => {
            if let Some(filter) = filter {
                settings.schema_filter = parse_filter(&filter);
            }
            cmd_map(&paths, &settings, &template, !no_refine, use_store).await?;
        }
        Commands::Explore { template, current } => {
            cmd_explore(&paths, &settings, &template, current.as_deref()).await?;
        }
        Commands::EnrichDocs { docs } => {
            cmd_enrich_docs(&paths, &docs)?;
        }
        Commands::Models => {
            cmd_models(&settings).await?;
        }
        Commands::Ping => {
            cmd_ping(&settings).await?;
        }
    }

    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn open_store(paths: &DataPaths, settings: &Settings) -> anyhow::Result<VectorSearchService> {
    let embedder = Arc::new(settings.embedder()?);
    let store = VectorSearchService::open(&paths.db_path, embedder, settings)
        .with_context(|| format!("opening vector store at {}", paths.db_path.display()))?;
    Ok(store)
}

/// Template path as given, or relative to the template directory.
fn resolve_template(paths: &DataPaths, template: &Path) -> PathBuf {
    if template.exists() {
        return template.to_path_buf();
    }
    let candidate = paths.fbdi_template_dir.join(template);
    if candidate.exists() {
        candidate
    } else {
        template.to_path_buf()
    }
}

fn load_descriptions(paths: &DataPaths) -> TableDescriptions {
    match TableDescriptions::load(&paths.table_descriptions) {
        Ok(d) => {
            tracing::info!(count = d.len(), "Loaded table descriptions");
            d
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not load table descriptions");
            TableDescriptions::default()
        }
    }
}

async fn cmd_index(paths: &DataPaths, settings: &Settings, rebuild: bool) -> anyhow::Result<()> {
    settings.validate()?;
    paths.ensure_dirs()?;
    let store = open_store(paths, settings)?;

    if rebuild {
        store.clear()?;
        if knowledge::clear_cache(paths)? {
            println!("✓ Cleared knowledge base cache");
        }
    }

    let files = knowledge::discover_schema_files(&paths.bpcs_data_dir, &settings.schema_filter)?;
    let rows = knowledge::load_schema_files(&files);
    let report = store.index_fields(&rows).await?;

    println!("✓ Indexed schema documentation");
    println!("  Files: {}", files.len());
    println!("  New documents: {}", report.indexed);
    println!("  Skipped (already indexed): {}", report.skipped);
    println!("  Failed: {}", report.failed);
    println!("  Total in store: {}", store.count()?);
    Ok(())
}

async fn cmd_search(
    paths: &DataPaths,
    settings: &Settings,
    query: &str,
    top_k: usize,
    mode: SearchMode,
    keywords: &[String],
) -> anyhow::Result<()> {
    let store = open_store(paths, settings)?;

    let hits: Vec<SearchHit> = match mode {
        SearchMode::Vector => store.search(query, top_k).await?,
        SearchMode::Keyword => {
            let mut terms: Vec<String> = query.split_whitespace().map(str::to_string).collect();
            terms.extend(keywords.iter().cloned());
            store.keyword_search(&terms, top_k)?
        }
        SearchMode::Hybrid => store.hybrid_search(query, keywords, top_k).await?,
    };

    if hits.is_empty() {
        println!("✗ No results for: {}", query);
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{:>2}. [{:.4}] {}", i + 1, hit.score, hit.document.text);
        if !hit.document.file_path.is_empty() {
            println!("    {}", hit.document.file_path);
        }
    }
    Ok(())
}

async fn cmd_map(
    paths: &DataPaths,
    settings: &Settings,
    template: &Path,
    refine: bool,
    use_store: bool,
) -> anyhow::Result<()> {
    settings.validate()?;
    paths.ensure_dirs()?;

    let template = resolve_template(paths, template);
    let mut sheet = MappingSheet::load(&template)?;

    let generator: Arc<dyn TextGenerator> = Arc::new(GeminiClient::from_settings(settings)?);
    let mapper = LlmMapper::new(generator, load_descriptions(paths), settings.retry.clone())
        .with_debug_dir(&paths.processed_dir);

    let source: Box<dyn CandidateSource> = if use_store {
        Box::new(open_store(paths, settings)?)
    } else {
        let embedder = Arc::new(settings.embedder()?);
        let kb = KnowledgeBase::build(paths, settings, embedder).await?;
        println!("Knowledge base: {} fields", kb.len());
        if !kb.is_vectorized() {
            println!("⚠ Knowledge base has no embeddings; every field will come back unmapped");
        }
        Box::new(kb)
    };

    let options = PipelineOptions {
        refine,
        ..PipelineOptions::from(settings)
    };
    let pipeline = MappingPipeline::new(source.as_ref(), &mapper, options, &paths.processed_dir);
    let summary = pipeline.run(&mut sheet).await?;

    println!("✓ Mapping complete");
    println!("  Fields: {}", summary.fields);
    println!("  Mapped: {}", summary.mapped);
    println!("  Hardcoded: {}", summary.hardcoded);
    println!("  Manual config: {}", summary.manual_config);
    println!("  Unmapped: {}", summary.unmapped);
    println!("  Review corrections: {}", summary.corrections);
    println!("  Tokens: {}", summary.tokens);
    println!("  Saved to: {}", summary.output.display());
    Ok(())
}

async fn cmd_explore(
    paths: &DataPaths,
    settings: &Settings,
    template: &Path,
    current: Option<&Path>,
) -> anyhow::Result<()> {
    settings.validate()?;
    settings.require_api_key()?;
    let initial = MappingSheet::load(resolve_template(paths, template))?;
    let current = match current {
        Some(path) => MappingSheet::load(path)?,
        None => initial.clone(),
    };

    let store = open_store(paths, settings)?;
    if store.count()? == 0 {
        anyhow::bail!("Vector store is empty; run `mapper index` first");
    }
    let generator = GeminiClient::from_settings(settings)?;
    let explorer = Explorer::new(&generator, &store).with_limits(
        settings.max_iterations,
        settings.files_per_iteration,
        settings.candidates_per_field,
    )
    .with_retry(settings.retry.clone());

    let outcome = explorer.run(&initial, &current).await?;
    for step in &outcome.steps {
        println!("Iteration {}", step.iteration);
        println!("  Thoughts: {}", step.selection.thoughts);
        println!("  Files: {}", step.new_files.join(", "));
        if !step.selection.search_queries.is_empty() {
            println!("  Queries: {}", step.selection.search_queries.join(" | "));
        }
        if !step.selection.keywords.is_empty() {
            println!("  Keywords: {}", step.selection.keywords.join(", "));
        }
        for hit in &step.hits {
            println!("    [{:.4}] {}", hit.score, hit.document.text);
        }
    }
    println!("Stopped: {:?}", outcome.stop);
    println!("Processed files: {}", outcome.processed_files.len());
    Ok(())
}

fn cmd_enrich_docs(paths: &DataPaths, docs_path: &Path) -> anyhow::Result<()> {
    let docs = BpcsDocs::load(docs_path).with_context(|| format!("reading {}", docs_path.display()))?;
    println!("Parsed {} tables from {}", docs.tables.len(), docs_path.display());

    let mut descriptions = if paths.table_descriptions.exists() {
        TableDescriptions::load(&paths.table_descriptions)?
    } else {
        TableDescriptions::default()
    };

    let report = knowledge::enrich_schemas(&paths.bpcs_data_dir, &docs, &mut descriptions)?;
    if report.tables_described > 0 {
        descriptions.save(&paths.table_descriptions)?;
    }

    println!("✓ Enrichment complete");
    println!("  Files updated: {}", report.files_updated);
    println!("  Columns updated: {}", report.columns_updated);
    println!("  Table descriptions added: {}", report.tables_described);
    Ok(())
}

async fn cmd_models(settings: &Settings) -> anyhow::Result<()> {
    let client = GeminiClient::from_settings(settings)?;
    let models = client.list_models().await?;
    for model in &models {
        println!("{:<45} {}", model.name, model.supported_generation_methods.join(", "));
    }
    println!("{} models", models.len());
    Ok(())
}

async fn cmd_ping(settings: &Settings) -> anyhow::Result<()> {
    let client = GeminiClient::from_settings(settings)?;
    let generation = client.ping().await?;
    println!("✓ {} responded: {}", client.model_name(), generation.text.trim());
    println!("  Tokens: {}", generation.tokens);
    Ok(())
}
