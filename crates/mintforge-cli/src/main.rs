mod registry;
mod workspace;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use mintforge_core::{CATALOG_VERSION, Catalog, Error as CoreError, validate_catalog};
use mintforge_generate::{
    FsBlobStore, GenerationEngine, GenerationError, InMemoryCatalogReader, InMemoryCompositeStore,
};
use registry::{RunConfig, RunProgress, init_run_logging, open_run, start_run};
use thiserror::Error;
use uuid::Uuid;
use workspace::{SETTINGS_FILE, Settings, load_or_create_settings, write_json_atomic};

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("workspace error: {0}")]
    Workspace(#[from] workspace::WorkspaceError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Parser, Debug)]
#[command(name = "mintforge", version, about = "Mintforge collection generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate composites for an index range of a collection.
    Generate(GenerateArgs),
    /// Check a catalog file and print its validation report.
    Validate(ValidateArgs),
    /// Print the JSON Schema of catalog files.
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Catalog JSON file.
    #[arg(long, required_unless_present = "resume")]
    catalog: Option<PathBuf>,
    /// Project id; defaults to the catalog's.
    #[arg(long)]
    project: Option<String>,
    /// Collection id; defaults to the catalog's.
    #[arg(long)]
    collection: Option<String>,
    /// Composite group id; a fresh one is generated when omitted.
    #[arg(long)]
    group: Option<String>,
    /// Restrict the run to one trait set.
    #[arg(long)]
    trait_set: Option<String>,
    /// First index (inclusive).
    #[arg(long)]
    start: Option<u64>,
    /// Last index (exclusive).
    #[arg(long)]
    end: Option<u64>,
    /// Items per batch; overrides the settings file.
    #[arg(long)]
    batch_size: Option<u64>,
    /// Settings file, created with defaults when missing.
    #[arg(long, default_value = SETTINGS_FILE)]
    config: PathBuf,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Continue an earlier run directory instead of starting a new one.
    #[arg(long, value_name = "RUN_DIR", conflicts_with_all = ["catalog", "project", "collection", "group", "trait_set", "start", "end", "batch_size"])]
    resume: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Catalog JSON file.
    #[arg(long)]
    catalog: PathBuf,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Write the schema to this file instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Generate(args) => run_generate(args).await,
        Command::Validate(args) => run_validate(args),
        Command::Schema(args) => run_schema(args),
    }
}

async fn run_generate(args: GenerateArgs) -> Result<(), CliError> {
    let settings = load_or_create_settings(&args.config)?;

    let (paths, config, catalog) = match &args.resume {
        Some(root) => {
            let (paths, config) = open_run(root)?;
            let catalog = read_catalog(&config.catalog_path)?;
            (paths, config, catalog)
        }
        None => {
            let catalog_path = args.catalog.clone().ok_or_else(|| {
                CliError::InvalidConfig("--catalog is required for a new run".to_string())
            })?;
            let catalog = read_catalog(&catalog_path)?;
            let config = new_run_config(&args, catalog_path, &catalog, &settings)?;
            let paths = start_run(&args.run_dir, &config)?;
            (paths, config, catalog)
        }
    };

    init_run_logging(&paths.logs_path)?;
    tracing::info!(
        event = "run_started",
        run_id = %config.run_id,
        run_dir = %paths.root.display(),
        resumed = args.resume.is_some()
    );

    let validation = validate_catalog(&catalog);
    for warning in &validation.warnings {
        tracing::warn!(code = %warning.code, path = %warning.path, "{}", warning.message);
    }
    if !validation.is_ok() {
        for error in &validation.errors {
            tracing::error!(code = %error.code, path = %error.path, "{}", error.message);
        }
        return Err(CliError::InvalidConfig(format!(
            "catalog has {} validation errors",
            validation.errors.len()
        )));
    }

    let progress = RunProgress::load(&paths)?;
    let mut next = progress.next_index(&config);
    let mut report = progress.report;
    let store = Arc::new(InMemoryCompositeStore::with_composites(progress.composites));
    let engine = GenerationEngine::new(
        config.options.clone(),
        Arc::new(InMemoryCatalogReader::new([bind_catalog(catalog, &config)])),
        Arc::new(FsBlobStore::new(
            settings.blob_root.clone(),
            settings.public_base_url.clone(),
        )),
        store.clone(),
    );
    let run = config.descriptor();
    let timer = Instant::now();

    while next < config.end_index {
        let end = next.saturating_add(config.batch_size).min(config.end_index);
        let mut batch = engine.generate(&run, next..end).await?.report;
        batch.run_id = config.run_id.clone();
        tracing::info!(
            event = "batch_finished",
            start = next,
            end,
            generated = batch.generated,
            abandoned = batch.abandoned
        );
        match report.as_mut() {
            Some(report) => report.absorb(batch),
            None => report = Some(batch),
        }

        RunProgress {
            composites: store.composites(),
            report: report.clone(),
        }
        .save(&paths)?;
        next = end;
    }

    let (generated, abandoned) = report
        .as_ref()
        .map(|report| (report.generated, report.abandoned))
        .unwrap_or_default();
    tracing::info!(
        event = "run_finished",
        status = "success",
        generated,
        abandoned,
        duration_ms = timer.elapsed().as_millis() as u64
    );
    println!("{}", paths.root.display());

    Ok(())
}

fn new_run_config(
    args: &GenerateArgs,
    catalog_path: PathBuf,
    catalog: &Catalog,
    settings: &Settings,
) -> Result<RunConfig, CliError> {
    let (default_start, default_end) = match args.trait_set.as_deref() {
        Some(set_id) => {
            let set = catalog.trait_set(set_id).ok_or_else(|| {
                CliError::InvalidConfig(format!("unknown trait set '{set_id}'"))
            })?;
            (set.start_index, set.end_index)
        }
        None => (0, catalog.collection.supply),
    };

    let batch_size = args.batch_size.unwrap_or(settings.batch_size);
    if batch_size == 0 {
        return Err(CliError::InvalidConfig(
            "batch size must be at least 1".to_string(),
        ));
    }

    Ok(RunConfig {
        run_id: Uuid::new_v4().to_string(),
        started_at: chrono::Utc::now(),
        catalog_path,
        project_id: args
            .project
            .clone()
            .unwrap_or_else(|| catalog.project_id.clone()),
        collection_id: args
            .collection
            .clone()
            .unwrap_or_else(|| catalog.collection.id.clone()),
        composite_group_id: args
            .group
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        trait_set_id: args.trait_set.clone(),
        start_index: args.start.unwrap_or(default_start),
        end_index: args.end.unwrap_or(default_end),
        batch_size,
        options: settings.generate.clone(),
    })
}

/// Files the catalog under the run's project and collection, which may have
/// been overridden on the command line.
fn bind_catalog(mut catalog: Catalog, config: &RunConfig) -> Catalog {
    catalog.project_id = config.project_id.clone();
    catalog.collection.id = config.collection_id.clone();
    catalog
}

fn run_validate(args: ValidateArgs) -> Result<(), CliError> {
    let catalog = read_catalog(&args.catalog)?;
    let report = validate_catalog(&catalog);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_ok() {
        return Err(CliError::InvalidConfig(format!(
            "catalog has {} validation errors",
            report.errors.len()
        )));
    }
    Ok(())
}

fn run_schema(args: SchemaArgs) -> Result<(), CliError> {
    let schema = schemars::schema_for!(Catalog);
    match args.out {
        Some(path) => write_json_atomic(&path, &schema)?,
        None => println!("{}", serde_json::to_string_pretty(&schema)?),
    }
    Ok(())
}

fn read_catalog(path: &Path) -> Result<Catalog, CliError> {
    let bytes = std::fs::read(path)?;
    let catalog: Catalog = serde_json::from_slice(&bytes)?;
    if catalog.catalog_version != CATALOG_VERSION {
        return Err(CliError::Core(CoreError::Unsupported(format!(
            "catalog version {} (expected {CATALOG_VERSION})",
            catalog.catalog_version
        ))));
    }
    Ok(catalog)
}
