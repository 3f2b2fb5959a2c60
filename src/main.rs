use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use course_sync::{
    AdapterRegistry, ExchangeService, ImportFile, ImportOptions, InstitutionManifest,
    InstitutionScope, MemoryStore, Result, Strategy, SyncError,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(1);
        }
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| SyncError::Logging(err.to_string()))
}

/// Runs one command. `Ok(false)` means the command completed but reported a
/// failure, such as an import with errors or a failed round trip.
fn run(cli: Cli) -> Result<bool> {
    let manifest = cli
        .manifest
        .as_deref()
        .map(InstitutionManifest::load)
        .transpose()?;
    let scope = resolve_scope(&cli, manifest.as_ref())?;
    let registry = manifest
        .as_ref()
        .map(InstitutionManifest::registry)
        .unwrap_or_else(AdapterRegistry::builtin);

    let store = Arc::new(match &cli.store {
        Some(path) => MemoryStore::load(path)?,
        None => MemoryStore::new(),
    });
    let service = ExchangeService::new(registry, store.clone());

    match cli.command {
        Command::Adapters => {
            print_json(&service.list_adapters(&scope.institution_id))?;
            Ok(true)
        }
        Command::Validate(args) => {
            let file = ImportFile::open(&args.input)?;
            let result = service.validate(&file, &args.adapter, &scope.institution_id)?;
            print_json(&result)?;
            Ok(result.compatible)
        }
        Command::Import(args) => {
            let file = ImportFile::open(&args.input)?;
            let mut options = ImportOptions::new(args.strategy.into()).dry_run(args.dry_run);
            if let Some(seconds) = args.deadline_secs {
                options = options.deadline(Instant::now() + Duration::from_secs(seconds));
            }
            let report = service.import(&file, &args.adapter, &scope, &options);
            if !options.dry_run {
                persist(&store, cli.store.as_deref())?;
            }
            match &args.report {
                Some(path) => fs::write(path, serde_json::to_string_pretty(&report)?)?,
                None => print_json(&report)?,
            }
            Ok(report.success)
        }
        Command::Export(args) => {
            let artifact = service.export(&args.adapter, &args.view, &scope.institution_id)?;
            let output = if args.output.is_dir() {
                args.output.join(&artifact.name)
            } else {
                args.output
            };
            fs::write(&output, &artifact.bytes)?;
            info!(
                output = %output.display(),
                files = artifact.files.len(),
                "wrote export"
            );
            Ok(true)
        }
        Command::Roundtrip(args) => {
            let file = ImportFile::open(&args.input)?;
            let report = service.round_trip(&file, &args.adapter, &scope)?;
            print_json(&report)?;
            Ok(report.passed())
        }
        Command::Seed => {
            let manifest = manifest.ok_or_else(|| {
                SyncError::Validation("seed needs --manifest".into())
            })?;
            let summary = manifest.apply_seed(service.store())?;
            persist(&store, cli.store.as_deref())?;
            print_json(&summary)?;
            Ok(true)
        }
    }
}

fn resolve_scope(cli: &Cli, manifest: Option<&InstitutionManifest>) -> Result<InstitutionScope> {
    if let Some(manifest) = manifest {
        let scope = manifest.scope();
        if cli
            .institution
            .as_deref()
            .is_some_and(|id| !id.eq_ignore_ascii_case(&scope.institution_id))
        {
            return Err(SyncError::Validation(format!(
                "--institution does not match manifest institution '{}'",
                scope.institution_id
            )));
        }
        return Ok(scope);
    }
    let institution = cli.institution.clone().ok_or_else(|| {
        SyncError::Validation("pass --manifest or --institution".into())
    })?;
    let domain = cli
        .domain
        .clone()
        .unwrap_or_else(|| format!("{}.edu", institution.to_lowercase()));
    Ok(InstitutionScope::new(institution, domain))
}

fn persist(store: &MemoryStore, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => store.save(path),
        None => {
            warn!("no --store given; imported records are discarded on exit");
            Ok(())
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Exchange institution course data with the central records store."
)]
struct Cli {
    /// JSON state file of the record store. Created on first write.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Institution manifest with adapter configuration and seed records.
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    /// Acting institution id, when no manifest is given.
    #[arg(long, global = true)]
    institution: Option<String>,

    /// Email domain for synthesised instructor addresses.
    #[arg(long, global = true)]
    domain: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the adapters available to the institution.
    Adapters,
    /// Check a file against an adapter without importing it.
    Validate(FileArgs),
    /// Import a file into the store.
    Import(ImportArgs),
    /// Export the institution's records through an adapter.
    Export(ExportArgs),
    /// Import into a scratch store, export, and compare.
    Roundtrip(FileArgs),
    /// Load the manifest's seed records into the store.
    Seed,
}

#[derive(clap::Args)]
struct FileArgs {
    #[arg(long)]
    adapter: String,

    #[arg(long)]
    input: PathBuf,
}

#[derive(clap::Args)]
struct ImportArgs {
    #[arg(long)]
    adapter: String,

    #[arg(long)]
    input: PathBuf,

    /// How conflicting fields are resolved.
    #[arg(long, value_enum, default_value_t = StrategyArg::ManualReview)]
    strategy: StrategyArg,

    /// Report what would happen without writing.
    #[arg(long)]
    dry_run: bool,

    /// Give up before writing if this many seconds have passed.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Write the report here instead of stdout.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ExportArgs {
    #[arg(long)]
    adapter: String,

    #[arg(long, default_value = "full")]
    view: String,

    /// Output file, or a directory to place the suggested file name in.
    #[arg(long)]
    output: PathBuf,
}

/// Spelled the way reports and the library name strategies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum StrategyArg {
    UseMine,
    UseTheirs,
    ManualReview,
    Merge,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::UseMine => Strategy::UseMine,
            StrategyArg::UseTheirs => Strategy::UseTheirs,
            StrategyArg::ManualReview => Strategy::ManualReview,
            StrategyArg::Merge => Strategy::Merge,
        }
    }
}
