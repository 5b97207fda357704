use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use genomic_ingest::config::{ConfigLoader, Overrides};
use genomic_ingest::discovery::{default_patterns, discover};
use genomic_ingest::domain::TableType;
use genomic_ingest::error::IngestError;
use genomic_ingest::notify::{JsonFileNotifier, LogNotifier, Notifiers};
use genomic_ingest::output::{JsonOutput, OutputMode, StderrProgress, print_run_summary};
use genomic_ingest::pipeline::{Pipeline, ProgressSink, RunOptions};
use genomic_ingest::reader::TsvReader;
use genomic_ingest::schema::schema_for;
use genomic_ingest::sqlite::SqliteStore;
use genomic_ingest::upload::CancellationToken;

#[derive(Parser)]
#[command(name = "genomic-ingest")]
#[command(about = "Validate, deduplicate and load genomic TSV exports into a store")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Discover, validate and upload files from a directory")]
    Run(RunArgs),
    #[command(about = "Print registered validation rules as JSON")]
    Schema(SchemaArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding the input files
    directory: Utf8PathBuf,
    /// File name patterns to process instead of the defaults
    #[arg(long, num_args = 1..)]
    files: Vec<String>,
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    sample_size: Option<usize>,
    #[arg(long)]
    backup_dir: Option<Utf8PathBuf>,
    #[arg(long)]
    qc_dir: Option<Utf8PathBuf>,
    /// Also write the run summary as JSON to this file
    #[arg(long)]
    summary_file: Option<Utf8PathBuf>,
    /// Validate and write QC reports without touching the store
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct SchemaArgs {
    #[arg(value_enum)]
    table: Option<TableType>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<IngestError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::UnknownTableType(_)
        | IngestError::ConfigRead(_)
        | IngestError::ConfigParse(_)
        | IngestError::InvalidConfig(_)
        | IngestError::DirectoryNotFound(_)
        | IngestError::InvalidPattern(_)
        | IngestError::NoInputFiles => 2,
        IngestError::Store(_)
        | IngestError::StoreConflict(_)
        | IngestError::SchemaBootstrap { .. }
        | IngestError::WorkerPool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Run(args) => run_ingest(args, output_mode),
        Commands::Schema(args) => {
            let schemas = match args.table {
                Some(table) => vec![schema_for(table)],
                None => TableType::ALL.into_iter().map(schema_for).collect(),
            };
            JsonOutput::print_schemas(&schemas).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_ingest(args: RunArgs, output_mode: OutputMode) -> miette::Result<ExitCode> {
    let overrides = Overrides {
        chunk_size: args.chunk_size,
        concurrency: args.concurrency,
        sample_size: args.sample_size,
        backup_dir: args.backup_dir,
        qc_dir: args.qc_dir,
        summary_file: args.summary_file,
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), &overrides)?;

    let patterns = if args.files.is_empty() {
        default_patterns()
    } else {
        args.files
    };
    let sources = discover(&args.directory, &patterns)?;

    let store = SqliteStore::open(config.store.clone())?;
    let pipeline = Pipeline::new(store, TsvReader);
    let options = RunOptions::from_config(&config, args.dry_run);

    let mut notifiers = Notifiers::new().with(LogNotifier);
    if let Some(path) = &config.summary_file {
        notifiers = notifiers.with(JsonFileNotifier::new(path.clone()));
    }
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &StderrProgress,
        OutputMode::NonInteractive => &JsonOutput,
    };

    let summary = pipeline.run(
        &sources,
        &options,
        &notifiers,
        sink,
        &CancellationToken::new(),
    )?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Interactive => print_run_summary(&summary),
    }

    if summary.has_failures() {
        return Ok(ExitCode::from(4));
    }
    Ok(ExitCode::SUCCESS)
}
