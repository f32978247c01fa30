use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dandiset_organizer_core::{
    discover_files, load_manifest, organize, paths::absolutize, Dandiset, DiscoverOptions,
    InvalidMode, OrganizeOptions, OrganizeReport, PlacementMode, SidecarEngine, SummaryValue,
    DANDISET_METADATA_FILE,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "dandiset-organizer",
    version,
    about = "Organize neurophysiology recordings into a dandiset layout."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Rename and place files under a dandiset and update its metadata.
    Organize(OrganizeArgs),
    /// Write a dandiset.yaml with placeholder values.
    Template(TemplateArgs),
    /// Print the identifier and metadata of a dandiset.
    Show(ShowArgs),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CliPlacementMode {
    Dry,
    Simulate,
    Copy,
    Move,
    Symlink,
    #[value(name = "symlink-relative")]
    SymlinkRelative,
}

impl From<CliPlacementMode> for PlacementMode {
    fn from(value: CliPlacementMode) -> Self {
        match value {
            CliPlacementMode::Dry => PlacementMode::Dry,
            CliPlacementMode::Simulate => PlacementMode::Simulate,
            CliPlacementMode::Copy => PlacementMode::Copy,
            CliPlacementMode::Move => PlacementMode::Move,
            CliPlacementMode::Symlink => PlacementMode::Symlink,
            CliPlacementMode::SymlinkRelative => PlacementMode::SymlinkRelative,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CliInvalidMode {
    Error,
    Warn,
}

impl From<CliInvalidMode> for InvalidMode {
    fn from(value: CliInvalidMode) -> Self {
        match value {
            CliInvalidMode::Error => InvalidMode::Error,
            CliInvalidMode::Warn => InvalidMode::Warn,
        }
    }
}

#[derive(Debug, Args)]
struct OrganizeArgs {
    /// Files or directories holding the recordings.
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,

    /// Root directory of the dandiset to populate.
    #[arg(short = 'd', long, default_value = ".", value_name = "DIR")]
    dandiset_path: PathBuf,

    /// JSON or YAML file mapping each recording to its extracted metadata.
    #[arg(long, value_name = "FILE")]
    metadata: PathBuf,

    /// How files are placed into the dandiset.
    #[arg(long, default_value = "dry")]
    mode: CliPlacementMode,

    /// What to do with files lacking required metadata.
    #[arg(long, default_value = "error")]
    invalid: CliInvalidMode,

    /// Replace files already present at their destination.
    #[arg(long)]
    overwrite: bool,

    /// Compare content hashes after copying or moving.
    #[arg(long)]
    verify: bool,

    /// File name glob selecting recordings inside directories.
    #[arg(long, default_value = "*.nwb", value_name = "GLOB")]
    pattern: String,

    /// Exclude glob patterns (repeatable).
    #[arg(long = "exclude", value_name = "GLOB", num_args = 1.., action = ArgAction::Append)]
    exclude: Vec<String>,

    /// Optional JSON output file for the run report.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TemplateArgs {
    /// Root directory of the dandiset.
    #[arg(short = 'd', long, default_value = ".", value_name = "DIR")]
    dandiset_path: PathBuf,

    /// Replace an existing dandiset.yaml.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Directory inside the dandiset.
    #[arg(short = 'd', long, default_value = ".", value_name = "DIR")]
    dandiset_path: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Organize(args) => run_organize_command(args),
        Commands::Template(args) => run_template_command(args),
        Commands::Show(args) => run_show_command(args),
    }
}

fn run_organize_command(args: OrganizeArgs) -> Result<()> {
    let OrganizeArgs {
        paths,
        dandiset_path,
        metadata,
        mode,
        invalid,
        overwrite,
        verify,
        pattern,
        exclude,
        report,
    } = args;

    let mut warnings = Vec::new();
    let files = discover_files(
        &DiscoverOptions {
            paths,
            pattern,
            excludes: exclude,
            ..DiscoverOptions::default()
        },
        &mut warnings,
    )?;
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let manifest = load_manifest(&metadata)?;
    let records = manifest.records_for(&files);
    let options = OrganizeOptions {
        dandiset_path,
        mode: mode.into(),
        invalid: invalid.into(),
        overwrite,
        verify,
        ..OrganizeOptions::default()
    };

    let mut result = organize(records, &options).context("organize aborted")?;
    warnings.append(&mut result.warnings);
    result.warnings = warnings;

    print_organize_result(&result);

    if let Some(output) = report {
        let payload =
            serde_json::to_string_pretty(&result).context("failed to serialize report")?;
        fs::write(&output, payload)
            .with_context(|| format!("failed to write report to {}", output.display()))?;
        println!("Report written to {}", output.display());
    }

    Ok(())
}

fn print_organize_result(result: &OrganizeReport) {
    println!(
        "Mode {}: {} file(s) placed, {} skipped, {} failed, {} warning(s).",
        result.mode,
        result.placed.len(),
        result.skipped.len(),
        result.failures.len(),
        result.warnings.len()
    );
    for file in &result.placed {
        println!("- {} -> {}", file.source.display(), file.destination.display());
    }
    for failure in &result.failures {
        println!("! {}: {}", failure.source.display(), failure.error);
    }

    if result.sidecar_written {
        println!("Metadata written to {}", result.sidecar_path().display());
    }
    for entry in result.summary.iter() {
        let value = match &entry.value {
            SummaryValue::Count(count) => count.to_string(),
            SummaryValue::Values(values) => values.join(", "),
            SummaryValue::Range { minimum, maximum } => format!("{minimum}..{maximum}"),
        };
        println!("  {}: {}", entry.key, value);
    }
}

fn run_template_command(args: TemplateArgs) -> Result<()> {
    let path = args.dandiset_path.join(DANDISET_METADATA_FILE);
    if path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            path.display()
        );
    }

    SidecarEngine::new().create_template(&path)?;
    println!("Template written to {}", path.display());
    Ok(())
}

fn run_show_command(args: ShowArgs) -> Result<()> {
    let start = absolutize(&args.dandiset_path)
        .with_context(|| format!("failed to resolve {}", args.dandiset_path.display()))?;
    let dandiset = Dandiset::find(&start)?.with_context(|| {
        format!(
            "no {} found at or above {}",
            DANDISET_METADATA_FILE,
            start.display()
        )
    })?;

    println!("Dandiset: {}", dandiset.path().display());
    match dandiset.identifier() {
        Ok(identifier) => println!("Identifier: {identifier}"),
        Err(err) => println!("Identifier: unavailable ({err})"),
    }
    if let Some(metadata) = dandiset.metadata() {
        let payload =
            serde_yaml::to_string(metadata).context("failed to render dandiset metadata")?;
        print!("{payload}");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
