//! dsconv: convert computer-vision datasets between on-disk layouts.
//!
//! Every reader builds one canonical [`ir::Dataset`] and every writer
//! consumes one, so the four supported layouts (CVAT XML, COCO JSON, YOLO
//! and ImageNet folders) convert into each other through a single model.
//! Subsets can be renamed or resplit on the way through.
//!
//! # Modules
//!
//! - [`ir`]: canonical dataset model plus one reader/writer per layout
//! - [`subset`]: subset remap and resplit
//! - [`validation`]: dataset invariant checks and reporting
//! - [`conversion`]: the end-to-end convert pipeline and its report
//! - [`merge`]: merging ImageNet trees
//! - [`error`]: error types for dsconv operations

pub mod conversion;
pub mod error;
pub mod ir;
pub mod merge;
pub mod subset;
pub mod validation;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

pub use conversion::{ConvertOptions, Format};
pub use error::{DsconvError, ErrorKind};

use subset::{SplitPlan, SplitRatio, SubsetMap, SubsetRename};

/// The dsconv CLI application.
#[derive(Parser)]
#[command(name = "dsconv")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Convert a dataset from one layout to another.
    Convert(ConvertArgs),
    /// Validate a dataset for errors and warnings.
    Validate(ValidateArgs),
    /// Merge two or more ImageNet datasets with identical classes and subsets.
    MergeImagenet(MergeImagenetArgs),
    /// Turn a flat folder of unlabeled images into a YOLO dataset.
    ImagesToYolo(ImagesToYoloArgs),
}

/// How to print reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Subset options shared by commands that write a dataset.
#[derive(clap::Args)]
struct SubsetArgs {
    /// Rename a subset, as old:new (repeatable).
    #[arg(long = "subset-map", value_name = "OLD:NEW")]
    subset_map: Vec<SubsetRename>,

    /// Resplit all images, as name:ratio (repeatable, ratios sum to 1).
    #[arg(long = "split-ratio", value_name = "NAME:RATIO")]
    split_ratio: Vec<SplitRatio>,

    /// Shuffle seed for --split-ratio (default: stable order).
    #[arg(long, env = "DSCONV_SEED")]
    seed: Option<u64>,
}

/// Arguments for the convert subcommand.
#[derive(clap::Args)]
struct ConvertArgs {
    /// Source layout.
    #[arg(long, value_enum)]
    from: Format,

    /// Target layout.
    #[arg(long, value_enum)]
    to: Format,

    /// Source dataset directory.
    #[arg(long)]
    src: PathBuf,

    /// Output directory (must not exist unless --force).
    #[arg(long)]
    output: PathBuf,

    /// Remove an existing output directory first.
    #[arg(long)]
    force: bool,

    /// YOLO source: skip images that have no label file.
    #[arg(long)]
    skip_missing: bool,

    #[command(flatten)]
    subsets: SubsetArgs,

    /// Output format for the conversion report.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report: ReportFormat,
}

/// Arguments for the validate subcommand.
#[derive(clap::Args)]
struct ValidateArgs {
    /// Dataset directory to validate.
    input: PathBuf,

    /// Dataset layout.
    #[arg(long, value_enum)]
    format: Format,

    /// Treat warnings as errors (exit non-zero if any warnings).
    #[arg(long)]
    strict: bool,

    /// YOLO: skip images that have no label file.
    #[arg(long)]
    skip_missing: bool,

    /// Output format for the report.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    output: ReportFormat,
}

/// Arguments for the merge-imagenet subcommand.
#[derive(clap::Args)]
struct MergeImagenetArgs {
    /// Source ImageNet directory (repeat at least twice).
    #[arg(long = "src", required = true)]
    sources: Vec<PathBuf>,

    /// Output directory.
    #[arg(long)]
    output: PathBuf,

    /// Remove an existing output directory first.
    #[arg(long)]
    force: bool,
}

/// Arguments for the images-to-yolo subcommand.
#[derive(clap::Args)]
struct ImagesToYoloArgs {
    /// Folder of images (not searched recursively).
    #[arg(long)]
    src: PathBuf,

    /// Output directory.
    #[arg(long)]
    output: PathBuf,

    /// Remove an existing output directory first.
    #[arg(long)]
    force: bool,

    /// Class name for data.yaml (repeatable, in class-id order).
    #[arg(long = "class", value_name = "NAME")]
    classes: Vec<String>,

    /// Resplit the images, as name:ratio (repeatable, ratios sum to 1).
    #[arg(long = "split-ratio", value_name = "NAME:RATIO")]
    split_ratio: Vec<SplitRatio>,

    /// Shuffle seed for --split-ratio.
    #[arg(long)]
    seed: Option<u64>,
}

/// Run the dsconv CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), DsconvError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Convert(args)) => run_convert(args),
        Some(Commands::Validate(args)) => run_validate(args),
        Some(Commands::MergeImagenet(args)) => run_merge_imagenet(args),
        Some(Commands::ImagesToYolo(args)) => run_images_to_yolo(args),
        None => {
            println!("dsconv {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Convert datasets between CVAT, COCO, YOLO and ImageNet layouts.");
            println!();
            println!("Run 'dsconv --help' for usage information.");
            Ok(())
        }
    }
}

fn split_plan(ratios: Vec<SplitRatio>) -> Result<Option<SplitPlan>, DsconvError> {
    if ratios.is_empty() {
        return Ok(None);
    }
    SplitPlan::new(ratios).map(Some)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), DsconvError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DsconvError::Io(std::io::Error::other(e)))?;
    println!("{}", json);
    Ok(())
}

/// Execute the convert subcommand.
fn run_convert(args: ConvertArgs) -> Result<(), DsconvError> {
    let opts = ConvertOptions {
        force: args.force,
        subset_map: SubsetMap::from_renames(args.subsets.subset_map)?,
        split: split_plan(args.subsets.split_ratio)?,
        seed: args.subsets.seed,
        skip_missing: args.skip_missing,
    };

    let report = conversion::convert(args.from, args.to, &args.src, &args.output, &opts)?;

    match args.report {
        ReportFormat::Json => print_json(&report)?,
        ReportFormat::Text => print!("{}", report),
    }
    Ok(())
}

/// Execute the validate subcommand.
fn run_validate(args: ValidateArgs) -> Result<(), DsconvError> {
    let dataset = conversion::read_dataset(args.format, &args.input, args.skip_missing)?;

    let report = validation::validate_dataset(&dataset);

    match args.output {
        ReportFormat::Json => print_json(&serde_json::json!({
            "error_count": report.error_count(),
            "warning_count": report.warning_count(),
            "issues": &report.issues,
        }))?,
        ReportFormat::Text => print!("{}", report),
    }

    let opts = validation::ValidateOptions {
        strict: args.strict,
    };
    validation::ensure_valid(report, &opts).map(|_| ())
}

/// Execute the merge-imagenet subcommand.
fn run_merge_imagenet(args: MergeImagenetArgs) -> Result<(), DsconvError> {
    let summary = merge::merge_imagenet(&args.sources, &args.output, args.force)?;
    println!(
        "Merged {} datasets: {} images, {} classes, subsets: {}",
        summary.sources,
        summary.images,
        summary.classes.len(),
        summary.subsets.join(", ")
    );
    Ok(())
}

/// Execute the images-to-yolo subcommand.
fn run_images_to_yolo(args: ImagesToYoloArgs) -> Result<(), DsconvError> {
    let opts = ConvertOptions {
        force: args.force,
        split: split_plan(args.split_ratio)?,
        seed: args.seed,
        ..Default::default()
    };

    let report = conversion::images_to_yolo(&args.src, &args.output, &args.classes, &opts)?;
    print!("{}", report);
    Ok(())
}
