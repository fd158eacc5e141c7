//! End-to-end conversion between dataset layouts.
//!
//! A conversion runs in four stages, each finishing before the next starts:
//!
//! 1. option checks (no file is touched when they fail)
//! 2. read the source into a [`Dataset`]
//! 3. subset remap or resplit, then invariant validation
//! 4. prepare a fresh output directory and write
//!
//! The returned [`ConversionReport`] records counts and everything the
//! target layout could not hold.

pub mod report;

pub use report::{
    ConversionCounts, ConversionIssue, ConversionIssueCode, ConversionReport, ConversionSeverity,
};

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::DsconvError;
use crate::ir::io_imagenet::ImagenetWriteSummary;
use crate::ir::io_yolo::{YoloReadOptions, YOLO_SUBSETS};
use crate::ir::{
    io_coco_json, io_cvat_xml, io_image_folder, io_imagenet, io_yolo, Dataset, Geometry,
};
use crate::subset::{self, SplitPlan, SubsetMap};
use crate::validation::{self, ValidateOptions};

/// Supported dataset layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// CVAT for images 1.1 (`annotations.xml` + `images/<subset>/`).
    Cvat,
    /// COCO instances (`annotations/instances_<subset>.json` + `images/`).
    Coco,
    /// Ultralytics YOLO (`data.yaml` + `images/` + `labels/`).
    Yolo,
    /// Classification folders (`<subset>/<class>/`).
    #[value(name = "imagenet")]
    ImageNet,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Cvat => "cvat",
            Format::Coco => "coco",
            Format::Yolo => "yolo",
            Format::ImageNet => "imagenet",
        }
    }

    /// Whether the layout can store polygons as such.
    pub fn supports_polygons(&self) -> bool {
        matches!(self, Format::Cvat)
    }

    /// Whether the layout can store image-level tags.
    pub fn supports_tags(&self) -> bool {
        matches!(self, Format::Cvat | Format::ImageNet)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Format {
    type Err = DsconvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cvat" | "cvat-xml" => Ok(Format::Cvat),
            "coco" | "coco-json" => Ok(Format::Coco),
            "yolo" => Ok(Format::Yolo),
            "imagenet" => Ok(Format::ImageNet),
            other => Err(DsconvError::UnsupportedFormat(format!(
                "'{}' (supported: cvat, coco, yolo, imagenet)",
                other
            ))),
        }
    }
}

/// Options for one conversion run.
#[derive(Clone, Debug, Default)]
pub struct ConvertOptions {
    /// Replace an existing output directory.
    pub force: bool,
    /// Subset renames applied after reading.
    pub subset_map: SubsetMap,
    /// Resplit applied after reading. Exclusive with `subset_map`.
    pub split: Option<SplitPlan>,
    /// Shuffle seed for the resplit; `None` keeps the stable order.
    pub seed: Option<u64>,
    /// YOLO reader: skip images without a label file instead of failing.
    pub skip_missing: bool,
}

impl ConvertOptions {
    /// Checks option combinations. Runs before any file system access.
    pub fn validate(&self) -> Result<(), DsconvError> {
        subset::validate_subset_options(&self.subset_map, self.split.as_ref())?;
        if self.seed.is_some() && self.split.is_none() {
            log::warn!("--seed has no effect without --split-ratio");
        }
        Ok(())
    }
}

/// Reads a dataset in the given layout.
pub fn read_dataset(format: Format, path: &Path, skip_missing: bool) -> Result<Dataset, DsconvError> {
    log::info!("Reading {} dataset from {}", format, path.display());
    match format {
        Format::Cvat => io_cvat_xml::read_cvat_dir(path),
        Format::Coco => io_coco_json::read_coco_dir(path),
        Format::Yolo => io_yolo::read_yolo_dir(path, &YoloReadOptions { skip_missing }),
        Format::ImageNet => io_imagenet::read_imagenet_dir(path),
    }
}

/// Writes a dataset in the given layout into an existing directory.
///
/// Returns the ImageNet write summary when the target is ImageNet, since
/// that is the only writer that decides per image what to emit.
pub fn write_dataset(
    format: Format,
    path: &Path,
    dataset: &Dataset,
) -> Result<Option<ImagenetWriteSummary>, DsconvError> {
    log::info!("Writing {} dataset to {}", format, path.display());
    match format {
        Format::Cvat => io_cvat_xml::write_cvat_dir(path, dataset).map(|_| None),
        Format::Coco => io_coco_json::write_coco_dir(path, dataset).map(|_| None),
        Format::Yolo => io_yolo::write_yolo_dir(path, dataset).map(|_| None),
        Format::ImageNet => io_imagenet::write_imagenet_dir(path, dataset).map(Some),
    }
}

/// Applies the subset remap or resplit requested in `opts`.
pub fn transform_subsets(dataset: Dataset, opts: &ConvertOptions) -> Result<Dataset, DsconvError> {
    match &opts.split {
        Some(plan) => {
            log::info!("Resplitting {} image(s) into {}", dataset.images.len(), plan);
            Ok(subset::resplit(dataset, plan, opts.seed))
        }
        None => subset::remap_subsets(dataset, &opts.subset_map),
    }
}

/// Removes (under `force`) and recreates the output directory.
pub fn prepare_output_dir(output: &Path, force: bool) -> Result<(), DsconvError> {
    if output.exists() {
        if !force {
            return Err(DsconvError::OutputExists {
                path: output.to_path_buf(),
            });
        }
        log::info!("Removing existing output {}", output.display());
        if output.is_dir() {
            fs::remove_dir_all(output).map_err(DsconvError::Io)?;
        } else {
            fs::remove_file(output).map_err(DsconvError::Io)?;
        }
    }
    fs::create_dir_all(output).map_err(DsconvError::Io)
}

/// Fails when replacing `output` would delete one of `sources`.
///
/// Readers only record where image files live and writers copy them after
/// the output directory has been cleared, so `output` must be neither a
/// source nor an ancestor of one. A missing `output` cannot contain anything.
pub fn ensure_output_outside_sources(output: &Path, sources: &[&Path]) -> Result<(), DsconvError> {
    if !output.exists() {
        return Ok(());
    }
    let output_real = output.canonicalize().map_err(DsconvError::Io)?;
    for src in sources {
        let Ok(src_real) = src.canonicalize() else {
            continue;
        };
        if src_real.starts_with(&output_real) {
            return Err(DsconvError::invalid_options(format!(
                "output {} contains source dataset {}; choose an output directory outside the source",
                output.display(),
                src.display()
            )));
        }
    }
    Ok(())
}

/// Converts the dataset at `src` from one layout to another.
pub fn convert(
    from: Format,
    to: Format,
    src: &Path,
    output: &Path,
    opts: &ConvertOptions,
) -> Result<ConversionReport, DsconvError> {
    opts.validate()?;

    if !src.is_dir() {
        return Err(DsconvError::InvalidDataset {
            path: src.to_path_buf(),
            message: "source dataset directory does not exist".to_string(),
        });
    }
    ensure_output_outside_sources(output, &[src])?;
    if output.exists() && !opts.force {
        return Err(DsconvError::OutputExists {
            path: output.to_path_buf(),
        });
    }

    let dataset = read_dataset(from, src, opts.skip_missing)?;
    let input = counts_of(&dataset);

    let dataset = transform_subsets(dataset, opts)?;
    validation::ensure_valid(
        validation::validate_dataset(&dataset),
        &ValidateOptions::default(),
    )?;

    let mut report = build_conversion_report(&dataset, from, to);
    report.input = input;
    if !opts.subset_map.is_empty() {
        let pairs: Vec<String> = opts
            .subset_map
            .renames()
            .iter()
            .map(|r| format!("{} -> {}", r.old, r.new))
            .collect();
        report.add(ConversionIssue::info(
            ConversionIssueCode::SubsetsRemapped,
            format!("subsets renamed: {}", pairs.join(", ")),
        ));
    }
    if let Some(plan) = &opts.split {
        let order = match opts.seed {
            Some(seed) => format!("shuffled with seed {}", seed),
            None => "stable (id, subset) order".to_string(),
        };
        report.add(ConversionIssue::info(
            ConversionIssueCode::SubsetsResplit,
            format!("images resplit into {} ({}); ids renumbered", plan, order),
        ));
    }

    prepare_output_dir(output, opts.force)?;
    if let Some(summary) = write_dataset(to, output, &dataset)? {
        apply_imagenet_summary(&mut report, &dataset, &summary);
    }

    log::info!(
        "Wrote {} image(s), {} annotation(s) to {}",
        report.output.images,
        report.output.annotations,
        output.display()
    );
    Ok(report)
}

/// Bootstraps a YOLO dataset from a flat folder of unlabeled images.
///
/// Every image lands in `train` with an empty label file unless `opts.split`
/// spreads them over other subsets. `class_names` only populate `data.yaml`.
pub fn images_to_yolo(
    src: &Path,
    output: &Path,
    class_names: &[String],
    opts: &ConvertOptions,
) -> Result<ConversionReport, DsconvError> {
    opts.validate()?;
    if !opts.subset_map.is_empty() {
        return Err(DsconvError::invalid_options(
            "--subset-map is not supported when importing an image folder",
        ));
    }
    if !src.is_dir() {
        return Err(DsconvError::InvalidDataset {
            path: src.to_path_buf(),
            message: "image folder does not exist".to_string(),
        });
    }
    ensure_output_outside_sources(output, &[src])?;
    if output.exists() && !opts.force {
        return Err(DsconvError::OutputExists {
            path: output.to_path_buf(),
        });
    }

    let dataset = io_image_folder::read_image_folder(src, class_names)?;
    let input = counts_of(&dataset);
    let dataset = transform_subsets(dataset, opts)?;
    validation::ensure_valid(
        validation::validate_dataset(&dataset),
        &ValidateOptions::default(),
    )?;

    let mut report = build_conversion_report(&dataset, Format::Yolo, Format::Yolo);
    report.from = "image-folder".to_string();
    report.input = input;

    prepare_output_dir(output, opts.force)?;
    io_yolo::write_yolo_dir(output, &dataset)?;
    log::info!(
        "Imported {} image(s) into {}",
        dataset.images.len(),
        output.display()
    );
    Ok(report)
}

fn counts_of(dataset: &Dataset) -> ConversionCounts {
    ConversionCounts {
        images: dataset.images.len(),
        categories: dataset.categories.len(),
        annotations: dataset.annotations.len(),
    }
}

/// Analyzes what writing `dataset` as `to` will lose.
pub fn build_conversion_report(dataset: &Dataset, from: Format, to: Format) -> ConversionReport {
    let mut report = ConversionReport::new(from.name(), to.name());
    report.input = counts_of(dataset);
    report.output = counts_of(dataset);
    report.subsets = dataset.subsets.clone();

    let polygons = dataset
        .annotations
        .iter()
        .filter(|a| matches!(a.geometry, Geometry::Polygon { .. }))
        .count();
    let tags = dataset
        .annotations
        .iter()
        .filter(|a| matches!(a.geometry, Geometry::Tag))
        .count();

    if polygons > 0 && !to.supports_polygons() {
        report.add(ConversionIssue::warning(
            ConversionIssueCode::PolygonsFlattened,
            format!("{} polygon(s) written as bounding boxes", polygons),
        ));
    }
    if tags > 0 && !to.supports_tags() {
        report.add(ConversionIssue::warning(
            ConversionIssueCode::TagsDropped,
            format!("{} tag annotation(s) have no box and will be dropped", tags),
        ));
        report.output.annotations -= tags;
    }

    if to != Format::Cvat {
        if dataset.name.is_some() {
            report.add(ConversionIssue::warning(
                ConversionIssueCode::DatasetNameDropped,
                "dataset name has no equivalent in the target layout",
            ));
        }
        let with_attributes = dataset
            .annotations
            .iter()
            .filter(|a| !a.attributes.is_empty())
            .count();
        if with_attributes > 0 {
            report.add(ConversionIssue::warning(
                ConversionIssueCode::AnnotationAttributesDropped,
                format!(
                    "{} annotation(s) have attributes that will be dropped",
                    with_attributes
                ),
            ));
        }
    }

    let crowd = dataset.annotations.iter().filter(|a| a.iscrowd).count();
    if crowd > 0 && to != Format::Coco {
        report.add(ConversionIssue::warning(
            ConversionIssueCode::CrowdFlagsDropped,
            format!("{} crowd annotation(s) lose their iscrowd flag", crowd),
        ));
    }

    match to {
        Format::Cvat => {
            report.add(ConversionIssue::info(
                ConversionIssueCode::CvatImageIdsRenumbered,
                "CVAT writer renumbers image ids from 0 in subset order",
            ));
        }
        Format::Coco => {
            report.add(ConversionIssue::info(
                ConversionIssueCode::CocoCategoryIdsFromOne,
                "COCO writer numbers categories from 1 in definition order",
            ));
        }
        Format::Yolo => {
            let non_standard: Vec<&str> = dataset
                .subsets
                .iter()
                .map(String::as_str)
                .filter(|s| !YOLO_SUBSETS.contains(s))
                .collect();
            if !non_standard.is_empty() {
                report.add(ConversionIssue::warning(
                    ConversionIssueCode::NonStandardYoloSubsets,
                    format!(
                        "subset(s) {} are not train/val/test; YOLO tools may ignore them",
                        non_standard.join(", ")
                    ),
                ));
            }
            report.add(ConversionIssue::info(
                ConversionIssueCode::YoloFloatPrecision,
                "YOLO writer outputs normalized coordinates at 6 decimal places",
            ));
        }
        Format::ImageNet => {
            if tags < dataset.annotations.len() {
                report.add(ConversionIssue::info(
                    ConversionIssueCode::ImagenetCropPerAnnotation,
                    "each box is cropped into its own file named <stem>_<index>.jpg",
                ));
            }
        }
    }

    report
}

fn apply_imagenet_summary(
    report: &mut ConversionReport,
    dataset: &Dataset,
    summary: &ImagenetWriteSummary,
) {
    if summary.unannotated_skipped > 0 {
        report.add(ConversionIssue::warning(
            ConversionIssueCode::UnannotatedImagesSkipped,
            format!(
                "{} image(s) without annotations were not written",
                summary.unannotated_skipped
            ),
        ));
    }
    if summary.empty_crops_skipped > 0 {
        report.add(ConversionIssue::warning(
            ConversionIssueCode::EmptyCropsSkipped,
            format!(
                "{} box(es) outside their image produced no crop",
                summary.empty_crops_skipped
            ),
        ));
    }

    report.output = ConversionCounts {
        images: summary.files_written,
        categories: dataset.categories.len(),
        annotations: summary.files_written,
    };
}
