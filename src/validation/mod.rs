//! Dataset invariant checks.
//!
//! Readers already reject most broken input while building, but a dataset
//! can also come out of a subset transform, so conversion re-checks the
//! invariants before any output is written:
//!
//! - unique image, annotation and category ids
//! - annotations reference existing images and categories
//! - category names unique, ids dense from the id base
//! - every image belongs to a declared subset
//! - geometry is finite, non-degenerate and inside its image

mod report;

pub use report::{IssueCode, IssueContext, Severity, ValidationIssue, ValidationReport};

use std::collections::{HashMap, HashSet};

use crate::error::DsconvError;
use crate::ir::{AnnotationId, CategoryId, Dataset, Geometry, ImageId, Rect};

/// Options for validation behavior.
#[derive(Clone, Debug, Default)]
pub struct ValidateOptions {
    /// If true, treat warnings as errors.
    pub strict: bool,
}

/// Pixel tolerance when checking geometry against image bounds.
const BOUNDS_TOLERANCE: f64 = 0.5;

/// Validates a dataset and returns a report of all issues found.
pub fn validate_dataset(dataset: &Dataset) -> ValidationReport {
    let mut report = ValidationReport::new();

    let image_ids: HashSet<ImageId> = dataset.images.iter().map(|i| i.id).collect();
    let category_ids: HashSet<CategoryId> = dataset.categories.iter().map(|c| c.id).collect();

    validate_subsets(dataset, &mut report);
    validate_images(dataset, &mut report);
    validate_categories(dataset, &mut report);
    validate_annotations(dataset, &image_ids, &category_ids, &mut report);

    report
}

/// Turns a report into an error when it fails under `opts`.
pub fn ensure_valid(
    report: ValidationReport,
    opts: &ValidateOptions,
) -> Result<ValidationReport, DsconvError> {
    let failed = if opts.strict {
        !report.is_clean()
    } else {
        !report.is_ok()
    };

    if failed {
        return Err(DsconvError::ValidationFailed {
            error_count: report.error_count(),
            warning_count: report.warning_count(),
            report,
        });
    }
    Ok(report)
}

fn validate_subsets(dataset: &Dataset, report: &mut ValidationReport) {
    let mut declared: HashSet<&str> = HashSet::new();
    for subset in &dataset.subsets {
        if !declared.insert(subset.as_str()) {
            report.add(ValidationIssue::error(
                IssueCode::DuplicateSubset,
                "Subset is declared more than once",
                IssueContext::Subset {
                    name: subset.clone(),
                },
            ));
            continue;
        }

        if dataset.images_in_subset(subset).next().is_none() {
            report.add(ValidationIssue::warning(
                IssueCode::EmptySubset,
                "Subset has no images",
                IssueContext::Subset {
                    name: subset.clone(),
                },
            ));
        }
    }
}

fn validate_images(dataset: &Dataset, report: &mut ValidationReport) {
    let mut seen_ids: HashMap<ImageId, usize> = HashMap::new();

    for (idx, image) in dataset.images.iter().enumerate() {
        let id = image.id.as_u64();

        if let Some(first_idx) = seen_ids.get(&image.id) {
            report.add(ValidationIssue::error(
                IssueCode::DuplicateImageId,
                format!(
                    "Duplicate image ID {} (first seen at index {})",
                    id, first_idx
                ),
                IssueContext::Image { id },
            ));
        } else {
            seen_ids.insert(image.id, idx);
        }

        if !dataset.has_subset(&image.subset) {
            report.add(ValidationIssue::error(
                IssueCode::UndeclaredSubset,
                format!("Image '{}' is in undeclared subset '{}'", image.file_name, image.subset),
                IssueContext::Image { id },
            ));
        }

        if image.width == 0 || image.height == 0 {
            report.add(ValidationIssue::error(
                IssueCode::InvalidImageDimensions,
                format!(
                    "Invalid dimensions {}x{} (must be positive)",
                    image.width, image.height
                ),
                IssueContext::Image { id },
            ));
        }

        if image.file_name.is_empty() {
            report.add(ValidationIssue::error(
                IssueCode::EmptyFileName,
                "Empty filename",
                IssueContext::Image { id },
            ));
        }
    }
}

fn validate_categories(dataset: &Dataset, report: &mut ValidationReport) {
    let mut seen_ids: HashMap<CategoryId, usize> = HashMap::new();
    let mut seen_names: HashMap<&str, CategoryId> = HashMap::new();

    for (idx, category) in dataset.categories.iter().enumerate() {
        let id = category.id.as_u64();

        if let Some(first_idx) = seen_ids.get(&category.id) {
            report.add(ValidationIssue::error(
                IssueCode::DuplicateCategoryId,
                format!(
                    "Duplicate category ID {} (first seen at index {})",
                    id, first_idx
                ),
                IssueContext::Category { id },
            ));
        } else {
            seen_ids.insert(category.id, idx);
        }

        if category.name.is_empty() {
            report.add(ValidationIssue::error(
                IssueCode::EmptyCategoryName,
                "Empty category name",
                IssueContext::Category { id },
            ));
        } else if let Some(first_id) = seen_names.get(category.name.as_str()) {
            report.add(ValidationIssue::error(
                IssueCode::DuplicateCategoryName,
                format!(
                    "Duplicate category name '{}' (also used by category {})",
                    category.name, first_id
                ),
                IssueContext::Category { id },
            ));
        } else {
            seen_names.insert(&category.name, category.id);
        }
    }

    let dense = dataset
        .categories
        .iter()
        .enumerate()
        .all(|(idx, cat)| cat.id.as_u64() == dataset.id_base + idx as u64);
    if !dense {
        report.add(ValidationIssue::warning(
            IssueCode::NonDenseCategoryIds,
            format!(
                "Category ids are not dense from {}; writers renumber them by position",
                dataset.id_base
            ),
            IssueContext::Dataset,
        ));
    }
}

fn validate_annotations(
    dataset: &Dataset,
    image_ids: &HashSet<ImageId>,
    category_ids: &HashSet<CategoryId>,
    report: &mut ValidationReport,
) {
    let mut seen_ids: HashMap<AnnotationId, usize> = HashMap::new();

    let image_dims: HashMap<ImageId, (u32, u32)> = dataset
        .images
        .iter()
        .map(|i| (i.id, (i.width, i.height)))
        .collect();

    for (idx, annotation) in dataset.annotations.iter().enumerate() {
        let id = annotation.id.as_u64();

        if let Some(first_idx) = seen_ids.get(&annotation.id) {
            report.add(ValidationIssue::error(
                IssueCode::DuplicateAnnotationId,
                format!(
                    "Duplicate annotation ID {} (first seen at index {})",
                    id, first_idx
                ),
                IssueContext::Annotation { id },
            ));
        } else {
            seen_ids.insert(annotation.id, idx);
        }

        if !image_ids.contains(&annotation.image_id) {
            report.add(ValidationIssue::error(
                IssueCode::MissingImageRef,
                format!("References non-existent image {}", annotation.image_id),
                IssueContext::Annotation { id },
            ));
        }

        if !category_ids.contains(&annotation.category_id) {
            report.add(ValidationIssue::error(
                IssueCode::MissingCategoryRef,
                format!(
                    "References non-existent category {}",
                    annotation.category_id
                ),
                IssueContext::Annotation { id },
            ));
        }

        let rect = match &annotation.geometry {
            Geometry::Tag => continue,
            Geometry::Rectangle(rect) => *rect,
            Geometry::Polygon { points } => {
                if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
                    report.add(ValidationIssue::error(
                        IssueCode::GeometryNotFinite,
                        "Polygon has non-finite coordinates",
                        IssueContext::Annotation { id },
                    ));
                    continue;
                }
                if points.len() < 3 {
                    report.add(ValidationIssue::error(
                        IssueCode::DegeneratePolygon,
                        format!("Polygon has {} point(s); at least 3 are required", points.len()),
                        IssueContext::Annotation { id },
                    ));
                    continue;
                }
                match annotation.geometry.bounding_rect() {
                    Some(rect) => rect,
                    None => continue,
                }
            }
        };

        check_rect(rect, annotation, &image_dims, report);
    }
}

fn check_rect(
    rect: Rect,
    annotation: &crate::ir::Annotation,
    image_dims: &HashMap<ImageId, (u32, u32)>,
    report: &mut ValidationReport,
) {
    let id = annotation.id.as_u64();

    if !rect.is_finite() {
        report.add(ValidationIssue::error(
            IssueCode::GeometryNotFinite,
            format!(
                "Non-finite box ({}, {}, {}, {})",
                rect.x, rect.y, rect.w, rect.h
            ),
            IssueContext::Annotation { id },
        ));
        return;
    }

    if matches!(annotation.geometry, Geometry::Rectangle(_)) && !rect.has_extent() {
        report.add(ValidationIssue::warning(
            IssueCode::DegenerateRectangle,
            format!("Zero or negative size {:.2}x{:.2}", rect.w, rect.h),
            IssueContext::Annotation { id },
        ));
    }

    if let Some((width, height)) = image_dims.get(&annotation.image_id) {
        let (w, h) = (*width as f64, *height as f64);
        let (x1, y1, x2, y2) = rect.to_xyxy();

        if x1.min(x2) < -BOUNDS_TOLERANCE
            || y1.min(y2) < -BOUNDS_TOLERANCE
            || x1.max(x2) > w + BOUNDS_TOLERANCE
            || y1.max(y2) > h + BOUNDS_TOLERANCE
        {
            report.add(ValidationIssue::warning(
                IssueCode::GeometryOutOfBounds,
                format!(
                    "Box ({:.1}, {:.1}, {:.1}, {:.1}) extends outside image bounds (0, 0, {}, {})",
                    x1, y1, x2, y2, width, height
                ),
                IssueContext::Annotation { id },
            ));
        }
    }
}
