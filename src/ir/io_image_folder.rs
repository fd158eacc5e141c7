//! Flat folder of unlabeled images.
//!
//! Used to bootstrap a YOLO dataset before any labelling has happened: every
//! image becomes an unannotated member of the `train` subset.

use std::path::Path;

use super::builder::DatasetBuilder;
use super::media::{collect_image_files, file_name_of, read_image_dimensions};
use super::model::{Dataset, Image};
use crate::error::DsconvError;

/// Subset every image is placed in before any resplit.
pub const DEFAULT_SUBSET: &str = "train";

/// Reads the image files directly inside `path` (no recursion).
///
/// `class_names` become the category table, in order; they only matter for
/// the `data.yaml` the YOLO writer emits.
pub fn read_image_folder(path: &Path, class_names: &[String]) -> Result<Dataset, DsconvError> {
    if !path.is_dir() {
        return Err(DsconvError::InvalidDataset {
            path: path.to_path_buf(),
            message: "image folder is not a directory".to_string(),
        });
    }

    let mut builder = DatasetBuilder::new(path, 0);
    builder.add_subset(DEFAULT_SUBSET)?;
    for name in class_names {
        builder.add_category(name.clone())?;
    }

    let files = collect_image_files(path, 1)?;
    if files.is_empty() {
        log::warn!("No image files found in {}", path.display());
    }

    for file in files {
        let (width, height) = read_image_dimensions(&file)?;
        let id = builder.next_image_id();
        builder.add_image(
            Image::new(id, file_name_of(&file)?, width, height, DEFAULT_SUBSET)
                .with_source_path(&file),
        )?;
    }

    let dataset = builder.finish();
    log::info!(
        "Read image folder: {} image(s), {} class name(s)",
        dataset.images.len(),
        dataset.categories.len()
    );
    Ok(dataset)
}
