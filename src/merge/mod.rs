//! Merging several ImageNet folder trees into one.
//!
//! All sources must agree on the set of class names and the set of subsets.
//! Class order in the merged `data.yaml` follows the first source.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::conversion::{ensure_output_outside_sources, prepare_output_dir};
use crate::error::DsconvError;
use crate::ir::io_imagenet::{read_imagenet_dir, write_imagenet_dir};
use crate::ir::{Dataset, DatasetBuilder, Geometry, Image};

/// What a merge wrote.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub sources: usize,
    pub subsets: Vec<String>,
    pub classes: Vec<String>,
    pub images: usize,
}

/// Merges ImageNet datasets at `sources` into a fresh tree at `output`.
///
/// Fails before touching `output` when fewer than two sources are given,
/// a source cannot be read, or the class or subset sets differ. Two sources
/// providing the same `<subset>/<class>/<file>` is a collision.
pub fn merge_imagenet(
    sources: &[PathBuf],
    output: &Path,
    force: bool,
) -> Result<MergeSummary, DsconvError> {
    if sources.len() < 2 {
        return Err(DsconvError::invalid_options(format!(
            "merge needs at least two source datasets, got {}",
            sources.len()
        )));
    }
    let source_paths: Vec<&Path> = sources.iter().map(PathBuf::as_path).collect();
    ensure_output_outside_sources(output, &source_paths)?;
    if output.exists() && !force {
        return Err(DsconvError::OutputExists {
            path: output.to_path_buf(),
        });
    }

    let mut datasets = Vec::with_capacity(sources.len());
    for src in sources {
        if !src.is_dir() {
            return Err(DsconvError::InvalidDataset {
                path: src.clone(),
                message: "source dataset directory does not exist".to_string(),
            });
        }
        datasets.push((src.as_path(), read_imagenet_dir(src)?));
    }

    let (first_path, first) = &datasets[0];
    let first_names: BTreeSet<&str> = first.categories.iter().map(|c| c.name.as_str()).collect();
    let first_subsets: BTreeSet<&str> = first.subsets.iter().map(String::as_str).collect();

    for (path, dataset) in &datasets[1..] {
        let names: BTreeSet<&str> = dataset.categories.iter().map(|c| c.name.as_str()).collect();
        if names != first_names {
            return Err(DsconvError::ClassSetMismatch {
                left: first_path.display().to_string(),
                right: path.display().to_string(),
                message: format!("{:?} vs {:?}", first_names, names),
            });
        }
        let subsets: BTreeSet<&str> = dataset.subsets.iter().map(String::as_str).collect();
        if subsets != first_subsets {
            return Err(DsconvError::InvalidDataset {
                path: path.to_path_buf(),
                message: format!(
                    "subsets {:?} differ from {:?} in {}",
                    subsets,
                    first_subsets,
                    first_path.display()
                ),
            });
        }
    }

    let merged = merge_datasets(output, &datasets)?;

    prepare_output_dir(output, force)?;
    let written = write_imagenet_dir(output, &merged)?;

    log::info!(
        "Merged {} dataset(s) into {}: {} image(s)",
        sources.len(),
        output.display(),
        written.files_written
    );
    Ok(MergeSummary {
        sources: sources.len(),
        subsets: merged.subsets.clone(),
        classes: merged.categories.iter().map(|c| c.name.clone()).collect(),
        images: written.files_written,
    })
}

fn merge_datasets(output: &Path, datasets: &[(&Path, Dataset)]) -> Result<Dataset, DsconvError> {
    let (_, first) = &datasets[0];
    let mut builder = DatasetBuilder::new(output, 0);
    for subset in &first.subsets {
        builder.add_subset(subset.clone())?;
    }
    for category in &first.categories {
        builder.add_category(category.name.clone())?;
    }

    let mut placed: HashMap<(String, String, String), PathBuf> = HashMap::new();

    for (src, dataset) in datasets {
        let names = dataset.category_names();
        let classes: BTreeMap<_, &str> = dataset
            .annotations
            .iter()
            .filter_map(|ann| names.get(&ann.category_id).map(|name| (ann.image_id, *name)))
            .collect();

        for image in &dataset.images {
            let Some(class) = classes.get(&image.id).copied() else {
                continue;
            };
            let key = (image.subset.clone(), class.to_string(), image.file_name.clone());
            if let Some(previous) = placed.get(&key) {
                return Err(DsconvError::OutputCollision {
                    path: output.join(&key.0).join(&key.1).join(&key.2),
                    message: format!(
                        "provided by both {} and {}",
                        previous.display(),
                        src.display()
                    ),
                });
            }
            placed.insert(key, src.to_path_buf());

            let Some(category_id) = builder.category_id(class) else {
                continue;
            };
            let id = builder.next_image_id();
            let mut merged = Image::new(
                id,
                image.file_name.clone(),
                image.width,
                image.height,
                image.subset.clone(),
            );
            merged.source_path = image.source_path.clone();
            builder.add_image(merged)?;
            builder.add_annotation(id, category_id, Geometry::Tag, BTreeMap::new())?;
        }
    }

    Ok(builder.finish())
}
