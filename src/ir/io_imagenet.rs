//! ImageNet-style classification folders.
//!
//! ```text
//! <root>/<subset>/<class_name>/<image files>
//! <root>/data.yaml            # optional: names, nc, <subset> entries
//! ```
//!
//! Every image carries exactly one [`Geometry::Tag`] annotation for the class
//! directory it sits in. When writing from a geometry-bearing format, each
//! box is cropped into its own file, so the output holds one image per
//! annotation rather than one per source image.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::builder::DatasetBuilder;
use super::geometry::{Geometry, Rect};
use super::io_yolo::{write_data_yaml, DataYamlNames};
use super::media::{
    collect_image_files, copy_image, crop_image, file_name_of, read_image_dimensions, source_of,
    OutputPlan,
};
use super::model::{Annotation, Dataset, Image};
use crate::error::DsconvError;

const MANIFEST_NAMES: [&str; 2] = ["data.yaml", "data.yml"];

/// What [`write_imagenet_dir`] produced and what it had to leave out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImagenetWriteSummary {
    /// Files written (crops plus whole-image copies).
    pub files_written: usize,
    /// Source images skipped because they carry no annotation.
    pub unannotated_skipped: usize,
    /// Boxes skipped because they cover no pixel of the image.
    pub empty_crops_skipped: usize,
}

#[derive(Debug, Deserialize)]
struct ImagenetManifest {
    #[serde(default)]
    names: Option<DataYamlNames>,

    #[serde(default)]
    nc: Option<usize>,
}

/// Reads an ImageNet folder tree.
///
/// Subsets are the top-level directories in sorted order. Class order comes
/// from `data.yaml` `names` when present, otherwise from the sorted class
/// directory names.
pub fn read_imagenet_dir(path: &Path) -> Result<Dataset, DsconvError> {
    if !path.is_dir() {
        return Err(DsconvError::InvalidDataset {
            path: path.to_path_buf(),
            message: "dataset root is not a directory".to_string(),
        });
    }

    let manifest_names = read_manifest_names(path)?;
    let subset_dirs = top_level_subsets(path)?;

    let mut classes_per_subset: Vec<(String, PathBuf, BTreeSet<String>)> = Vec::new();
    for (subset, dir) in subset_dirs {
        let classes = class_directories(&dir)?;
        if let Some((first_subset, _, first_classes)) = classes_per_subset.first() {
            if *first_classes != classes {
                return Err(DsconvError::ClassSetMismatch {
                    left: dir.display().to_string(),
                    right: path.join(first_subset).display().to_string(),
                    message: format!(
                        "subset '{subset}' has classes {:?}, subset '{first_subset}' has {:?}",
                        classes, first_classes
                    ),
                });
            }
        }
        classes_per_subset.push((subset, dir, classes));
    }

    let dir_classes: BTreeSet<String> = classes_per_subset
        .first()
        .map(|(_, _, classes)| classes.clone())
        .unwrap_or_default();

    let class_order: Vec<String> = match manifest_names {
        Some(names) => {
            let listed: BTreeSet<String> = names.iter().cloned().collect();
            if !classes_per_subset.is_empty() && listed != dir_classes {
                return Err(DsconvError::ClassSetMismatch {
                    left: path.join("data.yaml").display().to_string(),
                    right: path.display().to_string(),
                    message: format!(
                        "data.yaml names {:?} do not match class directories {:?}",
                        listed, dir_classes
                    ),
                });
            }
            names
        }
        None => dir_classes.into_iter().collect(),
    };

    let mut builder = DatasetBuilder::new(path, 0);
    for name in &class_order {
        builder.add_category(name.clone())?;
    }

    for (subset, dir, _) in &classes_per_subset {
        builder.add_subset(subset.clone())?;
        let mut seen: HashMap<String, String> = HashMap::new();

        for class in &class_order {
            let class_dir = dir.join(class);
            let category_id =
                builder
                    .category_id(class)
                    .ok_or_else(|| DsconvError::InvalidDataset {
                        path: class_dir.clone(),
                        message: format!("class '{class}' is not registered"),
                    })?;

            for image_path in collect_image_files(&class_dir, 1)? {
                let file_name = file_name_of(&image_path)?;
                if let Some(other) = seen.insert(file_name.clone(), class.clone()) {
                    return Err(DsconvError::InvalidDataset {
                        path: image_path,
                        message: format!(
                            "file name '{file_name}' appears in classes '{other}' and '{class}' of subset '{subset}'"
                        ),
                    });
                }

                let (width, height) = read_image_dimensions(&image_path)?;
                let id = builder.next_image_id();
                builder.add_image(
                    Image::new(id, file_name, width, height, subset).with_source_path(&image_path),
                )?;
                builder.add_annotation(id, category_id, Geometry::Tag, BTreeMap::new())?;
            }
        }
    }

    let dataset = builder.finish();
    log::info!(
        "Read ImageNet dataset: {} subset(s), {} class(es), {} image(s)",
        dataset.subsets.len(),
        dataset.categories.len(),
        dataset.images.len()
    );
    Ok(dataset)
}

/// One file the ImageNet writer will produce.
enum PlannedFile<'a> {
    Copy {
        src: &'a Path,
        dst: PathBuf,
    },
    Crop {
        src: &'a Path,
        rect: Rect,
        dst: PathBuf,
        annotation: &'a Annotation,
        image: &'a Image,
    },
}

/// Writes an ImageNet folder tree plus `data.yaml`.
///
/// Every subset gets a directory for every class, even when empty. Output
/// names are planned up front: two sources (or two crops such as `a.jpg` and
/// `a.png` box 0) landing on one path fail with
/// [`DsconvError::OutputCollision`] before anything is written.
pub fn write_imagenet_dir(path: &Path, dataset: &Dataset) -> Result<ImagenetWriteSummary, DsconvError> {
    let names = dataset.category_names();
    let annotations_by_image = dataset.annotations_by_image();
    let mut summary = ImagenetWriteSummary::default();

    let mut plan = OutputPlan::new();
    let mut files = Vec::new();
    for subset in &dataset.subsets {
        let subset_dir = path.join(subset);
        for image in dataset.images_in_subset(subset) {
            let Some(annotations) = annotations_by_image.get(&image.id) else {
                log::warn!(
                    "Skipping image '{}' in subset '{subset}': no annotations",
                    image.file_name
                );
                summary.unannotated_skipped += 1;
                continue;
            };
            let src = source_of(image)?;

            for (idx, ann) in annotations.iter().enumerate() {
                let Some(class) = names.get(&ann.category_id) else {
                    continue;
                };
                let class_dir = subset_dir.join(class);

                match ann.geometry.bounding_rect() {
                    None => {
                        let dst = class_dir.join(&image.file_name);
                        if plan.claim_copy(dst.clone(), src)? {
                            files.push(PlannedFile::Copy { src, dst });
                        }
                    }
                    Some(rect) => {
                        let dst = class_dir.join(format!("{}_{idx}.jpg", image.stem()));
                        plan.claim_derived(dst.clone(), src)?;
                        files.push(PlannedFile::Crop {
                            src,
                            rect,
                            dst,
                            annotation: *ann,
                            image,
                        });
                    }
                }
            }
        }
    }

    for subset in &dataset.subsets {
        for category in &dataset.categories {
            fs::create_dir_all(path.join(subset).join(&category.name)).map_err(DsconvError::Io)?;
        }
    }

    for file in files {
        match file {
            PlannedFile::Copy { src, dst } => {
                copy_image(src, &dst)?;
                summary.files_written += 1;
            }
            PlannedFile::Crop {
                src,
                rect,
                dst,
                annotation,
                image,
            } => {
                if crop_image(src, &rect, &dst)? {
                    summary.files_written += 1;
                } else {
                    log::warn!(
                        "Skipping annotation {} on '{}': box has no pixels inside the image",
                        annotation.id,
                        image.file_name
                    );
                    summary.empty_crops_skipped += 1;
                }
            }
        }
    }

    let class_names: Vec<&str> = dataset.categories.iter().map(|c| c.name.as_str()).collect();
    write_data_yaml(path, &dataset.subsets, &class_names)?;
    Ok(summary)
}

/// Class names from `data.yaml`/`data.yml`, if the manifest exists and lists them.
pub(crate) fn read_manifest_names(root: &Path) -> Result<Option<Vec<String>>, DsconvError> {
    let Some(manifest_path) = MANIFEST_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|candidate| candidate.is_file())
    else {
        return Ok(None);
    };

    let text = fs::read_to_string(&manifest_path).map_err(DsconvError::Io)?;
    let manifest: ImagenetManifest =
        serde_yaml::from_str(&text).map_err(|source| DsconvError::YoloDataYamlParse {
            path: manifest_path.clone(),
            source,
        })?;

    let Some(names) = manifest.names.map(DataYamlNames::into_names) else {
        return Ok(None);
    };
    if let Some(nc) = manifest.nc {
        if nc != names.len() {
            return Err(DsconvError::YoloDataYamlInvalid {
                path: manifest_path,
                message: format!("nc is {nc} but {} name(s) are listed", names.len()),
            });
        }
    }
    Ok(Some(names))
}

/// `(subset, dir)` for each top-level directory, sorted by name.
pub(crate) fn top_level_subsets(root: &Path) -> Result<Vec<(String, PathBuf)>, DsconvError> {
    let mut subsets = Vec::new();
    for entry in fs::read_dir(root).map_err(DsconvError::Io)? {
        let entry_path = entry.map_err(DsconvError::Io)?.path();
        let name = file_name_of(&entry_path)?;

        if entry_path.is_dir() {
            subsets.push((name, entry_path));
        } else if !MANIFEST_NAMES.contains(&name.as_str()) {
            return Err(DsconvError::InvalidDataset {
                path: entry_path,
                message: "unexpected file at dataset root; expected subset directories only"
                    .to_string(),
            });
        }
    }
    subsets.sort();
    Ok(subsets)
}

/// Names of the class directories of one subset. Stray files are an error.
pub(crate) fn class_directories(subset_dir: &Path) -> Result<BTreeSet<String>, DsconvError> {
    let mut classes = BTreeSet::new();
    for entry in fs::read_dir(subset_dir).map_err(DsconvError::Io)? {
        let entry_path = entry.map_err(DsconvError::Io)?.path();
        if !entry_path.is_dir() {
            return Err(DsconvError::InvalidDataset {
                path: entry_path,
                message: "unexpected file in subset directory; expected class directories only"
                    .to_string(),
            });
        }
        classes.insert(file_name_of(&entry_path)?);
    }
    Ok(classes)
}
