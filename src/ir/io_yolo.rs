//! Ultralytics-style YOLO reader and writer.
//!
//! A YOLO dataset is indexed by `data.yaml`:
//!
//! ```yaml
//! train: ./images/train      # directory of images, or
//! val: ./val.txt             # a .txt file listing image paths
//! test: ./images/test        # optional
//! nc: 2
//! names: {0: cat, 1: dog}    # or a plain list
//! ```
//!
//! Each image has a label file at the same relative location with the path
//! component `images` replaced by `labels` and the extension replaced by
//! `.txt`. Label lines are `class xc yc w h` with coordinates normalized to
//! the image size.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use super::builder::DatasetBuilder;
use super::geometry::{Geometry, Rect};
use super::media::{
    collect_image_files, copy_image, file_name_of, read_image_dimensions, require_file, source_of,
    OutputPlan,
};
use super::model::{Dataset, Image};
use crate::error::DsconvError;

/// Subset keys accepted in `data.yaml`, in the order they are read.
pub const YOLO_SUBSETS: [&str; 3] = ["train", "val", "test"];
const REQUIRED_SUBSETS: [&str; 2] = ["train", "val"];
const LABEL_EXTENSION: &str = "txt";
const DATA_YAML_NAMES: [&str; 2] = ["data.yaml", "data.yml"];

/// Options for [`read_yolo_dir`].
#[derive(Clone, Copy, Debug, Default)]
pub struct YoloReadOptions {
    /// Drop images whose label file is missing instead of failing.
    pub skip_missing: bool,
}

/// Read a YOLO dataset directory into the canonical model.
pub fn read_yolo_dir(path: &Path, options: &YoloReadOptions) -> Result<Dataset, DsconvError> {
    let yaml_path = DATA_YAML_NAMES
        .iter()
        .map(|name| path.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| DsconvError::InvalidDataset {
            path: path.to_path_buf(),
            message: "expected 'data.yaml' at directory root".to_string(),
        })?;

    let data_yaml = read_data_yaml(&yaml_path)?;
    log::info!(
        "Read {}: {} class(es), subsets {:?}",
        yaml_path.display(),
        data_yaml.names.len(),
        data_yaml.subsets.iter().map(|(s, _)| s).collect::<Vec<_>>()
    );

    let mut builder = DatasetBuilder::new(path, 0);
    for name in &data_yaml.names {
        builder.add_category(name.clone())?;
    }

    let mut skipped = 0usize;
    for (subset, source) in &data_yaml.subsets {
        builder.add_subset(subset.clone())?;
        let image_paths = subset_image_paths(path, &yaml_path, subset, source)?;
        if image_paths.is_empty() {
            log::warn!("YOLO subset '{subset}' has no images");
        }

        for image_path in image_paths {
            require_file(&image_path)?;
            let label_path = label_path_for(&image_path).ok_or_else(|| {
                DsconvError::InvalidDataset {
                    path: image_path.clone(),
                    message: "image path has no 'images' component to map to 'labels'"
                        .to_string(),
                }
            })?;

            if !label_path.is_file() {
                if options.skip_missing {
                    log::warn!(
                        "Skipping {}: label file {} not found",
                        image_path.display(),
                        label_path.display()
                    );
                    skipped += 1;
                    continue;
                }
                return Err(DsconvError::YoloLabelNotFound {
                    image_path,
                    label_path,
                });
            }

            let (width, height) = read_image_dimensions(&image_path)?;
            let id = builder.next_image_id();
            let image = Image::new(id, file_name_of(&image_path)?, width, height, subset)
                .with_source_path(&image_path);
            builder.add_image(image)?;

            let content = fs::read_to_string(&label_path).map_err(DsconvError::Io)?;
            for (line_idx, line) in content.lines().enumerate() {
                let line_num = line_idx + 1;
                let Some(row) = parse_label_line(line, &label_path, line_num)? else {
                    continue;
                };

                if row.class_id >= data_yaml.names.len() {
                    return Err(DsconvError::YoloLabelParse {
                        path: label_path.clone(),
                        line: line_num,
                        message: format!(
                            "class_id {} is out of range for {} class(es)",
                            row.class_id,
                            data_yaml.names.len()
                        ),
                    });
                }

                let category_id = builder.category_id(&data_yaml.names[row.class_id]).ok_or_else(
                    || DsconvError::YoloLabelParse {
                        path: label_path.clone(),
                        line: line_num,
                        message: format!("class_id {} has no category", row.class_id),
                    },
                )?;
                let rect = Rect::from_yolo(row.cx, row.cy, row.w, row.h, width, height);
                builder.add_annotation(id, category_id, Geometry::Rectangle(rect), BTreeMap::new())?;
            }
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} image(s) without label files");
    }

    let dataset = builder.finish();
    log::info!(
        "Read YOLO dataset: {} subset(s), {} image(s), {} annotation(s)",
        dataset.subsets.len(),
        dataset.images.len(),
        dataset.annotations.len()
    );
    Ok(dataset)
}

/// Write a dataset as a YOLO directory.
///
/// Creates `images/<subset>/` and `labels/<subset>/`, copies every image,
/// writes one label file per image and a `data.yaml`. Polygons are written as
/// their bounding box; tags have no box and are not written. Two images that
/// would share an image or label file in one subset fail with
/// [`DsconvError::OutputCollision`] before anything is written.
pub fn write_yolo_dir(path: &Path, dataset: &Dataset) -> Result<(), DsconvError> {
    let positions = dataset.category_positions();
    let annotations_by_image = dataset.annotations_by_image();

    let mut plan = OutputPlan::new();
    let mut planned = Vec::with_capacity(dataset.images.len());
    for subset in &dataset.subsets {
        if !YOLO_SUBSETS.contains(&subset.as_str()) {
            log::warn!("Subset '{subset}' is not one of train/val/test; YOLO tools may ignore it");
        }

        let images_dir = path.join("images").join(subset);
        let labels_dir = path.join("labels").join(subset);
        for image in dataset.images_in_subset(subset) {
            let src = source_of(image)?;
            let image_dst = images_dir.join(&image.file_name);
            let copy = plan.claim_copy(image_dst.clone(), src)?;
            let label_path =
                labels_dir.join(Path::new(&image.file_name).with_extension(LABEL_EXTENSION));
            plan.claim_derived(label_path.clone(), src)?;
            planned.push((image, src, copy.then_some(image_dst), label_path));
        }
    }

    for subset in &dataset.subsets {
        fs::create_dir_all(path.join("images").join(subset)).map_err(DsconvError::Io)?;
        fs::create_dir_all(path.join("labels").join(subset)).map_err(DsconvError::Io)?;
    }

    for (image, src, image_dst, label_path) in planned {
        if let Some(image_dst) = image_dst {
            copy_image(src, &image_dst)?;
        }

        let mut label_file = fs::File::create(&label_path).map_err(DsconvError::Io)?;
        for ann in annotations_by_image.get(&image.id).into_iter().flatten() {
            let Some(rect) = ann.geometry.bounding_rect() else {
                continue;
            };
            let Some(&class_id) = positions.get(&ann.category_id) else {
                continue;
            };
            let (cx, cy, w, h) = rect.to_yolo(image.width, image.height);
            writeln!(label_file, "{class_id} {cx:.6} {cy:.6} {w:.6} {h:.6}")
                .map_err(DsconvError::Io)?;
        }
    }

    let names: Vec<&str> = dataset.categories.iter().map(|c| c.name.as_str()).collect();
    write_data_yaml(path, &dataset.subsets, &names)
}

/// Parsed and validated `data.yaml`.
#[derive(Debug)]
struct YoloDataYaml {
    names: Vec<String>,
    /// `(subset, relative source)` in `train`, `val`, `test` order.
    subsets: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct RawDataYaml {
    names: DataYamlNames,

    #[serde(default)]
    nc: Option<usize>,

    /// Dataset root override used by Ultralytics; accepted and ignored.
    #[serde(default)]
    #[allow(dead_code)]
    path: Option<serde_yaml::Value>,

    #[serde(flatten)]
    rest: BTreeMap<String, serde_yaml::Value>,
}

/// `names:` as a list or as an `id: name` mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DataYamlNames {
    Sequence(Vec<String>),
    Mapping(BTreeMap<usize, String>),
}

impl DataYamlNames {
    /// Names in class-id order (mapping entries sorted by key).
    pub(crate) fn into_names(self) -> Vec<String> {
        match self {
            DataYamlNames::Sequence(names) => names,
            DataYamlNames::Mapping(mapping) => mapping.into_values().collect(),
        }
    }
}

fn read_data_yaml(path: &Path) -> Result<YoloDataYaml, DsconvError> {
    let data = fs::read_to_string(path).map_err(DsconvError::Io)?;
    let raw: RawDataYaml =
        serde_yaml::from_str(&data).map_err(|source| DsconvError::YoloDataYamlParse {
            path: path.to_path_buf(),
            source,
        })?;
    let invalid = |message: String| DsconvError::YoloDataYamlInvalid {
        path: path.to_path_buf(),
        message,
    };

    let names = raw.names.into_names();
    if let Some(nc) = raw.nc {
        if nc != names.len() {
            return Err(invalid(format!(
                "nc is {nc} but {} name(s) are listed",
                names.len()
            )));
        }
    }

    if let Some(unknown) = raw
        .rest
        .keys()
        .find(|key| !YOLO_SUBSETS.contains(&key.as_str()))
    {
        return Err(invalid(format!(
            "unsupported subset key '{unknown}'; only train, val and test are allowed"
        )));
    }
    for required in REQUIRED_SUBSETS {
        if !raw.rest.contains_key(required) {
            return Err(invalid(format!("missing required subset key '{required}'")));
        }
    }

    let mut subsets = Vec::new();
    for subset in YOLO_SUBSETS {
        let Some(value) = raw.rest.get(subset) else {
            continue;
        };
        let source = value
            .as_str()
            .ok_or_else(|| invalid(format!("subset '{subset}' must be a relative path string")))?;
        if Path::new(source).is_absolute() {
            return Err(invalid(format!(
                "subset '{subset}' path '{source}' is absolute; only relative paths are supported"
            )));
        }
        subsets.push((subset.to_string(), source.to_string()));
    }

    Ok(YoloDataYaml { names, subsets })
}

/// Image paths of one subset, from a directory or from a `.txt` list.
fn subset_image_paths(
    root: &Path,
    yaml_path: &Path,
    subset: &str,
    source: &str,
) -> Result<Vec<PathBuf>, DsconvError> {
    let target = root.join(source);

    if source.ends_with(".txt") {
        if !target.is_file() {
            return Err(DsconvError::YoloDataYamlInvalid {
                path: yaml_path.to_path_buf(),
                message: format!("subset '{subset}' list file '{source}' does not exist"),
            });
        }
        let content = fs::read_to_string(&target).map_err(DsconvError::Io)?;
        let mut paths = Vec::new();
        for (line_idx, line) in content.lines().enumerate() {
            let entry = line.trim();
            if entry.is_empty() {
                continue;
            }
            if Path::new(entry).is_absolute() {
                return Err(DsconvError::InvalidDataset {
                    path: target.clone(),
                    message: format!("line {}: image path '{entry}' is absolute", line_idx + 1),
                });
            }
            paths.push(root.join(entry));
        }
        return Ok(paths);
    }

    if !target.is_dir() {
        return Err(DsconvError::YoloDataYamlInvalid {
            path: yaml_path.to_path_buf(),
            message: format!("subset '{subset}' directory '{source}' does not exist"),
        });
    }
    collect_image_files(&target, 1)
}

/// Label file of an image: last `images` component -> `labels`, extension -> `.txt`.
fn label_path_for(image_path: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = image_path.components().collect();
    let images_idx = components
        .iter()
        .rposition(|c| c.as_os_str() == "images")?;

    let mut label_path = PathBuf::new();
    for (idx, component) in components.iter().enumerate() {
        if idx == images_idx {
            label_path.push("labels");
        } else {
            label_path.push(component.as_os_str());
        }
    }
    label_path.set_extension(LABEL_EXTENSION);
    Some(label_path)
}

/// Writes `data.yaml` with `<subset>: ./images/<subset>` entries, `nc` and
/// an `id: name` mapping. ImageNet outputs use the same manifest.
pub(crate) fn write_data_yaml<S: AsRef<str>, N: AsRef<str>>(
    output_root: &Path,
    subsets: &[S],
    names: &[N],
) -> Result<(), DsconvError> {
    let path = output_root.join("data.yaml");

    let mut name_map = serde_yaml::Mapping::new();
    for (idx, name) in names.iter().enumerate() {
        name_map.insert(
            serde_yaml::Value::from(idx as u64),
            serde_yaml::Value::from(name.as_ref()),
        );
    }

    let mut yaml = serde_yaml::Mapping::new();
    for subset in subsets {
        let subset = subset.as_ref();
        yaml.insert(
            serde_yaml::Value::from(subset),
            serde_yaml::Value::from(format!("./images/{subset}")),
        );
    }
    yaml.insert(
        serde_yaml::Value::from("nc"),
        serde_yaml::Value::from(names.len() as u64),
    );
    yaml.insert(
        serde_yaml::Value::from("names"),
        serde_yaml::Value::Mapping(name_map),
    );

    let text = serde_yaml::to_string(&yaml).map_err(|source| DsconvError::YoloDataYamlWrite {
        path: path.clone(),
        source,
    })?;
    log::info!("Writing {}", path.display());
    fs::write(&path, text).map_err(DsconvError::Io)
}

#[derive(Debug, PartialEq)]
struct YoloLabelRow {
    class_id: usize,
    cx: f64,
    cy: f64,
    w: f64,
    h: f64,
}

fn parse_label_line(
    line: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<Option<YoloLabelRow>, DsconvError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // Take at most 6 tokens so pathological inputs do not allocate unbounded memory.
    let tokens: Vec<&str> = trimmed.split_whitespace().take(6).collect();

    if tokens.len() < 5 {
        return Err(DsconvError::YoloLabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("expected 5 tokens, found {}", tokens.len()),
        });
    }

    if tokens.len() > 5 {
        return Err(DsconvError::YoloLabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: "segmentation/pose rows are not supported; expected 'class xc yc w h'"
                .to_string(),
        });
    }

    let class_id = tokens[0]
        .parse::<usize>()
        .map_err(|_| DsconvError::YoloLabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!(
                "invalid class_id '{}'; expected non-negative integer",
                tokens[0]
            ),
        })?;

    let cx = parse_f64_token(tokens[1], "x_center", file_path, line_num)?;
    let cy = parse_f64_token(tokens[2], "y_center", file_path, line_num)?;
    let w = parse_f64_token(tokens[3], "width", file_path, line_num)?;
    let h = parse_f64_token(tokens[4], "height", file_path, line_num)?;

    Ok(Some(YoloLabelRow {
        class_id,
        cx,
        cy,
        w,
        h,
    }))
}

/// Fuzz-only entrypoint for YOLO single-line parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_line(input: &str) -> Result<(), DsconvError> {
    let _ = parse_label_line(input, Path::new("<fuzz>"), 1)?;
    Ok(())
}

fn parse_f64_token(
    raw: &str,
    field_name: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<f64, DsconvError> {
    raw.parse::<f64>()
        .map_err(|_| DsconvError::YoloLabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("invalid {field_name} '{raw}'; expected floating-point number"),
        })
}
