//! COCO JSON format reader and writer.
//!
//! A COCO dataset directory holds one annotation file per subset:
//!
//! ```text
//! <root>/annotations/instances_<subset>.json
//! <root>/images/<file_name>
//! ```
//!
//! COCO bounding boxes use `[x, y, width, height]` with `(x, y)` the top-left
//! corner in absolute pixels, which is exactly the canonical [`Rect`].
//!
//! # Ids
//!
//! Ids inside a COCO file are only meaningful within that file, so the reader
//! assigns dataset-unique image ids and the writer numbers images and
//! annotations from 1 in every file it emits. Category ids are 1-based and
//! shared by all files of one run.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::builder::DatasetBuilder;
use super::geometry::{Geometry, Rect};
use super::media::{copy_image, source_of, OutputPlan};
use super::model::{Dataset, Image};
use super::{CategoryId, ImageId};
use crate::error::DsconvError;

const ANNOTATION_PREFIX: &str = "instances_";
const COCO_ID_BASE: u64 = 1;

// ============================================================================
// COCO Schema Types (internal to this module)
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CocoDataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info: Option<CocoInfo>,

    #[serde(default)]
    licenses: Vec<serde_json::Value>,

    images: Vec<CocoImage>,

    #[serde(default)]
    annotations: Vec<CocoAnnotation>,

    categories: Vec<CocoCategory>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CocoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    contributor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_created: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoImage {
    id: u64,
    width: u32,
    height: u32,
    file_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    supercategory: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: u64,

    /// `[x, y, width, height]`, top-left anchored.
    bbox: [f64; 4],

    #[serde(default, skip_serializing_if = "Option::is_none")]
    area: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    iscrowd: Option<u8>,

    /// Polygons or RLE. Accepted but not interpreted.
    #[serde(default)]
    segmentation: serde_json::Value,
}

// ============================================================================
// Public API
// ============================================================================

/// Reads a COCO dataset directory (`annotations/instances_*.json` + `images/`).
///
/// Subsets are taken from the annotation file names in sorted order. The
/// first file's categories define the category table for every subset.
pub fn read_coco_dir(path: &Path) -> Result<Dataset, DsconvError> {
    let annotations_dir = path.join("annotations");
    let images_dir = path.join("images");
    for required in [&annotations_dir, &images_dir] {
        if !required.is_dir() {
            return Err(DsconvError::InvalidDataset {
                path: path.to_path_buf(),
                message: format!(
                    "expected '{}' directory",
                    required.file_name().and_then(|n| n.to_str()).unwrap_or("")
                ),
            });
        }
    }

    let files = annotation_files(&annotations_dir)?;
    if files.is_empty() {
        return Err(DsconvError::InvalidDataset {
            path: annotations_dir,
            message: format!("no '{ANNOTATION_PREFIX}*.json' files found"),
        });
    }

    let mut documents = Vec::with_capacity(files.len());
    for (subset, file) in files {
        log::info!("Reading {}", file.display());
        let reader = BufReader::new(File::open(&file).map_err(DsconvError::Io)?);
        let coco: CocoDataset =
            serde_json::from_reader(reader).map_err(|source| DsconvError::CocoJsonParse {
                path: file.clone(),
                source,
            })?;
        documents.push((subset, file, coco));
    }

    let mut builder = DatasetBuilder::new(path, COCO_ID_BASE);
    let categories = match documents.first() {
        Some((_, file, first)) => register_categories(&mut builder, file, &first.categories)?,
        None => HashMap::new(),
    };

    let mut dropped = 0usize;
    for (subset, file, coco) in documents {
        builder.add_subset(subset.clone())?;
        dropped += add_subset_content(
            &mut builder,
            &file,
            &subset,
            coco,
            &categories,
            Some(&images_dir),
        )?;
    }

    if dropped > 0 {
        log::warn!("Dropped {dropped} COCO annotation(s) referencing unknown images");
    }

    let dataset = builder.finish();
    log::info!(
        "Read COCO dataset: {} subset(s), {} categories, {} image(s), {} annotation(s)",
        dataset.subsets.len(),
        dataset.categories.len(),
        dataset.images.len(),
        dataset.annotations.len()
    );
    Ok(dataset)
}

/// Writes one `instances_<subset>.json` per subset and copies images flat
/// into `images/`.
pub fn write_coco_dir(path: &Path, dataset: &Dataset) -> Result<(), DsconvError> {
    let annotations_dir = path.join("annotations");
    let images_dir = path.join("images");

    let mut plan = OutputPlan::new();
    let mut copies = Vec::new();
    for image in &dataset.images {
        let src = source_of(image)?;
        let dst = images_dir.join(&image.file_name);
        if plan.claim_copy(dst.clone(), src)? {
            copies.push((src, dst));
        }
    }

    fs::create_dir_all(&annotations_dir).map_err(DsconvError::Io)?;
    fs::create_dir_all(&images_dir).map_err(DsconvError::Io)?;
    for (src, dst) in copies {
        copy_image(src, &dst)?;
    }

    let info = coco_info(dataset);
    for subset in &dataset.subsets {
        let coco = build_subset(dataset, subset, Some(info.clone()));
        let out_file = annotations_dir.join(format!("{ANNOTATION_PREFIX}{subset}.json"));
        log::info!("Writing {}", out_file.display());

        let writer = BufWriter::new(File::create(&out_file).map_err(DsconvError::Io)?);
        serde_json::to_writer_pretty(writer, &coco).map_err(|source| {
            DsconvError::CocoJsonWrite {
                path: out_file.clone(),
                source,
            }
        })?;
    }

    Ok(())
}

/// Parses a single COCO JSON document into a one-subset (`default`) dataset.
///
/// Image files are not checked.
pub fn from_coco_str(json: &str) -> Result<Dataset, DsconvError> {
    let coco: CocoDataset =
        serde_json::from_str(json).map_err(|source| DsconvError::CocoJsonParse {
            path: PathBuf::from("<string>"),
            source,
        })?;
    coco_document_to_dataset(coco, Path::new("<string>"))
}

/// Byte-slice variant of [`from_coco_str`].
pub fn from_coco_slice(bytes: &[u8]) -> Result<Dataset, DsconvError> {
    let coco: CocoDataset =
        serde_json::from_slice(bytes).map_err(|source| DsconvError::CocoJsonParse {
            path: PathBuf::from("<bytes>"),
            source,
        })?;
    coco_document_to_dataset(coco, Path::new("<bytes>"))
}

/// Serializes one subset of a dataset to a COCO JSON string.
pub fn to_coco_string(dataset: &Dataset, subset: &str) -> Result<String, DsconvError> {
    let coco = build_subset(dataset, subset, None);
    serde_json::to_string_pretty(&coco).map_err(|source| DsconvError::CocoJsonWrite {
        path: PathBuf::from(format!("{ANNOTATION_PREFIX}{subset}.json")),
        source,
    })
}

// ============================================================================
// Conversion: COCO -> canonical
// ============================================================================

/// `(subset, file)` for every `instances_<subset>.json`, sorted by file name.
fn annotation_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, DsconvError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(DsconvError::Io)? {
        let file = entry.map_err(DsconvError::Io)?.path();
        if !file.is_file() || file.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(subset) = stem.strip_prefix(ANNOTATION_PREFIX) {
            if subset.is_empty() {
                return Err(DsconvError::InvalidDataset {
                    path: file.clone(),
                    message: "annotation file name has an empty subset".to_string(),
                });
            }
            files.push((subset.to_string(), file));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Adds categories in ascending original-id order, returning original -> new ids.
fn register_categories(
    builder: &mut DatasetBuilder,
    file: &Path,
    categories: &[CocoCategory],
) -> Result<HashMap<u64, CategoryId>, DsconvError> {
    let mut sorted: Vec<&CocoCategory> = categories.iter().collect();
    sorted.sort_by_key(|c| c.id);

    let mut table = HashMap::new();
    for cat in sorted {
        let id = builder.add_category(cat.name.clone())?;
        if table.insert(cat.id, id).is_some() {
            return Err(DsconvError::InvalidDataset {
                path: file.to_path_buf(),
                message: format!("duplicate category id {}", cat.id),
            });
        }
    }
    Ok(table)
}

/// Adds one file's images and annotations. Returns the number of dropped
/// annotations whose image is unknown.
fn add_subset_content(
    builder: &mut DatasetBuilder,
    file: &Path,
    subset: &str,
    coco: CocoDataset,
    categories: &HashMap<u64, CategoryId>,
    images_dir: Option<&Path>,
) -> Result<usize, DsconvError> {
    let mut image_ids: HashMap<u64, ImageId> = HashMap::new();
    for img in coco.images {
        if image_ids.contains_key(&img.id) {
            return Err(DsconvError::InvalidDataset {
                path: file.to_path_buf(),
                message: format!("duplicate image id {}", img.id),
            });
        }

        let id = builder.next_image_id();
        let mut image = Image::new(id, img.file_name.clone(), img.width, img.height, subset);
        if let Some(dir) = images_dir {
            image = image.with_source_path(locate_image(dir, subset, &img.file_name)?);
        }
        builder.add_image(image)?;
        image_ids.insert(img.id, id);
    }

    let mut dropped = 0usize;
    for ann in coco.annotations {
        let Some(&image_id) = image_ids.get(&ann.image_id) else {
            log::warn!(
                "{}: annotation {} references unknown image id {}; skipping",
                file.display(),
                ann.id,
                ann.image_id
            );
            dropped += 1;
            continue;
        };
        let category_id =
            categories
                .get(&ann.category_id)
                .copied()
                .ok_or_else(|| DsconvError::InvalidDataset {
                    path: file.to_path_buf(),
                    message: format!(
                        "annotation {} references unknown category id {}",
                        ann.id, ann.category_id
                    ),
                })?;

        let [x, y, w, h] = ann.bbox;
        builder.add_annotation(
            image_id,
            category_id,
            Geometry::Rectangle(Rect::new(x, y, w, h)),
            BTreeMap::new(),
        )?;
        if ann.iscrowd == Some(1) {
            builder.mark_last_crowd();
        }
    }

    Ok(dropped)
}

/// `images/<file_name>`, falling back to `images/<subset>/<file_name>`.
fn locate_image(images_dir: &Path, subset: &str, file_name: &str) -> Result<PathBuf, DsconvError> {
    let flat = images_dir.join(file_name);
    if flat.is_file() {
        return Ok(flat);
    }
    let nested = images_dir.join(subset).join(file_name);
    if nested.is_file() {
        return Ok(nested);
    }
    Err(DsconvError::MissingImageFile { path: flat })
}

fn coco_document_to_dataset(coco: CocoDataset, path: &Path) -> Result<Dataset, DsconvError> {
    let mut builder = DatasetBuilder::new(path, COCO_ID_BASE);
    builder.add_subset("default")?;
    let categories = register_categories(&mut builder, path, &coco.categories)?;
    add_subset_content(&mut builder, path, "default", coco, &categories, None)?;
    Ok(builder.finish())
}

// ============================================================================
// Conversion: canonical -> COCO
// ============================================================================

fn build_subset(dataset: &Dataset, subset: &str, info: Option<CocoInfo>) -> CocoDataset {
    let positions = dataset.category_positions();
    let annotations_by_image = dataset.annotations_by_image();

    let categories = dataset
        .categories
        .iter()
        .enumerate()
        .map(|(idx, cat)| CocoCategory {
            id: idx as u64 + COCO_ID_BASE,
            name: cat.name.clone(),
            supercategory: None,
        })
        .collect();

    let mut images = Vec::new();
    let mut annotations = Vec::new();
    for (idx, image) in dataset.images_in_subset(subset).enumerate() {
        let image_id = idx as u64 + COCO_ID_BASE;
        images.push(CocoImage {
            id: image_id,
            width: image.width,
            height: image.height,
            file_name: image.file_name.clone(),
        });

        for ann in annotations_by_image.get(&image.id).into_iter().flatten() {
            let Some(rect) = ann.geometry.bounding_rect() else {
                continue;
            };
            let Some(&position) = positions.get(&ann.category_id) else {
                continue;
            };
            annotations.push(CocoAnnotation {
                id: annotations.len() as u64 + COCO_ID_BASE,
                image_id,
                category_id: position as u64 + COCO_ID_BASE,
                bbox: [rect.x, rect.y, rect.w, rect.h],
                area: Some(rect.area()),
                iscrowd: Some(0),
                segmentation: serde_json::Value::Array(Vec::new()),
            });
        }
    }

    CocoDataset {
        info,
        licenses: Vec::new(),
        images,
        annotations,
        categories,
    }
}

fn coco_info(dataset: &Dataset) -> CocoInfo {
    let now = chrono::Local::now();
    CocoInfo {
        year: Some(chrono::Datelike::year(&now)),
        version: Some("1.0".to_string()),
        description: Some(
            dataset
                .name
                .clone()
                .unwrap_or_else(|| "Converted by dsconv".to_string()),
        ),
        contributor: Some(String::new()),
        url: Some(String::new()),
        date_created: Some(now.format("%Y/%m/%d").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::media::test_support::write_bmp;
    use crate::ir::{Annotation, Category, Point};

    const SAMPLE: &str = r#"{
        "images": [
            {"id": 10, "width": 100, "height": 80, "file_name": "a.jpg"},
            {"id": 20, "width": 50, "height": 50, "file_name": "b.jpg"}
        ],
        "annotations": [
            {"id": 1, "image_id": 10, "category_id": 7, "bbox": [1.5, 2.0, 10.0, 20.0]},
            {"id": 2, "image_id": 99, "category_id": 7, "bbox": [0, 0, 1, 1]},
            {"id": 3, "image_id": 20, "category_id": 3, "bbox": [5, 5, 5, 5], "iscrowd": 1}
        ],
        "categories": [
            {"id": 7, "name": "dog"},
            {"id": 3, "name": "cat"}
        ]
    }"#;

    #[test]
    fn parse_densifies_categories_and_drops_dangling_annotations() {
        let dataset = from_coco_str(SAMPLE).expect("parse");

        assert_eq!(dataset.id_base, 1);
        assert_eq!(
            dataset.categories,
            vec![Category::new(1u64, "cat"), Category::new(2u64, "dog")]
        );
        assert_eq!(dataset.images.len(), 2);
        assert_eq!(dataset.annotations.len(), 2, "dangling image_id is dropped");
        assert_eq!(
            dataset.annotations[0].geometry,
            Geometry::Rectangle(Rect::new(1.5, 2.0, 10.0, 20.0))
        );
        assert_eq!(dataset.annotations[0].category_id, CategoryId::new(2));
        assert!(dataset.annotations[1].iscrowd);
    }

    #[test]
    fn parse_rejects_unknown_category() {
        let json = SAMPLE.replace("\"category_id\": 3", "\"category_id\": 4");
        let err = from_coco_str(&json).unwrap_err();
        assert!(err.to_string().contains("unknown category id 4"));
    }

    #[test]
    fn parse_reports_malformed_json() {
        let err = from_coco_str("{\"images\": [").unwrap_err();
        assert!(matches!(err, DsconvError::CocoJsonParse { .. }));
    }

    #[test]
    fn subset_ids_start_at_one_and_polygons_become_boxes() {
        let dataset = Dataset {
            subsets: vec!["Train".into(), "Test".into()],
            categories: vec![Category::new(0u64, "cat")],
            images: vec![
                Image::new(0u64, "a.jpg", 100, 100, "Test"),
                Image::new(1u64, "b.jpg", 100, 100, "Train"),
            ],
            annotations: vec![
                Annotation::new(0u64, 1u64, 0u64, Geometry::Tag),
                Annotation::new(
                    1u64,
                    1u64,
                    0u64,
                    Geometry::Polygon {
                        points: vec![
                            Point::new(10.0, 10.0),
                            Point::new(30.0, 10.0),
                            Point::new(20.0, 40.0),
                        ],
                    },
                ),
            ],
            ..Default::default()
        };

        let json = to_coco_string(&dataset, "Train").expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["images"][0]["id"], 1);
        assert_eq!(value["categories"][0]["id"], 1);
        assert_eq!(value["annotations"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["annotations"][0]["image_id"], 1);
        assert_eq!(
            value["annotations"][0]["bbox"],
            serde_json::json!([10.0, 10.0, 20.0, 30.0])
        );
        assert_eq!(value["annotations"][0]["area"], 600.0);
        assert_eq!(value["annotations"][0]["iscrowd"], 0);
        assert_eq!(value["annotations"][0]["segmentation"], serde_json::json!([]));
    }

    #[test]
    fn read_dir_finds_nested_images_and_assigns_unique_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("annotations")).expect("mkdir");
        let doc = r#"{"images":[{"id":1,"width":4,"height":4,"file_name":"x.bmp"}],
                      "annotations":[],"categories":[{"id":1,"name":"cat"}]}"#;
        fs::write(root.join("annotations/instances_train.json"), doc).expect("write");
        fs::write(root.join("annotations/instances_val.json"), doc).expect("write");
        write_bmp(&root.join("images/train/x.bmp"), 4, 4);
        write_bmp(&root.join("images/val/x.bmp"), 4, 4);

        let dataset = read_coco_dir(root).expect("read");
        assert_eq!(dataset.subsets, vec!["train", "val"]);
        assert_eq!(dataset.images[0].id, ImageId::new(1));
        assert_eq!(dataset.images[1].id, ImageId::new(2));
        assert!(dataset.images[1]
            .source_path
            .as_deref()
            .is_some_and(|p| p.ends_with("val/x.bmp")));
    }

    #[test]
    fn write_dir_rejects_flat_name_collisions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = temp.path().join("src/train/x.bmp");
        let b = temp.path().join("src/val/x.bmp");
        write_bmp(&a, 4, 4);
        write_bmp(&b, 4, 4);

        let dataset = Dataset {
            subsets: vec!["train".into(), "val".into()],
            images: vec![
                Image::new(0u64, "x.bmp", 4, 4, "train").with_source_path(&a),
                Image::new(1u64, "x.bmp", 4, 4, "val").with_source_path(&b),
            ],
            ..Default::default()
        };

        let err = write_coco_dir(&temp.path().join("out"), &dataset).unwrap_err();
        assert!(matches!(err, DsconvError::OutputCollision { .. }));
    }
}
