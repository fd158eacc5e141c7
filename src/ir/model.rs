//! Canonical dataset model.
//!
//! Every reader produces a [`Dataset`] and every writer consumes one; readers
//! and writers never talk to each other directly. Construction goes through
//! [`DatasetBuilder`](super::DatasetBuilder), which enforces the referential
//! invariants as items are inserted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::geometry::Geometry;
use super::ids::{AnnotationId, CategoryId, ImageId};

/// A complete annotated dataset, materialized in memory for one conversion run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Optional dataset name (CVAT project name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Native id base of the source format (COCO: 1, YOLO/ImageNet/CVAT: 0).
    ///
    /// Category ids are dense starting here, and resplit renumbering of images
    /// and annotations starts here as well.
    #[serde(default)]
    pub id_base: u64,

    /// Subset names in declaration order. Treated as a set: no duplicates.
    pub subsets: Vec<String>,

    /// Category definitions in definition order. Position is authoritative:
    /// writers derive their own class indices from it.
    pub categories: Vec<Category>,

    pub images: Vec<Image>,

    pub annotations: Vec<Annotation>,
}

impl Dataset {
    /// Returns true if `subset` is a declared subset.
    pub fn has_subset(&self, subset: &str) -> bool {
        self.subsets.iter().any(|s| s == subset)
    }

    /// Images belonging to `subset`, in dataset order.
    pub fn images_in_subset<'a>(&'a self, subset: &'a str) -> impl Iterator<Item = &'a Image> + 'a {
        self.images.iter().filter(move |img| img.subset == subset)
    }

    /// Position of each category in definition order, keyed by id.
    pub fn category_positions(&self) -> BTreeMap<CategoryId, usize> {
        self.categories
            .iter()
            .enumerate()
            .map(|(idx, cat)| (cat.id, idx))
            .collect()
    }

    /// Category names keyed by id.
    pub fn category_names(&self) -> BTreeMap<CategoryId, &str> {
        self.categories
            .iter()
            .map(|cat| (cat.id, cat.name.as_str()))
            .collect()
    }

    /// Annotations grouped by image, each group in dataset order.
    pub fn annotations_by_image(&self) -> BTreeMap<ImageId, Vec<&Annotation>> {
        let mut grouped: BTreeMap<ImageId, Vec<&Annotation>> = BTreeMap::new();
        for ann in &self.annotations {
            grouped.entry(ann.image_id).or_default().push(ann);
        }
        grouped
    }
}

/// A category (class label).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

impl Category {
    pub fn new(id: impl Into<CategoryId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// An image and the subset it belongs to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,

    /// File name as the source format records it (no subset prefix).
    pub file_name: String,

    pub width: u32,

    pub height: u32,

    pub subset: String,

    /// Location of the pixel data the reader validated. Writers copy or crop
    /// from here; images without a source path cannot be materialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,

    /// Format-specific extras (e.g. CVAT `task_id`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Image {
    pub fn new(
        id: impl Into<ImageId>,
        file_name: impl Into<String>,
        width: u32,
        height: u32,
        subset: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            width,
            height,
            subset: subset.into(),
            source_path: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        std::path::Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name)
    }
}

/// One labelled region (or image-level tag) on an image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,

    pub image_id: ImageId,

    pub category_id: CategoryId,

    pub geometry: Geometry,

    #[serde(default)]
    pub iscrowd: bool,

    /// Additional attributes (e.g. CVAT `occluded`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Annotation {
    pub fn new(
        id: impl Into<AnnotationId>,
        image_id: impl Into<ImageId>,
        category_id: impl Into<CategoryId>,
        geometry: Geometry,
    ) -> Self {
        Self {
            id: id.into(),
            image_id: image_id.into(),
            category_id: category_id.into(),
            geometry,
            iscrowd: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
