//! Incremental, invariant-checking dataset construction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::geometry::Geometry;
use super::ids::{AnnotationId, CategoryId, ImageId};
use super::model::{Annotation, Category, Dataset, Image};
use crate::error::DsconvError;

/// Builds a [`Dataset`] while checking every insertion.
///
/// Readers push subsets, categories, images and annotations in source order.
/// Any duplicate or dangling reference fails immediately with an error that
/// names the offending item and the source path, instead of surfacing later
/// as a broken output file.
#[derive(Debug)]
pub struct DatasetBuilder {
    source: PathBuf,
    dataset: Dataset,
    category_by_name: HashMap<String, CategoryId>,
    category_ids: HashSet<CategoryId>,
    image_ids: HashSet<ImageId>,
    next_image_id: u64,
    next_annotation_id: u64,
}

impl DatasetBuilder {
    /// Starts an empty dataset read from `source`, with the given id base.
    pub fn new(source: &Path, id_base: u64) -> Self {
        Self {
            source: source.to_path_buf(),
            dataset: Dataset {
                id_base,
                ..Default::default()
            },
            category_by_name: HashMap::new(),
            category_ids: HashSet::new(),
            image_ids: HashSet::new(),
            next_image_id: id_base,
            next_annotation_id: id_base,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.dataset.name = Some(name.into());
    }

    pub fn id_base(&self) -> u64 {
        self.dataset.id_base
    }

    /// Declares a subset. Declaring the same name twice is an error.
    pub fn add_subset(&mut self, subset: impl Into<String>) -> Result<(), DsconvError> {
        let subset = subset.into();
        if subset.trim().is_empty() {
            return Err(self.invalid("subset name is empty".to_string()));
        }
        if self.dataset.has_subset(&subset) {
            return Err(self.invalid(format!("subset '{subset}' is declared twice")));
        }
        self.dataset.subsets.push(subset);
        Ok(())
    }

    /// Declares a subset unless it is already known.
    pub fn ensure_subset(&mut self, subset: &str) -> Result<(), DsconvError> {
        if self.dataset.has_subset(subset) {
            return Ok(());
        }
        self.add_subset(subset)
    }

    pub fn has_subset(&self, subset: &str) -> bool {
        self.dataset.has_subset(subset)
    }

    /// Adds a category with the next dense id and returns that id.
    pub fn add_category(&mut self, name: impl Into<String>) -> Result<CategoryId, DsconvError> {
        let name = name.into();
        if name.is_empty() {
            return Err(self.invalid("category name is empty".to_string()));
        }
        if self.category_by_name.contains_key(&name) {
            return Err(self.invalid(format!("category '{name}' is defined twice")));
        }

        let id = CategoryId::new(self.dataset.id_base + self.dataset.categories.len() as u64);
        self.category_by_name.insert(name.clone(), id);
        self.category_ids.insert(id);
        self.dataset.categories.push(Category { id, name });
        Ok(id)
    }

    pub fn category_id(&self, name: &str) -> Option<CategoryId> {
        self.category_by_name.get(name).copied()
    }

    pub fn category_count(&self) -> usize {
        self.dataset.categories.len()
    }

    /// Allocates the next sequential image id without inserting anything.
    pub fn next_image_id(&mut self) -> ImageId {
        let id = ImageId::new(self.next_image_id);
        self.next_image_id += 1;
        id
    }

    /// Adds an image. Its id must be unused and its subset declared.
    pub fn add_image(&mut self, image: Image) -> Result<ImageId, DsconvError> {
        if !self.dataset.has_subset(&image.subset) {
            return Err(self.invalid(format!(
                "image '{}' (id {}) belongs to undeclared subset '{}'",
                image.file_name, image.id, image.subset
            )));
        }
        if !self.image_ids.insert(image.id) {
            return Err(self.invalid(format!(
                "duplicate image id {} ('{}')",
                image.id, image.file_name
            )));
        }
        if image.id.as_u64() >= self.next_image_id {
            self.next_image_id = image.id.as_u64() + 1;
        }

        let id = image.id;
        self.dataset.images.push(image);
        Ok(id)
    }

    /// Adds an annotation with the next sequential id.
    pub fn add_annotation(
        &mut self,
        image_id: ImageId,
        category_id: CategoryId,
        geometry: Geometry,
        attributes: BTreeMap<String, String>,
    ) -> Result<AnnotationId, DsconvError> {
        if !self.image_ids.contains(&image_id) {
            return Err(self.invalid(format!(
                "annotation references unknown image id {image_id}"
            )));
        }
        if !self.category_ids.contains(&category_id) {
            return Err(self.invalid(format!(
                "annotation on image {image_id} references unknown category id {category_id}"
            )));
        }

        let id = AnnotationId::new(self.next_annotation_id);
        self.next_annotation_id += 1;
        self.dataset.annotations.push(Annotation {
            id,
            image_id,
            category_id,
            geometry,
            iscrowd: false,
            attributes,
        });
        Ok(id)
    }

    /// Marks the most recently added annotation as a crowd region.
    pub fn mark_last_crowd(&mut self) {
        if let Some(ann) = self.dataset.annotations.last_mut() {
            ann.iscrowd = true;
        }
    }

    /// Removes an already-added image (and nothing else, it must be unannotated).
    pub fn remove_unannotated_image(&mut self, image_id: ImageId) {
        if self
            .dataset
            .annotations
            .iter()
            .any(|ann| ann.image_id == image_id)
        {
            return;
        }
        self.dataset.images.retain(|img| img.id != image_id);
        self.image_ids.remove(&image_id);
    }

    pub fn finish(self) -> Dataset {
        self.dataset
    }

    fn invalid(&self, message: String) -> DsconvError {
        DsconvError::InvalidDataset {
            path: self.source.clone(),
            message,
        }
    }
}
