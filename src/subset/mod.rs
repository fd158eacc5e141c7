//! Subset remapping and ratio-based resplitting.
//!
//! The two transforms are mutually exclusive within one conversion. Both
//! operate on a fully materialized [`Dataset`] and never touch the
//! filesystem.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::DsconvError;
use crate::ir::{AnnotationId, Dataset, ImageId};

/// Tolerance for the sum of split ratios.
pub const RATIO_SUM_TOLERANCE: f64 = 1e-6;

/// One `old:new` subset rename, as given on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubsetRename {
    pub old: String,
    pub new: String,
}

impl FromStr for SubsetRename {
    type Err = DsconvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (old, new) = split_pair(s, "--subset-map", "old:new")?;
        Ok(Self {
            old: old.to_string(),
            new: new.to_string(),
        })
    }
}

/// One `name:ratio` split entry, as given on the command line.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitRatio {
    pub subset: String,
    pub ratio: f64,
}

impl FromStr for SplitRatio {
    type Err = DsconvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (subset, raw_ratio) = split_pair(s, "--split-ratio", "name:ratio")?;
        let ratio = raw_ratio.parse::<f64>().map_err(|_| {
            DsconvError::invalid_options(format!(
                "--split-ratio '{s}': ratio '{raw_ratio}' is not a number"
            ))
        })?;
        Ok(Self {
            subset: subset.to_string(),
            ratio,
        })
    }
}

fn split_pair<'a>(raw: &'a str, flag: &str, shape: &str) -> Result<(&'a str, &'a str), DsconvError> {
    let malformed = || DsconvError::invalid_options(format!("{flag} '{raw}': expected '{shape}'"));
    let (left, right) = raw.split_once(':').ok_or_else(malformed)?;
    let (left, right) = (left.trim(), right.trim());
    if left.is_empty() || right.is_empty() || right.contains(':') {
        return Err(malformed());
    }
    Ok((left, right))
}

/// Ordered set of subset renames. Each old name appears at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubsetMap {
    renames: Vec<SubsetRename>,
}

impl SubsetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from parsed pairs. Renaming the same subset twice is a
    /// configuration error.
    pub fn from_renames(renames: Vec<SubsetRename>) -> Result<Self, DsconvError> {
        let mut map = Self::new();
        for rename in renames {
            map.insert(rename.old, rename.new)?;
        }
        Ok(map)
    }

    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) -> Result<(), DsconvError> {
        let old = old.into();
        if self.get(&old).is_some() {
            return Err(DsconvError::invalid_options(format!(
                "subset '{old}' is mapped more than once"
            )));
        }
        self.renames.push(SubsetRename {
            old,
            new: new.into(),
        });
        Ok(())
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.renames
            .iter()
            .find(|r| r.old == old)
            .map(|r| r.new.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    pub fn renames(&self) -> &[SubsetRename] {
        &self.renames
    }
}

/// Target subsets with their share of the images, in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitPlan {
    entries: Vec<SplitRatio>,
}

impl SplitPlan {
    /// Validates and builds a plan.
    ///
    /// Every ratio must lie in `(0, 1]`, subset names must be unique and the
    /// ratios must sum to 1 within [`RATIO_SUM_TOLERANCE`].
    pub fn new(entries: Vec<SplitRatio>) -> Result<Self, DsconvError> {
        if entries.is_empty() {
            return Err(DsconvError::invalid_options("split plan has no subsets"));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.subset.trim().is_empty() {
                return Err(DsconvError::invalid_options("split subset name is empty"));
            }
            if !seen.insert(entry.subset.as_str()) {
                return Err(DsconvError::invalid_options(format!(
                    "split subset '{}' is listed more than once",
                    entry.subset
                )));
            }
            if !(entry.ratio > 0.0 && entry.ratio <= 1.0) {
                return Err(DsconvError::invalid_options(format!(
                    "split ratio for '{}' must be in (0, 1], got {}",
                    entry.subset, entry.ratio
                )));
            }
        }

        let sum: f64 = entries.iter().map(|e| e.ratio).sum();
        if (sum - 1.0).abs() > RATIO_SUM_TOLERANCE {
            return Err(DsconvError::invalid_options(format!(
                "split ratios must sum to 1.0, got {sum}"
            )));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SplitRatio] {
        &self.entries
    }

    /// Image count per target subset for `total` images.
    ///
    /// Every subset but the last gets `round(total * ratio)`, capped at what
    /// is left; the last subset takes the remainder.
    pub fn target_counts(&self, total: usize) -> Vec<usize> {
        let mut remaining = total;
        let last = self.entries.len() - 1;
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let count = if idx == last {
                    remaining
                } else {
                    ((total as f64 * entry.ratio).round() as usize).min(remaining)
                };
                remaining -= count;
                count
            })
            .collect()
    }
}

impl fmt::Display for SplitPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{}:{}", e.subset, e.ratio))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Rejects simultaneous remap and resplit.
pub fn validate_subset_options(map: &SubsetMap, plan: Option<&SplitPlan>) -> Result<(), DsconvError> {
    if !map.is_empty() && plan.is_some() {
        return Err(DsconvError::invalid_options(
            "--subset-map and --split-ratio cannot be used together",
        ));
    }
    Ok(())
}

/// Renames subsets in place. Image ids and file names are untouched.
pub fn remap_subsets(mut dataset: Dataset, map: &SubsetMap) -> Result<Dataset, DsconvError> {
    if map.is_empty() {
        return Ok(dataset);
    }

    let renamed: HashSet<&str> = map.renames().iter().map(|r| r.old.as_str()).collect();
    let mut targets: HashMap<&str, &str> = HashMap::new();

    for rename in map.renames() {
        if !dataset.has_subset(&rename.old) {
            return Err(DsconvError::invalid_options(format!(
                "cannot remap subset '{}': dataset has subsets {:?}",
                rename.old, dataset.subsets
            )));
        }
        if rename.new.trim().is_empty() {
            return Err(DsconvError::invalid_options(format!(
                "subset '{}' is mapped to an empty name",
                rename.old
            )));
        }
        if rename.new != rename.old
            && dataset.has_subset(&rename.new)
            && !renamed.contains(rename.new.as_str())
        {
            return Err(DsconvError::subset_conflict(format!(
                "cannot rename '{}' to '{}': subset '{}' already exists",
                rename.old, rename.new, rename.new
            )));
        }
        if let Some(other) = targets.insert(rename.new.as_str(), rename.old.as_str()) {
            return Err(DsconvError::subset_conflict(format!(
                "subsets '{other}' and '{}' are both mapped to '{}'",
                rename.old, rename.new
            )));
        }
    }

    for subset in &mut dataset.subsets {
        if let Some(new) = map.get(subset) {
            *subset = new.to_string();
        }
    }
    for image in &mut dataset.images {
        if let Some(new) = map.get(&image.subset) {
            image.subset = new.to_string();
        }
    }

    log::info!("Remapped subsets: {:?}", dataset.subsets);
    Ok(dataset)
}

/// Reassigns every image to one of the plan's subsets and renumbers ids.
///
/// Without a seed the assignment walks images in `(id, subset)` order, so the
/// result is fully reproducible. With a seed that order is shuffled first.
/// Image and annotation ids are renumbered from `dataset.id_base`, grouped by
/// new subset, keeping every annotation on its image. Numbering runs on
/// across subsets rather than restarting at the base in each one, so image
/// ids stay unique dataset-wide; the COCO writer restarts at 1 in each
/// subset file on output.
pub fn resplit(dataset: Dataset, plan: &SplitPlan, seed: Option<u64>) -> Dataset {
    let mut order: Vec<usize> = (0..dataset.images.len()).collect();
    order.sort_by(|&a, &b| {
        let (ia, ib) = (&dataset.images[a], &dataset.images[b]);
        ia.id.cmp(&ib.id).then_with(|| ia.subset.cmp(&ib.subset))
    });
    if let Some(seed) = seed {
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);
    }

    let counts = plan.target_counts(order.len());
    let mut assignment: Vec<usize> = vec![0; dataset.images.len()];
    let mut cursor = order.iter();
    for (subset_idx, count) in counts.iter().enumerate() {
        for &image_idx in cursor.by_ref().take(*count) {
            assignment[image_idx] = subset_idx;
        }
    }

    let Dataset {
        name,
        id_base,
        categories,
        images,
        annotations,
        ..
    } = dataset;

    let mut indexed: Vec<(usize, usize)> = assignment.iter().copied().zip(0..).collect();
    indexed.sort();

    let mut slots: Vec<Option<crate::ir::Image>> = images.into_iter().map(Some).collect();
    let mut id_map: HashMap<ImageId, ImageId> = HashMap::new();
    let mut new_images = Vec::with_capacity(slots.len());
    for (new_idx, (subset_idx, image_idx)) in indexed.into_iter().enumerate() {
        let Some(mut image) = slots[image_idx].take() else {
            continue;
        };
        let new_id = ImageId::new(id_base + new_idx as u64);
        id_map.insert(image.id, new_id);
        image.id = new_id;
        image.subset = plan.entries[subset_idx].subset.clone();
        new_images.push(image);
    }

    let mut by_image: BTreeMap<ImageId, Vec<crate::ir::Annotation>> = BTreeMap::new();
    for mut ann in annotations {
        let Some(&new_image_id) = id_map.get(&ann.image_id) else {
            continue;
        };
        ann.image_id = new_image_id;
        by_image.entry(new_image_id).or_default().push(ann);
    }
    let mut new_annotations = Vec::new();
    for (idx, mut ann) in by_image.into_values().flatten().enumerate() {
        ann.id = AnnotationId::new(id_base + idx as u64);
        new_annotations.push(ann);
    }

    let subsets: Vec<String> = plan.entries.iter().map(|e| e.subset.clone()).collect();
    for (subset, count) in subsets.iter().zip(&counts) {
        log::info!("Resplit: {count} image(s) -> '{subset}'");
    }

    Dataset {
        name,
        id_base,
        subsets,
        categories,
        images: new_images,
        annotations: new_annotations,
    }
}
