//! Image file helpers shared by readers and writers.
//!
//! Readers only probe headers for dimensions; pixel data is decoded solely
//! when a writer has to crop.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::geometry::Rect;
use super::model::Image;
use crate::error::DsconvError;

pub(crate) const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Reads `(width, height)` from the image header.
pub fn read_image_dimensions(path: &Path) -> Result<(u32, u32), DsconvError> {
    let size = imagesize::size(path).map_err(|source| DsconvError::ImageDimensionRead {
        path: path.to_path_buf(),
        source,
    })?;

    let width: u32 = size
        .width
        .try_into()
        .map_err(|_| DsconvError::InvalidDataset {
            path: path.to_path_buf(),
            message: format!("image width {} does not fit in u32", size.width),
        })?;
    let height: u32 = size
        .height
        .try_into()
        .map_err(|_| DsconvError::InvalidDataset {
            path: path.to_path_buf(),
            message: format!("image height {} does not fit in u32", size.height),
        })?;

    Ok((width, height))
}

/// Fails with a validation error unless `path` is an existing file.
pub(crate) fn require_file(path: &Path) -> Result<(), DsconvError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(DsconvError::MissingImageFile {
            path: path.to_path_buf(),
        })
    }
}

/// Source pixel file of an image, or an error if the reader did not record one.
pub(crate) fn source_of(image: &Image) -> Result<&Path, DsconvError> {
    image
        .source_path
        .as_deref()
        .ok_or_else(|| DsconvError::InvalidDataset {
            path: PathBuf::from(&image.file_name),
            message: format!("image {} has no source file to copy from", image.id),
        })
}

/// Destination files a writer is about to produce, each with the source that
/// fills it.
///
/// Writers claim every destination before writing anything, so two source
/// images mapping onto one output file fail the write up front instead of
/// overwriting each other.
#[derive(Debug, Default)]
pub(crate) struct OutputPlan<'a> {
    claimed: HashMap<PathBuf, &'a Path>,
}

impl<'a> OutputPlan<'a> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claims `dst` for a copy of `src`.
    ///
    /// Returns `Ok(false)` when `src` already claimed `dst` (the file would be
    /// written twice with the same bytes), and a collision error when another
    /// source did.
    pub(crate) fn claim_copy(&mut self, dst: PathBuf, src: &'a Path) -> Result<bool, DsconvError> {
        match self.claimed.get(&dst) {
            Some(previous) if *previous == src => Ok(false),
            Some(previous) => Err(collision(dst, previous, src)),
            None => {
                self.claimed.insert(dst, src);
                Ok(true)
            }
        }
    }

    /// Claims `dst` for content derived from `src` (a crop, a label file).
    ///
    /// Derived files differ per image entry, so any second claim collides.
    pub(crate) fn claim_derived(&mut self, dst: PathBuf, src: &'a Path) -> Result<(), DsconvError> {
        match self.claimed.get(&dst) {
            Some(previous) => Err(collision(dst, previous, src)),
            None => {
                self.claimed.insert(dst, src);
                Ok(())
            }
        }
    }
}

fn collision(dst: PathBuf, previous: &Path, src: &Path) -> DsconvError {
    let message = if previous == src {
        format!("'{}' would be written here more than once", src.display())
    } else {
        format!(
            "both '{}' and '{}' would be written here",
            previous.display(),
            src.display()
        )
    };
    DsconvError::OutputCollision { path: dst, message }
}

/// Copies an image file, creating parent directories as needed.
pub(crate) fn copy_image(src: &Path, dst: &Path) -> Result<(), DsconvError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(DsconvError::Io)?;
    }
    log::debug!("copy {} -> {}", src.display(), dst.display());
    fs::copy(src, dst).map_err(DsconvError::Io)?;
    Ok(())
}

/// Crops `rect` out of `src` and saves it to `dst` (format from extension).
///
/// Returns `Ok(false)` without writing when the box has no pixels inside the
/// image.
pub(crate) fn crop_image(src: &Path, rect: &Rect, dst: &Path) -> Result<bool, DsconvError> {
    let img = image::open(src).map_err(|source| DsconvError::ImageCrop {
        path: src.to_path_buf(),
        source,
    })?;

    let Some((x, y, w, h)) = rect.pixel_window(img.width(), img.height()) else {
        return Ok(false);
    };

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(DsconvError::Io)?;
    }

    log::debug!(
        "crop {} [{x},{y} {w}x{h}] -> {}",
        src.display(),
        dst.display()
    );
    img.crop_imm(x, y, w, h)
        .to_rgb8()
        .save(dst)
        .map_err(|source| DsconvError::ImageCrop {
            path: dst.to_path_buf(),
            source,
        })?;
    Ok(true)
}

/// Image files below `root`, sorted by their path relative to `root`.
pub(crate) fn collect_image_files(root: &Path, max_depth: usize) -> Result<Vec<PathBuf>, DsconvError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).max_depth(max_depth).follow_links(true) {
        let entry = entry.map_err(|source| DsconvError::InvalidDataset {
            path: root.to_path_buf(),
            message: format!("failed while traversing directory: {source}"),
        })?;

        if entry.file_type().is_file() && has_extension(entry.path(), &IMAGE_EXTENSIONS) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_by_cached_key(|path| rel_string(root, path));
    Ok(files)
}

pub(crate) fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}

pub(crate) fn rel_string(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Final path component as UTF-8, or an error naming the path.
pub(crate) fn file_name_of(path: &Path) -> Result<String, DsconvError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(ToOwned::to_owned)
        .ok_or_else(|| DsconvError::InvalidDataset {
            path: path.to_path_buf(),
            message: "file name is not valid UTF-8".to_string(),
        })
}
