use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationReport;

/// Broad failure class of a [`DsconvError`].
///
/// Every conversion failure is fatal; the class only tells callers whether
/// the input dataset, the destination, the options, or the filesystem is at
/// fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or inconsistent input dataset.
    Validation,
    /// Destination already exists, or subset names collide.
    Conflict,
    /// Mutually exclusive or invalid options.
    Config,
    /// Filesystem failure while copying or writing.
    Io,
}

/// The main error type for dsconv operations.
#[derive(Debug, Error)]
pub enum DsconvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid dataset at {path}: {message}")]
    InvalidDataset { path: PathBuf, message: String },

    #[error("Referenced image file does not exist: {path}")]
    MissingImageFile { path: PathBuf },

    #[error("Failed to parse CVAT XML from {path}: {message}")]
    CvatXmlParse { path: PathBuf, message: String },

    #[error("Failed to parse COCO JSON from {path}: {source}")]
    CocoJsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write COCO JSON to {path}: {source}")]
    CocoJsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse YOLO data.yaml at {path}: {source}")]
    YoloDataYamlParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid YOLO data.yaml at {path}: {message}")]
    YoloDataYamlInvalid { path: PathBuf, message: String },

    #[error("Failed to write YOLO data.yaml to {path}: {source}")]
    YoloDataYamlWrite {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse YOLO label {path}:{line}: {message}")]
    YoloLabelParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Missing YOLO label file {label_path} for image {image_path}")]
    YoloLabelNotFound {
        image_path: PathBuf,
        label_path: PathBuf,
    },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Failed to crop image {path}: {source}")]
    ImageCrop {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Class names differ between {left} and {right}: {message}")]
    ClassSetMismatch {
        left: String,
        right: String,
        message: String,
    },

    #[error("Output directory already exists: {path} (use --force to overwrite)")]
    OutputExists { path: PathBuf },

    #[error("Output file collision at {path}: {message}")]
    OutputCollision { path: PathBuf, message: String },

    #[error("Subset conflict: {message}")]
    SubsetConflict { message: String },

    #[error("Invalid options: {message}")]
    InvalidOptions { message: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Validation failed with {error_count} error(s) and {warning_count} warning(s)")]
    ValidationFailed {
        error_count: usize,
        warning_count: usize,
        report: ValidationReport,
    },
}

impl DsconvError {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DsconvError::Io(_) | DsconvError::CocoJsonWrite { .. } => ErrorKind::Io,
            DsconvError::YoloDataYamlWrite { .. } | DsconvError::ImageCrop { .. } => ErrorKind::Io,
            DsconvError::OutputExists { .. }
            | DsconvError::OutputCollision { .. }
            | DsconvError::SubsetConflict { .. } => ErrorKind::Conflict,
            DsconvError::InvalidOptions { .. } | DsconvError::UnsupportedFormat(_) => {
                ErrorKind::Config
            }
            DsconvError::InvalidDataset { .. }
            | DsconvError::MissingImageFile { .. }
            | DsconvError::CvatXmlParse { .. }
            | DsconvError::CocoJsonParse { .. }
            | DsconvError::YoloDataYamlParse { .. }
            | DsconvError::YoloDataYamlInvalid { .. }
            | DsconvError::YoloLabelParse { .. }
            | DsconvError::YoloLabelNotFound { .. }
            | DsconvError::ImageDimensionRead { .. }
            | DsconvError::ClassSetMismatch { .. }
            | DsconvError::ValidationFailed { .. } => ErrorKind::Validation,
        }
    }

    pub(crate) fn invalid_options(message: impl Into<String>) -> Self {
        DsconvError::InvalidOptions {
            message: message.into(),
        }
    }

    pub(crate) fn subset_conflict(message: impl Into<String>) -> Self {
        DsconvError::SubsetConflict {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let io = DsconvError::Io(std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::Io);

        let exists = DsconvError::OutputExists {
            path: PathBuf::from("out"),
        };
        assert_eq!(exists.kind(), ErrorKind::Conflict);

        assert_eq!(
            DsconvError::invalid_options("both set").kind(),
            ErrorKind::Config
        );

        let missing = DsconvError::MissingImageFile {
            path: PathBuf::from("images/train/a.jpg"),
        };
        assert_eq!(missing.kind(), ErrorKind::Validation);
        assert!(missing.to_string().contains("images/train/a.jpg"));
    }
}
