//! Conversion report types for tracking lossiness and policy decisions.
//!
//! Mirrors `validation::ValidationReport`: a flat list of issues with stable
//! codes, printable as text or serialized as JSON.

use serde::Serialize;
use std::fmt;

/// A report generated during format conversion.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversionReport {
    /// Source format name.
    pub from: String,
    /// Target format name.
    pub to: String,
    /// Subsets present in the written dataset, in order.
    pub subsets: Vec<String>,
    /// Counts from the dataset as read.
    pub input: ConversionCounts,
    /// Counts in the output (differs when the target cannot hold everything).
    pub output: ConversionCounts,
    pub issues: Vec<ConversionIssue>,
}

impl ConversionReport {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, issue: ConversionIssue) {
        self.issues.push(issue);
    }

    /// Count of warning-level issues (true lossiness).
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == ConversionSeverity::Warning)
            .count()
    }

    /// Count of info-level issues (policy decisions, notes).
    pub fn info_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == ConversionSeverity::Info)
            .count()
    }

    /// Returns true if this conversion lost information.
    pub fn is_lossy(&self) -> bool {
        self.warning_count() > 0
    }

    pub fn has_code(&self, code: ConversionIssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Converted {} -> {}", self.from, self.to)?;
        writeln!(
            f,
            "  {} images, {} categories, {} annotations",
            self.input.images, self.input.categories, self.input.annotations
        )?;

        if self.output != self.input {
            writeln!(
                f,
                "  output: {} images, {} categories, {} annotations",
                self.output.images, self.output.categories, self.output.annotations
            )?;
        }
        if !self.subsets.is_empty() {
            writeln!(f, "  subsets: {}", self.subsets.join(", "))?;
        }

        for (label, severity) in [
            ("Warnings", ConversionSeverity::Warning),
            ("Notes", ConversionSeverity::Info),
        ] {
            let messages: Vec<&str> = self
                .issues
                .iter()
                .filter(|i| i.severity == severity)
                .map(|i| i.message.as_str())
                .collect();
            if messages.is_empty() {
                continue;
            }
            writeln!(f)?;
            writeln!(f, "{} ({}):", label, messages.len())?;
            for message in messages {
                writeln!(f, "  - {}", message)?;
            }
        }

        Ok(())
    }
}

/// Counts of dataset elements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConversionCounts {
    pub images: usize,
    pub categories: usize,
    pub annotations: usize,
}

/// A single issue discovered during conversion.
#[derive(Clone, Debug, Serialize)]
pub struct ConversionIssue {
    pub severity: ConversionSeverity,
    pub code: ConversionIssueCode,
    pub message: String,
}

impl ConversionIssue {
    /// Create a warning-level issue (indicates lossiness).
    pub fn warning(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: ConversionSeverity::Warning,
            code,
            message: message.into(),
        }
    }

    /// Create an info-level issue (policy note).
    pub fn info(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: ConversionSeverity::Info,
            code,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionSeverity {
    /// Information was lost.
    Warning,
    /// A policy decision was applied.
    Info,
}

/// Stable issue codes for programmatic consumption.
///
/// These codes are part of the JSON output and should remain stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionIssueCode {
    // Lossiness (Warning level)
    /// Polygons were written as their bounding boxes.
    PolygonsFlattened,
    /// Image-level tags have no box representation in the target.
    TagsDropped,
    /// Images without any annotation cannot be placed in a class folder.
    UnannotatedImagesSkipped,
    /// Boxes outside the image produced no crop.
    EmptyCropsSkipped,
    /// Annotation attributes (e.g. `occluded`) have no target equivalent.
    AnnotationAttributesDropped,
    /// The dataset name has no target equivalent.
    DatasetNameDropped,
    /// Crowd flags are not representable in the target.
    CrowdFlagsDropped,
    /// Subset names outside train/val/test in a YOLO output.
    NonStandardYoloSubsets,

    // Policy decisions (Info level)
    /// Subsets were renamed before writing.
    SubsetsRemapped,
    /// Images were reassigned to new subsets and renumbered.
    SubsetsResplit,
    /// CVAT writer renumbers image ids from 0 across subsets.
    CvatImageIdsRenumbered,
    /// COCO writer numbers categories from 1 by definition order.
    CocoCategoryIdsFromOne,
    /// YOLO writer outputs normalized floats at 6 decimal places.
    YoloFloatPrecision,
    /// ImageNet writer emits one crop per box.
    ImagenetCropPerAnnotation,
}
