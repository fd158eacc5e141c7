//! Annotation geometry and bounding-box encodings.
//!
//! Three box encodings show up across the supported formats:
//!
//! - **xyxy**: absolute corners `(x1, y1, x2, y2)` (CVAT `<box>`)
//! - **xywh**: absolute top-left plus size `(x, y, w, h)` (COCO `bbox`)
//! - **yolo**: normalized center plus size `(xc, yc, w, h)` (YOLO label lines)
//!
//! The conversion functions are pure and work on `f64` throughout. Rounding
//! is a serialization concern and happens in the writers only.

use serde::{Deserialize, Serialize};

/// Converts top-left + size to corners.
#[inline]
pub fn xywh_to_xyxy(x: f64, y: f64, w: f64, h: f64) -> (f64, f64, f64, f64) {
    (x, y, x + w, y + h)
}

/// Converts corners to top-left + size.
#[inline]
pub fn xyxy_to_xywh(x1: f64, y1: f64, x2: f64, y2: f64) -> (f64, f64, f64, f64) {
    (x1, y1, x2 - x1, y2 - y1)
}

/// Converts an absolute top-left + size box to a normalized center box.
#[inline]
pub fn xywh_to_yolo(
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    img_w: f64,
    img_h: f64,
) -> (f64, f64, f64, f64) {
    (
        (x + w / 2.0) / img_w,
        (y + h / 2.0) / img_h,
        w / img_w,
        h / img_h,
    )
}

/// Converts a normalized center box to absolute corners.
#[inline]
pub fn yolo_to_xyxy(
    xc: f64,
    yc: f64,
    wn: f64,
    hn: f64,
    img_w: f64,
    img_h: f64,
) -> (f64, f64, f64, f64) {
    (
        (xc - wn / 2.0) * img_w,
        (yc - hn / 2.0) * img_h,
        (xc + wn / 2.0) * img_w,
        (yc + hn / 2.0) * img_h,
    )
}

/// Converts a normalized center box to absolute top-left + size.
#[inline]
pub fn yolo_to_xywh(
    xc: f64,
    yc: f64,
    wn: f64,
    hn: f64,
    img_w: f64,
    img_h: f64,
) -> (f64, f64, f64, f64) {
    let (x1, y1, x2, y2) = yolo_to_xyxy(xc, yc, wn, hn, img_w, img_h);
    xyxy_to_xywh(x1, y1, x2, y2)
}

/// An absolute, top-left anchored rectangle in pixel space.
///
/// Width and height are not forced to be positive, so that malformed input
/// boxes survive parsing and can be reported by validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    #[inline]
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Builds a rectangle from two opposite corners.
    #[inline]
    pub fn from_xyxy(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let (x, y, w, h) = xyxy_to_xywh(x1, y1, x2, y2);
        Self { x, y, w, h }
    }

    /// Builds a rectangle from a normalized YOLO box.
    #[inline]
    pub fn from_yolo(xc: f64, yc: f64, wn: f64, hn: f64, img_w: u32, img_h: u32) -> Self {
        let (x, y, w, h) = yolo_to_xywh(xc, yc, wn, hn, img_w as f64, img_h as f64);
        Self { x, y, w, h }
    }

    #[inline]
    pub fn to_xyxy(&self) -> (f64, f64, f64, f64) {
        xywh_to_xyxy(self.x, self.y, self.w, self.h)
    }

    #[inline]
    pub fn to_yolo(&self, img_w: u32, img_h: u32) -> (f64, f64, f64, f64) {
        xywh_to_yolo(self.x, self.y, self.w, self.h, img_w as f64, img_h as f64)
    }

    /// May be negative for malformed boxes.
    #[inline]
    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    /// True when the box has a strictly positive extent on both axes.
    #[inline]
    pub fn has_extent(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    /// Integer pixel window `(x, y, w, h)` covering this box, clipped to the image.
    ///
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn pixel_window(&self, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
        if !self.is_finite() {
            return None;
        }
        let (x1, y1, x2, y2) = self.to_xyxy();
        let left = x1.min(x2).floor().clamp(0.0, img_w as f64) as u32;
        let top = y1.min(y2).floor().clamp(0.0, img_h as f64) as u32;
        let right = x1.max(x2).ceil().clamp(0.0, img_w as f64) as u32;
        let bottom = y1.max(y2).ceil().clamp(0.0, img_h as f64) as u32;
        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }
}

/// A polygon vertex in absolute pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The spatial payload of an annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    /// Axis-aligned box.
    Rectangle(Rect),
    /// Closed polygon.
    Polygon { points: Vec<Point> },
    /// Image-level classification label with no spatial extent.
    Tag,
}

impl Geometry {
    /// Short lowercase name of the variant, as CVAT spells it.
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Rectangle(_) => "rectangle",
            Geometry::Polygon { .. } => "polygon",
            Geometry::Tag => "tag",
        }
    }

    /// Axis-aligned bounds of a rectangle or polygon. Tags have none.
    pub fn bounding_rect(&self) -> Option<Rect> {
        match self {
            Geometry::Rectangle(rect) => Some(*rect),
            Geometry::Polygon { points } => {
                let first = points.first()?;
                let (mut x1, mut y1, mut x2, mut y2) = (first.x, first.y, first.x, first.y);
                for p in &points[1..] {
                    x1 = x1.min(p.x);
                    y1 = y1.min(p.y);
                    x2 = x2.max(p.x);
                    y2 = y2.max(p.y);
                }
                Some(Rect::from_xyxy(x1, y1, x2, y2))
            }
            Geometry::Tag => None,
        }
    }
}
