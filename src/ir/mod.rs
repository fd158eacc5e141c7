//! Canonical dataset representation for dsconv.
//!
//! Every supported format is read into a [`Dataset`] and written back out
//! from one, so a conversion is always `reader -> transform -> writer` and no
//! format needs to know about any other.
//!
//! # Design Principles
//!
//! 1. **Typed ids**: images, annotations and categories carry distinct id
//!    newtypes so they cannot be mixed up.
//!
//! 2. **Validated construction**: readers insert through [`DatasetBuilder`],
//!    which rejects duplicates and dangling references as they appear.
//!
//! 3. **Format-neutral geometry**: boxes are stored top-left + size in
//!    absolute pixels; each writer converts to its own encoding.
//!
//! # Example
//!
//! ```
//! use dsconv::ir::{Annotation, Category, Dataset, Geometry, Image, Rect};
//!
//! let dataset = Dataset {
//!     subsets: vec!["train".into()],
//!     images: vec![Image::new(0u64, "image.jpg", 640, 480, "train")],
//!     categories: vec![Category::new(0u64, "person")],
//!     annotations: vec![Annotation::new(
//!         0u64,
//!         0u64,
//!         0u64,
//!         Geometry::Rectangle(Rect::new(10.0, 20.0, 90.0, 180.0)),
//!     )],
//!     ..Default::default()
//! };
//! assert_eq!(dataset.images_in_subset("train").count(), 1);
//! ```

mod builder;
mod geometry;
mod ids;
pub mod io_coco_json;
pub mod io_cvat_xml;
pub mod io_image_folder;
pub mod io_imagenet;
pub mod io_yolo;
pub(crate) mod media;
mod model;

pub use builder::DatasetBuilder;
pub use geometry::{
    xywh_to_xyxy, xywh_to_yolo, xyxy_to_xywh, yolo_to_xywh, yolo_to_xyxy, Geometry, Point, Rect,
};
pub use ids::{AnnotationId, CategoryId, ImageId};
pub use media::read_image_dimensions;
pub use model::{Annotation, Category, Dataset, Image};
