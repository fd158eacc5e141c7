//! Newtype IDs for images, annotations and categories.
//!
//! Keeping the three id spaces apart matters here more than usual: COCO
//! reuses image ids per subset file, CVAT numbers images per project, and
//! the subset transformer renumbers everything after a resplit.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            #[inline]
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the underlying u64 value.
            #[inline]
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of an image, unique within one dataset.
    ImageId
);
define_id!(
    /// Identifier of an annotation, unique within one dataset.
    AnnotationId
);
define_id!(
    /// Identifier of a category. Dense, starting at the dataset's id base.
    CategoryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_and_print() {
        assert!(ImageId(1) < ImageId(2));
        assert_eq!(format!("{:?}", CategoryId(3)), "CategoryId(3)");
        assert_eq!(AnnotationId::from(7).to_string(), "7");
    }

    #[test]
    fn ids_hash_distinctly() {
        use std::collections::HashSet;
        let set: HashSet<ImageId> = [ImageId(1), ImageId(2), ImageId(1)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
