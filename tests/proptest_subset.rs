//! Property tests for box encodings and subset transforms.

use std::collections::{BTreeMap, BTreeSet};

use dsconv::ir::{
    xywh_to_yolo, yolo_to_xywh, Annotation, Category, Dataset, Geometry, Image, Rect,
};
use dsconv::subset::{remap_subsets, resplit, SplitPlan, SplitRatio, SubsetMap};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

const SUBSETS: [&str; 3] = ["train", "val", "test"];

fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// A box fully inside a `img_w` x `img_h` image.
fn arb_box_in_image() -> impl Strategy<Value = (f64, f64, f64, f64, f64, f64)> {
    (1u32..4096, 1u32..4096).prop_flat_map(|(img_w, img_h)| {
        let (w, h) = (img_w as f64, img_h as f64);
        (0.0..w, 0.0..h).prop_flat_map(move |(x, y)| {
            (Just(x), Just(y), 0.0..=(w - x), 0.0..=(h - y), Just(w), Just(h))
        })
    })
}

/// A dataset with images spread over up to three subsets and 0-2 boxes each.
fn arb_dataset() -> impl Strategy<Value = Dataset> {
    prop::collection::vec((0usize..3, 0usize..3), 0..40).prop_map(|specs| {
        let mut images = Vec::new();
        let mut annotations = Vec::new();
        let mut next_ann = 0u64;
        for (idx, (subset_idx, boxes)) in specs.into_iter().enumerate() {
            let id = idx as u64;
            images.push(Image::new(
                id,
                format!("img_{idx:03}.jpg"),
                64,
                48,
                SUBSETS[subset_idx],
            ));
            for b in 0..boxes {
                annotations.push(Annotation::new(
                    next_ann,
                    id,
                    0u64,
                    Geometry::Rectangle(Rect::new(b as f64, b as f64, 4.0, 4.0)),
                ));
                next_ann += 1;
            }
        }
        Dataset {
            subsets: SUBSETS.iter().map(|s| s.to_string()).collect(),
            categories: vec![Category::new(0u64, "thing")],
            images,
            annotations,
            ..Default::default()
        }
    })
}

/// Two or three ratios that sum to exactly 1.
fn arb_plan() -> impl Strategy<Value = SplitPlan> {
    prop_oneof![
        (1u32..100).prop_map(|a| vec![a as f64 / 100.0, 1.0 - a as f64 / 100.0]),
        (1u32..50, 1u32..50).prop_map(|(a, b)| {
            let (a, b) = (a as f64 / 100.0, b as f64 / 100.0);
            vec![a, b, 1.0 - a - b]
        }),
    ]
    .prop_map(|ratios| {
        let entries = ratios
            .into_iter()
            .enumerate()
            .map(|(idx, ratio)| SplitRatio {
                subset: format!("part{idx}"),
                ratio,
            })
            .collect();
        SplitPlan::new(entries).expect("valid plan")
    })
}

/// `(file_name, box count)` per image, independent of ids.
fn boxes_per_file(dataset: &Dataset) -> BTreeMap<String, usize> {
    let by_image = dataset.annotations_by_image();
    dataset
        .images
        .iter()
        .map(|img| {
            (
                img.file_name.clone(),
                by_image.get(&img.id).map_or(0, Vec::len),
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn yolo_encoding_roundtrips((x, y, w, h, img_w, img_h) in arb_box_in_image()) {
        let (xc, yc, wn, hn) = xywh_to_yolo(x, y, w, h, img_w, img_h);
        let (rx, ry, rw, rh) = yolo_to_xywh(xc, yc, wn, hn, img_w, img_h);

        let eps = img_w.max(img_h) * 1e-9;
        prop_assert!((rx - x).abs() <= eps, "x {} vs {}", rx, x);
        prop_assert!((ry - y).abs() <= eps, "y {} vs {}", ry, y);
        prop_assert!((rw - w).abs() <= eps, "w {} vs {}", rw, w);
        prop_assert!((rh - h).abs() <= eps, "h {} vs {}", rh, h);
    }

    #[test]
    fn rect_yolo_roundtrip_stays_inside_image((x, y, w, h, img_w, img_h) in arb_box_in_image()) {
        let rect = Rect::new(x, y, w, h);
        let (xc, yc, wn, hn) = rect.to_yolo(img_w as u32, img_h as u32);
        prop_assert!((0.0..=1.0 + 1e-12).contains(&xc));
        prop_assert!((0.0..=1.0 + 1e-12).contains(&yc));
        prop_assert!(wn >= 0.0 && hn >= 0.0);

        let back = Rect::from_yolo(xc, yc, wn, hn, img_w as u32, img_h as u32);
        prop_assert!((back.x - x).abs() <= 1e-6 && (back.w - w).abs() <= 1e-6);
    }

    #[test]
    fn resplit_places_every_image_exactly_once(
        dataset in arb_dataset(),
        plan in arb_plan(),
        seed in prop::option::of(any::<u64>()),
    ) {
        let total = dataset.images.len();
        let before = boxes_per_file(&dataset);
        let result = resplit(dataset, &plan, seed);

        prop_assert_eq!(result.images.len(), total);
        let names: Vec<&str> = plan.entries().iter().map(|e| e.subset.as_str()).collect();
        prop_assert_eq!(&result.subsets, &names);

        let counts = plan.target_counts(total);
        prop_assert_eq!(counts.iter().sum::<usize>(), total);
        for (name, expected) in names.iter().zip(&counts) {
            prop_assert_eq!(result.images_in_subset(name).count(), *expected);
        }

        let ids: BTreeSet<u64> = result.images.iter().map(|i| i.id.as_u64()).collect();
        prop_assert_eq!(ids.len(), total);
        prop_assert_eq!(boxes_per_file(&result), before);
    }

    #[test]
    fn remap_moves_images_without_changing_identity(
        dataset in arb_dataset(),
        targets in prop::sample::subsequence(vec![0usize, 1, 2], 0..=3),
    ) {
        let mut map = SubsetMap::new();
        for idx in &targets {
            map.insert(SUBSETS[*idx], format!("renamed_{}", SUBSETS[*idx])).expect("insert");
        }

        let before: Vec<(u64, String, String)> = dataset
            .images
            .iter()
            .map(|i| (i.id.as_u64(), i.file_name.clone(), i.subset.clone()))
            .collect();
        let result = remap_subsets(dataset, &map).expect("remap");

        prop_assert_eq!(result.images.len(), before.len());
        for (image, (id, file_name, old_subset)) in result.images.iter().zip(&before) {
            prop_assert_eq!(image.id.as_u64(), *id);
            prop_assert_eq!(&image.file_name, file_name);
            let expected = map.get(old_subset).unwrap_or(old_subset);
            prop_assert_eq!(image.subset.as_str(), expected);
        }
    }
}
