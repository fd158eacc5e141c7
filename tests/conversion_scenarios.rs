//! End-to-end conversions through the library API.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use dsconv::conversion::{convert, ConversionIssueCode, ConvertOptions, Format};
use dsconv::ir::io_coco_json::read_coco_dir;
use dsconv::ir::io_cvat_xml::read_cvat_dir;
use dsconv::ir::io_imagenet::read_imagenet_dir;
use dsconv::ir::io_yolo::{read_yolo_dir, YoloReadOptions};
use dsconv::ir::{Dataset, Geometry};
use dsconv::subset::{SplitPlan, SplitRatio, SubsetMap};
use dsconv::ErrorKind;

mod common;
use common::{
    count_files, count_label_lines, create_cvat_dataset, create_cvat_repeated_frames,
    create_cvat_shared_stem, create_yolo_dataset,
};

fn category_names(dataset: &Dataset) -> BTreeSet<String> {
    dataset.categories.iter().map(|c| c.name.clone()).collect()
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read json")).expect("parse json")
}

#[test]
fn cvat_to_coco_writes_one_file_per_subset() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    let out = temp.path().join("coco");
    create_cvat_dataset(&src);

    convert(Format::Cvat, Format::Coco, &src, &out, &ConvertOptions::default()).expect("convert");

    let train = read_json(&out.join("annotations/instances_Train.json"));
    let test = read_json(&out.join("annotations/instances_Test.json"));

    assert_eq!(train["categories"][0]["id"], 1);
    assert_eq!(train["categories"][0]["name"], "cat");
    assert_eq!(train["categories"].as_array().unwrap().len(), 1);
    assert_eq!(train["images"][0]["id"], 1);
    assert_eq!(train["annotations"][0]["image_id"], 1);

    let bbox: Vec<f64> = train["annotations"][0]["bbox"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    let expected = [10.5, 5.0, 40.0 - 10.5, 25.25 - 5.0];
    for (got, want) in bbox.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "bbox {bbox:?} != {expected:?}");
    }

    assert_eq!(test["images"].as_array().unwrap().len(), 1);
    assert!(test["annotations"].as_array().unwrap().is_empty());
}

#[test]
fn cvat_coco_cvat_roundtrip_preserves_content() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    let coco = temp.path().join("coco");
    let back = temp.path().join("cvat_back");
    create_cvat_dataset(&src);

    convert(Format::Cvat, Format::Coco, &src, &coco, &ConvertOptions::default()).expect("to coco");
    convert(Format::Coco, Format::Cvat, &coco, &back, &ConvertOptions::default()).expect("to cvat");

    let original = read_cvat_dir(&src).expect("read original");
    let restored = read_cvat_dir(&back).expect("read restored");

    assert_eq!(restored.images.len(), original.images.len());
    assert_eq!(restored.annotations.len(), original.annotations.len());
    assert_eq!(category_names(&restored), category_names(&original));

    let rect = |d: &Dataset| match d.annotations[0].geometry {
        Geometry::Rectangle(r) => r,
        ref other => panic!("expected rectangle, got {other:?}"),
    };
    let (a, b) = (rect(&original), rect(&restored));
    for (x, y) in [(a.x, b.x), (a.y, b.y), (a.w, b.w), (a.h, b.h)] {
        assert!((x - y).abs() <= 1e-6);
    }
}

#[test]
fn yolo_resplit_eight_two() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("yolo");
    let out = temp.path().join("resplit");
    create_yolo_dataset(&src, 10);

    let opts = ConvertOptions {
        split: Some(
            SplitPlan::new(vec![
                SplitRatio {
                    subset: "train".into(),
                    ratio: 0.8,
                },
                SplitRatio {
                    subset: "val".into(),
                    ratio: 0.2,
                },
            ])
            .expect("plan"),
        ),
        ..Default::default()
    };
    let report = convert(Format::Yolo, Format::Yolo, &src, &out, &opts).expect("convert");
    assert!(report.has_code(ConversionIssueCode::SubsetsResplit));

    assert_eq!(count_files(&out.join("images/train")), 8);
    assert_eq!(count_files(&out.join("images/val")), 2);
    assert_eq!(count_label_lines(&out.join("labels")), count_label_lines(&src.join("labels")));

    let restored = read_yolo_dir(&out, &YoloReadOptions::default()).expect("reread");
    assert_eq!(restored.images.len(), 10);
    assert_eq!(restored.annotations.len(), 10);
}

#[test]
fn seeded_resplit_is_reproducible() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("yolo");
    create_yolo_dataset(&src, 10);

    let plan = SplitPlan::new(vec![
        SplitRatio {
            subset: "train".into(),
            ratio: 0.5,
        },
        SplitRatio {
            subset: "val".into(),
            ratio: 0.5,
        },
    ])
    .expect("plan");
    let opts = ConvertOptions {
        split: Some(plan),
        seed: Some(42),
        ..Default::default()
    };

    let listing = |root: &Path| -> BTreeSet<String> {
        fs::read_dir(root.join("images/val"))
            .expect("val dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect()
    };

    let first = temp.path().join("first");
    let second = temp.path().join("second");
    convert(Format::Yolo, Format::Yolo, &src, &first, &opts).expect("first");
    convert(Format::Yolo, Format::Yolo, &src, &second, &opts).expect("second");
    assert_eq!(listing(&first), listing(&second));
    assert_eq!(listing(&first).len(), 5);
}

#[test]
fn subset_remap_renames_output_subsets() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    let out = temp.path().join("yolo");
    create_cvat_dataset(&src);

    let mut subset_map = SubsetMap::new();
    subset_map.insert("Train", "train").expect("map");
    subset_map.insert("Test", "val").expect("map");
    let opts = ConvertOptions {
        subset_map,
        ..Default::default()
    };

    let report = convert(Format::Cvat, Format::Yolo, &src, &out, &opts).expect("convert");
    assert!(!report.has_code(ConversionIssueCode::NonStandardYoloSubsets));
    assert_eq!(report.subsets, vec!["train", "val"]);
    assert!(out.join("images/train/a.bmp").is_file());
    assert!(out.join("labels/val/b.txt").is_file());

    let restored = read_yolo_dir(&out, &YoloReadOptions::default()).expect("reread");
    assert_eq!(restored.images.len(), 2);
    assert_eq!(restored.annotations.len(), 1);
}

#[test]
fn remap_onto_existing_subset_is_a_conflict() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    let out = temp.path().join("out");
    create_cvat_dataset(&src);

    let mut subset_map = SubsetMap::new();
    subset_map.insert("Train", "Test").expect("map");
    let opts = ConvertOptions {
        subset_map,
        ..Default::default()
    };

    let err = convert(Format::Cvat, Format::Coco, &src, &out, &opts).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!out.exists());
}

#[test]
fn cvat_to_imagenet_crops_each_box() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    let out = temp.path().join("imagenet");
    create_cvat_dataset(&src);

    let report =
        convert(Format::Cvat, Format::ImageNet, &src, &out, &ConvertOptions::default()).expect("convert");

    assert!(out.join("Train/cat/a_0.jpg").is_file());
    assert!(out.join("Test/cat").is_dir());
    assert!(report.has_code(ConversionIssueCode::UnannotatedImagesSkipped));
    assert_eq!(report.output.images, 1);

    let restored = read_imagenet_dir(&out).expect("reread");
    assert_eq!(restored.images.len(), 1);
    assert_eq!(restored.subsets, vec!["Test", "Train"]);
}

#[test]
fn coco_read_back_matches_cvat_source() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    let out = temp.path().join("coco");
    create_cvat_dataset(&src);

    convert(Format::Cvat, Format::Coco, &src, &out, &ConvertOptions::default()).expect("convert");
    let coco = read_coco_dir(&out).expect("read coco");

    assert_eq!(coco.id_base, 1);
    assert_eq!(coco.categories[0].id.as_u64(), 1);
    assert_eq!(coco.images.len(), 2);
    let ids: BTreeSet<u64> = coco.images.iter().map(|i| i.id.as_u64()).collect();
    assert_eq!(ids.len(), 2, "image ids are unique across subset files");
}

fn train_only() -> ConvertOptions {
    ConvertOptions {
        split: Some(
            SplitPlan::new(vec![SplitRatio {
                subset: "train".into(),
                ratio: 1.0,
            }])
            .expect("plan"),
        ),
        ..Default::default()
    }
}

#[test]
fn resplit_onto_repeated_frame_names_is_a_collision() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    create_cvat_repeated_frames(&src);

    for to in [Format::Yolo, Format::Cvat, Format::Coco] {
        let out = temp.path().join(format!("out_{to}"));
        let err = convert(Format::Cvat, to, &src, &out, &train_only()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict, "{to}: {err}");
        assert!(err.to_string().contains("frame_000000"), "{to}: {err}");
        assert!(!out.join("images/train/frame_000000.bmp").exists());
        assert!(!out.join("labels/train/frame_000000.txt").exists());
    }
}

#[test]
fn repeated_frame_names_in_separate_subsets_still_convert() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    let out = temp.path().join("yolo");
    create_cvat_repeated_frames(&src);

    let mut subset_map = SubsetMap::new();
    subset_map.insert("Train", "train").expect("map");
    subset_map.insert("Test", "val").expect("map");
    let opts = ConvertOptions {
        subset_map,
        ..Default::default()
    };
    convert(Format::Cvat, Format::Yolo, &src, &out, &opts).expect("convert");

    let restored = read_yolo_dir(&out, &YoloReadOptions::default()).expect("reread");
    assert_eq!(restored.images.len(), 2);
    assert_eq!(restored.annotations.len(), 3);
}

#[test]
fn imagenet_crops_sharing_a_stem_collide() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("cvat");
    let out = temp.path().join("imagenet");
    create_cvat_shared_stem(&src);

    let err = convert(Format::Cvat, Format::ImageNet, &src, &out, &ConvertOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("a_0.jpg"), "{err}");
    assert!(!out.join("train/cat/a_0.jpg").exists());
}
