use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

mod common;
use common::{create_cvat_dataset, create_imagenet_dataset, create_yolo_dataset, write_bmp};

fn dsconv() -> Command {
    Command::cargo_bin("dsconv").unwrap()
}

#[test]
fn runs() {
    dsconv().assert().success();
}

#[test]
fn outputs_tool_name() {
    dsconv()
        .arg("-V")
        .assert()
        .success()
        .stdout(format!("dsconv {}\n", env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_lists_subcommands() {
    dsconv()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("convert"))
        .stdout(predicate::str::contains("merge-imagenet"))
        .stdout(predicate::str::contains("images-to-yolo"));
}

// Convert subcommand tests

#[test]
fn convert_cvat_to_coco_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("cvat");
    let out = temp.path().join("coco");
    create_cvat_dataset(&src);

    dsconv()
        .args(["convert", "--from", "cvat", "--to", "coco", "--src"])
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Converted cvat -> coco"))
        .stdout(predicate::str::contains("2 images, 1 categories, 1 annotations"));

    assert!(out.join("annotations/instances_Train.json").is_file());
    assert!(out.join("annotations/instances_Test.json").is_file());
    assert!(out.join("images/a.bmp").is_file());
}

#[test]
fn convert_json_report() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("cvat");
    let out = temp.path().join("yolo");
    create_cvat_dataset(&src);

    dsconv()
        .args(["convert", "--from", "cvat", "--to", "yolo", "--report", "json", "--src"])
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"to\": \"yolo\""))
        .stdout(predicate::str::contains("non_standard_yolo_subsets"));
}

#[test]
fn convert_with_map_and_split_fails_without_writing() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("cvat");
    let out = temp.path().join("out");
    create_cvat_dataset(&src);

    dsconv()
        .args(["convert", "--from", "cvat", "--to", "coco"])
        .args(["--subset-map", "Train:train", "--split-ratio", "train:1.0", "--src"])
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used together"));

    assert!(!out.exists());
}

#[test]
fn convert_into_existing_output_requires_force() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("cvat");
    let out = temp.path().join("out");
    create_cvat_dataset(&src);
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("stale.txt"), "old").unwrap();

    dsconv()
        .args(["convert", "--from", "cvat", "--to", "coco", "--src"])
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    assert!(out.join("stale.txt").exists());

    dsconv()
        .args(["convert", "--from", "cvat", "--to", "coco", "--force", "--src"])
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .success();
    assert!(!out.join("stale.txt").exists());
}

#[test]
fn convert_rejects_malformed_split_ratio() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("yolo");
    create_yolo_dataset(&src, 2);

    dsconv()
        .args(["convert", "--from", "yolo", "--to", "coco", "--split-ratio", "train=0.5", "--src"])
        .arg(&src)
        .arg("--output")
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("name:ratio"));
}

#[test]
fn convert_rejects_ratios_not_summing_to_one() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("yolo");
    let out = temp.path().join("out");
    create_yolo_dataset(&src, 2);

    dsconv()
        .args(["convert", "--from", "yolo", "--to", "coco"])
        .args(["--split-ratio", "train:0.5", "--split-ratio", "val:0.4", "--src"])
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .failure();
    assert!(!out.exists());
}

#[test]
fn convert_missing_source_fails() {
    let temp = tempfile::tempdir().unwrap();
    dsconv()
        .args(["convert", "--from", "coco", "--to", "cvat", "--src"])
        .arg(temp.path().join("missing"))
        .arg("--output")
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

// Validate subcommand tests

#[test]
fn validate_valid_dataset_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    create_cvat_dataset(temp.path());

    dsconv()
        .args(["validate", "--format", "cvat"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Validation passed"));
}

#[test]
fn validate_strict_fails_on_empty_subset() {
    let temp = tempfile::tempdir().unwrap();
    create_yolo_dataset(temp.path(), 1);

    dsconv()
        .args(["validate", "--format", "yolo", "--strict"])
        .arg(temp.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("EmptySubset"));
}

#[test]
fn validate_json_output_format() {
    let temp = tempfile::tempdir().unwrap();
    create_cvat_dataset(temp.path());

    dsconv()
        .args(["validate", "--format", "cvat", "--output", "json"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"error_count\": 0"))
        .stdout(predicate::str::contains("\"warning_count\": 0"));
}

// Merge and import tests

#[test]
fn merge_imagenet_needs_two_sources() {
    let temp = tempfile::tempdir().unwrap();
    let a = temp.path().join("a");
    create_imagenet_dataset(&a, "a");

    dsconv()
        .args(["merge-imagenet", "--src"])
        .arg(&a)
        .arg("--output")
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least two"));
}

#[test]
fn merge_imagenet_combines_sources() {
    let temp = tempfile::tempdir().unwrap();
    let a = temp.path().join("a");
    let b = temp.path().join("b");
    let out = temp.path().join("out");
    create_imagenet_dataset(&a, "a");
    create_imagenet_dataset(&b, "b");

    dsconv()
        .args(["merge-imagenet", "--src"])
        .arg(&a)
        .arg("--src")
        .arg(&b)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("6 images"));

    assert!(out.join("train/dog/a_2.bmp").is_file());
    assert!(out.join("val/cat/b_3.bmp").is_file());
}

#[test]
fn images_to_yolo_bootstraps_layout() {
    let temp = tempfile::tempdir().unwrap();
    let src = temp.path().join("frames");
    let out = temp.path().join("yolo");
    write_bmp(&src.join("f1.bmp"), 4, 4);
    write_bmp(&src.join("f2.bmp"), 4, 4);

    dsconv()
        .args(["images-to-yolo", "--class", "person", "--src"])
        .arg(&src)
        .arg("--output")
        .arg(&out)
        .assert()
        .success();

    assert!(out.join("images/train/f1.bmp").is_file());
    assert_eq!(fs::read_to_string(out.join("labels/train/f2.txt")).unwrap(), "");
    let yaml = fs::read_to_string(out.join("data.yaml")).unwrap();
    assert!(yaml.contains("person"));
}
