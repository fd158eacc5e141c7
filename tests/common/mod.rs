#![allow(dead_code)]

use std::fs;
use std::path::Path;

pub fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    let row_stride = (width * 3).div_ceil(4) * 4;
    let pixel_array_size = row_stride * height;
    let file_size = 54 + pixel_array_size;

    let mut bytes = Vec::with_capacity(file_size as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_size.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&54u32.to_le_bytes());

    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.resize(file_size as usize, 0);
    bytes
}

pub fn write_bmp(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bmp_bytes(width, height)).expect("write bmp file");
}

/// CVAT project with subsets Train/Test, one label, one box on the Train image.
pub const CVAT_TRAIN_TEST_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<annotations>
  <version>1.1</version>
  <meta>
    <project>
      <name>pets</name>
      <labels>
        <label><name>cat</name><type>rectangle</type><attributes /></label>
      </labels>
      <subsets>Train
Test</subsets>
    </project>
  </meta>
  <image id="0" name="a.bmp" subset="Train" width="100" height="50">
    <box label="cat" occluded="0" xtl="10.5" ytl="5" xbr="40" ybr="25.25" z_order="0" />
  </image>
  <image id="1" name="b.bmp" subset="Test" width="80" height="60">
  </image>
</annotations>
"#;

pub fn create_cvat_dataset(root: &Path) {
    fs::create_dir_all(root).expect("create cvat root");
    fs::write(root.join("annotations.xml"), CVAT_TRAIN_TEST_XML).expect("write annotations.xml");
    write_bmp(&root.join("images/Train/a.bmp"), 100, 50);
    write_bmp(&root.join("images/Test/b.bmp"), 80, 60);
}

/// CVAT project whose two tasks both start at `frame_000000.bmp`, one box
/// in Train and two in Test.
pub const CVAT_REPEATED_FRAMES_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<annotations>
  <version>1.1</version>
  <meta>
    <project>
      <name>frames</name>
      <labels>
        <label><name>cat</name><type>rectangle</type><attributes /></label>
      </labels>
      <subsets>Train
Test</subsets>
    </project>
  </meta>
  <image id="0" name="frame_000000.bmp" subset="Train" width="40" height="30">
    <box label="cat" occluded="0" xtl="1" ytl="1" xbr="10" ybr="10" z_order="0" />
  </image>
  <image id="1" name="frame_000000.bmp" subset="Test" width="40" height="30">
    <box label="cat" occluded="0" xtl="2" ytl="2" xbr="20" ybr="20" z_order="0" />
    <box label="cat" occluded="0" xtl="5" ytl="5" xbr="30" ybr="25" z_order="0" />
  </image>
</annotations>
"#;

pub fn create_cvat_repeated_frames(root: &Path) {
    fs::create_dir_all(root).expect("create cvat root");
    fs::write(root.join("annotations.xml"), CVAT_REPEATED_FRAMES_XML).expect("write annotations.xml");
    write_bmp(&root.join("images/Train/frame_000000.bmp"), 40, 30);
    write_bmp(&root.join("images/Test/frame_000000.bmp"), 40, 30);
}

/// CVAT project with `a.bmp` and `a.png` side by side, one box each.
pub const CVAT_SHARED_STEM_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<annotations>
  <version>1.1</version>
  <meta>
    <project>
      <name>stems</name>
      <labels>
        <label><name>cat</name><type>rectangle</type><attributes /></label>
      </labels>
      <subsets>train</subsets>
    </project>
  </meta>
  <image id="0" name="a.bmp" subset="train" width="40" height="30">
    <box label="cat" occluded="0" xtl="1" ytl="1" xbr="10" ybr="10" z_order="0" />
  </image>
  <image id="1" name="a.png" subset="train" width="40" height="30">
    <box label="cat" occluded="0" xtl="2" ytl="2" xbr="20" ybr="20" z_order="0" />
  </image>
</annotations>
"#;

pub fn create_cvat_shared_stem(root: &Path) {
    fs::create_dir_all(root).expect("create cvat root");
    fs::write(root.join("annotations.xml"), CVAT_SHARED_STEM_XML).expect("write annotations.xml");
    write_bmp(&root.join("images/train/a.bmp"), 40, 30);
    write_bmp(&root.join("images/train/a.png"), 40, 30);
}

/// YOLO dataset with `count` images in train (one box each) and an empty val.
pub fn create_yolo_dataset(root: &Path, count: usize) {
    fs::create_dir_all(root.join("images/val")).expect("create val images");
    fs::create_dir_all(root.join("labels/val")).expect("create val labels");
    fs::create_dir_all(root.join("labels/train")).expect("create train labels");
    fs::write(
        root.join("data.yaml"),
        "train: images/train\nval: images/val\nnc: 2\nnames:\n  - person\n  - car\n",
    )
    .expect("write data.yaml");

    for idx in 0..count {
        write_bmp(&root.join(format!("images/train/img_{idx:02}.bmp")), 20, 10);
        fs::write(
            root.join(format!("labels/train/img_{idx:02}.txt")),
            format!("{} 0.500000 0.500000 0.250000 0.400000\n", idx % 2),
        )
        .expect("write label");
    }
}

/// ImageNet tree: train/{cat,dog}, val/{cat,dog}.
pub fn create_imagenet_dataset(root: &Path, prefix: &str) {
    write_bmp(&root.join(format!("train/cat/{prefix}_1.bmp")), 8, 8);
    write_bmp(&root.join(format!("train/dog/{prefix}_2.bmp")), 8, 8);
    write_bmp(&root.join(format!("val/cat/{prefix}_3.bmp")), 8, 8);
    fs::create_dir_all(root.join("val/dog")).expect("create empty class dir");
}

/// Label lines across every `.txt` under `labels_root`.
pub fn count_label_lines(labels_root: &Path) -> usize {
    walkdir::WalkDir::new(labels_root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "txt"))
        .map(|e| {
            fs::read_to_string(e.path())
                .expect("read label")
                .lines()
                .filter(|l| !l.trim().is_empty())
                .count()
        })
        .sum()
}

pub fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).filter(|e| e.path().is_file()).count())
        .unwrap_or(0)
}
