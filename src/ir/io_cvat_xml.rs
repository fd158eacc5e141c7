//! CVAT "for images" XML reader and writer.
//!
//! On-disk layout:
//!
//! ```text
//! <root>/annotations.xml
//! <root>/images/<subset>/<file_name>
//! ```
//!
//! Both project exports (`<meta><project>`) and single-task exports
//! (`<meta><task>`) are read. Supported annotation elements are `<box>`,
//! `<polygon>` and `<tag>`; anything else is rejected. The writer always emits
//! a project export with one task per subset.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};

use super::builder::DatasetBuilder;
use super::geometry::{Geometry, Point, Rect};
use super::media::{copy_image, require_file, source_of, OutputPlan};
use super::model::{Dataset, Image};
use super::ImageId;
use crate::error::DsconvError;

const CVAT_XML_FILE_NAME: &str = "annotations.xml";
const DEFAULT_SUBSET: &str = "default";

/// Read a CVAT dataset directory into the canonical model.
///
/// Every `<image>` must have its pixel file at `images/<subset>/<name>`.
pub fn read_cvat_dir(path: &Path) -> Result<Dataset, DsconvError> {
    let xml_path = path.join(CVAT_XML_FILE_NAME);
    if !xml_path.is_file() {
        return Err(DsconvError::InvalidDataset {
            path: path.to_path_buf(),
            message: format!("expected '{CVAT_XML_FILE_NAME}' at directory root"),
        });
    }

    let xml = fs::read_to_string(&xml_path).map_err(DsconvError::Io)?;
    let parsed = parse_cvat_xml(&xml, &xml_path)?;
    build_dataset(parsed, &xml_path, Some(&path.join("images")))
}

/// Write a dataset as a CVAT project export, copying images into place.
///
/// Two different source files landing on one `images/<subset>/<file>` path
/// fail with [`DsconvError::OutputCollision`] before anything is copied.
pub fn write_cvat_dir(path: &Path, dataset: &Dataset) -> Result<(), DsconvError> {
    let images_root = path.join("images");
    let mut plan = OutputPlan::new();
    let mut copies = Vec::new();
    for image in ordered_images(dataset) {
        let src = source_of(image)?;
        let dst = images_root.join(&image.subset).join(&image.file_name);
        if plan.claim_copy(dst.clone(), src)? {
            copies.push((src, dst));
        }
    }

    for subset in &dataset.subsets {
        fs::create_dir_all(images_root.join(subset)).map_err(DsconvError::Io)?;
    }
    for (src, dst) in copies {
        copy_image(src, &dst)?;
    }

    let xml = build_cvat_xml(dataset, &dumped_timestamp());
    let out_file = path.join(CVAT_XML_FILE_NAME);
    log::info!("Writing {}", out_file.display());
    fs::write(&out_file, xml).map_err(DsconvError::Io)
}

/// Parse CVAT XML from a string. Image files are not checked.
pub fn from_cvat_xml_str(xml: &str) -> Result<Dataset, DsconvError> {
    let path = Path::new("<string>");
    build_dataset(parse_cvat_xml(xml, path)?, path, None)
}

/// Parse CVAT XML from bytes (must be valid UTF-8). Image files are not checked.
pub fn from_cvat_xml_slice(bytes: &[u8]) -> Result<Dataset, DsconvError> {
    let xml = std::str::from_utf8(bytes).map_err(|source| DsconvError::CvatXmlParse {
        path: PathBuf::from("<bytes>"),
        message: format!("input is not valid UTF-8: {source}"),
    })?;
    let path = Path::new("<bytes>");
    build_dataset(parse_cvat_xml(xml, path)?, path, None)
}

/// Serialize a dataset to CVAT XML without touching the filesystem.
pub fn to_cvat_xml_string(dataset: &Dataset) -> String {
    build_cvat_xml(dataset, &dumped_timestamp())
}

#[derive(Debug, Default)]
struct ParsedCvat {
    project_name: Option<String>,
    /// `None` when the export declares no subsets.
    subsets: Option<Vec<String>>,
    /// `None` when the export has no label metadata at all.
    labels: Option<Vec<String>>,
    task_subsets: HashMap<u64, String>,
    /// Subset of a single-task export, used for images that name none.
    task_subset: Option<String>,
    images: Vec<ParsedImage>,
}

#[derive(Debug)]
struct ParsedImage {
    id: Option<u64>,
    name: String,
    subset: Option<String>,
    width: u32,
    height: u32,
    task_id: Option<u64>,
    shapes: Vec<ParsedShape>,
}

#[derive(Debug)]
struct ParsedShape {
    label: String,
    geometry: Geometry,
    occluded: bool,
}

fn parse_cvat_xml(xml: &str, path: &Path) -> Result<ParsedCvat, DsconvError> {
    let document = Document::parse(xml).map_err(|source| parse_error(path, source.to_string()))?;

    let root = document.root_element();
    if root.tag_name().name() != "annotations" {
        return Err(parse_error(path, "missing <annotations> root element"));
    }

    let mut parsed = ParsedCvat::default();
    if let Some(meta) = child_element(root, "meta") {
        parse_meta(meta, path, &mut parsed)?;
    }

    for image_node in root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "image")
    {
        parsed.images.push(parse_image_element(image_node, path)?);
    }

    Ok(parsed)
}

fn parse_meta(meta: Node<'_, '_>, path: &Path, out: &mut ParsedCvat) -> Result<(), DsconvError> {
    if let Some(project) = child_element(meta, "project") {
        out.project_name = optional_child_text(project, "name");
        out.subsets = child_element(project, "subsets").map(|node| split_subsets(node.text()));
        out.labels = child_element(project, "labels")
            .map(|labels| parse_labels(labels, path))
            .transpose()?;

        if let Some(tasks) = child_element(project, "tasks") {
            for task in tasks
                .children()
                .filter(|n| n.is_element() && n.tag_name().name() == "task")
            {
                let Some(raw_id) = optional_child_text(task, "id") else {
                    continue;
                };
                let id = raw_id
                    .parse::<u64>()
                    .map_err(|_| parse_error(path, format!("invalid task <id> '{raw_id}'")))?;
                if let Some(subset) = optional_child_text(task, "subset") {
                    out.task_subsets.insert(id, subset);
                }
            }
        }
        return Ok(());
    }

    if let Some(task) = child_element(meta, "task") {
        out.project_name = optional_child_text(task, "name");
        out.labels = child_element(task, "labels")
            .map(|labels| parse_labels(labels, path))
            .transpose()?;
        if let Some(subset) = optional_child_text(task, "subset") {
            if let Some(raw_id) = optional_child_text(task, "id") {
                if let Ok(id) = raw_id.parse::<u64>() {
                    out.task_subsets.insert(id, subset.clone());
                }
            }
            out.subsets = Some(vec![subset.clone()]);
            out.task_subset = Some(subset);
        }
    }

    Ok(())
}

fn parse_labels(labels: Node<'_, '_>, path: &Path) -> Result<Vec<String>, DsconvError> {
    labels
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "label")
        .map(|label| {
            optional_child_text(label, "name")
                .ok_or_else(|| parse_error(path, "missing <name> in <label>"))
        })
        .collect()
}

fn split_subsets(text: Option<&str>) -> Vec<String> {
    text.unwrap_or("")
        .split('\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_image_element(node: Node<'_, '_>, path: &Path) -> Result<ParsedImage, DsconvError> {
    let name = required_attr(node, "name", path, "<image>")?.to_string();
    let width = parse_u32_attr(node, "width", path)?;
    let height = parse_u32_attr(node, "height", path)?;
    let id = parse_optional_u64_attr(node, "id", path)?;
    let task_id = parse_optional_u64_attr(node, "task_id", path)?;
    let subset = node
        .attribute("subset")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);

    let mut shapes = Vec::new();
    for child in node.children().filter(|n| n.is_element()) {
        let tag = child.tag_name().name();
        let geometry = match tag {
            "box" => {
                let xtl = parse_f64_attr(child, "xtl", path, &name)?;
                let ytl = parse_f64_attr(child, "ytl", path, &name)?;
                let xbr = parse_f64_attr(child, "xbr", path, &name)?;
                let ybr = parse_f64_attr(child, "ybr", path, &name)?;
                Geometry::Rectangle(Rect::from_xyxy(xtl, ytl, xbr, ybr))
            }
            "polygon" => {
                let raw = required_attr(child, "points", path, "<polygon>")?;
                Geometry::Polygon {
                    points: parse_points(raw, path, &name)?,
                }
            }
            "tag" => Geometry::Tag,
            other => {
                return Err(parse_error(
                    path,
                    format!(
                        "image '{name}' contains unsupported annotation type <{other}>; \
                         only <box>, <polygon> and <tag> are supported"
                    ),
                ));
            }
        };

        let label = required_attr(child, "label", path, tag)?.to_string();
        let occluded = child
            .attribute("occluded")
            .map(|raw| raw.trim() == "1")
            .unwrap_or(false);

        shapes.push(ParsedShape {
            label,
            geometry,
            occluded,
        });
    }

    Ok(ParsedImage {
        id,
        name,
        subset,
        width,
        height,
        task_id,
        shapes,
    })
}

/// Parses `"x,y;x,y;..."`.
fn parse_points(raw: &str, path: &Path, image_name: &str) -> Result<Vec<Point>, DsconvError> {
    let mut points = Vec::new();
    for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (x, y) = pair.split_once(',').ok_or_else(|| {
            parse_error(
                path,
                format!("<polygon> in image '{image_name}' has malformed point '{pair}'"),
            )
        })?;
        let parse = |v: &str| {
            v.trim().parse::<f64>().map_err(|_| {
                parse_error(
                    path,
                    format!("<polygon> in image '{image_name}' has invalid coordinate '{v}'"),
                )
            })
        };
        points.push(Point::new(parse(x)?, parse(y)?));
    }

    if points.len() < 3 {
        return Err(parse_error(
            path,
            format!(
                "<polygon> in image '{image_name}' has {} point(s); at least 3 are required",
                points.len()
            ),
        ));
    }
    Ok(points)
}

fn build_dataset(
    parsed: ParsedCvat,
    path: &Path,
    images_root: Option<&Path>,
) -> Result<Dataset, DsconvError> {
    let mut builder = DatasetBuilder::new(path, 0);
    if let Some(name) = parsed.project_name.as_deref() {
        builder.set_name(name);
    }

    let declared_subsets = parsed.subsets.is_some();
    for subset in parsed.subsets.iter().flatten() {
        builder.add_subset(subset.clone())?;
    }

    let declared_labels = parsed.labels.is_some();
    for label in parsed.labels.iter().flatten() {
        builder.add_category(label.clone())?;
    }

    for image in parsed.images {
        let subset = image
            .subset
            .clone()
            .or_else(|| {
                image
                    .task_id
                    .and_then(|task| parsed.task_subsets.get(&task).cloned())
            })
            .or_else(|| parsed.task_subset.clone())
            .unwrap_or_else(|| DEFAULT_SUBSET.to_string());

        if !declared_subsets {
            builder.ensure_subset(&subset)?;
        }

        let id = match image.id {
            Some(id) => ImageId::new(id),
            None => builder.next_image_id(),
        };
        let mut canonical = Image::new(id, image.name.clone(), image.width, image.height, &subset);
        if let Some(task_id) = image.task_id {
            canonical = canonical.with_attribute("task_id", task_id.to_string());
        }
        if let Some(root) = images_root {
            let file = root.join(&subset).join(&image.name);
            require_file(&file)?;
            canonical = canonical.with_source_path(file);
        }
        let image_id = builder.add_image(canonical)?;

        for shape in image.shapes {
            let category_id = match builder.category_id(&shape.label) {
                Some(id) => id,
                None if !declared_labels => builder.add_category(shape.label.clone())?,
                None => {
                    return Err(parse_error(
                        path,
                        format!(
                            "image '{}' references label '{}' not declared in <meta>",
                            image.name, shape.label
                        ),
                    ));
                }
            };

            let mut attributes = BTreeMap::new();
            if shape.occluded {
                attributes.insert("occluded".to_string(), "1".to_string());
            }
            builder.add_annotation(image_id, category_id, shape.geometry, attributes)?;
        }
    }

    let dataset = builder.finish();
    log::info!(
        "Read CVAT dataset: {} subset(s), {} label(s), {} image(s), {} annotation(s)",
        dataset.subsets.len(),
        dataset.categories.len(),
        dataset.images.len(),
        dataset.annotations.len()
    );
    Ok(dataset)
}

/// Images grouped by subset in declaration order, dataset order within a subset.
fn ordered_images(dataset: &Dataset) -> Vec<&Image> {
    dataset
        .subsets
        .iter()
        .flat_map(|subset| dataset.images_in_subset(subset))
        .collect()
}

/// CVAT label type derived from the geometries that use each category.
fn label_types(dataset: &Dataset) -> BTreeMap<super::CategoryId, &'static str> {
    let mut kinds: BTreeMap<super::CategoryId, BTreeSet<&'static str>> = BTreeMap::new();
    for ann in &dataset.annotations {
        kinds
            .entry(ann.category_id)
            .or_default()
            .insert(ann.geometry.kind());
    }

    dataset
        .categories
        .iter()
        .map(|cat| {
            let kind = match kinds.get(&cat.id) {
                None => "rectangle",
                Some(set) if set.len() == 1 => set.iter().next().copied().unwrap_or("any"),
                Some(_) => "any",
            };
            (cat.id, kind)
        })
        .collect()
}

fn build_cvat_xml(dataset: &Dataset, dumped: &str) -> String {
    let label_names = dataset.category_names();
    let label_types = label_types(dataset);
    let annotations_by_image = dataset.annotations_by_image();

    let mut xml = String::new();
    writeln!(xml, "<?xml version=\"1.0\" encoding=\"utf-8\"?>").expect("write to string");
    writeln!(xml, "<annotations>").expect("write to string");
    writeln!(xml, "  <version>1.1</version>").expect("write to string");
    writeln!(xml, "  <meta>").expect("write to string");
    writeln!(xml, "    <project>").expect("write to string");
    writeln!(
        xml,
        "      <name>{}</name>",
        xml_escape(dataset.name.as_deref().unwrap_or("dsconv export"))
    )
    .expect("write to string");
    writeln!(xml, "      <labels>").expect("write to string");
    for cat in &dataset.categories {
        writeln!(xml, "        <label>").expect("write to string");
        writeln!(xml, "          <name>{}</name>", xml_escape(&cat.name)).expect("write to string");
        writeln!(
            xml,
            "          <type>{}</type>",
            label_types.get(&cat.id).copied().unwrap_or("rectangle")
        )
        .expect("write to string");
        writeln!(xml, "          <attributes />").expect("write to string");
        writeln!(xml, "        </label>").expect("write to string");
    }
    writeln!(xml, "      </labels>").expect("write to string");
    writeln!(
        xml,
        "      <subsets>{}</subsets>",
        xml_escape(&dataset.subsets.join("\n"))
    )
    .expect("write to string");
    writeln!(xml, "      <tasks>").expect("write to string");
    for (task_id, subset) in dataset.subsets.iter().enumerate() {
        writeln!(xml, "        <task>").expect("write to string");
        writeln!(xml, "          <id>{task_id}</id>").expect("write to string");
        writeln!(xml, "          <name>{}</name>", xml_escape(subset)).expect("write to string");
        writeln!(xml, "          <subset>{}</subset>", xml_escape(subset))
            .expect("write to string");
        writeln!(
            xml,
            "          <size>{}</size>",
            dataset.images_in_subset(subset).count()
        )
        .expect("write to string");
        writeln!(xml, "        </task>").expect("write to string");
    }
    writeln!(xml, "      </tasks>").expect("write to string");
    writeln!(xml, "    </project>").expect("write to string");
    writeln!(xml, "    <dumped>{}</dumped>", xml_escape(dumped)).expect("write to string");
    writeln!(xml, "  </meta>").expect("write to string");

    let task_by_subset: HashMap<&str, usize> = dataset
        .subsets
        .iter()
        .enumerate()
        .map(|(idx, s)| (s.as_str(), idx))
        .collect();

    for (idx, image) in ordered_images(dataset).into_iter().enumerate() {
        writeln!(
            xml,
            "  <image id=\"{}\" name=\"{}\" subset=\"{}\" width=\"{}\" height=\"{}\" task_id=\"{}\">",
            idx,
            xml_escape(&image.file_name),
            xml_escape(&image.subset),
            image.width,
            image.height,
            task_by_subset.get(image.subset.as_str()).copied().unwrap_or(0)
        )
        .expect("write to string");

        for ann in annotations_by_image.get(&image.id).into_iter().flatten() {
            let label = xml_escape(label_names.get(&ann.category_id).copied().unwrap_or(""));
            let occluded = if ann.attributes.get("occluded").map(String::as_str) == Some("1") {
                1
            } else {
                0
            };

            match &ann.geometry {
                Geometry::Rectangle(rect) => {
                    let (x1, y1, x2, y2) = rect.to_xyxy();
                    writeln!(
                        xml,
                        "    <box label=\"{label}\" source=\"manual\" occluded=\"{occluded}\" xtl=\"{x1}\" ytl=\"{y1}\" xbr=\"{x2}\" ybr=\"{y2}\" z_order=\"0\" />"
                    )
                    .expect("write to string");
                }
                Geometry::Polygon { points } => {
                    let points = points
                        .iter()
                        .map(|p| format!("{},{}", p.x, p.y))
                        .collect::<Vec<_>>()
                        .join(";");
                    writeln!(
                        xml,
                        "    <polygon label=\"{label}\" source=\"manual\" occluded=\"{occluded}\" points=\"{points}\" z_order=\"0\" />"
                    )
                    .expect("write to string");
                }
                Geometry::Tag => {
                    writeln!(xml, "    <tag label=\"{label}\" source=\"manual\" />")
                        .expect("write to string");
                }
            }
        }

        writeln!(xml, "  </image>").expect("write to string");
    }

    writeln!(xml, "</annotations>").expect("write to string");
    xml
}

fn dumped_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.6f%:z")
        .to_string()
}

fn parse_error(path: &Path, message: impl Into<String>) -> DsconvError {
    DsconvError::CvatXmlParse {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == tag)
}

fn optional_child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    child_element(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

fn required_attr<'a>(
    node: Node<'a, '_>,
    attr: &str,
    path: &Path,
    context: &str,
) -> Result<&'a str, DsconvError> {
    node.attribute(attr)
        .ok_or_else(|| parse_error(path, format!("missing '{attr}' attribute in <{context}>")))
}

fn parse_u32_attr(node: Node<'_, '_>, attr: &str, path: &Path) -> Result<u32, DsconvError> {
    let raw = required_attr(node, attr, path, "image")?;
    raw.trim().parse::<u32>().map_err(|_| {
        parse_error(
            path,
            format!("invalid '{attr}' value '{raw}' in <image>; expected u32"),
        )
    })
}

fn parse_optional_u64_attr(
    node: Node<'_, '_>,
    attr: &str,
    path: &Path,
) -> Result<Option<u64>, DsconvError> {
    node.attribute(attr)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|raw| {
            raw.parse::<u64>().map_err(|_| {
                parse_error(
                    path,
                    format!("invalid <image {attr}> value '{raw}'; expected u64"),
                )
            })
        })
        .transpose()
}

fn parse_f64_attr(
    node: Node<'_, '_>,
    attr: &str,
    path: &Path,
    image_name: &str,
) -> Result<f64, DsconvError> {
    let raw = required_attr(node, attr, path, "box")?;
    raw.trim().parse::<f64>().map_err(|_| {
        parse_error(
            path,
            format!(
                "<box> in image '{image_name}' has invalid {attr}='{raw}'; expected floating-point number"
            ),
        )
    })
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
