use assert_cmd::cargo::cargo_bin_cmd;
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Write a Letter-sized PDF with one line of Helvetica text per page.
fn write_pdf(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for line in lines {
        let content = format!("BT /F1 12 Tf 72 720 Td ({line}) Tj ET");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        kids.push(Object::Reference(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        })));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => lines.len() as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let path = dir.join(name);
    doc.save(&path).expect("sample pdf should be written");
    path
}

fn page_content(path: &Path, page: u32) -> String {
    let doc = Document::load(path).expect("output should be a readable pdf");
    let page_id = doc.get_pages()[&page];
    String::from_utf8_lossy(&doc.get_page_content(page_id).expect("page content")).into_owned()
}

#[test]
fn info_emits_stable_json_contract() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "small.pdf", &["First", "Second"]);

    let output = cargo_bin_cmd!("pdf-overlay")
        .arg("info")
        .arg(&pdf)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let mut value: Value =
        serde_json::from_slice(&output).expect("stdout should contain valid json");
    value["path"] = Value::String("<FIXTURE>".to_owned());

    assert_eq!(
        value,
        json!({
            "path": "<FIXTURE>",
            "page_count": 2,
            "pages": [
                { "page": 1, "width": 612.0, "height": 792.0 },
                { "page": 2, "width": 612.0, "height": 792.0 },
            ],
        })
    );
}

#[test]
fn render_writes_png_at_requested_scale() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "medium.pdf", &["One", "Two"]);
    let output_path = temp.path().join("page.png");

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("render")
        .arg(&pdf)
        .arg("--page")
        .arg("2")
        .arg("--scale")
        .arg("0.5")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success();

    assert!(output_path.exists(), "render output file should exist");

    let image = image::open(&output_path).expect("render should be readable image");
    assert_eq!((image.width(), image.height()), (306, 396));
}

#[test]
fn render_clamps_scale_to_configured_maximum() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "zoom.pdf", &["Zoom"]);
    let output_path = temp.path().join("zoom.png");
    fs::write(
        temp.path().join("preferences.json"),
        r#"{"version": 1, "preferences": {"min_scale": 0.25, "max_scale": 0.5}}"#,
    )
    .expect("preferences should be written");

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("render")
        .arg(&pdf)
        .arg("--scale")
        .arg("1e9")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success();

    let image = image::open(&output_path).expect("render should be readable image");
    assert_eq!((image.width(), image.height()), (306, 396));
}

#[test]
fn render_rejects_non_finite_scale() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "nan.pdf", &["Zoom"]);

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("render")
        .arg(&pdf)
        .arg("--scale")
        .arg("NaN")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--scale must be a finite number"));
}

#[test]
fn render_rejects_page_out_of_range() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "one.pdf", &["Only"]);

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("render")
        .arg(&pdf)
        .arg("--page")
        .arg("4")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--page must be between 1 and 1"));
}

#[test]
fn text_items_lists_page_text() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "report.pdf", &["Quarterly report"]);

    let output = cargo_bin_cmd!("pdf-overlay")
        .arg("text-items")
        .arg(&pdf)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let items: Value = serde_json::from_slice(&output).expect("stdout should contain valid json");
    assert_eq!(items[0]["text"], "Quarterly report");
    assert_eq!(items[0]["font_size_pt"], 12.0);
    let x = items[0]["bounds"]["origin"]["x"].as_f64().expect("x");
    assert!((x - 72.0 / 612.0 * 100.0).abs() < 1e-3);
}

#[test]
fn apply_writes_prefixed_output_next_to_input() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "invoice.pdf", &["Invoice", "Terms"]);
    let annotations = temp.path().join("annotations.json");
    fs::write(
        &annotations,
        r##"[
            {"type": "text", "page": 2, "x": 10, "y": 10, "text": "Approved", "color": "#ff0000"},
            {"type": "rectangle", "page": 1, "x": 0, "y": 0, "width": 10, "height": 5}
        ]"##,
    )
    .expect("annotations should be written");

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("apply")
        .arg(&pdf)
        .arg("--annotations")
        .arg(&annotations)
        .assert()
        .success()
        .stdout(predicate::str::contains("edited_invoice.pdf"));

    let output = temp.path().join("edited_invoice.pdf");
    let first = page_content(&output, 1);
    let second = page_content(&output, 2);

    assert!(first.contains("0 752.4 61.2 39.6 re"));
    assert!(!first.contains("Approved"));
    assert!(second.contains("1 0 0 rg"));
    assert!(second.contains("(Approved) Tj"));
}

#[test]
fn apply_rewrite_patches_existing_text() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "letter.pdf", &["Dear Sir"]);
    let annotations = temp.path().join("rewrite.json");
    // The run starts at 72pt from the left and its top sits near 63pt from the top.
    fs::write(
        &annotations,
        r#"[{"type": "rewrite", "page": 1, "x": 12.5, "y": 8.5, "text": "Dear Madam"}]"#,
    )
    .expect("annotations should be written");
    let output = temp.path().join("out/rewritten.pdf");

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("apply")
        .arg(&pdf)
        .arg("--annotations")
        .arg(&annotations)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let content = page_content(&output, 1);
    let patch = content.find("1 1 1 rg").expect("patch drawn");
    let text = content.find("(Dear Madam) Tj").expect("replacement drawn");
    assert!(patch < text);
}

#[test]
fn apply_rewrite_without_text_fails() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "blank.pdf", &["Header"]);
    let annotations = temp.path().join("rewrite.json");
    fs::write(&annotations, r#"[{"type": "rewrite", "page": 1, "x": 90, "y": 90, "text": "x"}]"#)
        .expect("annotations should be written");

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("apply")
        .arg(&pdf)
        .arg("--annotations")
        .arg(&annotations)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no page text at (90, 90)"));
}

#[test]
fn apply_fails_atomically_for_unencodable_text() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "memo.pdf", &["Memo"]);
    let annotations = temp.path().join("annotations.json");
    fs::write(&annotations, r#"[{"type": "text", "page": 1, "x": 5, "y": 5, "text": "日本"}]"#)
        .expect("annotations should be written");

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("apply")
        .arg(&pdf)
        .arg("--annotations")
        .arg(&annotations)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not available in the export font"));

    assert!(!temp.path().join("edited_memo.pdf").exists());
}

#[test]
fn apply_rejects_placement_on_missing_page() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "short.pdf", &["Only"]);
    let annotations = temp.path().join("annotations.json");
    fs::write(&annotations, r#"[{"type": "rectangle", "page": 3, "x": 5, "y": 5}]"#)
        .expect("annotations should be written");

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("apply")
        .arg(&pdf)
        .arg("--annotations")
        .arg(&annotations)
        .assert()
        .failure()
        .stderr(predicate::str::contains("placement #1 could not be applied"));
}

#[test]
fn config_path_honours_config_dir() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("config")
        .arg("path")
        .assert()
        .success()
        .stdout(predicate::str::contains("preferences.json"));
}

#[test]
fn config_show_prints_defaults() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    let output = cargo_bin_cmd!("pdf-overlay")
        .arg("--config-dir")
        .arg(temp.path())
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: Value = serde_json::from_slice(&output).expect("stdout should contain valid json");
    assert_eq!(value["output_prefix"], "edited_");
    assert_eq!(value["export_font"], json!({ "kind": "standard", "font": "helvetica" }));
}

#[test]
fn info_fails_for_missing_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("pdf-overlay")
        .arg("info")
        .arg(temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = temp.path().join("invalid.pdf");
    fs::write(&path, b"this is not a pdf").expect("file should be written");

    cargo_bin_cmd!("pdf-overlay")
        .arg("info")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open PDF"));
}

#[test]
fn info_fails_for_encrypted_marker_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_pdf(temp.path(), "locked.pdf", &["Secret"]);
    let mut bytes = fs::read(&pdf).expect("pdf should be readable");
    bytes.extend_from_slice(b"\n%/Encrypt\n");
    fs::write(&pdf, bytes).expect("pdf should be rewritten");

    cargo_bin_cmd!("pdf-overlay")
        .arg("info")
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encrypted PDFs are not supported"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("pdf-overlay")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
