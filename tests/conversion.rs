//! Conversion Invariant Tests
//!
//! End-to-end guarantees over real directory trees: the converted
//! package tracks through the legacy runtime, re-running changes
//! nothing, and fatal conditions abort before writing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use risefix_core::diagnose::{diagnose, SUCCESS_VERDICT};
use risefix_core::patch::apply_patches;
use risefix_core::{ConversionPipeline, ConvertError};

const DRIVER_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head lang="en">
    <title>Sample Course</title>
    <script type="text/javascript" src="../tc-config.js"></script>
    <script type="text/javascript" src="lib/rise-runtime.js"></script>
</head>
<body>
<script type="text/javascript">
var LMSProxySelections = ["SCORM", "TCAPI"];
var api = pick(LMSProxySelections, window.parent, window.top);
</script>
</body>
</html>
"#;

const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<tincan xmlns="http://projecttincan.com/tincan.xsd">
  <activities>
    <activity id="http://example.com/course" type="http://adlnet.gov/expapi/activities/course">
      <name>Sample Course</name>
      <launch lang="und">scormdriver/index.html</launch>
    </activity>
  </activities>
</tincan>
"#;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn build_new_export(root: &Path) {
    write(root, "scormdriver/index.html", DRIVER_PAGE);
    write(root, "tincan.xml", MANIFEST);
    write(root, "tc-config.js", "var TC_CONFIG = {};");
    write(root, "lib/rise-runtime.js", "window.RiseRuntime = {};");
    write(root, "scormcontent/assets/fonts/course.css", "body {}");
}

fn build_donor(root: &Path) {
    write(root, "lib/tincan.js", "/* legacy TinCan runtime */");
    write(
        root,
        "lib/lms.js",
        "function lms() { return window.LMSProxy || {}; }",
    );
}

/// Every file under `root`, keyed by relative path.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
            out.insert(rel, fs::read(entry.path()).unwrap());
        }
    }
    out
}

#[test]
fn end_to_end_conversion_restores_legacy_tracking() {
    let new_export = TempDir::new().unwrap();
    let donor = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();
    let out = out_root.path().join("fixed");
    build_new_export(new_export.path());
    build_donor(donor.path());

    let summary = ConversionPipeline::new(new_export.path(), donor.path(), &out)
        .run()
        .unwrap();

    // Legacy libs merged from the donor.
    assert_eq!(
        fs::read_to_string(out.join("lib/tincan.js")).unwrap(),
        "/* legacy TinCan runtime */"
    );
    assert!(out.join("lib/lms.js").exists());
    assert_eq!(summary.merged.len(), 2);

    // Entry pages flattened, derived, and proxy-initialised.
    let index = fs::read_to_string(out.join("index.html")).unwrap();
    assert!(index.contains("window.LMSProxy = lms();"));
    assert!(index.contains("src=\"tc-config.js\""));
    assert!(index.contains("pick(LMSProxySelections, window.LMSProxy"));
    assert!(!index.contains("rise-runtime.js"));
    assert!(out.join("index_lms.html").exists());
    assert!(summary.derived_lms_entry);

    // New runtime bridge dropped, nested assets flattened.
    assert!(!out.join("lib/rise-runtime.js").exists());
    assert!(out.join("assets/course.css").exists());

    // Manifest advertises the flattened entry page.
    let manifest = fs::read_to_string(out.join("tincan.xml")).unwrap();
    assert!(manifest.contains("<launch lang=\"und\">index.html</launch>"));

    // All ERROR-severity checks pass, with the exact summary line.
    let report = diagnose(&out).unwrap();
    assert!(report.passed(), "{}", report.render());
    assert_eq!(report.verdict, SUCCESS_VERDICT);
}

#[test]
fn pipeline_is_deterministic_across_runs() {
    let new_export = TempDir::new().unwrap();
    let donor = TempDir::new().unwrap();
    build_new_export(new_export.path());
    build_donor(donor.path());

    let out_root = TempDir::new().unwrap();
    let out_a = out_root.path().join("a");
    let out_b = out_root.path().join("b");

    ConversionPipeline::new(new_export.path(), donor.path(), &out_a)
        .run()
        .unwrap();
    ConversionPipeline::new(new_export.path(), donor.path(), &out_b)
        .run()
        .unwrap();

    assert_eq!(snapshot(&out_a), snapshot(&out_b));
}

#[test]
fn second_patch_pass_changes_nothing() {
    let new_export = TempDir::new().unwrap();
    let donor = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();
    let out = out_root.path().join("fixed");
    build_new_export(new_export.path());
    build_donor(donor.path());

    ConversionPipeline::new(new_export.path(), donor.path(), &out)
        .run()
        .unwrap();

    let before = snapshot(&out);
    apply_patches(&out).unwrap();
    assert_eq!(before, snapshot(&out));
}

#[cfg(feature = "test-hooks")]
#[test]
fn second_patch_pass_writes_no_files() {
    let new_export = TempDir::new().unwrap();
    let donor = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();
    let out = out_root.path().join("fixed");
    build_new_export(new_export.path());
    build_donor(donor.path());

    ConversionPipeline::new(new_export.path(), donor.path(), &out)
        .run()
        .unwrap();

    risefix_core::patch::reset_patch_write_count();
    apply_patches(&out).unwrap();
    assert_eq!(risefix_core::patch::get_patch_write_count(), 0);
}

#[test]
fn filename_collision_aborts_before_any_write() {
    let new_export = TempDir::new().unwrap();
    let donor = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();
    let out = out_root.path().join("fixed");
    build_new_export(new_export.path());
    build_donor(donor.path());
    write(new_export.path(), "scormcontent/assets/a/logo.png", "a");
    write(new_export.path(), "scormcontent/assets/b/logo.png", "b");

    let err = ConversionPipeline::new(new_export.path(), donor.path(), &out)
        .run()
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("scormcontent/assets/a/logo.png"), "{message}");
    assert!(message.contains("scormcontent/assets/b/logo.png"), "{message}");
    assert!(!out.exists(), "collision must abort before any output write");
}

#[test]
fn missing_required_donor_asset_is_fatal_and_named() {
    let new_export = TempDir::new().unwrap();
    let donor = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();
    let out = out_root.path().join("fixed");
    build_new_export(new_export.path());
    write(donor.path(), "lib/tincan.js", "/* legacy TinCan runtime */");

    let err = ConversionPipeline::new(new_export.path(), donor.path(), &out)
        .run()
        .unwrap_err();

    assert!(err.to_string().contains("lib/lms.js"));
    assert!(err.to_string().contains("donor package"));
}

#[test]
fn missing_manifest_is_a_precondition_failure() {
    let new_export = TempDir::new().unwrap();
    let donor = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();
    let out = out_root.path().join("fixed");
    build_new_export(new_export.path());
    build_donor(donor.path());
    fs::remove_file(new_export.path().join("tincan.xml")).unwrap();

    let err = ConversionPipeline::new(new_export.path(), donor.path(), &out)
        .run()
        .unwrap_err();

    match err {
        ConvertError::MissingSourceFile(name) => assert_eq!(name, "tincan.xml"),
        other => panic!("expected precondition failure, got {other:?}"),
    }
    assert!(!out.exists(), "precondition failure must not create output");
}

#[test]
fn non_empty_output_is_rejected() {
    let new_export = TempDir::new().unwrap();
    let donor = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    build_new_export(new_export.path());
    build_donor(donor.path());
    write(out.path(), "leftover.txt", "previous run");

    let err = ConversionPipeline::new(new_export.path(), donor.path(), out.path())
        .run()
        .unwrap_err();

    assert!(matches!(err, ConvertError::OutputNotEmpty(_)));
    assert_eq!(
        fs::read_to_string(out.path().join("leftover.txt")).unwrap(),
        "previous run"
    );
}

#[test]
fn validator_flags_hand_built_tree_without_proxy() {
    let out = TempDir::new().unwrap();
    write(out.path(), "index.html", "<html><head></head></html>");
    write(out.path(), "index_lms.html", "<html><head></head></html>");
    write(out.path(), "tincan.xml", "<launch lang=\"und\">index.html</launch>");
    write(out.path(), "lib/tincan.js", "");
    write(out.path(), "lib/lms.js", "");

    let report = diagnose(out.path()).unwrap();
    assert!(!report.passed());
    let proxy = report
        .checks
        .iter()
        .find(|c| c.name == "LMSProxy init (index.html)")
        .unwrap();
    assert!(!proxy.passed);
    assert!(report.verdict.contains("critical check"));
}
