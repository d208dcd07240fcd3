//! Diagnostic Validation - Structural Checks Over the Finished Package
//!
//! Checks produce structured results; the report maps results to a
//! verdict. The validator only reads, so it can diagnose any tree,
//! including one assembled by hand or by an earlier run.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::patch::{launch_target, NEW_RUNTIME_SCRIPT, PROXY_INIT_MARKER, SELECTIONS_PROXY_MARKER};
use crate::tree::{PackageTree, TreeError};
use crate::{LMS_ENTRY, MANIFEST_FILE, PRIMARY_ENTRY};

/// Overall verdict printed on full success. Downstream tooling greps
/// for this exact line.
pub const SUCCESS_VERDICT: &str = "Looks structurally sound for legacy xAPI tracking.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub severity: CheckSeverity,
    pub passed: bool,
    pub message: String,
}

/// One independent, order-insensitive predicate over the output tree.
pub trait DiagnosticCheck {
    fn name(&self) -> String;
    fn severity(&self) -> CheckSeverity;
    /// (passed, human message)
    fn evaluate(&self, tree: &PackageTree) -> (bool, String);
}

// --- Concrete Checks ---

struct FilePresent {
    path: &'static str,
}

impl DiagnosticCheck for FilePresent {
    fn name(&self) -> String {
        self.path.to_string()
    }

    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Error
    }

    fn evaluate(&self, tree: &PackageTree) -> (bool, String) {
        if tree.contains(self.path) {
            (true, format!("present at {}", self.path))
        } else {
            (false, format!("missing: {}", self.path))
        }
    }
}

struct ProxyInitialised {
    file: &'static str,
}

impl DiagnosticCheck for ProxyInitialised {
    fn name(&self) -> String {
        format!("LMSProxy init ({})", self.file)
    }

    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Error
    }

    fn evaluate(&self, tree: &PackageTree) -> (bool, String) {
        let content = tree.read_to_string(self.file).unwrap_or_default();
        if content.contains(PROXY_INIT_MARKER) {
            (true, "window.LMSProxy initialised".to_string())
        } else {
            (false, "window.LMSProxy initialisation missing".to_string())
        }
    }
}

struct SelectionsRouted {
    file: &'static str,
}

impl DiagnosticCheck for SelectionsRouted {
    fn name(&self) -> String {
        format!("LMSProxySelections routing ({})", self.file)
    }

    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Error
    }

    fn evaluate(&self, tree: &PackageTree) -> (bool, String) {
        let content = tree.read_to_string(self.file).unwrap_or_default();
        if !content.contains("LMSProxySelections") {
            (true, "no selection table in page".to_string())
        } else if content.contains(SELECTIONS_PROXY_MARKER) {
            (true, "selections use window.LMSProxy".to_string())
        } else {
            (
                false,
                "selections do not use window.LMSProxy (still window.parent?)".to_string(),
            )
        }
    }
}

struct LaunchResolvable;

impl DiagnosticCheck for LaunchResolvable {
    fn name(&self) -> String {
        "manifest launch target".to_string()
    }

    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Error
    }

    fn evaluate(&self, tree: &PackageTree) -> (bool, String) {
        let manifest = tree.read_to_string(MANIFEST_FILE).unwrap_or_default();
        match launch_target(&manifest) {
            Some(target) if tree.contains(&target) => {
                (true, format!("launches {}", target))
            }
            Some(target) => (
                false,
                format!("launch target {} does not exist in the package", target),
            ),
            None => (false, "manifest has no <launch> element".to_string()),
        }
    }
}

static ATTR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:src|href)\s*=\s*(?:"([^"]+)"|'([^']+)')"#).expect("static pattern compiles")
});

fn is_external(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("//")
        || reference.starts_with("data:")
        || reference.starts_with("mailto:")
        || reference.starts_with("javascript:")
        || reference.starts_with('#')
}

struct EntryReferencesResolve {
    file: &'static str,
}

impl DiagnosticCheck for EntryReferencesResolve {
    fn name(&self) -> String {
        format!("entry page references ({})", self.file)
    }

    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Error
    }

    fn evaluate(&self, tree: &PackageTree) -> (bool, String) {
        let content = tree.read_to_string(self.file).unwrap_or_default();

        let mut dangling = Vec::new();
        for caps in ATTR_REF.captures_iter(&content) {
            let reference = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            if is_external(reference) {
                continue;
            }
            // Drop query and fragment before resolving.
            let path = reference
                .split(['?', '#'])
                .next()
                .unwrap_or_default();
            if path.is_empty() {
                continue;
            }
            let path = path.strip_prefix("./").unwrap_or(path);
            if !tree.contains(path) {
                dangling.push(path.to_string());
            }
        }

        if dangling.is_empty() {
            (true, "all script/asset references resolve".to_string())
        } else {
            dangling.dedup();
            (false, format!("dangling references: {}", dangling.join(", ")))
        }
    }
}

/// Scan every text file for a needle, listing offenders.
fn scan_text_files(tree: &PackageTree, needles: &[&str]) -> Vec<String> {
    let mut offenders = Vec::new();
    for file in tree.files() {
        let is_text = file
            .extension()
            .map_or(false, |e| e == "html" || e == "js");
        if !is_text {
            continue;
        }
        let content = tree.read_to_string(file).unwrap_or_default();
        if needles.iter().any(|n| content.contains(n)) {
            offenders.push(file.display().to_string());
        }
    }
    offenders
}

struct NewRuntimeRemnants;

impl DiagnosticCheck for NewRuntimeRemnants {
    fn name(&self) -> String {
        "new runtime remnants".to_string()
    }

    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Error
    }

    fn evaluate(&self, tree: &PackageTree) -> (bool, String) {
        let offenders = scan_text_files(tree, &[NEW_RUNTIME_SCRIPT]);
        if offenders.is_empty() {
            (true, "no references to the new runtime bridge".to_string())
        } else {
            (
                false,
                format!(
                    "references to {} remain in: {}",
                    NEW_RUNTIME_SCRIPT,
                    offenders.join(", ")
                ),
            )
        }
    }
}

struct StaleLayoutReferences;

impl DiagnosticCheck for StaleLayoutReferences {
    fn name(&self) -> String {
        "stale layout references".to_string()
    }

    fn severity(&self) -> CheckSeverity {
        CheckSeverity::Warning
    }

    fn evaluate(&self, tree: &PackageTree) -> (bool, String) {
        let offenders = scan_text_files(tree, &["scormcontent/", "scormdriver/"]);
        if offenders.is_empty() {
            (
                true,
                "no scormcontent/ or scormdriver/ references in text files".to_string(),
            )
        } else {
            (
                false,
                format!(
                    "scormcontent/ or scormdriver/ references remain in: {}",
                    offenders.join(", ")
                ),
            )
        }
    }
}

/// The full checklist; orchestrates checks and derives the verdict.
pub struct Diagnostics {
    checks: Vec<Box<dyn DiagnosticCheck>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            checks: vec![
                Box::new(FilePresent { path: PRIMARY_ENTRY }),
                Box::new(FilePresent { path: LMS_ENTRY }),
                Box::new(FilePresent { path: MANIFEST_FILE }),
                Box::new(FilePresent {
                    path: "lib/tincan.js",
                }),
                Box::new(FilePresent { path: "lib/lms.js" }),
                Box::new(ProxyInitialised { file: PRIMARY_ENTRY }),
                Box::new(ProxyInitialised { file: LMS_ENTRY }),
                Box::new(SelectionsRouted { file: PRIMARY_ENTRY }),
                Box::new(LaunchResolvable),
                Box::new(EntryReferencesResolve { file: PRIMARY_ENTRY }),
                Box::new(EntryReferencesResolve { file: LMS_ENTRY }),
                Box::new(NewRuntimeRemnants),
                Box::new(StaleLayoutReferences),
            ],
        }
    }

    pub fn run(&self, tree: &PackageTree) -> DiagnosticReport {
        let checks: Vec<CheckResult> = self
            .checks
            .iter()
            .map(|check| {
                let (passed, message) = check.evaluate(tree);
                CheckResult {
                    name: check.name(),
                    severity: check.severity(),
                    passed,
                    message,
                }
            })
            .collect();

        let error_failures = checks
            .iter()
            .filter(|c| !c.passed && c.severity == CheckSeverity::Error)
            .count();

        let verdict = if error_failures == 0 {
            SUCCESS_VERDICT.to_string()
        } else if error_failures == 1 {
            "1 critical check failed. Fix before uploading.".to_string()
        } else {
            format!("{} critical checks failed. Fix before uploading.", error_failures)
        };

        DiagnosticReport {
            generated_at: Utc::now(),
            checks,
            verdict,
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan a directory and run the full checklist over it.
pub fn diagnose(root: &Path) -> Result<DiagnosticReport, TreeError> {
    let tree = PackageTree::scan(root)?;
    Ok(Diagnostics::new().run(&tree))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub generated_at: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
    pub verdict: String,
}

impl DiagnosticReport {
    pub fn error_failures(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == CheckSeverity::Error)
            .count()
    }

    /// Structurally sound: no ERROR-severity check failed. Warnings do
    /// not block.
    pub fn passed(&self) -> bool {
        self.error_failures() == 0
    }

    /// Render the per-check lines and the overall summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            let status = if check.passed {
                "OK"
            } else if check.severity == CheckSeverity::Error {
                "FAIL"
            } else {
                "WARN"
            };
            out.push_str(&format!("[{}] {}: {}\n", status, check.name, check.message));
        }
        out.push_str("=== Overall ===\n");
        out.push_str(&self.verdict);
        out.push('\n');
        out
    }
}
