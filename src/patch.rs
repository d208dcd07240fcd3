//! Text Patching - Rewiring Entry Pages and the Manifest
//!
//! Every rewrite is check-then-write: the content itself records
//! whether a rewrite already happened, so re-running the patcher on a
//! converted package changes nothing.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tree::{atomic_write, TreeError};
use crate::{LMS_ENTRY, MANIFEST_FILE, PRIMARY_ENTRY};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static PATCH_WRITE_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_patch_write_count() -> u32 {
    PATCH_WRITE_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_patch_write_count() {
    PATCH_WRITE_COUNT.store(0, Ordering::SeqCst)
}

/// Marker that the legacy proxy is initialised in a page.
pub const PROXY_INIT_MARKER: &str = "window.LMSProxy = lms();";
/// Marker that tracking selections route through the proxy instead of
/// the parent frame.
pub const SELECTIONS_PROXY_MARKER: &str = "pick(LMSProxySelections, window.LMSProxy";
/// The new runtime bridge the conversion drops.
pub const NEW_RUNTIME_SCRIPT: &str = "lib/rise-runtime.js";

const LEGACY_LIB_TAGS: &str = "<script type=\"text/javascript\" src=\"lib/tincan.js\"></script>\n    <script type=\"text/javascript\" src=\"lib/lms.js\"></script>";

/// Bootstraps `window.LMSProxy` and backfills the completion entry
/// points older driver builds call.
const PROXY_BOOTSTRAP: &str = r#"<script>
window.LMSProxy = lms();
if (window.LMSProxy) {
  if (!window.LMSProxy.SetReachedEnd && window.LMSProxy.SetPassed) {
    window.LMSProxy.SetReachedEnd = function () { window.LMSProxy.SetPassed(); };
  }
  if (!window.LMSProxy.TCAPI_SetCompleted && window.LMSProxy.SetPassed) {
    window.LMSProxy.TCAPI_SetCompleted = function () { window.LMSProxy.SetPassed(); };
  }
}
</script>
"#;

static HEAD_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head([^>]*)>").expect("static pattern compiles"));

static NEW_RUNTIME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script[^>]*src="(?:\./)?lib/rise-runtime\.js"[^>]*>\s*</script>"#)
        .expect("static pattern compiles")
});

static SELECTIONS_PARENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pick\(LMSProxySelections,\s*window\.parent").expect("static pattern compiles")
});

static LAUNCH_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<launch([^>]*)>(.*?)</launch>").expect("static pattern compiles"));

static FLATTENED_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(src|href)="(?:\./)?(?:scormcontent|scormdriver)/"#)
        .expect("static pattern compiles")
});

/// One idempotent rewrite of one target file.
///
/// The rewrite returns the new content only when a change is needed;
/// `None` means the content already satisfies the rule.
#[derive(Clone, Copy)]
pub struct PatchRule {
    pub name: &'static str,
    pub target: &'static str,
    pub rewrite: fn(&str) -> Option<String>,
}

/// The fixed rewrite table. Rules targeting the same file apply in
/// declared order; each file is written back at most once.
pub const PATCH_RULES: &[PatchRule] = &[
    PatchRule {
        name: "tc-config path",
        target: PRIMARY_ENTRY,
        rewrite: fix_tc_config_path,
    },
    PatchRule {
        name: "legacy libs",
        target: PRIMARY_ENTRY,
        rewrite: inject_legacy_libs,
    },
    PatchRule {
        name: "proxy init",
        target: PRIMARY_ENTRY,
        rewrite: inject_proxy_bootstrap,
    },
    PatchRule {
        name: "selections redirect",
        target: PRIMARY_ENTRY,
        rewrite: redirect_selections,
    },
    PatchRule {
        name: "flattened refs",
        target: PRIMARY_ENTRY,
        rewrite: rewrite_flattened_refs,
    },
    PatchRule {
        name: "tc-config path",
        target: LMS_ENTRY,
        rewrite: fix_tc_config_path,
    },
    PatchRule {
        name: "legacy libs",
        target: LMS_ENTRY,
        rewrite: inject_legacy_libs,
    },
    PatchRule {
        name: "proxy init",
        target: LMS_ENTRY,
        rewrite: inject_proxy_bootstrap,
    },
    PatchRule {
        name: "selections redirect",
        target: LMS_ENTRY,
        rewrite: redirect_selections,
    },
    PatchRule {
        name: "flattened refs",
        target: LMS_ENTRY,
        rewrite: rewrite_flattened_refs,
    },
    PatchRule {
        name: "launch target",
        target: MANIFEST_FILE,
        rewrite: rewrite_launch_target,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Applied,
    Unchanged,
    TargetMissing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOutcome {
    pub rule: String,
    pub target: String,
    pub status: PatchStatus,
}

impl PatchOutcome {
    pub fn is_error(&self) -> bool {
        self.status == PatchStatus::TargetMissing
    }
}

/// Apply the whole rewrite table to the output tree.
///
/// A missing target file skips its rules and records them as errors;
/// patching never fabricates a file. Changed files are replaced
/// atomically.
pub fn apply_patches(output_root: &Path) -> Result<Vec<PatchOutcome>, TreeError> {
    let mut outcomes = Vec::with_capacity(PATCH_RULES.len());

    let mut targets: Vec<&'static str> = Vec::new();
    for rule in PATCH_RULES {
        if !targets.contains(&rule.target) {
            targets.push(rule.target);
        }
    }

    for target in targets {
        let path = output_root.join(target);
        let rules = PATCH_RULES.iter().filter(|r| r.target == target);

        if !path.is_file() {
            for rule in rules {
                outcomes.push(PatchOutcome {
                    rule: rule.name.to_string(),
                    target: target.to_string(),
                    status: PatchStatus::TargetMissing,
                });
            }
            info!(file = target, "patch target missing, skipping its rules");
            continue;
        }

        let original = fs::read_to_string(&path).map_err(|source| TreeError::Io {
            context: format!("reading {}", path.display()),
            source,
        })?;
        let mut content = original.clone();

        for rule in rules {
            match (rule.rewrite)(&content) {
                Some(updated) => {
                    content = updated;
                    debug!(file = target, rule = rule.name, "applied rewrite");
                    outcomes.push(PatchOutcome {
                        rule: rule.name.to_string(),
                        target: target.to_string(),
                        status: PatchStatus::Applied,
                    });
                }
                None => outcomes.push(PatchOutcome {
                    rule: rule.name.to_string(),
                    target: target.to_string(),
                    status: PatchStatus::Unchanged,
                }),
            }
        }

        if content != original {
            atomic_write(&path, content.as_bytes())?;
            info!(file = target, "patched");

            #[cfg(feature = "test-hooks")]
            PATCH_WRITE_COUNT.fetch_add(1, Ordering::SeqCst);
        }
    }

    Ok(outcomes)
}

/// `"../tc-config.js"` pointed one level up in the driver subdirectory;
/// after flattening the config sits next to the page.
fn fix_tc_config_path(content: &str) -> Option<String> {
    if !content.contains("\"../tc-config.js\"") {
        return None;
    }
    Some(content.replace("\"../tc-config.js\"", "\"tc-config.js\""))
}

/// Load `lib/tincan.js` + `lib/lms.js`. A tag for the dropped new
/// runtime bridge is replaced in place; otherwise the pair is inserted
/// after the tc-config tag, falling back to the top of `<head>`.
fn inject_legacy_libs(content: &str) -> Option<String> {
    if content.contains("lib/tincan.js") || content.contains("lib/lms.js") {
        return None;
    }

    if NEW_RUNTIME_TAG.is_match(content) {
        return Some(NEW_RUNTIME_TAG.replace(content, LEGACY_LIB_TAGS).into_owned());
    }

    if content.contains("tc-config.js\"></script>") {
        return Some(content.replacen(
            "tc-config.js\"></script>",
            &format!("tc-config.js\"></script>\n    {}", LEGACY_LIB_TAGS),
            1,
        ));
    }

    if HEAD_OPEN.is_match(content) {
        return Some(
            HEAD_OPEN
                .replacen(content, 1, |caps: &Captures| {
                    format!("<head{}>\n    {}", &caps[1], LEGACY_LIB_TAGS)
                })
                .into_owned(),
        );
    }

    // No recognizable head at all; prepend so the libs still load first.
    Some(format!("{}\n{}", LEGACY_LIB_TAGS, content))
}

fn inject_proxy_bootstrap(content: &str) -> Option<String> {
    if content.contains(PROXY_INIT_MARKER) {
        return None;
    }
    if content.contains("</head>") {
        return Some(content.replacen("</head>", &format!("{}</head>", PROXY_BOOTSTRAP), 1));
    }
    Some(format!("{}{}", PROXY_BOOTSTRAP, content))
}

/// The driver picks its tracking backend from `LMSProxySelections`;
/// point it at the restored proxy instead of the parent frame.
fn redirect_selections(content: &str) -> Option<String> {
    if !SELECTIONS_PARENT.is_match(content) {
        return None;
    }
    Some(
        SELECTIONS_PARENT
            .replace_all(content, SELECTIONS_PROXY_MARKER)
            .into_owned(),
    )
}

/// References into the old nested directories now point at the root.
fn rewrite_flattened_refs(content: &str) -> Option<String> {
    if !FLATTENED_REF.is_match(content) {
        return None;
    }
    Some(FLATTENED_REF.replace_all(content, "${1}=\"").into_owned())
}

/// Text of the first `<launch>` element, if the manifest has one.
pub fn launch_target(manifest: &str) -> Option<String> {
    LAUNCH_ELEMENT
        .captures(manifest)
        .map(|caps| caps[2].trim().to_string())
}

/// The manifest must advertise the post-flatten primary entry page.
fn rewrite_launch_target(content: &str) -> Option<String> {
    let caps = LAUNCH_ELEMENT.captures(content)?;
    if caps[2].trim() == PRIMARY_ENTRY {
        return None;
    }
    Some(
        LAUNCH_ELEMENT
            .replacen(content, 1, |caps: &Captures| {
                format!("<launch{}>{}</launch>", &caps[1], PRIMARY_ENTRY)
            })
            .into_owned(),
    )
}
