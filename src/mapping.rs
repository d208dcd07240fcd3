//! Path Mapping - New Export Layout to Legacy Layout
//!
//! One ordered rule table, first match wins. The planner is pure:
//! it never touches the filesystem, so a plan can be inspected or
//! collision-checked before a single byte is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::PackageTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapAction {
    Copy,
    Rename,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
    Exact(&'static str),
    Prefix(&'static str),
}

/// Where a matched file lands in the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestTarget {
    SameRelative,
    /// Strip the matched prefix; the remainder is the destination.
    StripMatchedPrefix,
    /// Collapse into a single directory, keeping only the filename.
    FlattenInto(&'static str),
    Fixed(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct MappingRule {
    pub pattern: PathPattern,
    pub action: MapAction,
    pub target: DestTarget,
}

/// The fixed Dec-2025 → legacy mapping. Layout changes are new rows
/// here, not new control flow.
pub const MAPPING_RULES: &[MappingRule] = &[
    // The new parent-frame runtime bridge; the restored legacy libs
    // replace it entirely.
    MappingRule {
        pattern: PathPattern::Exact("lib/rise-runtime.js"),
        action: MapAction::Drop,
        target: DestTarget::SameRelative,
    },
    // The driver's LMS entry page becomes the legacy LMS entry page.
    MappingRule {
        pattern: PathPattern::Exact("scormdriver/indexAPI.html"),
        action: MapAction::Rename,
        target: DestTarget::Fixed("index_lms.html"),
    },
    // Nested content assets collapse into the flat assets/ directory.
    MappingRule {
        pattern: PathPattern::Prefix("scormcontent/assets/"),
        action: MapAction::Copy,
        target: DestTarget::FlattenInto("assets"),
    },
    MappingRule {
        pattern: PathPattern::Prefix("scormcontent/"),
        action: MapAction::Copy,
        target: DestTarget::StripMatchedPrefix,
    },
    MappingRule {
        pattern: PathPattern::Prefix("scormdriver/"),
        action: MapAction::Copy,
        target: DestTarget::StripMatchedPrefix,
    },
];

impl MappingRule {
    fn matches(&self, source: &str) -> bool {
        match self.pattern {
            PathPattern::Exact(p) => source == p,
            PathPattern::Prefix(p) => source.starts_with(p),
        }
    }

    fn destination(&self, source: &str) -> Option<PathBuf> {
        if self.action == MapAction::Drop {
            return None;
        }
        let dest = match self.target {
            DestTarget::SameRelative => source.to_string(),
            DestTarget::StripMatchedPrefix => match self.pattern {
                PathPattern::Prefix(p) => source[p.len()..].to_string(),
                PathPattern::Exact(_) => source.to_string(),
            },
            DestTarget::FlattenInto(dir) => {
                let name = Path::new(source)
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_else(|| source.to_string());
                format!("{}/{}", dir, name)
            }
            DestTarget::Fixed(p) => p.to_string(),
        };
        Some(PathBuf::from(dest))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub source: PathBuf,
    pub action: MapAction,
    pub dest: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("source export has no files under {}", .0.display())]
    EmptySource(PathBuf),

    #[error(
        "destination collision: {} and {} both map to {}",
        .first.display(),
        .second.display(),
        .dest.display()
    )]
    Collision {
        dest: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
}

/// The computed layout mapping, one entry per source file.
#[derive(Debug, Clone)]
pub struct MappingPlan {
    entries: Vec<PlanEntry>,
}

impl MappingPlan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// (source, destination) pairs that will be written.
    pub fn copies(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries
            .iter()
            .filter_map(|e| e.dest.as_deref().map(|d| (e.source.as_path(), d)))
    }

    pub fn dropped(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|e| e.action == MapAction::Drop)
            .map(|e| e.source.as_path())
    }

    pub fn dest_contains(&self, dest: impl AsRef<Path>) -> bool {
        let dest = dest.as_ref();
        self.entries.iter().any(|e| e.dest.as_deref() == Some(dest))
    }
}

/// Compute the mapping plan for a source tree.
///
/// Pure function of the tree's (sorted) file list: same files, same
/// plan. A destination claimed by two distinct sources aborts planning
/// before anything downstream can write.
pub fn plan(tree: &PackageTree) -> Result<MappingPlan, MapError> {
    if tree.is_empty() {
        return Err(MapError::EmptySource(tree.root().to_path_buf()));
    }

    let mut entries = Vec::with_capacity(tree.len());
    let mut claimed: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

    for source in tree.files() {
        let source_str = source.to_string_lossy();
        let (action, dest) = match MAPPING_RULES.iter().find(|r| r.matches(&source_str)) {
            Some(rule) => (rule.action, rule.destination(&source_str)),
            None => (MapAction::Copy, Some(source.to_path_buf())),
        };

        if let Some(dest) = &dest {
            if let Some(first) = claimed.get(dest) {
                return Err(MapError::Collision {
                    dest: dest.clone(),
                    first: first.clone(),
                    second: source.to_path_buf(),
                });
            }
            claimed.insert(dest.clone(), source.to_path_buf());
        }

        entries.push(PlanEntry {
            source: source.to_path_buf(),
            action,
            dest,
        });
    }

    Ok(MappingPlan { entries })
}
