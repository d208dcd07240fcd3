//! Conversion Pipeline - Single Entry Point
//!
//! Stage order is fixed: preconditions → plan → materialize → merge →
//! patch. Fatal problems abort before any write; patch-level problems
//! accumulate and surface through the diagnostic report.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::mapping::{self, MappingPlan};
use crate::merge::{derive_lms_entry, merge_donor_assets, MergedAsset};
use crate::patch::{apply_patches, PatchOutcome};
use crate::tree::{atomic_copy, PackageTree, TreeError};
use crate::{MANIFEST_FILE, TOOL_VERSION};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("new export is not a directory: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("donor package is not a directory: {}", .0.display())]
    DonorMissing(PathBuf),

    #[error(
        "output path {} already has content; point the pipeline at an empty or absent directory",
        .0.display()
    )]
    OutputNotEmpty(PathBuf),

    #[error("required file missing from the new export: {0}")]
    MissingSourceFile(String),

    #[error(transparent)]
    Mapping(#[from] mapping::MapError),

    #[error(transparent)]
    Merge(#[from] crate::merge::MergeError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Record of one conversion run, suitable for automation to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub run_id: Uuid,
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source: PathBuf,
    pub donor: PathBuf,
    pub output: PathBuf,
    pub files_copied: usize,
    pub files_dropped: usize,
    pub merged: Vec<MergedAsset>,
    pub derived_lms_entry: bool,
    pub patches: Vec<PatchOutcome>,
}

/// The conversion pipeline - single entry point for package transforms.
///
/// Source and donor trees are read-only; all writes land under the
/// output root.
pub struct ConversionPipeline {
    source: PathBuf,
    donor: PathBuf,
    output: PathBuf,
}

impl ConversionPipeline {
    pub fn new(
        source: impl Into<PathBuf>,
        donor: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            donor: donor.into(),
            output: output.into(),
        }
    }

    pub fn run(&self) -> Result<ConversionSummary, ConvertError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, source = %self.source.display(), "starting conversion");

        let (source_tree, donor_tree) = self.check_preconditions()?;

        // The collision check lives in the planner, so nothing is
        // written until the whole layout is known to be consistent.
        let plan = mapping::plan(&source_tree)?;
        info!(
            files = plan.entries().len(),
            dropped = plan.dropped().count(),
            "layout plan computed"
        );

        self.materialize(&source_tree, &plan)?;

        let merged = merge_donor_assets(&self.output, &donor_tree)?;
        let derived_lms_entry = derive_lms_entry(&self.output)?;
        let patches = apply_patches(&self.output)?;

        let summary = ConversionSummary {
            run_id,
            tool_version: TOOL_VERSION.to_string(),
            started_at,
            finished_at: Utc::now(),
            source: self.source.clone(),
            donor: self.donor.clone(),
            output: self.output.clone(),
            files_copied: plan.copies().count(),
            files_dropped: plan.dropped().count(),
            merged,
            derived_lms_entry,
            patches,
        };
        info!(%run_id, files = summary.files_copied, "conversion finished");
        Ok(summary)
    }

    fn check_preconditions(&self) -> Result<(PackageTree, PackageTree), ConvertError> {
        if !self.source.is_dir() {
            return Err(ConvertError::SourceMissing(self.source.clone()));
        }
        if !self.donor.is_dir() {
            return Err(ConvertError::DonorMissing(self.donor.clone()));
        }
        if self.output.exists() {
            if !self.output.is_dir() || !dir_is_empty(&self.output)? {
                return Err(ConvertError::OutputNotEmpty(self.output.clone()));
            }
        }

        let source_tree = PackageTree::scan(&self.source)?;
        if source_tree.find_by_name(MANIFEST_FILE).is_none() {
            return Err(ConvertError::MissingSourceFile(MANIFEST_FILE.to_string()));
        }
        let donor_tree = PackageTree::scan(&self.donor)?;

        Ok((source_tree, donor_tree))
    }

    fn materialize(&self, source: &PackageTree, plan: &MappingPlan) -> Result<(), ConvertError> {
        fs::create_dir_all(&self.output).map_err(|e| TreeError::Io {
            context: format!("creating output directory {}", self.output.display()),
            source: e,
        })?;

        for (src_rel, dest_rel) in plan.copies() {
            atomic_copy(&source.resolve(src_rel), &self.output.join(dest_rel))?;
        }
        for dropped in plan.dropped() {
            debug!(file = %dropped.display(), "dropped by layout mapping");
        }
        Ok(())
    }
}

fn dir_is_empty(path: &Path) -> Result<bool, TreeError> {
    let mut entries = fs::read_dir(path).map_err(|e| TreeError::Io {
        context: format!("reading {}", path.display()),
        source: e,
    })?;
    Ok(entries.next().is_none())
}
