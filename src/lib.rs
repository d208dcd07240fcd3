//! Risefix Core - Legacy xAPI Package Restorer
//!
//! # The Four Rules (Non-Negotiable)
//! 1. Inputs Are Read-Only
//! 2. The Plan Is Computed Before Any Write
//! 3. Every Rewrite Is Idempotent
//! 4. The Diagnostic Report Is Authoritative

pub mod tree;
pub mod mapping;
pub mod merge;
pub mod patch;
pub mod diagnose;
pub mod pipeline;

pub use tree::{PackageTree, TreeError};
pub use mapping::{MapAction, MapError, MappingPlan, MappingRule, PlanEntry};
pub use merge::{DonorAsset, MergeError, MergedAsset};
pub use patch::{PatchOutcome, PatchRule};
pub use diagnose::{CheckResult, CheckSeverity, DiagnosticCheck, DiagnosticReport, Diagnostics};
pub use pipeline::{ConversionPipeline, ConversionSummary, ConvertError};

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Primary entry page of the legacy flat layout.
pub const PRIMARY_ENTRY: &str = "index.html";
/// LMS-specific entry page of the legacy flat layout.
pub const LMS_ENTRY: &str = "index_lms.html";
/// The TinCan activity manifest.
pub const MANIFEST_FILE: &str = "tincan.xml";
