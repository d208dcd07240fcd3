//! Asset Merging - Restoring Legacy Runtime Files
//!
//! The donor package is a previously-working export, used purely as a
//! source of files the current export tool no longer emits. Write
//! access is confined to the output tree.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::tree::{atomic_copy, PackageTree, TreeError};
use crate::{LMS_ENTRY, PRIMARY_ENTRY};

/// A legacy file the finished package must carry.
#[derive(Debug, Clone, Copy)]
pub struct DonorAsset {
    pub path: &'static str,
    pub required: bool,
}

pub const DONOR_ASSETS: &[DonorAsset] = &[
    DonorAsset {
        path: "lib/tincan.js",
        required: true,
    },
    DonorAsset {
        path: "lib/lms.js",
        required: true,
    },
    // Loader config the legacy libs read when present; older exports
    // shipped it at the root.
    DonorAsset {
        path: "tc-config.js",
        required: false,
    },
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedAsset {
    pub path: String,
    pub donor_source: PathBuf,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(
        "required legacy asset {0} is present in neither the converted output nor the donor \
         package; supply a donor package (an older export known to track correctly) that \
         contains it"
    )]
    MissingAsset(String),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Copy each missing legacy asset from the donor tree into the output.
///
/// Re-runnable: an asset already present at its destination is left
/// untouched, whatever its content.
pub fn merge_donor_assets(
    output_root: &Path,
    donor: &PackageTree,
) -> Result<Vec<MergedAsset>, MergeError> {
    let mut merged = Vec::new();

    for asset in DONOR_ASSETS {
        let dest = output_root.join(asset.path);
        let donor_rel = locate(donor, asset.path);

        if dest.exists() {
            if let Some(rel) = &donor_rel {
                let ours = fs::read(&dest).map_err(|source| TreeError::Io {
                    context: format!("reading {}", dest.display()),
                    source,
                })?;
                let theirs = donor.read(rel)?;
                if sha256_hex(&ours) != sha256_hex(&theirs) {
                    warn!(
                        asset = asset.path,
                        "output already carries {} but its content differs from the donor copy",
                        asset.path
                    );
                }
            }
            debug!(asset = asset.path, "already present, skipping merge");
            continue;
        }

        match donor_rel {
            Some(rel) => {
                atomic_copy(&donor.resolve(&rel), &dest)?;
                info!(asset = asset.path, from = %rel.display(), "merged legacy asset from donor");
                merged.push(MergedAsset {
                    path: asset.path.to_string(),
                    donor_source: rel,
                });
            }
            None if asset.required => {
                return Err(MergeError::MissingAsset(asset.path.to_string()));
            }
            None => {
                debug!(asset = asset.path, "optional asset absent everywhere, skipping");
            }
        }
    }

    Ok(merged)
}

/// Derive the LMS entry page from the primary entry page when the
/// export provided none. Older exports always shipped both.
pub fn derive_lms_entry(output_root: &Path) -> Result<bool, MergeError> {
    let primary = output_root.join(PRIMARY_ENTRY);
    let lms = output_root.join(LMS_ENTRY);
    if lms.exists() || !primary.exists() {
        return Ok(false);
    }
    atomic_copy(&primary, &lms)?;
    info!("created {} from {}", LMS_ENTRY, PRIMARY_ENTRY);
    Ok(true)
}

/// Exact relative path first, then the first filename match anywhere
/// under the donor root (older exports kept these libs in varying
/// subdirectories).
fn locate(donor: &PackageTree, rel: &str) -> Option<PathBuf> {
    if donor.contains(rel) {
        return Some(PathBuf::from(rel));
    }
    let name = Path::new(rel).file_name()?.to_string_lossy().into_owned();
    donor.find_by_name(&name).map(Path::to_path_buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_assets_are_filled_from_donor() {
        let donor_dir = TempDir::new().unwrap();
        write(donor_dir.path(), "lib/tincan.js", "tincan");
        write(donor_dir.path(), "lib/lms.js", "lms");
        write(donor_dir.path(), "tc-config.js", "config");
        let donor = PackageTree::scan(donor_dir.path()).unwrap();

        let out = TempDir::new().unwrap();
        let merged = merge_donor_assets(out.path(), &donor).unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(
            fs::read_to_string(out.path().join("lib/tincan.js")).unwrap(),
            "tincan"
        );
        assert_eq!(
            fs::read_to_string(out.path().join("lib/lms.js")).unwrap(),
            "lms"
        );
    }

    #[test]
    fn test_existing_asset_is_never_overwritten() {
        let donor_dir = TempDir::new().unwrap();
        write(donor_dir.path(), "lib/tincan.js", "donor copy");
        write(donor_dir.path(), "lib/lms.js", "lms");
        let donor = PackageTree::scan(donor_dir.path()).unwrap();

        let out = TempDir::new().unwrap();
        write(out.path(), "lib/tincan.js", "export copy");

        let merged = merge_donor_assets(out.path(), &donor).unwrap();
        assert!(merged.iter().all(|m| m.path != "lib/tincan.js"));
        assert_eq!(
            fs::read_to_string(out.path().join("lib/tincan.js")).unwrap(),
            "export copy"
        );
    }

    #[test]
    fn test_required_asset_missing_everywhere_is_fatal() {
        let donor_dir = TempDir::new().unwrap();
        write(donor_dir.path(), "lib/tincan.js", "tincan");
        let donor = PackageTree::scan(donor_dir.path()).unwrap();

        let out = TempDir::new().unwrap();
        let err = merge_donor_assets(out.path(), &donor).unwrap_err();
        match err {
            MergeError::MissingAsset(path) => assert_eq!(path, "lib/lms.js"),
            other => panic!("expected missing asset, got {other:?}"),
        }
    }

    #[test]
    fn test_donor_lookup_falls_back_to_filename() {
        let donor_dir = TempDir::new().unwrap();
        write(donor_dir.path(), "content/lib/tincan.js", "tincan");
        write(donor_dir.path(), "content/lib/lms.js", "lms");
        let donor = PackageTree::scan(donor_dir.path()).unwrap();

        let out = TempDir::new().unwrap();
        let merged = merge_donor_assets(out.path(), &donor).unwrap();

        assert!(out.path().join("lib/tincan.js").exists());
        assert!(out.path().join("lib/lms.js").exists());
        assert_eq!(
            merged[0].donor_source,
            PathBuf::from("content/lib/tincan.js")
        );
    }

    #[test]
    fn test_lms_entry_derived_once() {
        let out = TempDir::new().unwrap();
        write(out.path(), "index.html", "<html></html>");

        assert!(derive_lms_entry(out.path()).unwrap());
        assert_eq!(
            fs::read_to_string(out.path().join("index_lms.html")).unwrap(),
            "<html></html>"
        );

        // Second run is a no-op.
        assert!(!derive_lms_entry(out.path()).unwrap());
    }

    #[test]
    fn test_lms_entry_not_fabricated_without_primary() {
        let out = TempDir::new().unwrap();
        assert!(!derive_lms_entry(out.path()).unwrap());
        assert!(!out.path().join("index_lms.html").exists());
    }
}
