//! Package Trees - Rooted File Collections
//!
//! Inputs are scanned once and never written; the output tree is
//! materialized on disk and re-scanned before diagnosis.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("path escapes the package root: {}", .0.display())]
    PathTraversal(PathBuf),

    #[error("no such file in package: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_ctx(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> TreeError {
    let context = context.into();
    move |source| TreeError::Io { context, source }
}

/// A rooted file tree addressed by unique relative paths.
///
/// Relative paths are kept sorted, so every traversal of the tree is
/// deterministic regardless of filesystem enumeration order.
#[derive(Debug, Clone)]
pub struct PackageTree {
    root: PathBuf,
    files: BTreeSet<PathBuf>,
}

impl PackageTree {
    /// Scan a directory into a tree. Symlinks are not followed.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self, TreeError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(TreeError::NotADirectory(root.to_path_buf()));
        }

        let mut files = BTreeSet::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| TreeError::Io {
                context: format!("scanning {}", root.display()),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("walkdir yields paths under its root");
            files.insert(sanitize_relative(rel)?);
        }

        debug!(root = %root.display(), files = files.len(), "scanned package tree");
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths of every file, in sorted order.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, rel: impl AsRef<Path>) -> bool {
        self.files.contains(rel.as_ref())
    }

    /// Absolute path of a relative entry (whether or not it exists).
    pub fn resolve(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel.as_ref())
    }

    pub fn read(&self, rel: impl AsRef<Path>) -> Result<Vec<u8>, TreeError> {
        let rel = rel.as_ref();
        if !self.contains(rel) {
            return Err(TreeError::NotFound(rel.to_path_buf()));
        }
        let abs = self.resolve(rel);
        fs::read(&abs).map_err(io_ctx(format!("reading {}", abs.display())))
    }

    pub fn read_to_string(&self, rel: impl AsRef<Path>) -> Result<String, TreeError> {
        let bytes = self.read(rel)?;
        // Content files are UTF-8 in practice; tolerate stray bytes the
        // way the rest of the toolchain does.
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// First file (sorted order) whose final component matches `name`.
    pub fn find_by_name(&self, name: &str) -> Option<&Path> {
        self.files
            .iter()
            .find(|p| p.file_name().map_or(false, |f| f == name))
            .map(PathBuf::as_path)
    }
}

/// Normalize a relative path from an untrusted package.
///
/// `.` components are dropped, `..` components are rejected outright.
pub fn sanitize_relative(rel: &Path) -> Result<PathBuf, TreeError> {
    let mut normalized = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(TreeError::PathTraversal(rel.to_path_buf()));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TreeError::PathTraversal(rel.to_path_buf()));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(TreeError::PathTraversal(rel.to_path_buf()));
    }
    Ok(normalized)
}

/// Write content atomically: temp file in the target directory, then rename.
///
/// A crash leaves either the old file or the new one, never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), TreeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(io_ctx(format!("creating directory {}", parent.display())))?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .map_err(io_ctx(format!("creating {}", temp_path.display())))?;
        file.write_all(content)
            .map_err(io_ctx(format!("writing {}", temp_path.display())))?;
        file.sync_all()
            .map_err(io_ctx(format!("syncing {}", temp_path.display())))?;
    }
    fs::rename(&temp_path, path).map_err(io_ctx(format!(
        "renaming {} into place",
        temp_path.display()
    )))
}

/// Copy a file atomically into the output tree.
pub fn atomic_copy(src: &Path, dst: &Path) -> Result<(), TreeError> {
    let content = fs::read(src).map_err(io_ctx(format!("reading {}", src.display())))?;
    atomic_write(dst, &content)
}
