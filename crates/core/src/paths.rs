//! Path rules for research output directories.
//!
//! Client-supplied directory names and file paths are checked here before
//! anything touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::PathError;
use crate::types::{FileType, RESEARCH_DIR_PREFIX};

/// Default working directory for research runs: `~/research`.
pub fn default_research_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join("research"))
}

/// True when `name` looks like a research output directory.
pub fn is_research_dir_name(name: &str) -> bool {
    name.starts_with(RESEARCH_DIR_PREFIX)
}

/// Validate a past-run directory name taken from a URL.
pub fn validate_dir_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() {
        return Err(PathError::EmptyDirName);
    }
    for forbidden in ["/", "\\", ".."] {
        if name.contains(forbidden) {
            return Err(PathError::ForbiddenInDirName(forbidden));
        }
    }
    if !is_research_dir_name(name) {
        return Err(PathError::MissingPrefix {
            prefix: RESEARCH_DIR_PREFIX,
        });
    }
    Ok(())
}

/// Resolve `rel` under `base`, refusing anything that could land outside it.
///
/// Resolution is lexical; symlinks inside `base` are not followed.
pub fn resolve_safe_file(base: &Path, rel: &str) -> Result<PathBuf, PathError> {
    if rel.is_empty() {
        return Err(PathError::EmptyFilePath);
    }
    if rel.contains("..") {
        return Err(PathError::ParentTraversal);
    }
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() || rel.starts_with('/') || rel.starts_with('\\') {
        return Err(PathError::AbsoluteFilePath);
    }

    let base = clean(base);
    let mut resolved = base.clone();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::EscapesBase)
            }
        }
    }

    if !resolved.starts_with(&base) {
        return Err(PathError::EscapesBase);
    }
    Ok(resolved)
}

/// Lexically normalize a path, dropping `.` and folding `..`.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Classify an artifact by extension, case-insensitively.
pub fn classify_file_type(name: &str) -> FileType {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("md") => FileType::Md,
        Some("html") | Some("htm") => FileType::Html,
        _ => FileType::Other,
    }
}
