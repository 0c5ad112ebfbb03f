// Project-root path normalisation

use crate::errors::JobError;
use std::path::{Component, Path, PathBuf};

/// Resolve `path` against `root_dir` and return it relative to the root,
/// using `/` as separator on every platform.
///
/// Fails with [`JobError::PathEscapesRoot`] when the resolved path is not
/// inside `root_dir`.
pub fn normalize_path(path: &Path, root_dir: &Path) -> Result<String, JobError> {
    let root = lexical_normalize(root_dir);
    let absolute = if path.is_absolute() {
        lexical_normalize(path)
    } else {
        lexical_normalize(&root.join(path))
    };

    let relative = absolute
        .strip_prefix(&root)
        .map_err(|_| JobError::PathEscapesRoot {
            path: path.to_path_buf(),
            root: root_dir.to_path_buf(),
        })?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            // strip_prefix on a normalised path leaves only normal segments
            _ => {
                return Err(JobError::PathEscapesRoot {
                    path: path.to_path_buf(),
                    root: root_dir.to_path_buf(),
                })
            }
        }
    }

    Ok(segments.join("/"))
}

/// Resolve a root-relative path produced by [`normalize_path`] back to disk
pub fn resolve_path(relative: &str, root_dir: &Path) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root_dir.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Render a path with `/` separators
pub fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::RootDir => out.push('/'),
            Component::Prefix(prefix) => out.push_str(&prefix.as_os_str().to_string_lossy()),
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

/// Collapse `.` and `..` without touching the filesystem
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` above the filesystem root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
