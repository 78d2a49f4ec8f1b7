use std::io;
use std::path::{Component, Path, PathBuf};

use racoon_protocol::ScriptKind;

use crate::error::{DaemonError, DaemonResult};

/// Directories a privileged backend may read keys from and run scripts
/// from.
///
/// Paths are resolved with symlinks followed before the check, so a link
/// inside an allowed directory pointing elsewhere is refused. Relative
/// paths are taken relative to the allowed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfinement {
    key_dir: PathBuf,
    script_dir: PathBuf,
}

impl PathConfinement {
    pub fn new(key_dir: impl Into<PathBuf>, script_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            script_dir: script_dir.into(),
        }
    }

    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Resolves a key path, refusing anything outside the key directory.
    pub fn key_path(&self, path: &Path) -> DaemonResult<PathBuf> {
        confine(&self.key_dir, path)
    }

    /// Resolves a script path, refusing anything outside the script
    /// directory.
    pub fn script_path(&self, path: &Path) -> DaemonResult<PathBuf> {
        confine(&self.script_dir, path)
    }

    /// Default location of the `kind` phase script.
    pub fn script_for(&self, kind: ScriptKind) -> PathBuf {
        self.script_dir.join(kind.as_str())
    }
}

fn confine(root: &Path, path: &Path) -> DaemonResult<PathBuf> {
    let requested = if path.is_relative() {
        root.join(path)
    } else {
        path.to_path_buf()
    };
    let denied = || DaemonError::PathDenied {
        path: requested.clone(),
        root: root.to_path_buf(),
    };

    let resolved_root = root.canonicalize().map_err(|_| denied())?;
    match requested.canonicalize() {
        Ok(resolved) if resolved.starts_with(&resolved_root) => Ok(resolved),
        Ok(_) => Err(denied()),
        // Only report a missing file when the request stayed inside the
        // directory; otherwise the answer would probe the filesystem.
        Err(e) if e.kind() == io::ErrorKind::NotFound && stays_inside(root, &requested) => {
            Err(e.into())
        }
        Err(_) => Err(denied()),
    }
}

fn stays_inside(root: &Path, path: &Path) -> bool {
    path.starts_with(root) && !path.components().any(|c| c == Component::ParentDir)
}
