// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for suitesync-runner.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Resolves `.` and `..` components without touching the filesystem.
///
/// `..` at the root is dropped, matching how paths are resolved against a root directory.
pub(crate) fn normalize_lexically(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}

/// Returns `path` relative to `base`, or `path` itself if no relative form exists.
pub(crate) fn relative_to(path: &Utf8Path, base: &Utf8Path) -> Utf8PathBuf {
    pathdiff::diff_utf8_paths(path, base).unwrap_or_else(|| path.to_owned())
}

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "file" if `count` is 1, otherwise "files".
    pub(crate) fn files_str(count: usize) -> &'static str {
        if count == 1 { "file" } else { "files" }
    }

    /// Returns "project" if `count` is 1, otherwise "projects".
    pub(crate) fn projects_str(count: usize) -> &'static str {
        if count == 1 { "project" } else { "projects" }
    }
}
