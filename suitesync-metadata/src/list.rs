// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestError;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// The result of asking the runner to enumerate the files of a configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesReport {
    /// A configuration-level error, if loading the configuration failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,

    /// The projects declared by the configuration, in declaration order.
    #[serde(default)]
    pub projects: Vec<ProjectConfigWithFiles>,
}

impl ListFilesReport {
    /// Returns a report that carries only `error`.
    pub fn from_error(error: TestError) -> Self {
        Self {
            error: Some(error),
            projects: Vec::new(),
        }
    }
}

/// A project together with the test files it matches.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfigWithFiles {
    /// The project name. May be empty for the default project.
    pub name: String,

    /// The directory test files are discovered in.
    pub test_dir: Utf8PathBuf,

    /// Per-project options the engine cares about.
    #[serde(default, rename = "use")]
    pub use_options: ProjectUseOptions,

    /// Absolute paths of the test files matched by this project.
    #[serde(default)]
    pub files: Vec<Utf8PathBuf>,
}

/// The subset of a project's `use` options that the engine reads.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUseOptions {
    /// The attribute used to locate elements by test id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id_attribute: Option<String>,
}

/// The result of asking the runner which test files depend on a set of source files.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedTestFilesReport {
    /// Test files that import any of the given files.
    #[serde(default)]
    pub test_files: Vec<Utf8PathBuf>,

    /// Errors encountered while resolving dependencies.
    #[serde(default)]
    pub errors: Vec<TestError>,
}
