// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{client::RunnerCommand, helpers::relative_to};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::sync::Arc;
use suitesync_metadata::Suite;

/// One discovered test configuration. Immutable once created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestConfig {
    workspace_folder: Utf8PathBuf,
    config_file: Utf8PathBuf,
    runner: RunnerCommand,
    version: semver::Version,
}

impl TestConfig {
    /// Creates a new configuration.
    ///
    /// `version` is the version of the runner protocol spoken by `runner`.
    pub fn new(
        workspace_folder: impl Into<Utf8PathBuf>,
        config_file: impl Into<Utf8PathBuf>,
        runner: RunnerCommand,
        version: semver::Version,
    ) -> Self {
        Self {
            workspace_folder: workspace_folder.into(),
            config_file: config_file.into(),
            runner,
            version,
        }
    }

    /// The workspace folder the configuration was found in.
    pub fn workspace_folder(&self) -> &Utf8Path {
        &self.workspace_folder
    }

    /// The absolute path to the configuration file.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// How to invoke the runner.
    pub fn runner(&self) -> &RunnerCommand {
        &self.runner
    }

    /// The runner protocol version.
    pub fn version(&self) -> &semver::Version {
        &self.version
    }

    /// The configuration file relative to the workspace folder. This is the key settings are
    /// persisted under.
    pub fn relative_config_file(&self) -> Utf8PathBuf {
        relative_to(&self.config_file, &self.workspace_folder)
    }
}

/// The enablement state of a model.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Enablement {
    /// No listing or watch activity happens, and the tree is empty.
    Disabled,

    /// The model was enabled and its first listing is in progress.
    Loading,

    /// The model is enabled and has been listed.
    Enabled,
}

/// Where a file node's content came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FileOrigin {
    /// The file was reported by a file listing but its tests haven't been listed yet.
    Placeholder,

    /// The content came from listing the file's tests.
    Listed,

    /// The content came from the report of a test run.
    Run,
}

/// A file node within a project.
#[derive(Clone, Debug)]
pub struct FileEntry {
    suite: Arc<Suite>,
    origin: FileOrigin,
}

impl FileEntry {
    pub(crate) fn placeholder(file: &Utf8Path) -> Self {
        Self {
            suite: Arc::new(Suite::file(file)),
            origin: FileOrigin::Placeholder,
        }
    }

    pub(crate) fn new(suite: Suite, origin: FileOrigin) -> Self {
        Self {
            suite: Arc::new(suite),
            origin,
        }
    }

    /// The file-level suite.
    pub fn suite(&self) -> &Arc<Suite> {
        &self.suite
    }

    /// Where this entry's content came from.
    pub fn origin(&self) -> FileOrigin {
        self.origin
    }

    /// Returns true if the file contains at least one test.
    pub fn has_tests(&self) -> bool {
        self.suite.has_tests()
    }

    /// Empties the suite, keeping the node.
    pub(crate) fn clear(&mut self) {
        let mut suite = (*self.suite).clone();
        suite.clear();
        self.suite = Arc::new(suite);
        self.origin = FileOrigin::Listed;
    }
}

/// A named group of tests within a configuration.
#[derive(Clone, Debug)]
pub struct TestProject {
    name: String,
    test_dir: Utf8PathBuf,
    enabled: bool,
    files: IndexMap<Utf8PathBuf, FileEntry>,
}

impl TestProject {
    pub(crate) fn new(name: String, test_dir: Utf8PathBuf) -> Self {
        Self {
            name,
            test_dir,
            enabled: false,
            files: IndexMap::new(),
        }
    }

    /// The project name. The default project has an empty name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory the project's tests live in.
    pub fn test_dir(&self) -> &Utf8Path {
        &self.test_dir
    }

    /// Whether the project is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The project's files in the order they were reported.
    pub fn files(&self) -> &IndexMap<Utf8PathBuf, FileEntry> {
        &self.files
    }

    /// Returns the entry for `file`.
    pub fn file(&self, file: &Utf8Path) -> Option<&FileEntry> {
        self.files.get(file)
    }

    /// Assembles the project's suite tree from its file nodes.
    pub fn to_suite(&self) -> Suite {
        let mut suite = Suite::project(self.name.as_str());
        suite.suites = self
            .files
            .values()
            .map(|entry| (*entry.suite).clone())
            .collect();
        suite
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn set_test_dir(&mut self, test_dir: Utf8PathBuf) {
        self.test_dir = test_dir;
    }

    pub(crate) fn files_mut(&mut self) -> &mut IndexMap<Utf8PathBuf, FileEntry> {
        &mut self.files
    }

    /// Makes the file set exactly `files`, keeping known entries and adding placeholders.
    pub(crate) fn set_files(&mut self, files: &[Utf8PathBuf]) {
        self.files.retain(|file, _| files.contains(file));
        for file in files {
            self.files
                .entry(file.clone())
                .or_insert_with(|| FileEntry::placeholder(file));
        }
    }
}
