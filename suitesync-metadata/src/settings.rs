// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Enablement state persisted per workspace.
///
/// This is everything needed to restore which configurations and projects were enabled, and
/// which configuration was selected.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSettings {
    /// One entry per known configuration.
    #[serde(default)]
    pub configs: Vec<ConfigSettings>,
}

impl WorkspaceSettings {
    /// Looks up the settings for a configuration by its path relative to the workspace folder.
    pub fn config(&self, relative_config_file: &Utf8Path) -> Option<&ConfigSettings> {
        self.configs
            .iter()
            .find(|config| config.relative_config_file == relative_config_file)
    }
}

/// Persisted state of one configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSettings {
    /// The configuration file, relative to its workspace folder.
    pub relative_config_file: Utf8PathBuf,

    /// Whether this configuration was the selected one.
    #[serde(default)]
    pub selected: bool,

    /// Whether the configuration was enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Per-project enablement.
    #[serde(default)]
    pub projects: Vec<ProjectSettings>,
}

impl ConfigSettings {
    /// Looks up a project's settings by name.
    pub fn project(&self, name: &str) -> Option<&ProjectSettings> {
        self.projects.iter().find(|project| project.name == name)
    }
}

/// Persisted state of one project.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    /// The project name.
    pub name: String,

    /// Whether the project was enabled.
    pub enabled: bool,
}
