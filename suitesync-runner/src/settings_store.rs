// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence for per-configuration and per-project enablement.

use crate::errors::SettingsStoreError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, io::Write, sync::Mutex};
use suitesync_metadata::WorkspaceSettings;

/// Loads and saves [`WorkspaceSettings`].
pub trait SettingsStore: Send + Sync + fmt::Debug {
    /// Loads the settings. A store with nothing saved yet returns empty settings.
    fn load(&self) -> Result<WorkspaceSettings, SettingsStoreError>;

    /// Replaces the saved settings.
    fn save(&self, settings: &WorkspaceSettings) -> Result<(), SettingsStoreError>;
}

/// Stores settings as a JSON file, written atomically.
#[derive(Clone, Debug)]
pub struct FileSettingsStore {
    path: Utf8PathBuf,
}

impl FileSettingsStore {
    /// Creates a store backed by `path`. The file is created on the first save.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<WorkspaceSettings, SettingsStoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WorkspaceSettings::default());
            }
            Err(error) => {
                return Err(SettingsStoreError::Read {
                    path: self.path.clone(),
                    error,
                });
            }
        };
        serde_json::from_str(&contents).map_err(|error| SettingsStoreError::Deserialize {
            path: self.path.clone(),
            error,
        })
    }

    fn save(&self, settings: &WorkspaceSettings) -> Result<(), SettingsStoreError> {
        let json = serde_json::to_string_pretty(settings).map_err(SettingsStoreError::Serialize)?;
        let write_error = |error| SettingsStoreError::Write {
            path: self.path.clone(),
            error,
        };

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        atomicwrites::AtomicFile::new(&self.path, atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|error| match error {
                atomicwrites::Error::Internal(error) | atomicwrites::Error::User(error) => {
                    write_error(error)
                }
            })
    }
}

/// Keeps settings in memory, for hosts that persist them some other way.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    settings: Mutex<WorkspaceSettings>,
}

impl InMemorySettingsStore {
    /// Creates a store holding `settings`.
    pub fn new(settings: WorkspaceSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    /// Returns a copy of the current settings.
    pub fn snapshot(&self) -> WorkspaceSettings {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn load(&self) -> Result<WorkspaceSettings, SettingsStoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, settings: &WorkspaceSettings) -> Result<(), SettingsStoreError> {
        *self
            .settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings.clone();
        Ok(())
    }
}
