// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for suitesync.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::Utf8Path;
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use serde::Deserialize;
use std::time::Duration;

/// Engine-wide configuration.
///
/// The embedded [default config](Self::DEFAULT_CONFIG) is layered under an optional
/// repository config at [`CONFIG_PATH`](Self::CONFIG_PATH).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    runner_mode: RunnerMode,
    list_debounce: Duration,
    show_browser: bool,
    show_trace: bool,
    strip_env_prefixes: Vec<String>,
    env: IndexMap<String, String>,
}

impl EngineConfig {
    /// The default location of the config within the workspace root.
    pub const CONFIG_PATH: &'static str = ".config/suitesync.toml";

    /// Contains the default config as a TOML file.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from `config_file`, or if not specified from
    /// [`CONFIG_PATH`](Self::CONFIG_PATH) in the workspace root.
    ///
    /// An explicitly specified file must exist. The default location is optional.
    pub fn from_sources(
        workspace_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let inner = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file, kind))?;
        Ok(inner.into())
    }

    /// Returns the default config.
    pub fn default_config() -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");
        let inner: EngineConfigImpl = config
            .try_deserialize()
            .expect("default config is always valid");
        inner.into()
    }

    /// How the external runner is driven.
    pub fn runner_mode(&self) -> RunnerMode {
        self.runner_mode
    }

    /// The window within which listing requests are batched together.
    pub fn list_debounce(&self) -> Duration {
        self.list_debounce
    }

    /// Whether browser-reuse mode is on.
    pub fn show_browser(&self) -> bool {
        self.show_browser
    }

    /// Whether every test should record a trace.
    pub fn show_trace(&self) -> bool {
        self.show_trace
    }

    /// Prefixes of inherited environment variables that are not passed to debugged processes.
    pub fn strip_env_prefixes(&self) -> &[String] {
        &self.strip_env_prefixes
    }

    /// Extra environment variables for runner processes.
    pub fn env(&self) -> &IndexMap<String, String> {
        &self.env
    }

    /// Sets the runner mode.
    pub fn set_runner_mode(&mut self, runner_mode: RunnerMode) -> &mut Self {
        self.runner_mode = runner_mode;
        self
    }

    /// Sets the listing debounce window.
    pub fn set_list_debounce(&mut self, list_debounce: Duration) -> &mut Self {
        self.list_debounce = list_debounce;
        self
    }

    /// Sets browser-reuse mode.
    pub fn set_show_browser(&mut self, show_browser: bool) -> &mut Self {
        self.show_browser = show_browser;
        self
    }

    /// Sets trace-always mode.
    pub fn set_show_trace(&mut self, show_trace: bool) -> &mut Self {
        self.show_trace = show_trace;
        self
    }

    /// Adds an environment variable for runner processes.
    pub fn add_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<EngineConfigImpl, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        serde_path_to_error::deserialize(config)
            .map_err(|error| ConfigParseErrorKind::DeserializeError(Box::new(error)))
    }
}

/// How the external runner is driven. Chosen once when a model is built.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunnerMode {
    /// One runner process per call.
    Cli,

    /// One persistent runner process that serves requests.
    Server,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EngineConfigImpl {
    runner: RunnerConfigImpl,
    listing: ListingConfigImpl,
    run: RunConfigImpl,
    debug: DebugConfigImpl,
    #[serde(default)]
    env: IndexMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunnerConfigImpl {
    mode: RunnerMode,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ListingConfigImpl {
    #[serde(with = "humantime_serde")]
    debounce: Duration,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunConfigImpl {
    show_browser: bool,
    show_trace: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DebugConfigImpl {
    strip_env_prefixes: Vec<String>,
}

impl From<EngineConfigImpl> for EngineConfig {
    fn from(inner: EngineConfigImpl) -> Self {
        Self {
            runner_mode: inner.runner.mode,
            list_debounce: inner.listing.debounce,
            show_browser: inner.run.show_browser,
            show_trace: inner.run.show_trace,
            strip_env_prefixes: inner.debug.strip_env_prefixes,
            env: inner.env,
        }
    }
}
