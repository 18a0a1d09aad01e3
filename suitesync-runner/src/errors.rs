// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by suitesync.

use camino::Utf8PathBuf;
use config::ConfigError;
use std::{fmt, io, process::ExitStatus};
use thiserror::Error;

/// An error that occurred while parsing the engine config.
#[derive(Debug, Error)]
#[error("failed to parse suitesync config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing the engine config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// A command line, for display in error messages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DisplayCommand(pub Vec<String>);

impl fmt::Display for DisplayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// An error returned by a [`RunnerClient`](crate::client::RunnerClient).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerClientError {
    /// The runner process could not be started.
    #[error("failed to start runner `{command}`")]
    Spawn {
        /// The command that was run.
        command: DisplayCommand,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Reading from or writing to the runner process failed.
    #[error("failed to communicate with runner `{command}`")]
    Io {
        /// The command that was run.
        command: DisplayCommand,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The runner process exited unsuccessfully without producing a usable report.
    #[error("runner `{command}` exited with {exit_status}")]
    ExitStatus {
        /// The command that was run.
        command: DisplayCommand,

        /// The exit status.
        exit_status: ExitStatus,

        /// Standard error, lossily decoded.
        stderr: String,
    },

    /// The runner produced output that could not be parsed.
    #[error("runner `{command}` produced malformed output")]
    Deserialize {
        /// The command that was run.
        command: DisplayCommand,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A request could not be serialized.
    #[error("failed to serialize request `{method}` for the runner server")]
    Serialize {
        /// The request method.
        method: &'static str,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The runner server exited or closed its output before answering.
    #[error("runner server `{command}` closed the connection")]
    ServerClosed {
        /// The command that started the server.
        command: DisplayCommand,
    },

    /// The runner server answered a request with an error.
    #[error("runner server failed `{method}`: {message}")]
    Server {
        /// The request method.
        method: &'static str,

        /// The message reported by the server.
        message: String,
    },
}

/// An error that occurred while reading or writing persisted workspace settings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsStoreError {
    /// The settings file could not be read.
    #[error("failed to read settings from `{path}`")]
    Read {
        /// The settings file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The settings file could not be parsed.
    #[error("failed to parse settings at `{path}`")]
    Deserialize {
        /// The settings file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The settings could not be serialized.
    #[error("failed to serialize settings")]
    Serialize(#[source] serde_json::Error),

    /// The settings file could not be written.
    #[error("failed to write settings to `{path}`")]
    Write {
        /// The settings file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred in the [`ReporterServer`](crate::reporter_server::ReporterServer).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReporterServerError {
    /// Binding the listener failed.
    #[error("failed to bind reporter server")]
    Bind(#[source] io::Error),

    /// Accepting the reporter connection failed.
    #[error("failed to accept reporter connection")]
    Accept(#[source] io::Error),

    /// Reading from the reporter connection failed.
    #[error("failed to read from reporter connection")]
    Read(#[source] io::Error),
}

/// An error returned by a [`DebugLauncher`](crate::debug::DebugLauncher).
#[derive(Debug, Error)]
#[error("failed to start debug session `{name}`: {message}")]
pub struct DebugLaunchError {
    name: String,
    message: String,
}

impl DebugLaunchError {
    /// Creates a new error for the session `name`.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// An error that occurred while debugging tests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DebugTestsError {
    /// No debug launcher was configured for the model.
    #[error("no debug launcher configured for `{config_file}`")]
    NoDebugLauncher {
        /// The configuration that was being debugged.
        config_file: Utf8PathBuf,
    },

    /// The reporter server failed.
    #[error(transparent)]
    ReporterServer(#[from] ReporterServerError),

    /// Starting the debug session failed.
    #[error(transparent)]
    Launch(#[from] DebugLaunchError),
}
