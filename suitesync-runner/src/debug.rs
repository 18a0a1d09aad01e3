// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Launching tests under a debugger.
//!
//! Suitesync doesn't attach debuggers itself. It builds a [`DebugLaunch`] describing the runner
//! invocation and hands it to a host-provided [`DebugLauncher`]. Results come back through a
//! [`ReporterServer`](crate::reporter_server::ReporterServer).

use crate::{client::CONNECT_WS_ENDPOINT_ENV, errors::DebugLaunchError};
use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// A debug session to start.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebugLaunch {
    /// A display name for the session.
    pub name: String,

    /// The program to run.
    pub program: Utf8PathBuf,

    /// The working directory.
    pub cwd: Utf8PathBuf,

    /// Arguments, not including the program.
    pub args: Vec<String>,

    /// The complete environment of the process.
    pub env: IndexMap<String, String>,
}

/// Starts debug sessions on behalf of a model.
pub trait DebugLauncher: Send + Sync + fmt::Debug {
    /// Starts `launch` and resolves once the session has ended.
    ///
    /// Implementations should end the session when `token` is cancelled.
    fn launch<'a>(
        &'a self,
        launch: DebugLaunch,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), DebugLaunchError>>;
}

/// Builds the runner arguments for a debug session.
///
/// Locations and the grep pattern are regex-escaped since the runner treats them as patterns.
pub(crate) fn debug_args(
    config_arg: &str,
    locations: &[String],
    projects: &[String],
    grep: Option<&str>,
) -> Vec<String> {
    let mut locations: Vec<_> = locations.iter().map(|location| regex::escape(location)).collect();
    locations.sort();

    let mut args = vec!["test".to_owned(), "-c".to_owned(), config_arg.to_owned()];
    args.extend(locations);
    args.extend(
        [
            "--headed",
            "--repeat-each",
            "1",
            "--retries",
            "0",
            "--timeout",
            "0",
            "--workers",
            "1",
        ]
        .map(str::to_owned),
    );
    args.extend(projects.iter().map(|project| format!("--project={project}")));
    if let Some(grep) = grep {
        args.push(format!("--grep={}", regex::escape(grep)));
    }
    args
}

/// Builds the environment for a debug session.
///
/// Inherited variables whose names start with any of `strip_prefixes` are dropped, since they
/// belong to the host process rather than the runner.
pub(crate) fn debug_env(
    inherited: impl IntoIterator<Item = (String, String)>,
    strip_prefixes: &[String],
    overlay: &IndexMap<String, String>,
    reporter_env: (&str, String),
    connect_ws_endpoint: Option<&str>,
) -> IndexMap<String, String> {
    let mut env: IndexMap<_, _> = inherited
        .into_iter()
        .filter(|(key, _)| !strip_prefixes.iter().any(|prefix| key.starts_with(prefix.as_str())))
        .collect();
    env.extend(overlay.iter().map(|(key, value)| (key.clone(), value.clone())));
    env.insert(reporter_env.0.to_owned(), reporter_env.1);
    if let Some(endpoint) = connect_ws_endpoint {
        env.insert(CONNECT_WS_ENDPOINT_ENV.to_owned(), endpoint.to_owned());
    }
    env.insert("FORCE_COLOR".to_owned(), "1".to_owned());
    env
}
