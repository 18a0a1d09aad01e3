// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Clients for the external test runner.
//!
//! The runner is driven through the [`RunnerClient`] trait. Two strategies are provided:
//! [`CliRunnerClient`] spawns one process per call, and [`ServerRunnerClient`] keeps a single
//! process alive and sends it requests. A model picks one when it is built and keeps it.

mod cli;
mod server;

pub use cli::CliRunnerClient;
pub use server::ServerRunnerClient;

use crate::{config::EngineConfig, errors::RunnerClientError};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use std::{fmt, process::Stdio};
use suitesync_metadata::{
    FullResult, ListFilesReport, RelatedTestFilesReport, ReporterEvent, Suite, TestError,
    TestResult,
};
use tokio_util::sync::CancellationToken;

/// Environment variable carrying the endpoint of an already running browser to connect to.
pub const CONNECT_WS_ENDPOINT_ENV: &str = "SUITESYNC_CONNECT_WS_ENDPOINT";

/// Environment variable that asks the runner to reuse its browser context across runs.
pub const REUSE_CONTEXT_ENV: &str = "SUITESYNC_REUSE_CONTEXT";

/// A capability interface over the external test runner.
pub trait RunnerClient: Send + Sync + fmt::Debug {
    /// Enumerates the projects of the configuration and the test files each one matches.
    fn list_files(&self) -> BoxFuture<'_, Result<ListFilesReport, RunnerClientError>>;

    /// Lists or runs tests at `locations`, streaming results into `sink`.
    ///
    /// An empty `locations` means every test. Cancellation through `token` stops the call early;
    /// whatever was streamed before that remains delivered.
    fn test<'a>(
        &'a self,
        locations: &'a [String],
        mode: TestMode,
        options: &'a RunOptions,
        sink: &'a mut dyn ReporterSink,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), RunnerClientError>>;

    /// Returns the test files that depend on any of `files`.
    fn find_related_test_files<'a>(
        &'a self,
        files: &'a [Utf8PathBuf],
    ) -> BoxFuture<'a, Result<RelatedTestFilesReport, RunnerClientError>>;

    /// Clears any cached process or session state held by the client.
    fn reset(&self) -> BoxFuture<'_, ()>;
}

/// Whether a [`RunnerClient::test`] call lists or runs tests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TestMode {
    /// Discover tests without running them.
    List,

    /// Run tests.
    Test,
}

/// Tracing behavior requested for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceMode {
    /// Record a trace for every test.
    On,

    /// Never record traces.
    Off,
}

impl TraceMode {
    /// The value passed to the runner's `--trace` flag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

/// Options for a [`RunnerClient::test`] call.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Show browser windows.
    pub headed: bool,

    /// The number of workers, or the runner's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Tracing override, or the configuration's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMode>,

    /// Projects to run. Empty means all projects.
    pub projects: Vec<String>,

    /// Only run tests whose title matches this pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grep: Option<String>,

    /// Reuse a browser context across runs.
    pub reuse_context: bool,

    /// Connect to an already running browser at this endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_ws_endpoint: Option<String>,
}

impl RunOptions {
    /// Returns the command-line flags corresponding to these options.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.headed {
            args.push("--headed".to_owned());
        }
        if let Some(workers) = self.workers {
            args.push(format!("--workers={workers}"));
        }
        if let Some(trace) = self.trace {
            args.push(format!("--trace={}", trace.as_str()));
        }
        for project in &self.projects {
            args.push(format!("--project={project}"));
        }
        if let Some(grep) = &self.grep {
            args.push(format!("--grep={grep}"));
        }
        args
    }
}

/// Receives reporter events from a list or test call.
///
/// Every method has an empty default so sinks only implement what they need.
pub trait ReporterSink: Send {
    /// The run has started. `suite` is the root suite.
    fn on_begin(&mut self, suite: &Suite) {
        let _ = suite;
    }

    /// A test has started.
    fn on_test_begin(&mut self, test_id: &str) {
        let _ = test_id;
    }

    /// A test has finished.
    fn on_test_end(&mut self, test_id: &str, result: &TestResult) {
        let _ = (test_id, result);
    }

    /// Standard output from the runner or a test.
    fn on_std_out(&mut self, chunk: &str, test_id: Option<&str>) {
        let _ = (chunk, test_id);
    }

    /// Standard error from the runner or a test.
    fn on_std_err(&mut self, chunk: &str, test_id: Option<&str>) {
        let _ = (chunk, test_id);
    }

    /// An error not attributed to a single test.
    fn on_error(&mut self, error: &TestError) {
        let _ = error;
    }

    /// The run has finished.
    fn on_end(&mut self, result: &FullResult) {
        let _ = result;
    }
}

/// Delivers `event` to the matching [`ReporterSink`] method.
///
/// Returns true if the event ends the stream.
pub fn dispatch_event(sink: &mut dyn ReporterSink, event: &ReporterEvent) -> bool {
    match event {
        ReporterEvent::OnBegin { suite } => sink.on_begin(suite),
        ReporterEvent::OnTestBegin { test_id } => sink.on_test_begin(test_id),
        ReporterEvent::OnTestEnd { test_id, result } => sink.on_test_end(test_id, result),
        ReporterEvent::OnStdOut { chunk, test_id } => sink.on_std_out(chunk, test_id.as_deref()),
        ReporterEvent::OnStdErr { chunk, test_id } => sink.on_std_err(chunk, test_id.as_deref()),
        ReporterEvent::OnError { error } => sink.on_error(error),
        ReporterEvent::OnEnd { result } => {
            sink.on_end(result);
            return true;
        }
    }
    false
}

/// How to invoke the runner: a program plus leading arguments, for example an interpreter and the
/// runner's CLI script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunnerCommand {
    program: Utf8PathBuf,
    leading_args: Vec<String>,
}

impl RunnerCommand {
    /// Creates a command that runs `program` directly.
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Adds an argument passed before every subcommand.
    pub fn leading_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    /// The program.
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Arguments passed before every subcommand.
    pub fn leading_args(&self) -> &[String] {
        &self.leading_args
    }

    /// Returns the full argument vector for a subcommand invocation, program first.
    pub(crate) fn argv<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        std::iter::once(self.program.to_string())
            .chain(self.leading_args.iter().cloned())
            .chain(args.into_iter().map(Into::into))
            .collect()
    }
}

/// Where and how runner processes are launched for one configuration.
#[derive(Clone, Debug)]
pub(crate) struct LaunchContext {
    pub(crate) command: RunnerCommand,
    pub(crate) config_file: Utf8PathBuf,
    pub(crate) env: IndexMap<String, String>,
}

impl LaunchContext {
    pub(crate) fn new(
        command: RunnerCommand,
        config_file: Utf8PathBuf,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            command,
            config_file,
            env: engine.env().clone(),
        }
    }

    /// The directory runner processes are started in.
    pub(crate) fn cwd(&self) -> &Utf8Path {
        self.config_file.parent().unwrap_or(Utf8Path::new("."))
    }

    /// The `-c` argument: the config file name relative to [`cwd`](Self::cwd).
    pub(crate) fn config_arg(&self) -> &str {
        self.config_file.file_name().unwrap_or(self.config_file.as_str())
    }

    pub(crate) fn tokio_command(&self, argv: &[String]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(self.cwd())
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
