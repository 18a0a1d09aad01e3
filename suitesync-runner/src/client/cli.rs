// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    CONNECT_WS_ENDPOINT_ENV, LaunchContext, REUSE_CONTEXT_ENV, ReporterSink, RunOptions,
    RunnerClient, RunnerCommand, TestMode, dispatch_event,
};
use crate::{
    config::EngineConfig,
    errors::{DisplayCommand, RunnerClientError},
};
use camino::Utf8PathBuf;
use futures::{FutureExt, future::BoxFuture};
use serde::de::DeserializeOwned;
use suitesync_metadata::{ListFilesReport, RelatedTestFilesReport, ReporterEvent};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A [`RunnerClient`] that spawns a fresh runner process for every call.
#[derive(Clone, Debug)]
pub struct CliRunnerClient {
    ctx: LaunchContext,
}

impl CliRunnerClient {
    /// Creates a client for `config_file`, invoking the runner through `command`.
    pub fn new(command: RunnerCommand, config_file: Utf8PathBuf, engine: &EngineConfig) -> Self {
        Self {
            ctx: LaunchContext::new(command, config_file, engine),
        }
    }

    /// Runs a subcommand to completion and parses its standard output as JSON.
    ///
    /// A runner that fails to load its configuration still prints a report and then exits with
    /// a failure, so the output is parsed regardless of the exit status.
    async fn run_json<T: DeserializeOwned>(&self, args: Vec<String>) -> Result<T, RunnerClientError> {
        let argv = self.ctx.command.argv(args);
        debug!("running `{}`", DisplayCommand(argv.clone()));

        let child = self
            .ctx
            .tokio_command(&argv)
            .spawn()
            .map_err(|error| RunnerClientError::Spawn {
                command: DisplayCommand(argv.clone()),
                error,
            })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|error| RunnerClientError::Io {
                command: DisplayCommand(argv.clone()),
                error,
            })?;

        match serde_json::from_slice(&output.stdout) {
            Ok(value) => Ok(value),
            Err(_) if !output.status.success() => Err(RunnerClientError::ExitStatus {
                command: DisplayCommand(argv),
                exit_status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Err(error) => Err(RunnerClientError::Deserialize {
                command: DisplayCommand(argv),
                error,
            }),
        }
    }

    async fn test_impl(
        &self,
        locations: &[String],
        mode: TestMode,
        options: &RunOptions,
        sink: &mut dyn ReporterSink,
        token: &CancellationToken,
    ) -> Result<(), RunnerClientError> {
        let mut args = vec![
            "test".to_owned(),
            "-c".to_owned(),
            self.ctx.config_arg().to_owned(),
            "--reporter=jsonl".to_owned(),
        ];
        if mode == TestMode::List {
            args.push("--list".to_owned());
        }
        args.extend(options.to_args());
        args.extend(locations.iter().cloned());
        let argv = self.ctx.command.argv(args);
        debug!("running `{}`", DisplayCommand(argv.clone()));

        let mut cmd = self.ctx.tokio_command(&argv);
        if let Some(endpoint) = &options.connect_ws_endpoint {
            cmd.env(CONNECT_WS_ENDPOINT_ENV, endpoint);
        }
        if options.reuse_context {
            cmd.env(REUSE_CONTEXT_ENV, "1");
        }
        let mut child = cmd.spawn().map_err(|error| RunnerClientError::Spawn {
            command: DisplayCommand(argv.clone()),
            error,
        })?;
        let stdout = child.stdout.take().expect("stdout was set");
        let mut stderr = child.stderr.take().expect("stderr was set");

        let read_events = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut saw_event = false;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("run cancelled, stopping `{}`", DisplayCommand(argv.clone()));
                        // The process may already have exited.
                        let _ = child.start_kill();
                        return Ok(true);
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if handle_line(sink, &line) {
                                saw_event = true;
                            }
                        }
                        Ok(None) => return Ok(saw_event),
                        Err(error) => {
                            return Err(RunnerClientError::Io {
                                command: DisplayCommand(argv.clone()),
                                error,
                            });
                        }
                    },
                }
            }
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            // Errors here only lose diagnostics.
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        };
        let (events, stderr) = futures::future::join(read_events, read_stderr).await;
        let saw_event = events?;

        let exit_status = child.wait().await.map_err(|error| RunnerClientError::Io {
            command: DisplayCommand(argv.clone()),
            error,
        })?;
        debug!(
            "`{}` exited with {exit_status}",
            DisplayCommand(argv.clone())
        );

        // Failing tests make the runner exit unsuccessfully, which is not an error here. Only a
        // runner that never reported anything is treated as broken.
        if !exit_status.success() && !saw_event && !token.is_cancelled() {
            return Err(RunnerClientError::ExitStatus {
                command: DisplayCommand(argv),
                exit_status,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Parses one line of reporter output and delivers it. Returns true if the line was an event.
fn handle_line(sink: &mut dyn ReporterSink, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    match serde_json::from_str::<ReporterEvent>(line) {
        Ok(event) => {
            dispatch_event(sink, &event);
            true
        }
        Err(error) => {
            debug!("skipping unrecognized runner output `{line}`: {error}");
            false
        }
    }
}

impl RunnerClient for CliRunnerClient {
    fn list_files(&self) -> BoxFuture<'_, Result<ListFilesReport, RunnerClientError>> {
        let args = vec![
            "list-files".to_owned(),
            "-c".to_owned(),
            self.ctx.config_arg().to_owned(),
        ];
        self.run_json(args).boxed()
    }

    fn test<'a>(
        &'a self,
        locations: &'a [String],
        mode: TestMode,
        options: &'a RunOptions,
        sink: &'a mut dyn ReporterSink,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), RunnerClientError>> {
        self.test_impl(locations, mode, options, sink, token).boxed()
    }

    fn find_related_test_files<'a>(
        &'a self,
        files: &'a [Utf8PathBuf],
    ) -> BoxFuture<'a, Result<RelatedTestFilesReport, RunnerClientError>> {
        let mut args = vec![
            "find-related-test-files".to_owned(),
            "-c".to_owned(),
            self.ctx.config_arg().to_owned(),
        ];
        args.extend(files.iter().map(|file| file.to_string()));
        self.run_json(args).boxed()
    }

    fn reset(&self) -> BoxFuture<'_, ()> {
        futures::future::ready(()).boxed()
    }
}
