// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    LaunchContext, ReporterSink, RunOptions, RunnerClient, RunnerCommand, TestMode,
    dispatch_event,
};
use crate::{
    config::EngineConfig,
    errors::{DisplayCommand, RunnerClientError},
};
use camino::Utf8PathBuf;
use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    io,
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
};
use suitesync_metadata::{ListFilesReport, RelatedTestFilesReport, ReporterEvent};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A [`RunnerClient`] that keeps one runner process alive and sends it requests.
///
/// The process is started on the first request and restarted after [`reset`](RunnerClient::reset)
/// or after it exits. Requests are answered one at a time.
#[derive(Debug)]
pub struct ServerRunnerClient {
    ctx: LaunchContext,
    next_id: AtomicU64,
    conn: Mutex<Option<ServerConnection>>,
}

#[derive(Debug)]
struct ServerConnection {
    argv: Vec<String>,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl ServerRunnerClient {
    /// Creates a client for `config_file`, invoking the runner through `command`.
    pub fn new(command: RunnerCommand, config_file: Utf8PathBuf, engine: &EngineConfig) -> Self {
        Self {
            ctx: LaunchContext::new(command, config_file, engine),
            next_id: AtomicU64::new(1),
            conn: Mutex::new(None),
        }
    }

    fn start(&self) -> Result<ServerConnection, RunnerClientError> {
        let argv = self.ctx.command.argv(["run-server", "-c", self.ctx.config_arg()]);
        debug!("starting runner server `{}`", DisplayCommand(argv.clone()));

        let mut cmd = self.ctx.tokio_command(&argv);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn().map_err(|error| RunnerClientError::Spawn {
            command: DisplayCommand(argv.clone()),
            error,
        })?;
        let stdin = child.stdin.take().expect("stdin was set");
        let stdout = child.stdout.take().expect("stdout was set");
        let stderr = child.stderr.take().expect("stderr was set");

        // Keep stderr drained so a chatty server never blocks on a full pipe.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("runner server stderr: {line}");
            }
        });

        Ok(ServerConnection {
            argv,
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Sends a request and waits for its response, dispatching any reports that arrive in the
    /// meantime to `sink`.
    async fn call(
        &self,
        method: &'static str,
        params: Value,
        sink: Option<&mut dyn ReporterSink>,
        token: Option<&CancellationToken>,
    ) -> Result<Value, RunnerClientError> {
        let mut guard = self.conn.lock().await;
        let conn = match guard.take() {
            Some(conn) => conn,
            None => self.start()?,
        };
        let conn = guard.insert(conn);

        let res = self.exchange(conn, method, params, sink, token).await;
        if let Err(error) = &res {
            if !matches!(error, RunnerClientError::Server { .. }) {
                debug!("dropping runner server connection after error: {error}");
                if let Some(mut conn) = guard.take() {
                    let _ = conn.child.start_kill();
                }
            }
        }
        res
    }

    async fn exchange(
        &self,
        conn: &mut ServerConnection,
        method: &'static str,
        params: Value,
        mut sink: Option<&mut dyn ReporterSink>,
        token: Option<&CancellationToken>,
    ) -> Result<Value, RunnerClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        conn.send(id, method, params).await?;

        let mut stop_sent = false;
        loop {
            let step = match token.filter(|_| !stop_sent) {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => ReadStep::Cancelled,
                    line = conn.lines.next_line() => ReadStep::Line(line),
                },
                None => ReadStep::Line(conn.lines.next_line().await),
            };

            let line = match step {
                ReadStep::Cancelled => {
                    debug!("run cancelled, asking runner server to stop");
                    let stop_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    conn.send(stop_id, STOP_TESTS, Value::Object(Default::default()))
                        .await?;
                    stop_sent = true;
                    continue;
                }
                ReadStep::Line(line) => line
                    .map_err(|error| conn.io_error(error))?
                    .ok_or_else(|| RunnerClientError::ServerClosed {
                        command: DisplayCommand(conn.argv.clone()),
                    })?,
            };

            match parse_incoming(&line) {
                Ok(Incoming::Response {
                    id: response_id,
                    outcome,
                }) if response_id == id => {
                    return outcome.map_err(|message| RunnerClientError::Server { method, message });
                }
                Ok(Incoming::Response { .. } | Incoming::Other) => {}
                Ok(Incoming::Report(event)) => {
                    if let Some(sink) = sink.as_deref_mut() {
                        dispatch_event(sink, &event);
                    }
                }
                Err(error) => {
                    debug!("skipping unrecognized runner server output `{line}`: {error}");
                }
            }
        }
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, RunnerClientError> {
        let value = self.call(method, params, None, None).await?;
        serde_json::from_value(value).map_err(|error| RunnerClientError::Deserialize {
            command: DisplayCommand(vec![method.to_owned()]),
            error,
        })
    }

    async fn test_impl(
        &self,
        locations: &[String],
        mode: TestMode,
        options: &RunOptions,
        sink: &mut dyn ReporterSink,
        token: &CancellationToken,
    ) -> Result<(), RunnerClientError> {
        let params = TestParams {
            locations,
            mode: match mode {
                TestMode::List => "list",
                TestMode::Test => "test",
            },
            options,
        };
        let params = serde_json::to_value(&params)
            .map_err(|error| RunnerClientError::Serialize { method: TEST, error })?;
        self.call(TEST, params, Some(sink), Some(token)).await?;
        Ok(())
    }

    async fn reset_impl(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            debug!("stopping runner server `{}`", DisplayCommand(conn.argv.clone()));
            // The server may already have exited.
            let _ = conn.child.start_kill();
            let _ = conn.child.wait().await;
        }
    }
}

impl ServerConnection {
    async fn send(
        &mut self,
        id: u64,
        method: &'static str,
        params: Value,
    ) -> Result<(), RunnerClientError> {
        let mut line = serde_json::to_string(&Request { id, method, params })
            .map_err(|error| RunnerClientError::Serialize { method, error })?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|error| self.io_error(error))?;
        self.stdin.flush().await.map_err(|error| self.io_error(error))
    }

    fn io_error(&self, error: io::Error) -> RunnerClientError {
        RunnerClientError::Io {
            command: DisplayCommand(self.argv.clone()),
            error,
        }
    }
}

impl RunnerClient for ServerRunnerClient {
    fn list_files(&self) -> BoxFuture<'_, Result<ListFilesReport, RunnerClientError>> {
        self.call_typed(LIST_FILES, Value::Object(Default::default()))
            .boxed()
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
        async move {
            let params = serde_json::json!({ "files": files });
            self.call_typed(FIND_RELATED_TEST_FILES, params).await
        }
        .boxed()
    }

    fn reset(&self) -> BoxFuture<'_, ()> {
        self.reset_impl().boxed()
    }
}

const LIST_FILES: &str = "listFiles";
const TEST: &str = "test";
const FIND_RELATED_TEST_FILES: &str = "findRelatedTestFiles";
const STOP_TESTS: &str = "stopTests";

enum ReadStep {
    Cancelled,
    Line(io::Result<Option<String>>),
}

#[derive(Serialize)]
struct Request {
    id: u64,
    method: &'static str,
    params: Value,
}

#[derive(Serialize)]
struct TestParams<'a> {
    locations: &'a [String],
    mode: &'static str,
    options: &'a RunOptions,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Deserialize)]
struct RawError {
    message: String,
}

#[derive(Debug, PartialEq)]
enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, String>,
    },
    Report(ReporterEvent),
    Other,
}

fn parse_incoming(line: &str) -> Result<Incoming, serde_json::Error> {
    let message: RawMessage = serde_json::from_str(line)?;
    if let Some(id) = message.id {
        let outcome = match message.error {
            Some(error) => Err(error.message),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        return Ok(Incoming::Response { id, outcome });
    }
    match (message.method.as_deref(), message.params) {
        (Some("report"), Some(params)) => Ok(Incoming::Report(serde_json::from_value(params)?)),
        _ => Ok(Incoming::Other),
    }
}
