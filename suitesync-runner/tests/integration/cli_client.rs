// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs [`CliRunnerClient`] against shell scripts standing in for a runner.

use crate::fixtures::*;
use camino::Utf8PathBuf;
use camino_tempfile::{Utf8TempDir, tempdir};
use indoc::formatdoc;
use pretty_assertions::assert_eq;
use std::time::Duration;
use suitesync_metadata::{
    FullResult, FullStatus, ListFilesReport, ReporterEvent, TestResult, TestStatus,
};
use suitesync_runner::{
    client::{CliRunnerClient, ReporterSink, RunOptions, RunnerClient, RunnerCommand, TestMode},
    config::EngineConfig,
    errors::RunnerClientError,
};
use tokio_util::sync::CancellationToken;

struct ScriptedRunner {
    dir: Utf8TempDir,
    client: CliRunnerClient,
}

impl ScriptedRunner {
    /// Writes `body` as a shell script and builds a client that runs it for every call.
    fn new(body: &str) -> Self {
        let dir = tempdir().unwrap();
        let script = dir.path().join("runner.sh");
        let contents = formatdoc! {"
            printf '%s\\n' \"$@\" > args.txt
            {body}
            ",
            body = body,
        };
        std::fs::write(&script, contents).unwrap();

        let mut engine = EngineConfig::default_config();
        engine.add_env("SUITESYNC_TEST_MARKER", "set");
        let client = CliRunnerClient::new(
            RunnerCommand::new("/bin/sh").leading_arg(script.as_str()),
            dir.path().join("suite.config.ts"),
            &engine,
        );
        Self { dir, client }
    }

    /// The arguments the script was last invoked with, after the script path.
    fn args(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("args.txt"))
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

fn jsonl(events: &[ReporterEvent]) -> String {
    events
        .iter()
        .map(|event| serde_json::to_string(event).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

fn passed(test_id: &str) -> ReporterEvent {
    ReporterEvent::OnTestEnd {
        test_id: test_id.to_owned(),
        result: TestResult {
            status: TestStatus::Passed,
            duration: 3,
            errors: vec![],
        },
    }
}

fn end(status: FullStatus) -> ReporterEvent {
    ReporterEvent::OnEnd {
        result: FullResult { status },
    }
}

#[tokio::test]
async fn list_files_parses_the_report() {
    let report = ListFilesReport {
        error: None,
        projects: vec![project("chromium", &["/ws/tests/a.spec.ts"])],
    };
    let runner = ScriptedRunner::new(&formatdoc! {"
        cat <<'EOF'
        {json}
        EOF
        ",
        json = serde_json::to_string(&report).unwrap(),
    });

    let listed = runner.client.list_files().await.unwrap();
    assert_eq!(listed, report);
    assert_eq!(runner.args(), vec!["list-files", "-c", "suite.config.ts"]);
}

#[tokio::test]
async fn list_files_reads_a_report_from_a_failing_runner() {
    let report = ListFilesReport::from_error(suitesync_metadata::TestError::new(
        "Cannot find module 'missing'",
        None,
    ));
    let runner = ScriptedRunner::new(&formatdoc! {"
        cat <<'EOF'
        {json}
        EOF
        exit 1
        ",
        json = serde_json::to_string(&report).unwrap(),
    });

    assert_eq!(runner.client.list_files().await.unwrap(), report);
}

#[tokio::test]
async fn list_files_without_output_reports_the_exit_status() {
    let runner = ScriptedRunner::new("echo 'config exploded' >&2\nexit 3");

    let error = runner.client.list_files().await.unwrap_err();
    match error {
        RunnerClientError::ExitStatus {
            exit_status,
            stderr,
            ..
        } => {
            assert_eq!(exit_status.code(), Some(3));
            assert_eq!(stderr, "config exploded\n");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_streams_events_and_skips_noise() {
    let events = [passed("t1"), passed("t2"), end(FullStatus::Failed)];
    let runner = ScriptedRunner::new(&formatdoc! {"
        echo 'Running 2 tests using 1 worker'
        cat <<'EOF'
        {json}
        EOF
        echo \"$SUITESYNC_TEST_MARKER $SUITESYNC_REUSE_CONTEXT\" > env.txt
        exit 1
        ",
        json = jsonl(&events),
    });

    let options = RunOptions {
        headed: true,
        workers: Some(1),
        projects: vec!["chromium".to_owned()],
        reuse_context: true,
        ..Default::default()
    };
    let mut sink = RecordingSink::default();
    runner
        .client
        .test(
            &["/ws/tests/a.spec.ts:3".to_owned()],
            TestMode::Test,
            &options,
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(sink.events, vec!["t1 Passed", "t2 Passed", "end Failed"]);
    assert_eq!(
        std::fs::read_to_string(runner.dir.path().join("env.txt")).unwrap(),
        "set 1\n"
    );
    assert_eq!(
        runner.args(),
        vec![
            "test",
            "-c",
            "suite.config.ts",
            "--reporter=jsonl",
            "--headed",
            "--workers=1",
            "--project=chromium",
            "/ws/tests/a.spec.ts:3",
        ]
    );
}

#[tokio::test]
async fn listing_passes_the_list_flag() {
    let runner = ScriptedRunner::new(&format!("echo '{}'", jsonl(&[end(FullStatus::Passed)])));

    let mut sink = RecordingSink::default();
    runner
        .client
        .test(
            &["/ws/tests/a.spec.ts".to_owned()],
            TestMode::List,
            &RunOptions::default(),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(sink.events, vec!["end Passed"]);
    assert_eq!(
        runner.args(),
        vec![
            "test",
            "-c",
            "suite.config.ts",
            "--reporter=jsonl",
            "--list",
            "/ws/tests/a.spec.ts",
        ]
    );
}

#[tokio::test]
async fn test_without_events_reports_the_exit_status() {
    let runner = ScriptedRunner::new("echo 'Error: no tests found'\nexit 1");

    let error = runner
        .client
        .test(
            &[],
            TestMode::Test,
            &RunOptions::default(),
            &mut RecordingSink::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(
        matches!(error, RunnerClientError::ExitStatus { .. }),
        "unexpected error: {error}"
    );
}

/// Cancels the run as soon as the first test finishes.
struct CancelOnFirstResult {
    token: CancellationToken,
    seen: Vec<String>,
}

impl ReporterSink for CancelOnFirstResult {
    fn on_test_end(&mut self, test_id: &str, _result: &TestResult) {
        self.seen.push(test_id.to_owned());
        self.token.cancel();
    }
}

#[tokio::test]
async fn cancelling_stops_the_runner() {
    // `exec` so that killing the shell also ends the sleep holding the pipes open.
    let runner = ScriptedRunner::new(&format!(
        "echo '{}'\nexec sleep 60",
        jsonl(&[passed("t1")])
    ));

    let token = CancellationToken::new();
    let mut sink = CancelOnFirstResult {
        token: token.clone(),
        seen: Vec::new(),
    };
    let res = tokio::time::timeout(
        Duration::from_secs(30),
        runner.client.test(
            &[],
            TestMode::Test,
            &RunOptions::default(),
            &mut sink,
            &token,
        ),
    )
    .await
    .expect("the runner was stopped");
    res.unwrap();
    assert_eq!(sink.seen, vec!["t1"]);
}

#[tokio::test]
async fn find_related_test_files_passes_the_files() {
    let runner = ScriptedRunner::new(
        r#"echo '{"testFiles":["/ws/tests/a.spec.ts"],"errors":[]}'"#,
    );

    let report = runner
        .client
        .find_related_test_files(&[Utf8PathBuf::from("/ws/src/a.ts")])
        .await
        .unwrap();
    assert_eq!(report.test_files, vec![Utf8PathBuf::from("/ws/tests/a.spec.ts")]);
    assert_eq!(
        runner.args(),
        vec![
            "find-related-test-files",
            "-c",
            "suite.config.ts",
            "/ws/src/a.ts",
        ]
    );
}
