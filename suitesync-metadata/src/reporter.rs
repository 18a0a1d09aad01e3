// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{Suite, TestError};
use serde::{Deserialize, Serialize};

/// A reporter event streamed by the runner while listing or running tests.
///
/// On the wire, events are JSON objects of the form `{"method": "onTestEnd", "params": {...}}`,
/// one per line.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum ReporterEvent {
    /// The run has started. `suite` is the root suite; its children are project suites.
    OnBegin {
        /// The root suite.
        suite: Suite,
    },

    /// A test has started.
    #[serde(rename_all = "camelCase")]
    OnTestBegin {
        /// The id of the test.
        test_id: String,
    },

    /// A test has finished.
    #[serde(rename_all = "camelCase")]
    OnTestEnd {
        /// The id of the test.
        test_id: String,

        /// The outcome.
        result: TestResult,
    },

    /// Standard output produced by the runner or a test.
    #[serde(rename_all = "camelCase")]
    OnStdOut {
        /// The output chunk.
        chunk: String,

        /// The test that produced it, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        test_id: Option<String>,
    },

    /// Standard error produced by the runner or a test.
    #[serde(rename_all = "camelCase")]
    OnStdErr {
        /// The output chunk.
        chunk: String,

        /// The test that produced it, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        test_id: Option<String>,
    },

    /// An error not attributed to a single test, e.g. a file that failed to load.
    OnError {
        /// The error.
        error: TestError,
    },

    /// The run has finished.
    OnEnd {
        /// The overall outcome.
        result: FullResult,
    },
}

/// The outcome of a single test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// The status.
    pub status: TestStatus,

    /// The duration in milliseconds.
    #[serde(default)]
    pub duration: u64,

    /// Errors thrown by the test.
    #[serde(default)]
    pub errors: Vec<TestError>,
}

/// The status of a single test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed,

    /// The test timed out.
    TimedOut,

    /// The test was skipped.
    Skipped,

    /// The test was interrupted.
    Interrupted,
}

/// The outcome of a whole run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullResult {
    /// The status.
    pub status: FullStatus,
}

/// The status of a whole run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullStatus {
    /// Every test passed.
    Passed,

    /// At least one test failed.
    Failed,

    /// The run hit its global timeout.
    TimedOut,

    /// The run was interrupted.
    Interrupted,
}
