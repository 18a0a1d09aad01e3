// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A position within a source file.
///
/// Lines and columns are 1-based as reported by the runner. A location synthesized for a
/// configuration-level error uses line 0 and column 0.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The absolute path to the file.
    pub file: Utf8PathBuf,

    /// The line number.
    pub line: u32,

    /// The column number.
    pub column: u32,
}

impl Location {
    /// Creates a new location.
    pub fn new(file: impl Into<Utf8PathBuf>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Returns the `file:line` form that runners accept as a location filter.
    pub fn to_filter(&self) -> String {
        format!("{}:{}", self.file, self.line)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An error reported by the runner while loading a configuration, listing or running tests.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestError {
    /// The error message.
    pub message: String,

    /// Where the error is rooted, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// The stack trace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl TestError {
    /// Creates a new error rooted at `location`.
    pub fn new(message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            message: message.into(),
            location,
            stack: None,
        }
    }

    /// The file this error is rooted at, if any.
    pub fn file(&self) -> Option<&Utf8Path> {
        self.location.as_ref().map(|location| location.file.as_path())
    }
}

/// The kind of a [`Suite`] node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuiteKind {
    /// The root suite of a report. Its children are project suites.
    Root,

    /// A project. Its children are file suites.
    Project,

    /// A test file, keyed by its absolute path.
    File,

    /// A grouping of tests within a file.
    Describe,
}

/// A node in the hierarchical test tree reported by the runner.
///
/// File-level suites are identified by `location.file`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    /// The kind of node.
    pub kind: SuiteKind,

    /// The title. For projects this is the project name, for files the path.
    pub title: String,

    /// The location of the node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Child suites.
    #[serde(default)]
    pub suites: Vec<Suite>,

    /// Tests directly within this suite.
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

impl Suite {
    /// Creates an empty root suite.
    pub fn root() -> Self {
        Self::new(SuiteKind::Root, "", None)
    }

    /// Creates an empty project suite.
    pub fn project(name: impl Into<String>) -> Self {
        Self::new(SuiteKind::Project, name, None)
    }

    /// Creates an empty file suite for `file`.
    pub fn file(file: impl Into<Utf8PathBuf>) -> Self {
        let file = file.into();
        let title = file.to_string();
        Self::new(SuiteKind::File, title, Some(Location::new(file, 0, 0)))
    }

    fn new(kind: SuiteKind, title: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            kind,
            title: title.into(),
            location,
            suites: Vec::new(),
            tests: Vec::new(),
        }
    }

    /// The file this suite is located in.
    pub fn file_path(&self) -> Option<&Utf8Path> {
        self.location.as_ref().map(|location| location.file.as_path())
    }

    /// Returns an iterator over all tests within this suite, depth-first.
    pub fn all_tests(&self) -> AllTests<'_> {
        AllTests {
            stack: vec![self],
            current: [].iter(),
        }
    }

    /// Returns true if this suite or any descendant contains a test.
    pub fn has_tests(&self) -> bool {
        self.all_tests().next().is_some()
    }

    /// Finds a test by its id.
    pub fn find_test(&self, id: &str) -> Option<&TestCase> {
        self.all_tests().find(|test| test.id == id)
    }

    /// Removes all child suites and tests, keeping the node itself.
    pub fn clear(&mut self) {
        self.suites.clear();
        self.tests.clear();
    }
}

/// Iterator returned by [`Suite::all_tests`].
#[derive(Clone, Debug)]
pub struct AllTests<'a> {
    stack: Vec<&'a Suite>,
    current: std::slice::Iter<'a, TestCase>,
}

impl<'a> Iterator for AllTests<'a> {
    type Item = &'a TestCase;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(test) = self.current.next() {
                return Some(test);
            }
            let suite = self.stack.pop()?;
            // Push in reverse so that children are visited in order.
            self.stack.extend(suite.suites.iter().rev());
            self.current = suite.tests.iter();
        }
    }
}

/// A single test case.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// An id that is stable across listings as long as the test's file, title path and project
    /// don't change.
    pub id: String,

    /// The title of the test.
    pub title: String,

    /// Where the test is declared.
    pub location: Location,
}
