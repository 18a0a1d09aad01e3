// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestProject;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use tokio_util::sync::CancellationToken;

/// Something to watch for changes.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum WatchItem {
    /// Every test in a file.
    File(Utf8PathBuf),

    /// A single test, identified by its stable id.
    Test {
        /// The file containing the test.
        file: Utf8PathBuf,

        /// The test id.
        test_id: String,
    },
}

impl WatchItem {
    fn file(&self) -> &Utf8Path {
        match self {
            Self::File(file) | Self::Test { file, .. } => file,
        }
    }
}

/// A run requested by a watch after a workspace change.
#[derive(Clone, Debug)]
pub struct WatchRun {
    /// The locations to run, as `file` or `file:line`.
    pub locations: Vec<String>,

    /// The watch's token. Cancelling it ends the watch.
    pub token: CancellationToken,
}

#[derive(Clone, Debug)]
pub(super) struct Watch {
    /// `None` watches everything.
    items: Option<Vec<WatchItem>>,
    token: CancellationToken,
}

impl Watch {
    pub(super) fn new(items: Option<Vec<WatchItem>>, token: CancellationToken) -> Self {
        Self { items, token }
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns the run this watch wants after `affected` files changed, if any.
    ///
    /// Test-scoped items are resolved against the current listing so the location reflects
    /// where the test is now. Tests that no longer exist are skipped.
    pub(super) fn run_for(
        &self,
        affected: &IndexSet<Utf8PathBuf>,
        projects: &IndexMap<String, TestProject>,
    ) -> Option<WatchRun> {
        let mut locations = IndexSet::new();
        match &self.items {
            None => {
                locations.extend(affected.iter().map(|file| file.to_string()));
            }
            Some(items) => {
                for item in items.iter().filter(|item| affected.contains(item.file())) {
                    match item {
                        WatchItem::File(file) => {
                            locations.insert(file.to_string());
                        }
                        WatchItem::Test { file, test_id } => {
                            let found = projects
                                .values()
                                .filter(|project| project.is_enabled())
                                .filter_map(|project| project.file(file))
                                .find_map(|entry| entry.suite().find_test(test_id));
                            if let Some(test) = found {
                                locations.insert(test.location.to_filter());
                            }
                        }
                    }
                }
            }
        }

        (!locations.is_empty()).then(|| WatchRun {
            locations: locations.into_iter().collect(),
            token: self.token.clone(),
        })
    }
}
