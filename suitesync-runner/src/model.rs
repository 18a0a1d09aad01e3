// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test model of a single configuration.
//!
//! The main structure in this module is [`TestModel`]. It reconciles three independent streams
//! of changes into one tree:
//!
//! * file listings from the runner, triggered on enable and on structural workspace changes,
//! * debounced test listings for files whose content changed, and
//! * the project suites reported at the start of each run.

mod imp;
mod project;
mod watch;

pub use imp::*;
pub use project::*;
pub use watch::{WatchItem, WatchRun};
