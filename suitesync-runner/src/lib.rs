// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for suitesync: an in-memory test tree kept consistent with the source
//! tree, an external test runner and live test runs.
//!
//! The main structures are [`model::TestModel`], which tracks a single test configuration, and
//! [`collection::TestModelCollection`], which owns the models of a workspace and persists which
//! of them are enabled.

pub mod client;
pub mod collection;
pub mod config;
pub mod debug;
pub mod errors;
mod helpers;
pub mod hooks;
pub mod model;
pub mod multimap;
pub mod notify;
pub mod reporter_server;
pub mod settings_store;
pub mod source_map;
