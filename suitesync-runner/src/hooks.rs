// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hooks invoked around test runs and debug sessions.

use crate::model::TestConfig;
use futures::{FutureExt, future::BoxFuture};
use std::fmt;

/// Overrides returned by [`RunHooks::on_will_run_tests`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunHookOptions {
    /// An already running browser that the runner should connect to.
    pub connect_ws_endpoint: Option<String>,
}

/// Called before and after every run or debug session of a model.
///
/// `on_did_run_tests` is called exactly once for every `on_will_run_tests` call, however the run
/// ends.
pub trait RunHooks: Send + Sync + fmt::Debug {
    /// A run is about to start.
    fn on_will_run_tests<'a>(
        &'a self,
        config: &'a TestConfig,
        debug: bool,
    ) -> BoxFuture<'a, RunHookOptions>;

    /// A run has finished.
    fn on_did_run_tests(&self, debug: bool) -> BoxFuture<'_, ()>;
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRunHooks;

impl RunHooks for NoopRunHooks {
    fn on_will_run_tests<'a>(
        &'a self,
        _config: &'a TestConfig,
        _debug: bool,
    ) -> BoxFuture<'a, RunHookOptions> {
        futures::future::ready(RunHookOptions::default()).boxed()
    }

    fn on_did_run_tests(&self, _debug: bool) -> BoxFuture<'_, ()> {
        futures::future::ready(()).boxed()
    }
}
