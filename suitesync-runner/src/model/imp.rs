// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    Enablement, FileEntry, FileOrigin, TestConfig, TestProject,
    watch::{Watch, WatchItem, WatchRun},
};
use crate::{
    client::{
        CliRunnerClient, ReporterSink, RunOptions, RunnerClient, ServerRunnerClient, TestMode,
        TraceMode,
    },
    config::{EngineConfig, RunnerMode},
    debug::{DebugLaunch, DebugLauncher, debug_args, debug_env},
    errors::{DebugTestsError, RunnerClientError},
    helpers::plural,
    hooks::{NoopRunHooks, RunHookOptions, RunHooks},
    multimap::MultiMap,
    notify::{SubscriptionId, UpdateNotifier},
    reporter_server::ReporterServer,
    source_map::{IdentityResolver, SourceMapCache, SourceMapResolver},
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use indexmap::{IndexMap, IndexSet};
use std::{
    collections::HashSet,
    error::Error,
    sync::{Arc, Mutex, MutexGuard, Weak},
};
use suitesync_metadata::{
    FullResult, ListFilesReport, Location, RelatedTestFilesReport, Suite, SuiteKind, TestError,
    TestResult,
};
use tokio::{sync::oneshot, task::AbortHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Builds a [`TestModel`].
#[derive(Debug, Default)]
pub struct TestModelBuilder {
    hooks: Option<Arc<dyn RunHooks>>,
    resolver: Option<Arc<dyn SourceMapResolver>>,
    debug_launcher: Option<Arc<dyn DebugLauncher>>,
    client: Option<Arc<dyn RunnerClient>>,
}

impl TestModelBuilder {
    /// Sets the hooks called around runs. Defaults to [`NoopRunHooks`].
    pub fn set_run_hooks(&mut self, hooks: Arc<dyn RunHooks>) -> &mut Self {
        self.hooks = Some(hooks);
        self
    }

    /// Sets the source-map resolver. Defaults to [`IdentityResolver`].
    pub fn set_source_map_resolver(&mut self, resolver: Arc<dyn SourceMapResolver>) -> &mut Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the debug launcher. Without one, [`TestModel::debug_tests`] fails.
    pub fn set_debug_launcher(&mut self, launcher: Arc<dyn DebugLauncher>) -> &mut Self {
        self.debug_launcher = Some(launcher);
        self
    }

    /// Uses `client` instead of the runner client chosen by the engine config.
    pub fn set_runner_client(&mut self, client: Arc<dyn RunnerClient>) -> &mut Self {
        self.client = Some(client);
        self
    }

    /// Creates a new, disabled model for `config`.
    pub fn build(self, config: TestConfig, engine: EngineConfig) -> TestModel {
        let client: Arc<dyn RunnerClient> = match self.client {
            Some(client) => client,
            None => {
                let command = config.runner().clone();
                let config_file = config.config_file().to_owned();
                match engine.runner_mode() {
                    RunnerMode::Cli => {
                        Arc::new(CliRunnerClient::new(command, config_file, &engine))
                    }
                    RunnerMode::Server => {
                        Arc::new(ServerRunnerClient::new(command, config_file, &engine))
                    }
                }
            }
        };

        TestModel {
            inner: Arc::new(ModelInner {
                config,
                engine,
                client,
                hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopRunHooks)),
                resolver: self.resolver.unwrap_or_else(|| Arc::new(IdentityResolver)),
                debug_launcher: self.debug_launcher,
                notifier: UpdateNotifier::new(),
                listing: tokio::sync::Mutex::new(()),
                state: Mutex::new(ModelState::new()),
            }),
        }
    }
}

/// The in-memory test tree of one configuration, kept in sync with the runner.
///
/// `TestModel` is a cheap handle: clones share the same state. Methods that schedule listing
/// spawn tasks and must be called within a tokio runtime.
#[derive(Clone, Debug)]
pub struct TestModel {
    inner: Arc<ModelInner>,
}

#[derive(Debug)]
struct ModelInner {
    config: TestConfig,
    engine: EngineConfig,
    client: Arc<dyn RunnerClient>,
    hooks: Arc<dyn RunHooks>,
    resolver: Arc<dyn SourceMapResolver>,
    debug_launcher: Option<Arc<dyn DebugLauncher>>,
    notifier: UpdateNotifier,
    // Listing passes run one at a time, so a later pass always reconciles after an earlier one.
    listing: tokio::sync::Mutex<()>,
    // Never held across an await point.
    state: Mutex<ModelState>,
}

#[derive(Debug)]
struct ModelState {
    enablement: Enablement,
    generation: u64,
    projects: IndexMap<String, TestProject>,
    errors: MultiMap<Utf8PathBuf, TestError>,
    files_with_listed_tests: HashSet<Utf8PathBuf>,
    source_maps: SourceMapCache,
    test_id_attribute_name: Option<String>,
    batch: Option<PendingBatch>,
    watches: Vec<Watch>,
}

#[derive(Debug)]
struct PendingBatch {
    files: IndexSet<Utf8PathBuf>,
    done: DebugIgnore<Shared<BoxFuture<'static, ()>>>,
    task: AbortHandle,
}

impl ModelState {
    fn new() -> Self {
        Self {
            enablement: Enablement::Disabled,
            generation: 0,
            projects: IndexMap::new(),
            errors: MultiMap::new(),
            files_with_listed_tests: HashSet::new(),
            source_maps: SourceMapCache::default(),
            test_id_attribute_name: None,
            batch: None,
            watches: Vec::new(),
        }
    }

    fn enabled_files(&self) -> IndexSet<Utf8PathBuf> {
        self.projects
            .values()
            .filter(|project| project.is_enabled())
            .flat_map(|project| project.files().keys().cloned())
            .collect()
    }

    fn test_dirs(&self) -> IndexSet<Utf8PathBuf> {
        self.projects
            .values()
            .map(|project| project.test_dir().to_owned())
            .collect()
    }

    /// Maps changed paths under a test directory to the sources they were compiled from.
    fn map_files_to_sources(
        &self,
        test_dirs: &IndexSet<Utf8PathBuf>,
        files: &[Utf8PathBuf],
    ) -> IndexSet<Utf8PathBuf> {
        let mut result = IndexSet::new();
        for file in files {
            if !test_dirs
                .iter()
                .any(|dir| file != dir && file.starts_with(dir))
            {
                continue;
            }
            match self.source_maps.sources_for(file) {
                Some(sources) => result.extend(sources.iter().cloned()),
                None => {
                    result.insert(file.clone());
                }
            }
        }
        result
    }

    fn apply_list_files(
        &mut self,
        report: ListFilesReport,
        resolver: &dyn SourceMapResolver,
        config_file: &Utf8Path,
    ) {
        // Only an error pointing at a file blocks reconciliation.
        if let Some(error) = report.error {
            if let Some(location) = &error.location {
                debug!("listing files failed at {location}: {}", error.message);
                let file = location.file.clone();
                self.errors.set(file, error);
                return;
            }
            warn!(
                "listing files for {config_file} reported an error without a location: {}",
                error.message
            );
        }
        self.errors.delete_all(&config_file.to_owned());

        if let Some(first) = report.projects.first() {
            self.test_id_attribute_name = first.use_options.test_id_attribute.clone();
        }

        let mut projects_to_keep = HashSet::new();
        for project_report in &report.projects {
            let mut files = Vec::new();
            for file in &project_report.files {
                files.extend(self.source_maps.resolve(resolver, file));
            }
            projects_to_keep.insert(project_report.name.clone());
            let project = self
                .projects
                .entry(project_report.name.clone())
                .or_insert_with(|| {
                    TestProject::new(project_report.name.clone(), project_report.test_dir.clone())
                });
            project.set_test_dir(project_report.test_dir.clone());
            project.set_files(&files);
            debug!(
                "project `{}` has {} {}",
                project_report.name,
                files.len(),
                plural::files_str(files.len()),
            );
        }
        self.projects
            .retain(|name, _| projects_to_keep.contains(name));
    }

    fn apply_list_tests(
        &mut self,
        files: &[Utf8PathBuf],
        root: Option<Suite>,
        errors: Vec<TestError>,
        config_file: &Utf8Path,
    ) {
        for file in files {
            self.errors.delete_all(file);
        }
        for error in errors {
            let file = error
                .file()
                .map_or_else(|| config_file.to_owned(), Utf8Path::to_owned);
            self.errors.set(file, error);
        }

        let project_suites: Vec<Suite> = root
            .map(|root| root.suites)
            .unwrap_or_default()
            .into_iter()
            .filter(|suite| suite.kind == SuiteKind::Project)
            .collect();

        for (name, project) in &mut self.projects {
            let mut files_to_clear: IndexSet<&Utf8PathBuf> = files.iter().collect();
            let reported = project_suites
                .iter()
                .find(|suite| &suite.title == name)
                .map(|suite| suite.suites.as_slice())
                .unwrap_or_default();

            for file_suite in reported {
                let Some(file) = file_suite.file_path() else {
                    continue;
                };
                if self.errors.has(&file.to_owned()) {
                    continue;
                }
                files_to_clear.shift_remove(&file.to_owned());
                if let Some(entry) = project.files_mut().get_mut(file) {
                    *entry = FileEntry::new(file_suite.clone(), FileOrigin::Listed);
                }
            }

            for file in files_to_clear {
                if let Some(entry) = project.files_mut().get_mut(file.as_path()) {
                    entry.clear();
                }
            }
        }
    }

    fn apply_running_project(&mut self, project_suite: &Suite) -> bool {
        let Some(project) = self.projects.get_mut(&project_suite.title) else {
            return false;
        };
        for file_suite in &project_suite.suites {
            if !file_suite.has_tests() {
                continue;
            }
            let Some(file) = file_suite.file_path() else {
                continue;
            };
            if self.errors.has(&file.to_owned()) {
                continue;
            }
            self.files_with_listed_tests.insert(file.to_owned());
            let replace = project
                .file(file)
                .is_none_or(|existing| !existing.has_tests());
            if replace {
                project.files_mut().insert(
                    file.to_owned(),
                    FileEntry::new(file_suite.clone(), FileOrigin::Run),
                );
            }
        }
        true
    }

    fn clear(&mut self) {
        self.generation += 1;
        if let Some(batch) = self.batch.take() {
            batch.task.abort();
        }
        self.projects.clear();
        self.errors.clear();
        self.files_with_listed_tests.clear();
        self.source_maps.clear();
        self.test_id_attribute_name = None;
        self.watches.clear();
    }
}

/// Describes a run or debug session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunRequest {
    /// Locations to run, as `file` or `file:line`. Empty runs everything.
    pub locations: Vec<String>,

    /// Projects to run. `None` runs the enabled projects.
    pub projects: Option<Vec<String>>,

    /// Only run tests whose title matches this pattern.
    pub grep: Option<String>,
}

/// Paths reported by a workspace watcher, already coalesced.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkspaceChange {
    /// Files whose content changed.
    pub changed: Vec<Utf8PathBuf>,

    /// Files that were created.
    pub created: Vec<Utf8PathBuf>,

    /// Files that were deleted.
    pub deleted: Vec<Utf8PathBuf>,
}

impl TestModel {
    /// Returns a builder for a model.
    pub fn builder() -> TestModelBuilder {
        TestModelBuilder::default()
    }

    /// The configuration this model belongs to.
    pub fn config(&self) -> &TestConfig {
        &self.inner.config
    }

    /// The engine config this model was built with.
    pub fn engine_config(&self) -> &EngineConfig {
        &self.inner.engine
    }

    /// The current enablement state.
    pub fn enablement(&self) -> Enablement {
        self.lock().enablement
    }

    /// Returns true unless the model is disabled.
    pub fn is_enabled(&self) -> bool {
        self.enablement() != Enablement::Disabled
    }

    /// Registers `callback` to be called after every state change.
    ///
    /// Notifications carry no payload. Callers re-read the state they are interested in.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.inner.notifier.subscribe(callback)
    }

    /// Removes a subscription. Returns false if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.notifier.unsubscribe(id)
    }

    // ---
    // Enablement
    // ---

    /// Enables the model and lists its files.
    ///
    /// Does nothing if the model is already enabled or loading.
    pub async fn enable(&self) {
        {
            let mut state = self.lock();
            if state.enablement != Enablement::Disabled {
                return;
            }
            state.enablement = Enablement::Loading;
        }
        self.list_files().await;

        let mut state = self.lock();
        if state.enablement == Enablement::Loading {
            state.enablement = Enablement::Enabled;
        }
        drop(state);
        self.fire();
    }

    /// Disables the model and clears its state.
    pub async fn disable(&self) {
        self.lock().enablement = Enablement::Disabled;
        self.reset().await;
    }

    /// Enables or disables a project. Returns false if the project is unknown or the flag was
    /// already set.
    ///
    /// This only changes which files are considered for listing and watching; it doesn't list.
    pub fn set_project_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut state = self.lock();
        let Some(project) = state.projects.get_mut(name) else {
            return false;
        };
        if project.is_enabled() == enabled {
            return false;
        }
        project.set_enabled(enabled);
        drop(state);
        self.fire();
        true
    }

    /// Clears all derived state: projects, errors, listing marks, source maps and watches.
    ///
    /// The enablement state is kept. Listings that started before the reset are discarded when
    /// they complete.
    pub async fn reset(&self) {
        self.lock().clear();
        self.inner.client.reset().await;
        self.fire();
    }

    // ---
    // Listing
    // ---

    /// Lists the configuration's files and reconciles projects with the report.
    ///
    /// An error with a location is recorded against its file and leaves the projects as they
    /// were. A runner that fails outright is reported against the configuration file.
    pub async fn list_files(&self) {
        let _listing = self.inner.listing.lock().await;
        let generation = {
            let mut state = self.lock();
            if state.enablement == Enablement::Disabled {
                return;
            }
            state.files_with_listed_tests.clear();
            state.generation
        };

        let config_file = self.inner.config.config_file();
        let report = match self.inner.client.list_files().await {
            Ok(report) => report,
            Err(error) => {
                warn!("failed to list files for {config_file}: {error}");
                ListFilesReport::from_error(TestError::new(
                    error_message(&error),
                    Some(Location::new(config_file, 0, 0)),
                ))
            }
        };

        let mut state = self.lock();
        if state.generation != generation {
            debug!("discarding file listing for {config_file} started before a reset");
            return;
        }
        state.apply_list_files(report, self.inner.resolver.as_ref(), config_file);
        drop(state);
        self.fire();
    }

    /// Makes sure the tests in `files` are listed.
    ///
    /// Only files of enabled projects whose tests haven't been listed yet are considered. They
    /// join the pending batch, which lists every file it collected once the debounce window
    /// passes. The returned future resolves when that batch is done, or immediately if there is
    /// nothing to list.
    pub fn ensure_tests(&self, files: &[Utf8PathBuf]) -> BoxFuture<'static, ()> {
        let mut state = self.lock();
        if state.enablement == Enablement::Disabled {
            return futures::future::ready(()).boxed();
        }

        let enabled_files = state.enabled_files();
        let mut new_files = Vec::new();
        for file in files {
            if enabled_files.contains(file) && state.files_with_listed_tests.insert(file.clone()) {
                new_files.push(file.clone());
            }
        }
        if new_files.is_empty() {
            return futures::future::ready(()).boxed();
        }

        if let Some(batch) = &mut state.batch {
            debug!(
                "adding {} {} to the pending listing batch",
                new_files.len(),
                plural::files_str(new_files.len())
            );
            batch.files.extend(new_files);
            return batch.done.0.clone().boxed();
        }

        let (sender, receiver) = oneshot::channel::<()>();
        let done = receiver.map(|_| ()).boxed().shared();
        let generation = state.generation;
        let model = Arc::downgrade(&self.inner);
        let delay = self.inner.engine.list_debounce();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run_batch(model, generation).await;
            // Waiters are also released if this task is aborted and the sender dropped.
            let _ = sender.send(());
        });

        debug!(
            "scheduling listing of {} {} in {delay:?}",
            new_files.len(),
            plural::files_str(new_files.len())
        );
        state.batch = Some(PendingBatch {
            files: new_files.into_iter().collect(),
            done: DebugIgnore(done.clone()),
            task: task.abort_handle(),
        });
        done.boxed()
    }

    /// Lists the tests in `files` and merges the result into the tree.
    ///
    /// Errors for exactly these files are replaced by the new ones. Reported files without
    /// errors adopt the new content, and requested files that weren't reported are emptied.
    pub async fn list_tests(&self, files: Vec<Utf8PathBuf>) {
        let _listing = self.inner.listing.lock().await;
        let generation = self.lock().generation;

        let locations: Vec<String> = files.iter().map(|file| file.to_string()).collect();
        let mut collector = ListCollector::default();
        let res = self
            .inner
            .client
            .test(
                &locations,
                TestMode::List,
                &RunOptions::default(),
                &mut collector,
                &CancellationToken::new(),
            )
            .await;

        let mut state = self.lock();
        if state.generation != generation {
            debug!("discarding test listing started before a reset");
            return;
        }
        if let Err(error) = res {
            warn!(
                "failed to list tests in {} {}: {error}",
                files.len(),
                plural::files_str(files.len())
            );
            // Allow a later request to retry these files.
            for file in &files {
                state.files_with_listed_tests.remove(file);
            }
            return;
        }
        state.apply_list_tests(
            &files,
            collector.root,
            collector.errors,
            self.inner.config.config_file(),
        );
        drop(state);
        self.fire();
    }

    /// Applies a batch of filesystem changes and returns the runs requested by watches.
    ///
    /// Created or deleted files under a test directory cause a full file listing. Changed files
    /// whose tests were listed are listed again, debounced.
    pub async fn workspace_changed(&self, change: &WorkspaceChange) -> Vec<WatchRun> {
        let (changed, created, deleted) = {
            let state = self.lock();
            if state.enablement == Enablement::Disabled {
                return Vec::new();
            }
            let test_dirs = state.test_dirs();
            (
                state.map_files_to_sources(&test_dirs, &change.changed),
                state.map_files_to_sources(&test_dirs, &change.created),
                state.map_files_to_sources(&test_dirs, &change.deleted),
            )
        };

        if !created.is_empty() || !deleted.is_empty() {
            debug!(
                "{} created and {} deleted, listing files",
                created.len(),
                deleted.len()
            );
            self.list_files().await;
        }

        if !changed.is_empty() {
            let changed_with_listed_tests: Vec<_> = {
                let mut state = self.lock();
                changed
                    .iter()
                    .filter(|file| state.files_with_listed_tests.remove(*file))
                    .cloned()
                    .collect()
            };
            self.ensure_tests(&changed_with_listed_tests).await;
        }

        let mut affected = changed;
        affected.extend(created);
        if affected.is_empty() {
            return Vec::new();
        }
        let enabled_files = self.enabled_files();
        affected.retain(|file| enabled_files.contains(file));

        let mut state = self.lock();
        state.watches.retain(|watch| !watch.is_cancelled());
        state
            .watches
            .iter()
            .filter_map(|watch| watch.run_for(&affected, &state.projects))
            .collect()
    }

    /// Watches `items` for changes, or everything if `items` is `None`, until `token` is
    /// cancelled.
    pub fn add_to_watch(&self, items: Option<Vec<WatchItem>>, token: CancellationToken) {
        let mut state = self.lock();
        state.watches.retain(|watch| !watch.is_cancelled());
        state.watches.push(Watch::new(items, token));
    }

    /// Merges the project suites reported at the start of a run.
    ///
    /// Files without tests are ignored, and an existing file with tests is never replaced, so a
    /// run can't narrow what a listing found.
    pub fn update_from_running_projects(&self, project_suites: &[Suite]) {
        for project_suite in project_suites {
            let updated = self.lock().apply_running_project(project_suite);
            if updated {
                self.fire();
            }
        }
    }

    // ---
    // Running
    // ---

    /// Runs tests, streaming results into `sink`.
    ///
    /// Nothing happens if `token` is already cancelled. Otherwise the run hooks are called
    /// around the run however it ends.
    pub async fn run_tests(
        &self,
        request: &RunRequest,
        sink: &mut dyn ReporterSink,
        token: &CancellationToken,
    ) -> Result<(), RunnerClientError> {
        if token.is_cancelled() {
            return Ok(());
        }
        let hook_options = self
            .inner
            .hooks
            .on_will_run_tests(&self.inner.config, false)
            .await;
        let did_run = DidRunGuard::new(self.inner.hooks.clone(), false);
        let res = self.run_tests_inner(request, &hook_options, sink, token).await;
        did_run.finish().await;
        res
    }

    async fn run_tests_inner(
        &self,
        request: &RunRequest,
        hook_options: &RunHookOptions,
        sink: &mut dyn ReporterSink,
        token: &CancellationToken,
    ) -> Result<(), RunnerClientError> {
        if token.is_cancelled() {
            return Ok(());
        }
        let options = self.run_options(request, hook_options);
        debug!("running {} location(s) with {options:?}", request.locations.len());
        let mut sink = RunSink { model: self, sink };
        self.inner
            .client
            .test(&request.locations, TestMode::Test, &options, &mut sink, token)
            .await
    }

    /// Derives runner options from the engine config, the request and the hook overrides.
    pub fn run_options(&self, request: &RunRequest, hook_options: &RunHookOptions) -> RunOptions {
        let engine = &self.inner.engine;
        let reuse = engine.show_browser() && hook_options.connect_ws_endpoint.is_some();
        let trace = if engine.show_browser() {
            Some(TraceMode::Off)
        } else if engine.show_trace() {
            Some(TraceMode::On)
        } else {
            None
        };
        RunOptions {
            headed: reuse,
            workers: reuse.then_some(1),
            trace,
            projects: self.projects_for(request),
            grep: request.grep.clone(),
            reuse_context: reuse,
            connect_ws_endpoint: hook_options.connect_ws_endpoint.clone(),
        }
    }

    /// Starts a debug session for the request, streaming results into `sink`.
    pub async fn debug_tests(
        &self,
        request: &RunRequest,
        sink: &mut dyn ReporterSink,
        token: &CancellationToken,
    ) -> Result<(), DebugTestsError> {
        if token.is_cancelled() {
            return Ok(());
        }
        let Some(launcher) = self.inner.debug_launcher.clone() else {
            return Err(DebugTestsError::NoDebugLauncher {
                config_file: self.inner.config.config_file().to_owned(),
            });
        };

        let hook_options = self
            .inner
            .hooks
            .on_will_run_tests(&self.inner.config, true)
            .await;
        let did_run = DidRunGuard::new(self.inner.hooks.clone(), true);
        let res = self
            .debug_tests_inner(launcher.as_ref(), request, &hook_options, sink, token)
            .await;
        did_run.finish().await;
        res
    }

    async fn debug_tests_inner(
        &self,
        launcher: &dyn DebugLauncher,
        request: &RunRequest,
        hook_options: &RunHookOptions,
        sink: &mut dyn ReporterSink,
        token: &CancellationToken,
    ) -> Result<(), DebugTestsError> {
        if token.is_cancelled() {
            return Ok(());
        }
        let config = &self.inner.config;
        let engine = &self.inner.engine;
        let server = ReporterServer::bind().await?;

        let config_arg = config
            .config_file()
            .file_name()
            .unwrap_or(config.config_file().as_str());
        let mut args = config.runner().leading_args().to_vec();
        args.extend(debug_args(
            config_arg,
            &request.locations,
            &self.projects_for(request),
            request.grep.as_deref(),
        ));
        let mut env = debug_env(
            std::env::vars(),
            engine.strip_env_prefixes(),
            engine.env(),
            server.env(),
            hook_options.connect_ws_endpoint.as_deref(),
        );
        env.sort_keys();
        let launch = DebugLaunch {
            name: format!("Debug tests in {}", config.relative_config_file()),
            program: config.runner().program().to_owned(),
            cwd: config
                .config_file()
                .parent()
                .unwrap_or(config.workspace_folder())
                .to_owned(),
            args,
            env,
        };
        debug!("starting debug session `{}`", launch.name);

        // Ending the session also stops waiting for the reporter to connect.
        let session = token.child_token();
        let launched = async {
            let res = launcher.launch(launch, &session).await;
            session.cancel();
            res
        };
        let mut sink = RunSink { model: self, sink };
        let wired = server.wire_reporter(&mut sink, &session);
        let (launched, wired) = futures::future::join(launched, wired).await;
        launched?;
        wired?;
        Ok(())
    }

    /// Returns the test files that depend on any of `files`.
    pub async fn find_related_test_files(
        &self,
        files: &[Utf8PathBuf],
    ) -> Result<RelatedTestFilesReport, RunnerClientError> {
        self.inner.client.find_related_test_files(files).await
    }

    // ---
    // Reading state
    // ---

    /// All projects, in the order they were first reported.
    pub fn projects(&self) -> Vec<TestProject> {
        self.lock().projects.values().cloned().collect()
    }

    /// Returns the project called `name`.
    pub fn project(&self, name: &str) -> Option<TestProject> {
        self.lock().projects.get(name).cloned()
    }

    /// The enabled projects.
    pub fn enabled_projects(&self) -> Vec<TestProject> {
        self.lock()
            .projects
            .values()
            .filter(|project| project.is_enabled())
            .cloned()
            .collect()
    }

    /// Names to pass as the runner's project filter. Empty if every project is enabled.
    pub fn enabled_projects_filter(&self) -> Vec<String> {
        let state = self.lock();
        let enabled: Vec<_> = state
            .projects
            .values()
            .filter(|project| project.is_enabled())
            .collect();
        if enabled.len() == state.projects.len() {
            return Vec::new();
        }
        enabled
            .into_iter()
            .map(|project| project.name().to_owned())
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// The union of files of the enabled projects.
    pub fn enabled_files(&self) -> IndexSet<Utf8PathBuf> {
        self.lock().enabled_files()
    }

    /// All recorded errors, grouped by file.
    pub fn errors(&self) -> Vec<TestError> {
        self.lock()
            .errors
            .iter()
            .flat_map(|(_, errors)| errors.cloned())
            .collect()
    }

    /// The errors recorded for `file`.
    pub fn errors_for(&self, file: &Utf8Path) -> Vec<TestError> {
        self.lock()
            .errors
            .get(&file.to_owned())
            .cloned()
            .collect()
    }

    /// The distinct test directories of all projects.
    pub fn test_dirs(&self) -> Vec<Utf8PathBuf> {
        self.lock().test_dirs().into_iter().collect()
    }

    /// The attribute used for test ids in page locators, as configured by the first project.
    pub fn test_id_attribute_name(&self) -> Option<String> {
        self.lock().test_id_attribute_name.clone()
    }

    /// Returns true if a listing batch is waiting for its debounce window to pass.
    pub fn has_pending_batch(&self) -> bool {
        self.lock().batch.is_some()
    }

    // ---
    // Helper methods
    // ---

    fn projects_for(&self, request: &RunRequest) -> Vec<String> {
        match &request.projects {
            Some(projects) => projects
                .iter()
                .filter(|name| !name.is_empty())
                .cloned()
                .collect(),
            None => self.enabled_projects_filter(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.inner.lock()
    }

    fn fire(&self) {
        self.inner.notifier.fire();
    }
}

impl ModelInner {
    fn lock(&self) -> MutexGuard<'_, ModelState> {
        // State is only mutated by short non-panicking sections, so a poisoned lock is still
        // consistent.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_batch(model: Weak<ModelInner>, generation: u64) {
    let Some(inner) = model.upgrade() else {
        return;
    };
    let files = {
        let mut state = inner.lock();
        if state.generation != generation {
            return;
        }
        match state.batch.take() {
            Some(batch) => batch.files,
            None => return,
        }
    };
    debug!(
        "listing tests in {} {}",
        files.len(),
        plural::files_str(files.len())
    );
    TestModel { inner }
        .list_tests(files.into_iter().collect())
        .await;
}

/// Calls [`RunHooks::on_did_run_tests`] once a run ends.
///
/// If the run is dropped before [`Self::finish`] is reached, for example because the caller
/// stopped polling it or a sink panicked, the hook is spawned onto the current runtime instead.
struct DidRunGuard {
    hooks: Option<Arc<dyn RunHooks>>,
    debug: bool,
}

impl DidRunGuard {
    fn new(hooks: Arc<dyn RunHooks>, debug: bool) -> Self {
        Self {
            hooks: Some(hooks),
            debug,
        }
    }

    async fn finish(mut self) {
        if let Some(hooks) = self.hooks.take() {
            hooks.on_did_run_tests(self.debug).await;
        }
    }
}

impl Drop for DidRunGuard {
    fn drop(&mut self) {
        let Some(hooks) = self.hooks.take() else {
            return;
        };
        let debug = self.debug;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("run ended early, calling the after-run hook in the background");
                handle.spawn(async move {
                    hooks.on_did_run_tests(debug).await;
                });
            }
            Err(error) => {
                warn!("run ended outside a tokio runtime, after-run hook not called: {error}");
            }
        }
    }
}

fn error_message(error: &RunnerClientError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[derive(Default)]
struct ListCollector {
    root: Option<Suite>,
    errors: Vec<TestError>,
}

impl ReporterSink for ListCollector {
    fn on_begin(&mut self, suite: &Suite) {
        self.root = Some(suite.clone());
    }

    fn on_error(&mut self, error: &TestError) {
        self.errors.push(error.clone());
    }
}

/// Forwards events to the caller's sink, merging the running projects into the model first.
struct RunSink<'a> {
    model: &'a TestModel,
    sink: &'a mut dyn ReporterSink,
}

impl ReporterSink for RunSink<'_> {
    fn on_begin(&mut self, suite: &Suite) {
        self.model.update_from_running_projects(&suite.suites);
        self.sink.on_begin(suite);
    }

    fn on_test_begin(&mut self, test_id: &str) {
        self.sink.on_test_begin(test_id);
    }

    fn on_test_end(&mut self, test_id: &str, result: &TestResult) {
        self.sink.on_test_end(test_id, result);
    }

    fn on_std_out(&mut self, chunk: &str, test_id: Option<&str>) {
        self.sink.on_std_out(chunk, test_id);
    }

    fn on_std_err(&mut self, chunk: &str, test_id: Option<&str>) {
        self.sink.on_std_err(chunk, test_id);
    }

    fn on_error(&mut self, error: &TestError) {
        self.sink.on_error(error);
    }

    fn on_end(&mut self, result: &FullResult) {
        self.sink.on_end(result);
    }
}
