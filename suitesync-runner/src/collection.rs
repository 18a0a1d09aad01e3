// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The set of test models in a workspace.
//!
//! [`TestModelCollection`] owns one [`TestModel`] per discovered configuration, tracks which
//! configurations and projects are enabled, and persists that selection through a
//! [`SettingsStore`].

use crate::{
    helpers::plural,
    model::{TestModel, TestProject},
    notify::{SubscriptionId, UpdateNotifier},
    settings_store::SettingsStore,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::{collections::BTreeMap, sync::Arc};
use suitesync_metadata::{ConfigSettings, ProjectSettings, WorkspaceSettings};
use tracing::{debug, info, warn};

/// Owns the test models of a workspace.
#[derive(Debug)]
pub struct TestModelCollection {
    models: Vec<TestModel>,
    subscriptions: Vec<(TestModel, SubscriptionId)>,
    selected_config_file: Option<Utf8PathBuf>,
    settings_store: Arc<dyn SettingsStore>,
    notifier: Arc<UpdateNotifier>,
}

impl TestModelCollection {
    /// Creates an empty collection persisting its selection to `settings_store`.
    pub fn new(settings_store: Arc<dyn SettingsStore>) -> Self {
        Self {
            models: Vec::new(),
            subscriptions: Vec::new(),
            selected_config_file: None,
            settings_store,
            notifier: Arc::new(UpdateNotifier::new()),
        }
    }

    /// Registers `callback` to be called after any model or the collection itself changes.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.notifier.subscribe(callback)
    }

    /// Removes a subscription. Returns false if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Adds a model, restoring its persisted enablement.
    ///
    /// Without persisted settings for any configuration, only the first model added is enabled.
    /// Enabled models are listed before this returns.
    pub async fn add_model(&mut self, model: TestModel) {
        let settings = self.load_settings();
        let config_settings = settings
            .config(&model.config().relative_config_file())
            .cloned();
        let enabled = match &config_settings {
            Some(config_settings) => config_settings.enabled,
            None => self.models.is_empty() && settings.configs.is_empty(),
        };
        if config_settings.as_ref().is_some_and(|settings| settings.selected) {
            self.selected_config_file = Some(model.config().config_file().to_owned());
        }

        let notifier = Arc::downgrade(&self.notifier);
        let id = model.subscribe(move || {
            if let Some(notifier) = notifier.upgrade() {
                notifier.fire();
            }
        });
        self.subscriptions.push((model.clone(), id));
        self.models.push(model.clone());

        if enabled {
            self.load_model(&model, config_settings.as_ref()).await;
        }
        self.notifier.fire();
    }

    /// Enables or disables the model for `config_file`.
    ///
    /// Does nothing if the configuration is unknown or already in that state. Enabling lists the
    /// configuration from scratch.
    pub async fn set_model_enabled(&mut self, config_file: &Utf8Path, enabled: bool) {
        let Some(model) = self.model(config_file) else {
            return;
        };
        if model.is_enabled() == enabled {
            return;
        }

        info!(
            "{} tests for {config_file}",
            if enabled { "enabling" } else { "disabling" }
        );
        if enabled {
            let settings = self.load_settings();
            let config_settings = settings
                .config(&model.config().relative_config_file())
                .cloned();
            model.reset().await;
            self.load_model(&model, config_settings.as_ref()).await;
            self.save_settings();
        } else {
            self.save_settings_with(&model, false);
            model.disable().await;
        }
        self.notifier.fire();
    }

    /// Enables or disables a project of the model for `config_file`.
    ///
    /// Does nothing if the configuration or project is unknown or the flag is unchanged. This
    /// doesn't list anything.
    pub fn set_project_enabled(&self, config_file: &Utf8Path, name: &str, enabled: bool) {
        let Some(model) = self.model(config_file) else {
            return;
        };
        // The model's own update is forwarded to the collection's subscribers.
        if model.set_project_enabled(name, enabled) {
            self.save_settings();
        }
    }

    /// The selected model: the enabled model that was last selected, or else the first enabled
    /// model.
    pub fn selected_model(&self) -> Option<TestModel> {
        self.selected_with(None)
    }

    /// Selects the model for `config_file` and persists the choice.
    pub fn select_model(&mut self, config_file: &Utf8Path) {
        if self.model(config_file).is_none() {
            return;
        }
        self.selected_config_file = Some(config_file.to_owned());
        self.save_settings();
        self.notifier.fire();
    }

    /// All models, in the order they were added.
    pub fn models(&self) -> &[TestModel] {
        &self.models
    }

    /// Returns the model for `config_file`.
    pub fn model(&self, config_file: &Utf8Path) -> Option<TestModel> {
        self.models
            .iter()
            .find(|model| model.config().config_file() == config_file)
            .cloned()
    }

    /// The enabled models.
    pub fn enabled_models(&self) -> Vec<TestModel> {
        self.models
            .iter()
            .filter(|model| model.is_enabled())
            .cloned()
            .collect()
    }

    /// Returns true if any model is enabled.
    pub fn has_enabled_models(&self) -> bool {
        self.models.iter().any(TestModel::is_enabled)
    }

    /// Enables the first model if none is enabled.
    pub async fn ensure_has_enabled_models(&mut self) {
        if self.has_enabled_models() {
            return;
        }
        if let Some(first) = self.models.first() {
            let config_file = first.config().config_file().to_owned();
            self.set_model_enabled(&config_file, true).await;
        }
    }

    /// Maps runner protocol versions to the enabled model using that version.
    ///
    /// If several enabled models share a version, the last one added wins.
    pub fn versions(&self) -> BTreeMap<semver::Version, TestModel> {
        self.enabled_models()
            .into_iter()
            .map(|model| (model.config().version().clone(), model))
            .collect()
    }

    /// The distinct test directories of all enabled models.
    pub fn test_dirs(&self) -> IndexSet<Utf8PathBuf> {
        self.enabled_models()
            .iter()
            .flat_map(TestModel::test_dirs)
            .collect()
    }

    /// Removes every model.
    pub async fn clear(&mut self) {
        for (model, id) in self.subscriptions.drain(..) {
            model.unsubscribe(id);
        }
        for model in std::mem::take(&mut self.models) {
            model.reset().await;
        }
        self.notifier.fire();
    }

    /// Persists the enablement of every model and project.
    pub fn save_settings(&self) {
        let settings = self.to_settings(None);
        if let Err(error) = self.settings_store.save(&settings) {
            warn!("failed to save workspace settings: {error}");
        }
    }

    // ---
    // Helper methods
    // ---

    fn save_settings_with(&self, model: &TestModel, enabled: bool) {
        let settings = self.to_settings(Some((model, enabled)));
        if let Err(error) = self.settings_store.save(&settings) {
            warn!("failed to save workspace settings: {error}");
        }
    }

    fn to_settings(&self, override_enabled: Option<(&TestModel, bool)>) -> WorkspaceSettings {
        let previous = self.load_settings();
        let selected = self.selected_with(override_enabled);
        let configs = self
            .models
            .iter()
            .map(|model| {
                let relative_config_file = model.config().relative_config_file();
                let enabled = is_enabled_with(model, override_enabled);
                let mut projects: Vec<_> = model
                    .projects()
                    .iter()
                    .map(|project| ProjectSettings {
                        name: project.name().to_owned(),
                        enabled: project.is_enabled(),
                    })
                    .collect();
                // A disabled model has no projects; keep what was persisted for it.
                if projects.is_empty() {
                    if let Some(previous) = previous.config(&relative_config_file) {
                        projects = previous.projects.clone();
                    }
                }
                ConfigSettings {
                    selected: selected.as_ref().is_some_and(|selected| {
                        selected.config().config_file() == model.config().config_file()
                    }),
                    relative_config_file,
                    enabled,
                    projects,
                }
            })
            .collect();
        WorkspaceSettings { configs }
    }

    /// The selected model, as if the enablement in `override_enabled` were already applied.
    fn selected_with(&self, override_enabled: Option<(&TestModel, bool)>) -> Option<TestModel> {
        let mut enabled = self
            .models
            .iter()
            .filter(|model| is_enabled_with(model, override_enabled));
        let selected = self.selected_config_file.as_deref().and_then(|selected| {
            enabled
                .clone()
                .find(|model| model.config().config_file() == selected)
        });
        selected.or_else(|| enabled.next()).cloned()
    }

    fn load_settings(&self) -> WorkspaceSettings {
        self.settings_store.load().unwrap_or_else(|error| {
            warn!("failed to load workspace settings, using defaults: {error}");
            WorkspaceSettings::default()
        })
    }

    /// Lists `model` and applies persisted project enablement, enabling the first project when
    /// nothing is persisted for it.
    async fn load_model(&self, model: &TestModel, config_settings: Option<&ConfigSettings>) {
        model.enable().await;

        let projects = model.projects();
        for (index, project) in projects.iter().enumerate() {
            let enabled = match config_settings.and_then(|settings| settings.project(project.name()))
            {
                Some(project_settings) => project_settings.enabled,
                None => index == 0 && !any_persisted_enabled(&projects, config_settings),
            };
            model.set_project_enabled(project.name(), enabled);
        }
        debug!(
            "loaded {} with {} of {} {} enabled",
            model.config().config_file(),
            model.enabled_projects().len(),
            projects.len(),
            plural::projects_str(projects.len()),
        );
    }
}

fn is_enabled_with(model: &TestModel, override_enabled: Option<(&TestModel, bool)>) -> bool {
    match override_enabled {
        Some((overridden, enabled))
            if overridden.config().config_file() == model.config().config_file() =>
        {
            enabled
        }
        _ => model.is_enabled(),
    }
}

fn any_persisted_enabled(projects: &[TestProject], settings: Option<&ConfigSettings>) -> bool {
    let Some(settings) = settings else {
        return false;
    };
    projects.iter().any(|project| {
        settings
            .project(project.name())
            .is_some_and(|project_settings| project_settings.enabled)
    })
}
