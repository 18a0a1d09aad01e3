// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use camino_tempfile::tempdir;
use pretty_assertions::assert_eq;
use std::sync::{Arc, atomic::Ordering};
use suitesync_metadata::{ConfigSettings, ProjectSettings, WorkspaceSettings};
use suitesync_runner::{
    client::RunnerCommand,
    collection::TestModelCollection,
    config::EngineConfig,
    model::{TestConfig, TestModel},
    settings_store::{FileSettingsStore, InMemorySettingsStore, SettingsStore},
};

const E2E_CONFIG_FILE: &str = "/ws/e2e/suite.config.ts";
const A: &str = "/ws/tests/a.spec.ts";

fn browsers_client() -> Arc<FakeRunnerClient> {
    FakeRunnerClient::new(vec![project("chromium", &[A]), project("firefox", &[A])])
}

fn enabled_project_names(model: &TestModel) -> Vec<String> {
    model
        .enabled_projects()
        .iter()
        .map(|project| project.name().to_owned())
        .collect()
}

fn project_settings(name: &str, enabled: bool) -> ProjectSettings {
    ProjectSettings {
        name: name.to_owned(),
        enabled,
    }
}

/// A collection with a model for [`CONFIG_FILE`] and one for [`E2E_CONFIG_FILE`].
async fn two_model_collection(
    store: Arc<dyn SettingsStore>,
) -> (TestModelCollection, Arc<FakeRunnerClient>, Arc<FakeRunnerClient>) {
    let client = browsers_client();
    let e2e_client = browsers_client();
    let mut collection = TestModelCollection::new(store);
    collection.add_model(build_model(&client)).await;
    collection
        .add_model(build_model_with(
            &e2e_client,
            E2E_CONFIG_FILE,
            EngineConfig::default_config(),
        ))
        .await;
    (collection, client, e2e_client)
}

#[tokio::test]
async fn only_the_first_model_is_enabled_by_default() {
    let store = Arc::new(InMemorySettingsStore::new(WorkspaceSettings::default()));
    let (collection, client, e2e_client) = two_model_collection(store.clone()).await;

    let first = collection.model(Utf8Path::new(CONFIG_FILE)).unwrap();
    let e2e = collection.model(Utf8Path::new(E2E_CONFIG_FILE)).unwrap();
    assert!(first.is_enabled());
    assert!(!e2e.is_enabled());
    assert_eq!(enabled_project_names(&first), vec!["chromium"]);

    assert_eq!(client.calls(), vec![Call::ListFiles]);
    assert!(e2e_client.calls().is_empty(), "disabled models aren't listed");
    assert_eq!(collection.selected_model().unwrap().config().config_file(), CONFIG_FILE);
    assert_eq!(store.snapshot(), WorkspaceSettings::default(), "adding doesn't save");
}

#[tokio::test]
async fn settings_survive_a_new_session() {
    let store = Arc::new(InMemorySettingsStore::new(WorkspaceSettings::default()));
    let (mut collection, _, _) = two_model_collection(store.clone()).await;

    collection
        .set_model_enabled(Utf8Path::new(E2E_CONFIG_FILE), true)
        .await;
    collection.set_project_enabled(Utf8Path::new(E2E_CONFIG_FILE), "chromium", false);
    collection.set_project_enabled(Utf8Path::new(E2E_CONFIG_FILE), "firefox", true);
    collection.set_model_enabled(Utf8Path::new(CONFIG_FILE), false).await;

    let saved = store.snapshot();
    assert_eq!(
        saved,
        WorkspaceSettings {
            configs: vec![
                ConfigSettings {
                    relative_config_file: "suite.config.ts".into(),
                    selected: false,
                    enabled: false,
                    projects: vec![
                        project_settings("chromium", true),
                        project_settings("firefox", false),
                    ],
                },
                ConfigSettings {
                    relative_config_file: "e2e/suite.config.ts".into(),
                    selected: true,
                    enabled: true,
                    projects: vec![
                        project_settings("chromium", false),
                        project_settings("firefox", true),
                    ],
                },
            ],
        }
    );

    // A disabled model keeps its persisted projects when saved again.
    collection.save_settings();
    assert_eq!(store.snapshot(), saved);

    let (restored, _, e2e_client) = two_model_collection(store.clone()).await;
    let first = restored.model(Utf8Path::new(CONFIG_FILE)).unwrap();
    let e2e = restored.model(Utf8Path::new(E2E_CONFIG_FILE)).unwrap();
    assert!(!first.is_enabled());
    assert!(e2e.is_enabled());
    assert_eq!(enabled_project_names(&e2e), vec!["firefox"]);
    assert_eq!(e2e_client.calls(), vec![Call::ListFiles]);

    restored.save_settings();
    assert_eq!(store.snapshot(), saved);
}

#[tokio::test]
async fn enabling_a_model_relists_it_from_scratch() {
    let store = Arc::new(InMemorySettingsStore::new(WorkspaceSettings::default()));
    let (mut collection, _, e2e_client) = two_model_collection(store.clone()).await;
    let updates = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = updates.clone();
    collection.subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    collection
        .set_model_enabled(Utf8Path::new(E2E_CONFIG_FILE), true)
        .await;
    assert_eq!(e2e_client.take_calls(), vec![Call::Reset, Call::ListFiles]);
    assert!(updates.load(Ordering::SeqCst) > 0);

    // Enabling an enabled model does nothing.
    collection
        .set_model_enabled(Utf8Path::new(E2E_CONFIG_FILE), true)
        .await;
    assert!(e2e_client.take_calls().is_empty());

    collection
        .set_model_enabled(Utf8Path::new(E2E_CONFIG_FILE), false)
        .await;
    assert_eq!(e2e_client.take_calls(), vec![Call::Reset]);
    assert_eq!(collection.enabled_models().len(), 1);
}

#[tokio::test]
async fn enabling_a_project_notifies_once() {
    let store = Arc::new(InMemorySettingsStore::new(WorkspaceSettings::default()));
    let (collection, _, _) = two_model_collection(store.clone()).await;
    let updates = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = updates.clone();
    collection.subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    collection.set_project_enabled(Utf8Path::new(CONFIG_FILE), "firefox", true);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(store.snapshot().configs[0].projects[1], project_settings("firefox", true));

    // Unchanged flags don't notify.
    collection.set_project_enabled(Utf8Path::new(CONFIG_FILE), "firefox", true);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn selected_model_falls_back_to_the_first_enabled_model() {
    let store = Arc::new(InMemorySettingsStore::new(WorkspaceSettings::default()));
    let (mut collection, _, _) = two_model_collection(store.clone()).await;
    collection
        .set_model_enabled(Utf8Path::new(E2E_CONFIG_FILE), true)
        .await;

    let selected = || {
        collection
            .selected_model()
            .map(|model| model.config().config_file().to_owned())
    };
    assert_eq!(selected().as_deref(), Some(Utf8Path::new(CONFIG_FILE)));

    collection.select_model(Utf8Path::new(E2E_CONFIG_FILE));
    assert_eq!(
        collection.selected_model().unwrap().config().config_file(),
        E2E_CONFIG_FILE
    );
    let configs = store.snapshot().configs;
    assert!(!configs[0].selected);
    assert!(configs[1].selected);

    collection
        .set_model_enabled(Utf8Path::new(E2E_CONFIG_FILE), false)
        .await;
    assert_eq!(
        collection.selected_model().unwrap().config().config_file(),
        CONFIG_FILE
    );

    collection
        .set_model_enabled(Utf8Path::new(CONFIG_FILE), false)
        .await;
    assert!(collection.selected_model().is_none());
    assert!(!collection.has_enabled_models());

    collection.ensure_has_enabled_models().await;
    assert!(
        collection
            .model(Utf8Path::new(CONFIG_FILE))
            .unwrap()
            .is_enabled()
    );
}

#[tokio::test]
async fn versions_and_test_dirs_cover_enabled_models() {
    let store = Arc::new(InMemorySettingsStore::new(WorkspaceSettings::default()));
    let mut collection = TestModelCollection::new(store);
    for (config_file, minor, test_dir) in [
        (CONFIG_FILE, 40, TEST_DIR),
        (E2E_CONFIG_FILE, 44, "/ws/e2e/specs"),
        ("/ws/legacy/suite.config.ts", 30, "/ws/legacy"),
    ] {
        let mut listed = project("", &[]);
        listed.test_dir = test_dir.into();
        let client = FakeRunnerClient::new(vec![listed]);
        let mut builder = TestModel::builder();
        builder.set_runner_client(client);
        let model = builder.build(
            TestConfig::new(
                WORKSPACE,
                config_file,
                RunnerCommand::new("/usr/bin/node"),
                semver::Version::new(1, minor, 0),
            ),
            EngineConfig::default_config(),
        );
        collection.add_model(model).await;
    }
    collection
        .set_model_enabled(Utf8Path::new(E2E_CONFIG_FILE), true)
        .await;

    let versions: Vec<_> = collection
        .versions()
        .into_iter()
        .map(|(version, model)| (version.to_string(), model.config().config_file().to_owned()))
        .collect();
    assert_eq!(
        versions,
        vec![
            ("1.40.0".to_owned(), path(CONFIG_FILE)),
            ("1.44.0".to_owned(), path(E2E_CONFIG_FILE)),
        ]
    );
    assert_eq!(
        collection.test_dirs().into_iter().collect::<Vec<_>>(),
        vec![path(TEST_DIR), path("/ws/e2e/specs")]
    );
}

#[tokio::test]
async fn clear_removes_and_resets_every_model() {
    let store = Arc::new(InMemorySettingsStore::new(WorkspaceSettings::default()));
    let (mut collection, client, _) = two_model_collection(store).await;
    let model = collection.model(Utf8Path::new(CONFIG_FILE)).unwrap();
    let updates = count_updates(&model);
    let collection_updates = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = collection_updates.clone();
    collection.subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    client.take_calls();

    collection.clear().await;
    assert!(collection.models().is_empty());
    assert_eq!(client.take_calls(), vec![Call::Reset]);
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    // The cleared model no longer notifies the collection.
    let fired = collection_updates.load(Ordering::SeqCst);
    model.list_files().await;
    assert_eq!(collection_updates.load(Ordering::SeqCst), fired);
}

#[tokio::test]
async fn file_store_persists_across_collections() {
    let dir = tempdir().unwrap();
    let settings_path = dir.path().join(".suitesync/settings.json");
    let store = Arc::new(FileSettingsStore::new(&settings_path));

    let (collection, _, _) = two_model_collection(store.clone()).await;
    collection.set_project_enabled(Utf8Path::new(CONFIG_FILE), "firefox", true);
    assert!(settings_path.exists());

    let (restored, _, _) = two_model_collection(store).await;
    let first = restored.model(Utf8Path::new(CONFIG_FILE)).unwrap();
    assert_eq!(enabled_project_names(&first), vec!["chromium", "firefox"]);
    assert!(
        !restored
            .model(Utf8Path::new(E2E_CONFIG_FILE))
            .unwrap()
            .is_enabled()
    );
}

#[tokio::test]
async fn unreadable_settings_fall_back_to_defaults() {
    let dir = tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    std::fs::write(&settings_path, "{ not json").unwrap();

    let (collection, _, _) =
        two_model_collection(Arc::new(FileSettingsStore::new(&settings_path))).await;
    assert!(
        collection
            .model(Utf8Path::new(CONFIG_FILE))
            .unwrap()
            .is_enabled()
    );
}
