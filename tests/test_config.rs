use patchwright::core::config::{ConfigLoader, CONFIG_FILE_NAME};
use patchwright::core::types::ModePreference;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const OVERRIDES: &[&str] = &[
    "PATCHWRIGHT_ENGINE_IMAGE",
    "PATCHWRIGHT_MODE",
    "PATCHWRIGHT_DEFAULT_MODEL",
    "TARGET_REPO_PATH",
    "GITHUB_TOKEN",
    "GITHUB_INSTALLATION_TOKEN",
];

fn clear_overrides() {
    for name in OVERRIDES {
        env::remove_var(name);
    }
}

#[test]
#[serial]
fn workspace_file_and_environment_are_layered() {
    clear_overrides();
    let workspace = TempDir::new().unwrap();
    fs::write(
        workspace.path().join(CONFIG_FILE_NAME),
        r#"
[engine]
image = "registry.local/engine:v2"

[repository]
target_path = "/srv/checkout"

[orchestrator]
mode = "app"
"#,
    )
    .unwrap();
    env::set_var("PATCHWRIGHT_MODE", "action");
    env::set_var("GITHUB_TOKEN", "ghp_env");

    let config = ConfigLoader::load_from_workspace(workspace.path()).unwrap();
    clear_overrides();

    assert_eq!(config.engine.image, "registry.local/engine:v2");
    assert_eq!(config.repository.target_path, Some(PathBuf::from("/srv/checkout")));
    assert_eq!(config.orchestrator.mode_preference().unwrap(), ModePreference::Action);
    assert_eq!(config.github.token.as_deref(), Some("ghp_env"));
}

#[test]
#[serial]
fn empty_default_model_disables_fallback() {
    clear_overrides();
    let workspace = TempDir::new().unwrap();
    env::set_var("PATCHWRIGHT_DEFAULT_MODEL", "");

    let config = ConfigLoader::load_from_workspace(workspace.path()).unwrap();
    clear_overrides();

    assert_eq!(config.orchestrator.settings().unwrap().default_model, None);
}

#[test]
#[serial]
fn invalid_environment_mode_fails_validation() {
    clear_overrides();
    let workspace = TempDir::new().unwrap();
    env::set_var("PATCHWRIGHT_MODE", "sometimes");

    let err = ConfigLoader::load_from_workspace(workspace.path()).unwrap_err();
    clear_overrides();

    assert_eq!(err.code, "CONFIG-002");
}
