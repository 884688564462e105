use docdrop::load_config::{load_config, PASSWORD_ENV};
use docdrop_core::config::ConflictPolicy;
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

const FULL_CONFIG: &str = r#"
agent:
  watch_dir: /var/docdrop/inbox
  processed_dir: /var/docdrop/processed
  failed_dir: /var/docdrop/failed
  log_file: /var/log/docdrop/agent.log
remote:
  host: build.example.org
  user: deploy
  upload_dir: /srv/site/content
  build_command: /srv/site/build.sh
  private_key_path: /etc/docdrop/id_ed25519
"#;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

#[test]
#[serial]
fn loads_config_and_fills_defaults() {
    env::remove_var(PASSWORD_ENV);
    let file = config_file(FULL_CONFIG);

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.agent.watch_dir, PathBuf::from("/var/docdrop/inbox"));
    assert_eq!(config.agent.log_level, "INFO");
    assert_eq!(config.agent.author, "Alex");
    assert_eq!(config.agent.extension, "md");
    assert_eq!(config.agent.settle.delay_ms, 1000);
    assert_eq!(config.remote.port, 22);
    assert_eq!(config.remote.connect_timeout_secs, 5);
    assert_eq!(config.remote.on_conflict, ConflictPolicy::Replace);
    assert_eq!(config.remote.command_timeout_secs, None);
    assert_eq!(config.remote.password, None);
    assert_eq!(
        config.remote.private_key_path,
        Some(PathBuf::from("/etc/docdrop/id_ed25519"))
    );
}

#[test]
#[serial]
fn missing_required_key_is_named() {
    let file = config_file(&FULL_CONFIG.replace("  upload_dir: /srv/site/content\n", ""));

    let err = load_config(file.path()).unwrap_err();

    assert!(format!("{err:#}").contains("upload_dir"), "{err:#}");
}

#[test]
#[serial]
fn password_comes_from_environment() {
    let file = config_file(&format!("{FULL_CONFIG}  password: from-yaml\n"));
    env::set_var(PASSWORD_ENV, "from-env");

    let config = load_config(file.path()).expect("Config should load");
    env::remove_var(PASSWORD_ENV);

    assert_eq!(config.remote.password.as_deref(), Some("from-env"));
}

#[test]
#[serial]
fn reject_policy_and_home_paths() {
    env::remove_var(PASSWORD_ENV);
    let yaml = FULL_CONFIG
        .replace("/etc/docdrop/id_ed25519", "~/.ssh/id_ed25519")
        .replace(
            "  build_command: /srv/site/build.sh\n",
            "  build_command: /srv/site/build.sh\n  on_conflict: reject\n  command_timeout_secs: 300\n",
        );
    let file = config_file(&yaml);

    let config = load_config(file.path()).expect("Config should load");

    let home = dirs::home_dir().expect("home dir in test env");
    assert_eq!(
        config.remote.private_key_path,
        Some(home.join(".ssh/id_ed25519"))
    );
    assert_eq!(config.remote.on_conflict, ConflictPolicy::Reject);
    assert_eq!(
        config.remote.command_timeout(),
        Some(std::time::Duration::from_secs(300))
    );
}
