//! Tests for configuration loading and validation

use crate::config::{CloudConfig, Config};
use crate::ConfigError;

const FULL_CONFIG: &str = r#"
[db]
user = "scheduler"
password = "secret"
database = "jobs"
host = "db.example.org"
port = 5433

[local]
data_dir = "/var/lib/yascheduler"
webhook_reqs_limit = 3

[remote]
data_dir = "/data"
user = "worker"
jump_user = "bastion"
jump_host = "10.0.0.254"

[clouds]
hetzner_token = "tok-123"
hetzner_max_nodes = 7
hetzner_priority = 2
hetzner_idle_tolerance = 90
upcloud_login = "api"
upcloud_password = "pw"

[engine.dummy]
spawn = "{engine_path}/run -np {ncpus} {task_path}"
check_pname = "dummy"
input_files = ["1.input", "2.input"]
output_files = ["1.input"]
platforms = ["debian-10", "linux"]
platform_packages = ["openmpi-bin"]
"#;

#[test]
fn test_full_config_parses() {
    let config = Config::from_toml_str(FULL_CONFIG).unwrap();

    assert_eq!(config.db.user, "scheduler");
    assert_eq!(config.db.port, 5433);

    // Directories default relative to data_dir
    assert_eq!(
        config.local.tasks_dir,
        std::path::PathBuf::from("/var/lib/yascheduler/tasks")
    );
    assert_eq!(
        config.local.keys_dir,
        std::path::PathBuf::from("/var/lib/yascheduler/keys")
    );
    assert_eq!(config.local.webhook_reqs_limit, 3);

    assert_eq!(config.remote.username, "worker");
    assert_eq!(config.remote.tasks_dir, "/data/tasks");
    assert_eq!(config.remote.jump_host.as_deref(), Some("10.0.0.254"));

    assert_eq!(config.engines.len(), 1);
    let engine = config.engines.get("dummy").unwrap();
    assert_eq!(engine.input_files, vec!["1.input", "2.input"]);
    assert_eq!(engine.check_pname.as_deref(), Some("dummy"));
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.db.host, "localhost");
    assert_eq!(config.db.port, 5432);
    assert_eq!(config.local.conn_machine_limit, 10);
    assert_eq!(config.local.allocate_limit, 20);
    assert_eq!(config.local.allocate_pending, 1);
    assert_eq!(config.local.deallocate_limit, 5);
    assert_eq!(config.remote.username, "root");
    assert!(config.clouds.is_empty());
    assert!(config.engines.is_empty());
}

#[test]
fn test_cloud_parsing_order_and_values() {
    let config = Config::from_toml_str(FULL_CONFIG).unwrap();
    assert_eq!(config.clouds.len(), 2);

    // Deterministic provider order: hetzner before upcloud
    let hetzner = &config.clouds[0];
    assert_eq!(hetzner.prefix(), "hetzner");
    assert_eq!(hetzner.max_nodes(), 7);
    assert_eq!(hetzner.priority(), 2);
    assert_eq!(hetzner.idle_tolerance(), 90);
    // Username inherited from [remote] user
    assert_eq!(hetzner.username(), "worker");

    let upcloud = &config.clouds[1];
    assert_eq!(upcloud.prefix(), "upcloud");
    match upcloud {
        CloudConfig::Upcloud(c) => {
            assert_eq!(c.login, "api");
            assert_eq!(c.idle_tolerance, 120);
        }
        other => panic!("expected upcloud config, got {:?}", other),
    }
}

#[test]
fn test_missing_cloud_credential_is_fatal() {
    let err = Config::from_toml_str(
        r#"
[clouds]
hetzner_max_nodes = 3
"#,
    )
    .unwrap_err();
    match err {
        ConfigError::MissingCloudKey { provider, key } => {
            assert_eq!(provider, "hetzner");
            assert_eq!(key, "hetzner_token");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_azure_root_user_is_substituted() {
    // Azure does not allow root logins; the config still loads, with the
    // stock admin user swapped in.
    let config = Config::from_toml_str(
        r#"
[clouds]
az_tenant_id = "t"
az_client_id = "c"
az_client_secret = "s"
az_subscription_id = "sub"
az_user = "root"
"#,
    )
    .unwrap();
    assert_eq!(config.clouds.len(), 1);
    assert_eq!(config.clouds[0].username(), "yascheduler");
}

#[test]
fn test_unknown_keys_are_tolerated() {
    // Unknown keys must be warned about, never rejected.
    let config = Config::from_toml_str(
        r#"
[db]
user = "u"
totally_unknown = "x"

[local]
mystery_knob = 42

[clouds]
hetzner_token = "tok"
hetzner_flavor = "weird"
unknownprovider_key = 1
"#,
    )
    .unwrap();
    assert_eq!(config.db.user, "u");
    assert_eq!(config.clouds.len(), 1);
}

#[test]
fn test_private_key_listing() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("yakey-abcdefgh"), "key material").unwrap();
    std::fs::write(dir.path().join("id_rsa"), "other key").unwrap();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();

    let config = Config::from_toml_str(&format!(
        "[local]\ndata_dir = \"{}\"\nkeys_dir = \"{}\"\n",
        dir.path().display(),
        dir.path().display()
    ))
    .unwrap();

    let keys = config.local.get_private_keys();
    // Files only, sorted by name.
    assert_eq!(keys.len(), 2);
    assert!(keys[0].ends_with("id_rsa"));
    assert!(keys[1].ends_with("yakey-abcdefgh"));

    // A missing directory is tolerated.
    let config = Config::from_toml_str("[local]\nkeys_dir = \"/definitely/not/there\"\n").unwrap();
    assert!(config.local.get_private_keys().is_empty());
}

#[test]
fn test_engine_validation_is_fatal() {
    // Unknown spawn placeholder
    let err = Config::from_toml_str(
        r#"
[engine.bad]
spawn = "run {everything}"
check_pname = "run"
input_files = ["a"]
output_files = ["b"]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::BadSpawnPlaceholder { .. }));

    // No liveness probe at all
    let err = Config::from_toml_str(
        r#"
[engine.bad]
spawn = "run"
input_files = ["a"]
output_files = ["b"]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::NoLivenessCheck(_)));

    // Empty output_files
    let err = Config::from_toml_str(
        r#"
[engine.bad]
spawn = "run"
check_pname = "run"
input_files = ["a"]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::EmptyEngineField { .. }));
}
