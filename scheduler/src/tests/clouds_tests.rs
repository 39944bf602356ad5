//! Tests for cloud user-data, key handling and provider platform support

use crate::clouds::keys::{load_or_generate, KEY_PREFIX};
use crate::clouds::user_data::CloudUserData;
use crate::clouds::CloudApi;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use base64::Engine as _;
use shared::config::Config;
use tempfile::TempDir;

#[test]
fn test_user_data_render() {
    let data = CloudUserData::new(vec!["openmpi-bin".to_string(), "wget".to_string()]);
    let rendered = data.render();
    let (header, body) = rendered.split_once('\n').unwrap();
    assert_eq!(header, "#cloud-config");
    let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed["package_upgrade"], serde_json::json!(true));
    assert_eq!(
        parsed["packages"],
        serde_json::json!(["openmpi-bin", "wget"])
    );

    let decoded = B64_STANDARD.decode(data.render_base64()).unwrap();
    assert_eq!(String::from_utf8(decoded).unwrap(), rendered);
}

#[test]
fn test_key_generation_and_adoption() {
    let dir = TempDir::new().unwrap();
    let generated = load_or_generate(dir.path()).unwrap();
    assert!(generated.name.starts_with(KEY_PREFIX));
    assert!(generated.path.is_file());

    // Public key is a valid OpenSSH ssh-rsa line.
    let mut fields = generated.public_openssh.split_whitespace();
    assert_eq!(fields.next(), Some("ssh-rsa"));
    let blob = B64_STANDARD.decode(fields.next().unwrap()).unwrap();
    // The wire blob leads with the length-prefixed algorithm name.
    assert_eq!(&blob[0..4], &7u32.to_be_bytes());
    assert_eq!(&blob[4..11], b"ssh-rsa");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&generated.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    // A second call adopts the written key instead of generating anew.
    let adopted = load_or_generate(dir.path()).unwrap();
    assert_eq!(adopted.path, generated.path);
    assert_eq!(
        adopted.public_openssh.split_whitespace().nth(1),
        generated.public_openssh.split_whitespace().nth(1)
    );
}

fn configured_apis(clouds_toml: &str) -> Vec<CloudApi> {
    let config = Config::from_toml_str(clouds_toml).unwrap();
    let http = reqwest::Client::new();
    config
        .clouds
        .iter()
        .map(|c| CloudApi::new(c.clone(), http.clone()))
        .collect()
}

#[test]
fn test_provider_platform_support() {
    let apis = configured_apis(
        r#"
[clouds]
hetzner_token = "t"
az_tenant_id = "t"
az_client_id = "c"
az_client_secret = "s"
az_subscription_id = "sub"
"#,
    );
    let az = apis.iter().find(|a| a.name() == "az").unwrap();
    let hetzner = apis.iter().find(|a| a.name() == "hetzner").unwrap();

    assert!(hetzner.supports_platform("debian-10"));
    assert!(hetzner.supports_platform("linux"));
    assert!(!hetzner.supports_platform("debian-11"));
    assert!(!hetzner.supports_platform("windows"));

    assert!(az.supports_platform("debian-11"));
    assert!(az.supports_platform("windows-11"));
    assert!(!az.supports_platform("debian-10"));
}

#[test]
fn test_user_data_packages_follow_provider_platforms() {
    let apis = configured_apis(
        r#"
[clouds]
hetzner_token = "t"
"#,
    );
    let config = Config::from_toml_str(
        r#"
[engine.buster]
spawn = "run {task_path}"
check_pname = "run"
input_files = ["a"]
output_files = ["b"]
platforms = ["debian-10"]
platform_packages = ["pkg-buster"]

[engine.win]
spawn = "run {task_path}"
check_pname = "run"
input_files = ["a"]
output_files = ["b"]
platforms = ["windows-11"]
platform_packages = ["pkg-win"]
"#,
    )
    .unwrap();

    let hetzner = apis.iter().find(|a| a.name() == "hetzner").unwrap();
    let data = hetzner.user_data(&config.engines);
    // Only engines runnable on the provider's platforms contribute packages.
    assert_eq!(data.packages, vec!["pkg-buster"]);
}
