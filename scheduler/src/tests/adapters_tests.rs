//! Tests for platform detection

use crate::remote::adapters::{detect, PlatformFacts};

fn linux_facts(id: &str, id_like: &str, version: &str) -> PlatformFacts {
    let mut facts = PlatformFacts {
        is_linux: true,
        ..Default::default()
    };
    facts.apply_os_release(&format!("{}@@@{}@@@{}", id, id_like, version));
    facts
}

#[test]
fn test_debian_buster_detection() {
    let (adapter, platforms) = detect(&linux_facts("debian", "", "10"));
    assert_eq!(adapter.map(|a| a.platform), Some("debian-10"));
    assert_eq!(
        platforms,
        vec!["debian-10", "debian", "debian-like", "linux"]
    );
}

#[test]
fn test_debian_bookworm_detection() {
    let (adapter, platforms) = detect(&linux_facts("debian", "", "12"));
    assert_eq!(adapter.map(|a| a.platform), Some("debian-12"));
    assert!(platforms.contains(&"linux".to_string()));
}

#[test]
fn test_ubuntu_is_debian_like() {
    let (adapter, platforms) = detect(&linux_facts("ubuntu", "debian", "22.04"));
    assert_eq!(adapter.map(|a| a.platform), Some("debian-like"));
    assert!(!platforms.contains(&"debian".to_string()));
    assert!(platforms.contains(&"linux".to_string()));
}

#[test]
fn test_generic_linux_detection() {
    let (adapter, platforms) = detect(&linux_facts("alpine", "", "3.18"));
    assert_eq!(adapter.map(|a| a.platform), Some("linux"));
    assert_eq!(platforms, vec!["linux"]);
}

#[test]
fn test_windows_detection() {
    let facts = PlatformFacts {
        is_windows: true,
        windows_caption: Some("Microsoft Windows 11 Pro".to_string()),
        ..Default::default()
    };
    let (adapter, platforms) = detect(&facts);
    assert_eq!(adapter.map(|a| a.platform), Some("windows-11"));
    assert!(platforms.contains(&"windows".to_string()));
}

#[test]
fn test_no_adapter_matches() {
    let (adapter, platforms) = detect(&PlatformFacts::default());
    assert!(adapter.is_none());
    assert!(platforms.is_empty());
}

#[test]
fn test_os_release_parsing_strips_quotes() {
    let mut facts = PlatformFacts::default();
    facts.apply_os_release("debian@@@@@@\"11\"\n");
    assert_eq!(facts.os_id.as_deref(), Some("debian"));
    assert_eq!(facts.os_id_like.as_deref(), Some(""));
    assert_eq!(facts.os_version_id.as_deref(), Some("11"));
}
