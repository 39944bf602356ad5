//! Tests for control-loop seams: gone-node counting and result-folder
//! resolution

use crate::remote::path::PathFlavor;
use crate::scheduler::{register_gone_pass, resolve_store_folder, GONE_NODE_PASSES};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[test]
fn test_gone_node_allowance() {
    let mut counters = HashMap::new();
    // The allowance itself never declares the task lost...
    for i in 1..=GONE_NODE_PASSES {
        assert_eq!(register_gone_pass(&mut counters, 1), i);
    }
    // ...the pass after it does.
    assert!(register_gone_pass(&mut counters, 1) > GONE_NODE_PASSES);
}

#[test]
fn test_gone_passes_are_counted_per_task() {
    let mut counters = HashMap::new();
    for _ in 0..GONE_NODE_PASSES {
        register_gone_pass(&mut counters, 1);
    }
    // A different task starts with a fresh allowance.
    assert_eq!(register_gone_pass(&mut counters, 2), 1);
    assert!(register_gone_pass(&mut counters, 1) > GONE_NODE_PASSES);
}

#[test]
fn test_reappearing_machine_resets_the_counter() {
    let mut counters = HashMap::new();
    for _ in 0..GONE_NODE_PASSES {
        register_gone_pass(&mut counters, 7);
    }
    // The consume pipeline drops the entry when the machine is back.
    counters.remove(&7);
    assert_eq!(register_gone_pass(&mut counters, 7), 1);
}

#[test]
fn test_store_folder_resolution() {
    // An explicit client hint wins verbatim.
    assert_eq!(
        resolve_store_folder(
            Some("/home/user/results"),
            PathFlavor::Posix,
            "/data/tasks/20240101_000000_abcd",
            Path::new("/var/lib/tasks"),
        ),
        PathBuf::from("/home/user/results")
    );

    // Default: the local tasks dir plus the remote folder's basename.
    assert_eq!(
        resolve_store_folder(
            None,
            PathFlavor::Posix,
            "/data/tasks/20240101_000000_abcd",
            Path::new("/var/lib/tasks"),
        ),
        PathBuf::from("/var/lib/tasks/20240101_000000_abcd")
    );

    // Windows remote folders still resolve their basename locally.
    assert_eq!(
        resolve_store_folder(
            None,
            PathFlavor::Windows,
            r"C:\data\tasks\t1",
            Path::new("/var/lib/tasks"),
        ),
        PathBuf::from("/var/lib/tasks/t1")
    );
}
