//! Tests for the engine registry

use crate::engine::{Deploy, Engine, EngineRepository, EngineSection};
use std::collections::BTreeMap;
use std::path::Path;

fn section(spawn: &str, platforms: &[&str], packages: &[&str]) -> EngineSection {
    EngineSection {
        spawn: Some(spawn.to_string()),
        check_pname: Some("proc".to_string()),
        input_files: vec!["INPUT".to_string()],
        output_files: vec!["OUTPUT".to_string()],
        platforms: platforms.iter().map(|s| s.to_string()).collect(),
        platform_packages: packages.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn repo(engines: Vec<Engine>) -> EngineRepository {
    let mut data = BTreeMap::new();
    for e in engines {
        data.insert(e.name.clone(), e);
    }
    EngineRepository::new(data)
}

#[test]
fn test_render_spawn() {
    let engine = Engine::from_section(
        "mpi",
        section("mpirun -np {ncpus} -wd {task_path} {engine_path}/solver", &["linux"], &[]),
        Path::new("/data/engines"),
    )
    .unwrap();
    let cmd = engine.render_spawn("/data/tasks/t1", "/data/engines/mpi", "4");
    assert_eq!(cmd, "mpirun -np 4 -wd /data/tasks/t1 /data/engines/mpi/solver");
}

#[test]
fn test_engine_without_platforms_defaults_to_linux() {
    let engine = Engine::from_section(
        "plain",
        section("run {task_path}", &[], &[]),
        Path::new("/data/engines"),
    )
    .unwrap();
    assert_eq!(engine.platforms, vec!["linux"]);
    assert!(engine.supports_any_platform(&["linux".to_string(), "debian".to_string()]));
    assert!(!engine.supports_any_platform(&["windows".to_string()]));
}

#[test]
fn test_deployable_paths_resolve_under_engine_dir() {
    let mut sec = section("run {task_path}", &["linux"], &[]);
    sec.deploy_local_files = vec!["solver".to_string(), "solver.cfg".to_string()];
    sec.deploy_local_archive = Some("bundle.tar.gz".to_string());
    sec.deploy_remote_archive = Some("https://example.org/bundle.tar.gz".to_string());

    let engine = Engine::from_section("mpi", sec, Path::new("/data/engines")).unwrap();
    assert_eq!(engine.deployable.len(), 3);
    match &engine.deployable[0] {
        Deploy::LocalFiles(files) => {
            assert_eq!(files[0], Path::new("/data/engines/mpi/solver"));
        }
        other => panic!("expected local files deploy, got {:?}", other),
    }
    match &engine.deployable[1] {
        Deploy::LocalArchive(file) => {
            assert_eq!(file, Path::new("/data/engines/mpi/bundle.tar.gz"));
        }
        other => panic!("expected local archive deploy, got {:?}", other),
    }
}

#[test]
fn test_filter_platforms_is_idempotent() {
    let engines = repo(vec![
        Engine::from_section("a", section("r {task_path}", &["debian-10", "linux"], &["pkg-a"]), Path::new("/e")).unwrap(),
        Engine::from_section("b", section("r {task_path}", &["windows-10"], &["pkg-b"]), Path::new("/e")).unwrap(),
        Engine::from_section("c", section("r {task_path}", &["debian-11"], &["pkg-a", "pkg-c"]), Path::new("/e")).unwrap(),
    ]);

    let tags = vec!["debian-10".to_string(), "debian-11".to_string()];
    let once = engines.filter_platforms(&tags);
    let twice = once.filter_platforms(&tags);
    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
    assert!(once.contains("a"));
    assert!(once.contains("c"));
}

#[test]
fn test_platform_packages_union_is_sorted_and_deduplicated() {
    let engines = repo(vec![
        Engine::from_section("a", section("r {task_path}", &["linux"], &["zlib1g", "openmpi-bin"]), Path::new("/e")).unwrap(),
        Engine::from_section("b", section("r {task_path}", &["linux"], &["openmpi-bin", "wget"]), Path::new("/e")).unwrap(),
    ]);
    assert_eq!(
        engines.get_platform_packages(),
        vec!["openmpi-bin", "wget", "zlib1g"]
    );
}
