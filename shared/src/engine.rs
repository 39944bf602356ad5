//! Engine registry: named recipes describing how to run a class of
//! computation on a remote host.
//!
//! Engines are loaded from `[engine.<name>]` config sections. Validation is
//! strict and fatal at startup: a broken engine definition would otherwise
//! surface much later as a stuck or misdispatched task.

use crate::defaults::{default_check_cmd_code, default_engine_sleep_interval};
use crate::ConfigError;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Template placeholders the spawn command may reference.
const SPAWN_PLACEHOLDERS: &[&str] = &["task_path", "engine_path", "ncpus"];

/// One entry of an engine's install recipe.
#[derive(Debug, Clone, PartialEq)]
pub enum Deploy {
    /// Plain files uploaded from the local engine directory.
    LocalFiles(Vec<PathBuf>),
    /// A local archive uploaded and unpacked on the remote.
    LocalArchive(PathBuf),
    /// An archive fetched by the remote host from a trusted URL.
    RemoteArchive(String),
}

/// Raw `[engine.<name>]` section as written in the config file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineSection {
    pub spawn: Option<String>,
    #[serde(default)]
    pub check_cmd: Option<String>,
    #[serde(default)]
    pub check_pname: Option<String>,
    #[serde(default)]
    pub check_cmd_code: Option<i32>,
    #[serde(default)]
    pub input_files: Vec<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub platform_packages: Vec<String>,
    #[serde(default)]
    pub sleep_interval: Option<u64>,
    #[serde(default)]
    pub deploy_local_files: Vec<String>,
    #[serde(default)]
    pub deploy_local_archive: Option<String>,
    #[serde(default)]
    pub deploy_remote_archive: Option<String>,
}

/// A validated engine definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Engine {
    pub name: String,
    /// Command template with `{task_path}`, `{engine_path}` and `{ncpus}`
    /// placeholders.
    pub spawn: String,
    pub check_cmd: Option<String>,
    pub check_pname: Option<String>,
    /// Exit code of `check_cmd` that means "task still running".
    pub check_cmd_code: i32,
    pub input_files: Vec<String>,
    pub output_files: Vec<String>,
    pub deployable: Vec<Deploy>,
    pub platforms: Vec<String>,
    pub platform_packages: Vec<String>,
    /// Seconds between liveness checks.
    pub sleep_interval: u64,
}

impl Engine {
    /// Build and validate an engine from its config section. Local deploy
    /// paths are resolved against `<engines_dir>/<name>`.
    pub fn from_section(
        name: &str,
        section: EngineSection,
        engines_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let engine_dir = engines_dir.join(name);

        let mut deployable = Vec::new();
        if !section.deploy_local_files.is_empty() {
            let files = section
                .deploy_local_files
                .iter()
                .map(|f| engine_dir.join(f))
                .collect();
            deployable.push(Deploy::LocalFiles(files));
        }
        if let Some(archive) = section.deploy_local_archive {
            deployable.push(Deploy::LocalArchive(engine_dir.join(archive)));
        }
        if let Some(url) = section.deploy_remote_archive {
            deployable.push(Deploy::RemoteArchive(url));
        }

        // An engine without platforms is installable on all Linux-like hosts.
        let platforms = if section.platforms.is_empty() {
            vec!["linux".to_string()]
        } else {
            section.platforms
        };

        let engine = Self {
            name: name.to_string(),
            spawn: section.spawn.unwrap_or_default(),
            check_cmd: section.check_cmd.filter(|s| !s.is_empty()),
            check_pname: section.check_pname.filter(|s| !s.is_empty()),
            check_cmd_code: section.check_cmd_code.unwrap_or_else(default_check_cmd_code),
            input_files: section.input_files,
            output_files: section.output_files,
            deployable,
            platforms,
            platform_packages: section.platform_packages,
            sleep_interval: section
                .sleep_interval
                .unwrap_or_else(default_engine_sleep_interval),
        };
        engine.validate()?;
        Ok(engine)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.spawn.is_empty() {
            return Err(ConfigError::EmptyEngineField {
                engine: self.name.clone(),
                field: "spawn".to_string(),
            });
        }
        for placeholder in spawn_placeholders(&self.spawn) {
            if !SPAWN_PLACEHOLDERS.contains(&placeholder.as_str()) {
                return Err(ConfigError::BadSpawnPlaceholder {
                    engine: self.name.clone(),
                    placeholder,
                });
            }
        }
        if self.check_cmd.is_none() && self.check_pname.is_none() {
            return Err(ConfigError::NoLivenessCheck(self.name.clone()));
        }
        if self.input_files.is_empty() {
            return Err(ConfigError::EmptyEngineField {
                engine: self.name.clone(),
                field: "input_files".to_string(),
            });
        }
        if self.output_files.is_empty() {
            return Err(ConfigError::EmptyEngineField {
                engine: self.name.clone(),
                field: "output_files".to_string(),
            });
        }
        Ok(())
    }

    /// Render the spawn command for a concrete task placement.
    pub fn render_spawn(&self, task_path: &str, engine_path: &str, ncpus: &str) -> String {
        self.spawn
            .replace("{task_path}", task_path)
            .replace("{engine_path}", engine_path)
            .replace("{ncpus}", ncpus)
    }

    /// Whether the engine can run on a host advertising the given platforms.
    pub fn supports_any_platform(&self, platforms: &[String]) -> bool {
        self.platforms.iter().any(|p| platforms.contains(p))
    }
}

/// Extract `{placeholder}` names from a spawn template.
fn spawn_placeholders(spawn: &str) -> Vec<String> {
    let re = regex::Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("static regex");
    re.captures_iter(spawn)
        .map(|c| c[1].to_string())
        .collect()
}

/// Static catalogue of engines, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineRepository {
    data: BTreeMap<String, Engine>,
}

impl EngineRepository {
    pub fn new(data: BTreeMap<String, Engine>) -> Self {
        Self { data }
    }

    pub fn get(&self, name: &str) -> Option<&Engine> {
        self.data.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Engine> {
        self.data.values()
    }

    /// Keep the engines matching a predicate, returning a new repository.
    pub fn filter<F: Fn(&Engine) -> bool>(&self, predicate: F) -> Self {
        let data = self
            .data
            .iter()
            .filter(|(_, e)| predicate(e))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { data }
    }

    /// Keep the engines whose platforms intersect the given tag set.
    pub fn filter_platforms(&self, platforms: &[String]) -> Self {
        self.filter(|e| e.supports_any_platform(platforms))
    }

    /// Union of OS packages across all engines, sorted and deduplicated.
    pub fn get_platform_packages(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .data
            .values()
            .flat_map(|e| e.platform_packages.iter().cloned())
            .collect();
        set.into_iter().collect()
    }
}
