//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::sync::{SyncSettings, WriteStrategy};
use crate::domain::sync::service::DEFAULT_MAX_RESOLVE_ATTEMPTS;
use crate::infrastructure::filesystem::DEFAULT_EXTENSIONS;
use crate::storage::{DatabaseConfig, default_database_path};

/// Overrides the directory holding `config.toml`
pub const CONFIG_DIR_ENV: &str = "NOTEGRAPH_CONFIG_DIR";

/// Overrides the path of the `main` project
pub const HOME_ENV: &str = "NOTEGRAPH_HOME";

/// Name of the project every installation starts with
pub const MAIN_PROJECT: &str = "main";

/// Notegraph configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_project: String,
    pub database: DatabaseSection,
    pub sync: SyncSection,
    /// Project name -> root directory
    pub projects: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub write_strategy: WriteStrategy,
    pub update_permalinks_on_move: bool,
    pub max_relation_resolve_attempts: u32,
    /// File extensions to sync, without the dot
    pub extensions: Vec<String>,
    /// File or directory names never synced; `*.ext` matches a suffix
    pub ignore: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut projects = BTreeMap::new();
        projects.insert(MAIN_PROJECT.to_string(), default_home());

        Self {
            default_project: MAIN_PROJECT.to_string(),
            database: DatabaseSection::default(),
            sync: SyncSection::default(),
            projects,
        }
    }
}

impl Default for DatabaseSection {
    fn default() -> Self {
        let defaults = DatabaseConfig::default();
        Self {
            path: default_database_path(),
            max_connections: defaults.max_connections,
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            write_strategy: WriteStrategy::default(),
            update_permalinks_on_move: true,
            max_relation_resolve_attempts: DEFAULT_MAX_RESOLVE_ATTEMPTS,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ignore: vec!["node_modules".to_string(), "target".to_string()],
        }
    }
}

impl SyncSection {
    /// Engine settings for a pass
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            write_strategy: self.write_strategy,
            update_permalinks_on_move: self.update_permalinks_on_move,
            max_relation_resolve_attempts: self.max_relation_resolve_attempts,
        }
    }
}

impl DatabaseSection {
    /// Pool configuration for this section
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::with_path(self.path.clone()).max_connections(self.max_connections)
    }
}

/// Root of the `main` project when nothing else is configured
fn default_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("notegraph"))
        .unwrap_or_else(|| PathBuf::from("notegraph"))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("notegraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location and apply environment overrides
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_home_override(env::var_os(HOME_ENV).map(PathBuf::from));
        Ok(config)
    }

    /// Load configuration from a file, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            // Return default config without creating file
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Point the `main` project at `home`, if given
    pub fn apply_home_override(&mut self, home: Option<PathBuf>) {
        if let Some(home) = home.filter(|h| !h.as_os_str().is_empty()) {
            tracing::debug!(home = %home.display(), "Using {} for the main project", HOME_ENV);
            self.projects.insert(MAIN_PROJECT.to_string(), home);
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        if self.sync.extensions.is_empty() {
            return Err(anyhow!("sync.extensions must list at least one extension"));
        }
        if !self.projects.contains_key(&self.default_project) {
            return Err(anyhow!(
                "default_project '{}' is not a configured project",
                self.default_project
            ));
        }
        Ok(())
    }

    /// Root directory of a project
    pub fn project_path(&self, name: &str) -> Option<&Path> {
        self.projects.get(name).map(PathBuf::as_path)
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "default_project" => Ok(self.default_project.clone()),
            // Database settings
            "database.path" => Ok(self.database.path.display().to_string()),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),
            // Sync settings
            "sync.write_strategy" => Ok(self.sync.write_strategy.to_string()),
            "sync.update_permalinks_on_move" => Ok(self.sync.update_permalinks_on_move.to_string()),
            "sync.max_relation_resolve_attempts" => Ok(self.sync.max_relation_resolve_attempts.to_string()),
            "sync.extensions" => Ok(self.sync.extensions.join(", ")),
            "sync.ignore" => Ok(self.sync.ignore.join(", ")),
            _ => match key.strip_prefix("projects.") {
                Some(name) => self
                    .project_path(name)
                    .map(|p| p.display().to_string())
                    .ok_or_else(|| anyhow!("Unknown project: {}", name)),
                None => Err(anyhow!(
                    "Unknown configuration key: {}. Use `notegraph config show` to see available keys.",
                    key
                )),
            },
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "default_project" => {
                if !self.projects.contains_key(value) {
                    return Err(anyhow!("Unknown project: {}. Add it with `notegraph projects add`.", value));
                }
                self.default_project = value.to_string();
            }
            // Database settings
            "database.path" => {
                self.database.path = PathBuf::from(value);
            }
            "database.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_connections must be at least 1"));
                }
                self.database.max_connections = max;
            }
            // Sync settings
            "sync.write_strategy" => {
                self.sync.write_strategy = value.parse().map_err(|e| anyhow!("{}", e))?;
            }
            "sync.update_permalinks_on_move" => {
                self.sync.update_permalinks_on_move = value
                    .parse()
                    .with_context(|| format!("Invalid boolean value: {}", value))?;
            }
            "sync.max_relation_resolve_attempts" => {
                self.sync.max_relation_resolve_attempts = value
                    .parse()
                    .with_context(|| format!("Invalid max_relation_resolve_attempts value: {}", value))?;
            }
            "sync.extensions" => {
                let extensions = split_list(value);
                if extensions.is_empty() {
                    return Err(anyhow!("At least one extension is required"));
                }
                self.sync.extensions = extensions;
            }
            "sync.ignore" => {
                self.sync.ignore = split_list(value);
            }
            _ => match key.strip_prefix("projects.") {
                Some(name) if !name.is_empty() => {
                    self.projects.insert(name.to_string(), PathBuf::from(value));
                }
                _ => {
                    return Err(anyhow!(
                        "Unknown configuration key: {}. Use `notegraph config show` to see available keys.",
                        key
                    ));
                }
            },
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut keys: Vec<String> = [
            "default_project",
            "database.path",
            "database.max_connections",
            "sync.write_strategy",
            "sync.update_permalinks_on_move",
            "sync.max_relation_resolve_attempts",
            "sync.extensions",
            "sync.ignore",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        keys.extend(self.projects.keys().map(|name| format!("projects.{}", name)));

        keys.into_iter()
            .map(|key| {
                let value = self.get(&key)?;
                Ok((key, value))
            })
            .collect()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
