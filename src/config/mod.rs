use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, eyre};
use color_eyre::{Result, Section, SectionExt};
use directories::ProjectDirs;
use itertools::Itertools;
use toml::Value;

mod merge;
pub mod model;

pub use model::{BackendConfig, Config, ConfigDiagnostic, DiagnosticLevel};

const MAIN_CONFIG: &str = "config.toml";
const DROPIN_DIR: &str = "conf.d";
const APP_NAME: &str = "hv";

pub const ENV_CONFIG_DIR: &str = "HV_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "HV_DATA_DIR";
pub const ENV_CACHE_DIR: &str = "HV_CACHE_DIR";

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub merged: Value,
    pub directories: AppDirectories,
    pub sources: Vec<ConfigSource>,
    pub diagnostics: Vec<ConfigDiagnostic>,
}

impl LoadedConfig {
    /// Directory holding the overlay files.
    #[must_use]
    pub fn overlay_dir(&self) -> PathBuf {
        self.config
            .overlay_dir
            .clone()
            .unwrap_or_else(|| self.directories.data_dir.clone())
    }

    /// Directory for index caches, when caching is on.
    #[must_use]
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.config
            .cache
            .then(|| self.directories.cache_dir.clone())
    }
}

#[derive(Debug, Clone)]
pub struct AppDirectories {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl AppDirectories {
    /// Create the configuration, data, and cache directories if they are missing.
    ///
    /// # Errors
    ///
    /// Returns an error when any directory cannot be created or is otherwise
    /// inaccessible.
    pub fn ensure_all(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.cache_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create directory {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSourceKind {
    Main,
    DropIn,
}

#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub kind: ConfigSourceKind,
    pub path: PathBuf,
}

/// Resolve directories from the environment and load configuration.
///
/// # Errors
///
/// Returns an error if platform directories cannot be resolved or any
/// configuration file cannot be read or parsed.
pub fn load(dir_override: Option<&Path>) -> Result<LoadedConfig> {
    let dirs = resolve_directories(dir_override)?;
    load_from_dirs(dirs)
}

/// Load and merge `config.toml` plus `conf.d/*.toml` from `dirs.config_dir`.
///
/// # Errors
///
/// Returns an error if a directory cannot be created or a configuration file
/// cannot be read, parsed, or decoded.
pub fn load_from_dirs(dirs: AppDirectories) -> Result<LoadedConfig> {
    dirs.ensure_all()?;

    let sources = gather_sources(&dirs.config_dir)?;
    let mut merged_table = toml::map::Map::new();

    for source in &sources {
        let contents = fs::read_to_string(&source.path)
            .with_context(|| format!("failed to read {}", source.path.display()))
            .map_err(|err| {
                err.with_section(|| {
                    format!(
                        "Ensure the file exists and is readable.\nResolved path: {}",
                        source.path.display()
                    )
                    .header("Suggested fix")
                })
            })?;
        let value: Value = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", source.path.display()))
            .map_err(|err| {
                err.with_section(|| {
                    format!(
                        "Double-check the TOML syntax or remove the file if it is no longer needed.\nResolved path: {}",
                        source.path.display()
                    )
                    .header("Suggested fix")
                })
            })?;
        let table = value.as_table().cloned().ok_or_else(|| {
            eyre!(
                "{} must contain a TOML table at the top level",
                source.path.display()
            )
        })?;
        merge::merge_tables(&mut merged_table, table, &source.path)?;
    }

    let merged_value = Value::Table(merged_table);
    let config = Config::from_value(&merged_value)?;
    let diagnostics = config.lint();
    for diag in &diagnostics {
        tracing::debug!(level = ?diag.level, "{}", diag.message);
    }

    Ok(LoadedConfig {
        config,
        merged: merged_value,
        directories: dirs,
        sources,
        diagnostics,
    })
}

fn resolve_directories(dir_override: Option<&Path>) -> Result<AppDirectories> {
    let project_dirs = ProjectDirs::from("", "", APP_NAME)
        .ok_or_else(|| eyre!("unable to resolve platform directories for {APP_NAME}"))?;

    let config_dir = dir_override
        .map(PathBuf::from)
        .or_else(|| env_path(ENV_CONFIG_DIR))
        .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());
    let data_dir =
        env_path(ENV_DATA_DIR).unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
    let cache_dir =
        env_path(ENV_CACHE_DIR).unwrap_or_else(|| project_dirs.cache_dir().to_path_buf());

    Ok(AppDirectories {
        config_dir,
        data_dir,
        cache_dir,
    })
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from)
}

fn gather_sources(root: &Path) -> Result<Vec<ConfigSource>> {
    if root.is_file() {
        return Ok(vec![ConfigSource {
            kind: ConfigSourceKind::Main,
            path: root.to_path_buf(),
        }]);
    }

    let mut sources = Vec::new();
    let main = root.join(MAIN_CONFIG);
    if main.is_file() {
        sources.push(ConfigSource {
            kind: ConfigSourceKind::Main,
            path: main,
        });
    }

    let conf_d = root.join(DROPIN_DIR);
    if conf_d.is_dir() {
        sources.extend(
            read_toml_files(&conf_d)?
                .into_iter()
                .map(|path| ConfigSource {
                    kind: ConfigSourceKind::DropIn,
                    path,
                }),
        );
    }

    Ok(sources)
}

fn read_toml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
        {
            files.insert(path);
        }
    }
    Ok(files.into_iter().collect_vec())
}
