use std::env;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use directories::BaseDirs;
use indexmap::IndexMap;
use serde::Deserialize;
use shellexpand::full;
use toml::Value;

use crate::session::Backend;

pub const DEFAULT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct Config {
    pub default_backend: Backend,
    pub preview_chars: usize,
    /// Home directory used to shorten decoded project folders to `~/…`.
    pub home_prefix: Option<PathBuf>,
    pub backends: IndexMap<Backend, BackendConfig>,
    /// Where overlay files live; `None` means the data directory.
    pub overlay_dir: Option<PathBuf>,
    pub cache: bool,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub backend: Backend,
    pub root: PathBuf,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigDiagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Warning,
    Error,
}

impl Config {
    /// Parse a merged configuration [`Value`] into a [`Config`].
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML does not match the expected shape, names
    /// an unknown backend, or references an undefined environment variable.
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw: RawConfig = value
            .clone()
            .try_into()
            .map_err(|err: toml::de::Error| eyre!("failed to decode configuration: {err}"))?;
        raw.into_config(&HostPaths::detect())
    }

    #[must_use]
    pub fn backend(&self, backend: Backend) -> Option<&BackendConfig> {
        self.backends.get(&backend)
    }

    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendConfig> {
        self.backends.values().filter(|backend| backend.enabled)
    }

    #[must_use]
    pub fn lint(&self) -> Vec<ConfigDiagnostic> {
        let mut diags = Vec::new();

        if self.enabled_backends().next().is_none() {
            diags.push(ConfigDiagnostic {
                level: DiagnosticLevel::Error,
                message: "every backend is disabled; nothing can be listed".to_string(),
            });
        }

        if self
            .backend(self.default_backend)
            .is_some_and(|backend| !backend.enabled)
        {
            diags.push(ConfigDiagnostic {
                level: DiagnosticLevel::Warning,
                message: format!(
                    "default backend '{}' is disabled in [backends]",
                    self.default_backend
                ),
            });
        }

        for backend in self.enabled_backends() {
            if !backend.root.is_dir() {
                diags.push(ConfigDiagnostic {
                    level: DiagnosticLevel::Warning,
                    message: format!(
                        "{} root {} does not exist",
                        backend.backend,
                        backend.root.display()
                    ),
                });
            }
        }

        diags
    }
}

/// Host locations that feed the default backend roots.
#[derive(Debug, Clone, Default)]
pub(crate) struct HostPaths {
    pub home: Option<PathBuf>,
    pub claude_config_dir: Option<PathBuf>,
    pub xdg_data_home: Option<PathBuf>,
}

impl HostPaths {
    fn detect() -> Self {
        let non_blank = |key: &str| {
            env::var(key)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
        };
        Self {
            home: BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()),
            claude_config_dir: non_blank("CLAUDE_CONFIG_DIR"),
            xdg_data_home: non_blank("XDG_DATA_HOME"),
        }
    }

    fn home(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(|| PathBuf::from("~"))
    }

    fn default_root(&self, backend: Backend) -> PathBuf {
        match backend {
            Backend::Claude => self
                .claude_config_dir
                .clone()
                .unwrap_or_else(|| self.home().join(".claude"))
                .join("projects"),
            Backend::OpenCode => self
                .xdg_data_home
                .clone()
                .unwrap_or_else(|| self.home().join(".local").join("share"))
                .join("opencode")
                .join("storage"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawConfig {
    default_backend: Option<String>,
    preview_chars: Option<usize>,
    home_prefix: Option<String>,
    cache: Option<bool>,
    backends: RawBackends,
    overlay: RawOverlay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBackends {
    claude: RawBackend,
    opencode: RawBackend,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBackend {
    root: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawOverlay {
    dir: Option<String>,
}

impl RawConfig {
    pub(crate) fn into_config(self, host: &HostPaths) -> Result<Config> {
        let default_backend = match self.default_backend.as_deref().map(str::trim) {
            None | Some("") => Backend::Claude,
            Some(raw) => raw.parse::<Backend>().map_err(|err| eyre!(err))?,
        };

        let preview_chars = self.preview_chars.unwrap_or(DEFAULT_PREVIEW_CHARS);
        if preview_chars == 0 {
            return Err(eyre!("preview_chars must be greater than zero"));
        }

        let home_prefix = match self.home_prefix.as_deref() {
            Some(raw) => expand_optional_path(raw)?,
            None => host.home.clone(),
        };

        let mut backends = IndexMap::new();
        for (backend, raw) in [
            (Backend::Claude, self.backends.claude),
            (Backend::OpenCode, self.backends.opencode),
        ] {
            backends.insert(backend, raw.into_backend(backend, host)?);
        }

        let overlay_dir = match self.overlay.dir.as_deref() {
            Some(raw) => expand_optional_path(raw)?,
            None => None,
        };

        Ok(Config {
            default_backend,
            preview_chars,
            home_prefix,
            backends,
            overlay_dir,
            cache: self.cache.unwrap_or(true),
        })
    }
}

impl RawBackend {
    fn into_backend(self, backend: Backend, host: &HostPaths) -> Result<BackendConfig> {
        let root = match self.root.as_deref() {
            Some(raw) => expand_optional_path(raw)
                .wrap_err_with(|| format!("invalid root for backend '{backend}'"))?,
            None => None,
        };
        Ok(BackendConfig {
            backend,
            root: root.unwrap_or_else(|| host.default_root(backend)),
            enabled: self.enabled.unwrap_or(true),
        })
    }
}

fn expand_optional_path(raw: &str) -> Result<Option<PathBuf>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    expand_path(raw.trim()).map(Some)
}

fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = full(raw)
        .with_context(|| format!("failed to expand path '{raw}': environment variable missing"))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Render a path relative to `home` with a leading `~`, for display.
#[must_use]
pub fn tilde_path(path: &Path, home: Option<&Path>) -> String {
    match home.and_then(|home| path.strip_prefix(home).ok()) {
        Some(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Some(rest) => format!("~/{}", rest.display()),
        None => path.display().to_string(),
    }
}
