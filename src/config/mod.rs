//! Layered TOML configuration.
//!
//! The user file lives under the platform config directory; a project file in
//! the current directory overrides it key by key. An explicit `--config` path
//! replaces both.

pub mod effective;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

pub use effective::{DEFAULT_HOST, Effective, Mode, Overrides};

pub const APP_DIR_NAME: &str = "ollama-remote";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const PROJECT_FILE_NAME: &str = ".ollama-remote.toml";

/// Keys accepted by `config set`.
pub const KEYS: &[&str] = &[
    "host",
    "ollama_exe",
    "mode",
    "no_proxy_auto",
    "unsafe",
    "retries",
];

/// Contents of one config file. Absent keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama_exe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_proxy_auto: Option<bool>,
    #[serde(rename = "unsafe", skip_serializing_if = "Option::is_none")]
    pub allow_unsafe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl Config {
    /// Overlays `other` on `self`. Blank strings in `other` do not override.
    pub fn merge(self, other: Config) -> Config {
        Config {
            host: non_blank(other.host).or(self.host),
            ollama_exe: non_blank(other.ollama_exe).or(self.ollama_exe),
            mode: non_blank(other.mode).or(self.mode),
            no_proxy_auto: other.no_proxy_auto.or(self.no_proxy_auto),
            allow_unsafe: other.allow_unsafe.or(self.allow_unsafe),
            retries: other.retries.or(self.retries),
        }
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The merged configuration plus where it came from.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: Config,
    /// File that `config init` and `config set` write to.
    pub primary_path: PathBuf,
    /// Files that existed and were read, lowest precedence first.
    pub used_files: Vec<PathBuf>,
}

/// `config set` was given a key it does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKeyError {
    pub key: String,
}

impl fmt::Display for UnknownKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown key: {} (expected one of: {})",
            self.key,
            KEYS.join(", ")
        )
    }
}

impl std::error::Error for UnknownKeyError {}

/// A setting holds a value that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidValueError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for InvalidValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} {:?}: {}", self.key, self.value, self.reason)
    }
}

impl std::error::Error for InvalidValueError {}

/// Default location of the user config file.
pub fn default_user_config_path<R: Runtime>(runtime: &R) -> PathBuf {
    if let Some(dir) = runtime.config_dir() {
        return dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME);
    }
    if let Some(home) = runtime.home_dir() {
        return home
            .join(".config")
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME);
    }
    PathBuf::from(CONFIG_FILE_NAME)
}

/// Loads the user and project files, or only `explicit` when given.
#[tracing::instrument(skip(runtime))]
pub fn load<R: Runtime>(runtime: &R, explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let mut loaded = LoadedConfig {
            primary_path: path.to_path_buf(),
            ..Default::default()
        };
        if let Some(config) = read_if_exists(runtime, path)? {
            loaded.config = config;
            loaded.used_files.push(path.to_path_buf());
        }
        return Ok(loaded);
    }

    let mut loaded = LoadedConfig {
        primary_path: default_user_config_path(runtime),
        ..Default::default()
    };
    if let Some(config) = read_if_exists(runtime, &loaded.primary_path)? {
        loaded.config = config;
        loaded.used_files.push(loaded.primary_path.clone());
    }

    match runtime.current_dir() {
        Ok(cwd) => {
            let project = cwd.join(PROJECT_FILE_NAME);
            if let Some(config) = read_if_exists(runtime, &project)? {
                loaded.config = std::mem::take(&mut loaded.config).merge(config);
                loaded.used_files.push(project);
            }
        }
        Err(e) => debug!("Skipping project config: {:#}", e),
    }

    debug!("Loaded config from {:?}", loaded.used_files);
    Ok(loaded)
}

fn read_if_exists<R: Runtime>(runtime: &R, path: &Path) -> Result<Option<Config>> {
    if !runtime.exists(path) {
        return Ok(None);
    }
    let content = runtime
        .read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = toml::from_str(&content).map_err(|e| InvalidValueError {
        key: "config file",
        value: path.display().to_string(),
        reason: e.message().to_string(),
    })?;
    Ok(Some(config))
}

fn write_config<R: Runtime>(runtime: &R, path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        runtime.create_dir_all(parent)?;
    }
    let content = toml::to_string(config).context("Failed to serialize config")?;
    runtime
        .write(path, content.as_bytes())
        .with_context(|| format!("Failed to write config file {}", path.display()))
}

/// Writes a default config file. Returns `false` if the file already existed.
#[tracing::instrument(skip(runtime))]
pub fn init_user_config<R: Runtime>(runtime: &R, path: &Path) -> Result<bool> {
    if runtime.exists(path) {
        debug!("Config file {} already exists", path.display());
        return Ok(false);
    }
    let config = Config {
        host: Some(DEFAULT_HOST.to_string()),
        mode: Some(Mode::Auto.to_string()),
        no_proxy_auto: Some(false),
        ..Default::default()
    };
    write_config(runtime, path, &config)?;
    Ok(true)
}

/// Sets one key in the config file at `path`, creating the file if needed.
#[tracing::instrument(skip(runtime))]
pub fn set_user_config<R: Runtime>(runtime: &R, path: &Path, key: &str, value: &str) -> Result<()> {
    let key = key.trim().to_ascii_lowercase();
    let mut config = read_if_exists(runtime, path)?.unwrap_or_default();

    match key.as_str() {
        "host" => config.host = Some(value.trim().to_string()),
        "ollama_exe" => config.ollama_exe = Some(value.trim().to_string()),
        "mode" => {
            let mode: Mode = value.parse()?;
            config.mode = Some(mode.to_string());
        }
        "no_proxy_auto" => config.no_proxy_auto = Some(parse_bool("no_proxy_auto", value)?),
        "unsafe" => config.allow_unsafe = Some(parse_bool("unsafe", value)?),
        "retries" => {
            let retries = value.trim().parse::<u32>().map_err(|e| InvalidValueError {
                key: "retries",
                value: value.to_string(),
                reason: format!("{}", e),
            })?;
            config.retries = Some(retries);
        }
        _ => return Err(UnknownKeyError { key }.into()),
    }

    write_config(runtime, path, &config)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, InvalidValueError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(InvalidValueError {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
