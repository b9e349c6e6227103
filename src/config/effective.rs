//! Effective settings: command-line flags and environment over config files
//! over built-in defaults.

use std::fmt;
use std::str::FromStr;

use super::{Config, InvalidValueError, non_blank};
use crate::api::{BaseUrl, RetryPolicy};

pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

/// How model commands are carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Wrapper when the `ollama` executable can be found, native otherwise.
    #[default]
    Auto,
    /// Run the installed `ollama` CLI.
    Wrapper,
    /// Talk to the backend's HTTP API directly.
    Native,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Wrapper => "wrapper",
            Mode::Native => "native",
        }
    }
}

impl FromStr for Mode {
    type Err = InvalidValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Mode::Auto),
            "wrapper" => Ok(Mode::Wrapper),
            "native" => Ok(Mode::Native),
            _ => Err(InvalidValueError {
                key: "mode",
                value: s.to_string(),
                reason: "expected auto, wrapper or native".to_string(),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub ollama_exe: Option<String>,
    pub mode: Option<String>,
    pub no_proxy_auto: Option<bool>,
    pub allow_unsafe: Option<bool>,
    pub retries: Option<u32>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Effective {
    pub base_url: BaseUrl,
    /// Host exactly as configured, handed to the wrapped CLI.
    pub host: String,
    pub ollama_exe: Option<String>,
    pub mode: Mode,
    pub no_proxy_auto: bool,
    pub allow_unsafe: bool,
    pub retry: RetryPolicy,
}

impl Effective {
    pub fn resolve(overrides: &Overrides, config: &Config) -> Result<Self, InvalidValueError> {
        let host = non_blank(overrides.host.clone())
            .or_else(|| non_blank(config.host.clone()))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let base_url = BaseUrl::parse(&host).map_err(|e| InvalidValueError {
            key: "host",
            value: host.clone(),
            reason: e.to_string(),
        })?;

        let mode = match non_blank(overrides.mode.clone()).or_else(|| non_blank(config.mode.clone())) {
            Some(mode) => mode.parse()?,
            None => Mode::Auto,
        };

        let retry = match overrides.retries.or(config.retries) {
            Some(n) => RetryPolicy::with_max_retries(n),
            None => RetryPolicy::default(),
        };

        Ok(Self {
            base_url,
            host,
            ollama_exe: non_blank(overrides.ollama_exe.clone())
                .or_else(|| non_blank(config.ollama_exe.clone())),
            mode,
            no_proxy_auto: overrides
                .no_proxy_auto
                .or(config.no_proxy_auto)
                .unwrap_or(false),
            allow_unsafe: overrides
                .allow_unsafe
                .or(config.allow_unsafe)
                .unwrap_or(false),
            retry,
        })
    }
}
