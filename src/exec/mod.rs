//! Running the installed `ollama` CLI as a child process.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::api::BaseUrl;
use crate::runtime::Runtime;

pub const DEFAULT_EXECUTABLE: &str = "ollama";

/// Exit status reported when the child is stopped by cancellation.
pub const CANCELLED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The executable is not an existing file and could not be found on `PATH`.
    NotFound { name: String },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::NotFound { name } => write!(
                f,
                "{} not found (install Ollama and make sure it is on PATH, or set OLLAMA_EXE)",
                name
            ),
        }
    }
}

impl std::error::Error for ExecError {}

/// Locates the executable to wrap.
///
/// A configured value containing a path separator must name an existing file;
/// any other value is looked up on `PATH`.
pub fn resolve_executable<R: Runtime>(
    runtime: &R,
    configured: Option<&str>,
) -> Result<PathBuf, ExecError> {
    let name = configured
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_EXECUTABLE);
    let not_found = || ExecError::NotFound {
        name: name.to_string(),
    };

    if name.contains('/') || name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return if runtime.is_file(&path) {
            Ok(path)
        } else {
            Err(not_found())
        };
    }

    let path_var = runtime.env_var("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        for candidate in candidates(&dir, name) {
            if runtime.is_file(&candidate) {
                debug!("Resolved {} to {}", name, candidate.display());
                return Ok(candidate);
            }
        }
    }
    Err(not_found())
}

fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut out = vec![dir.join(name)];
    if cfg!(windows) && Path::new(name).extension().is_none() {
        out.push(dir.join(format!("{}.exe", name)));
    }
    out
}

/// Environment variables to set on the child, on top of the inherited ones.
pub fn child_env<R: Runtime>(
    runtime: &R,
    host: &str,
    base_url: &BaseUrl,
    ollama_exe: Option<&str>,
    no_proxy_auto: bool,
) -> Vec<(String, String)> {
    let mut env = vec![("OLLAMA_HOST".to_string(), host.trim().to_string())];

    if let Some(exe) = ollama_exe.map(str::trim).filter(|e| !e.is_empty()) {
        env.push(("OLLAMA_EXE".to_string(), exe.to_string()));
    }

    if no_proxy_auto {
        if let Some(backend) = base_url.host() {
            let current = runtime
                .env_var("NO_PROXY")
                .or_else(|_| runtime.env_var("no_proxy"))
                .unwrap_or_default();
            let merged = append_no_proxy(&current, &backend);
            env.push(("NO_PROXY".to_string(), merged.clone()));
            env.push(("no_proxy".to_string(), merged));
        }
    }
    env
}

/// Appends `host` to a comma-separated `NO_PROXY` list unless already listed.
pub fn append_no_proxy(current: &str, host: &str) -> String {
    let current = current.trim();
    if current.is_empty() {
        return host.to_string();
    }
    if current
        .split(',')
        .any(|entry| entry.trim().eq_ignore_ascii_case(host))
    {
        return current.to_string();
    }
    format!("{},{}", current, host)
}

/// Runs `exe` with inherited stdio and returns its exit code.
///
/// Cancellation kills the child and yields [`CANCELLED_EXIT_CODE`].
#[tracing::instrument(skip(env, cancel))]
pub async fn run(
    exe: &Path,
    args: &[String],
    env: &[(String, String)],
    cancel: &CancellationToken,
) -> Result<i32> {
    info!("Running {} {}", exe.display(), args.join(" "));

    let mut child = Command::new(exe)
        .args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", exe.display()))?;

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("Failed to wait for {}", exe.display()))?;
            debug!("{} exited with {}", exe.display(), status);
            Ok(status.code().unwrap_or(1))
        }
        _ = cancel.cancelled() => {
            debug!("Cancelled, killing {}", exe.display());
            child
                .kill()
                .await
                .with_context(|| format!("Failed to stop {}", exe.display()))?;
            Ok(CANCELLED_EXIT_CODE)
        }
    }
}
