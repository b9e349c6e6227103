//! Command dispatch for wrapper and native execution.

use anyhow::Result;
use log::{debug, info};
use std::fmt;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::config::{Effective, InvalidValueError, Mode, UnknownKeyError};
use crate::exec::{self, ExecError, resolve_executable};
use crate::runtime::Runtime;

pub mod config;
pub mod doctor;
pub mod native;

pub use config::ConfigCommand;

/// Model operations available in every mode.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ModelCommand {
    /// Print the backend version
    Version,
    /// List local models
    #[command(alias = "ls")]
    List,
    /// List running models
    Ps,
    /// Show information for a model
    Show { model: String },
    /// Run a model with a prompt (read from stdin when omitted)
    Run {
        model: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Pull a model (native mode requires --unsafe)
    Pull { model: String },
    /// Remove a model (native mode requires --unsafe)
    Rm { model: String },
    /// Copy a model
    Cp { source: String, destination: String },
}

impl ModelCommand {
    /// Equivalent arguments for the `ollama` CLI.
    pub fn to_wrapper_args(&self) -> Vec<String> {
        let args: Vec<&str> = match self {
            ModelCommand::Version => vec!["--version"],
            ModelCommand::List => vec!["list"],
            ModelCommand::Ps => vec!["ps"],
            ModelCommand::Show { model } => vec!["show", model.as_str()],
            ModelCommand::Run { model, prompt } => {
                let mut args = vec!["run", model.as_str()];
                args.extend(prompt.iter().map(String::as_str));
                args
            }
            ModelCommand::Pull { model } => vec!["pull", model.as_str()],
            ModelCommand::Rm { model } => vec!["rm", model.as_str()],
            ModelCommand::Cp {
                source,
                destination,
            } => vec!["cp", source.as_str(), destination.as_str()],
        };
        args.into_iter().map(str::to_string).collect()
    }
}

/// The command line was well-formed but cannot be carried out as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

/// How a command will be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selected {
    Wrapper(PathBuf),
    Native,
}

/// Chooses wrapper or native execution for the effective mode.
pub fn select<R: Runtime>(runtime: &R, effective: &Effective) -> Result<Selected> {
    if effective.mode == Mode::Native {
        return Ok(Selected::Native);
    }

    match resolve_executable(runtime, effective.ollama_exe.as_deref()) {
        Ok(exe) => Ok(Selected::Wrapper(exe)),
        Err(e) => match (&effective.ollama_exe, effective.mode) {
            (Some(configured), _) => Err(InvalidValueError {
                key: "ollama_exe",
                value: configured.clone(),
                reason: e.to_string(),
            }
            .into()),
            (None, Mode::Auto) => {
                debug!("{}; falling back to native mode", e);
                Ok(Selected::Native)
            }
            (None, _) => Err(e.into()),
        },
    }
}

/// Runs a model command in the selected mode and returns the exit code.
#[tracing::instrument(skip(runtime, effective, cancel))]
pub async fn run_model<R: Runtime>(
    runtime: &R,
    effective: &Effective,
    command: &ModelCommand,
    cancel: &CancellationToken,
) -> Result<i32> {
    match select(runtime, effective)? {
        Selected::Wrapper(exe) => {
            run_wrapper(runtime, effective, &exe, &command.to_wrapper_args(), cancel).await
        }
        Selected::Native => {
            let client = native::client_for(effective)?;
            let mut stdout = std::io::stdout();
            let mut stdin = std::io::stdin();
            let piped: Option<&mut dyn Read> = if stdin.is_terminal() {
                None
            } else {
                Some(&mut stdin)
            };
            native::run(
                &client,
                command,
                effective.allow_unsafe,
                &mut stdout,
                piped,
                cancel,
            )
            .await?;
            Ok(0)
        }
    }
}

/// Passes an unrecognised subcommand straight to the wrapped CLI.
#[tracing::instrument(skip(runtime, effective, cancel))]
pub async fn run_external<R: Runtime>(
    runtime: &R,
    effective: &Effective,
    args: &[String],
    cancel: &CancellationToken,
) -> Result<i32> {
    match select(runtime, effective)? {
        Selected::Wrapper(exe) => run_wrapper(runtime, effective, &exe, args, cancel).await,
        Selected::Native => Err(UsageError(format!(
            "{} is not supported in native mode",
            args.first().map(String::as_str).unwrap_or("command")
        ))
        .into()),
    }
}

async fn run_wrapper<R: Runtime>(
    runtime: &R,
    effective: &Effective,
    exe: &std::path::Path,
    args: &[String],
    cancel: &CancellationToken,
) -> Result<i32> {
    let env = exec::child_env(
        runtime,
        &effective.host,
        &effective.base_url,
        effective.ollama_exe.as_deref(),
        effective.no_proxy_auto,
    );
    info!("Wrapping {} for {}", exe.display(), effective.host);
    exec::run(exe, args, &env, cancel).await
}

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.downcast_ref::<ExecError>().is_some() {
            return 127;
        }
        if cause.downcast_ref::<UsageError>().is_some()
            || cause.downcast_ref::<InvalidValueError>().is_some()
            || cause.downcast_ref::<UnknownKeyError>().is_some()
        {
            return 2;
        }
    }
    1
}
