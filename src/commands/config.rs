use anyhow::Result;
use std::io::Write;

use crate::config::{self, Effective, LoadedConfig, Overrides};
use crate::runtime::Runtime;

#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the path of the config file that init and set write to
    Path,
    /// Print the effective settings
    Show,
    /// Create a config file with default values if none exists
    Init,
    /// Set a key in the config file
    Set {
        /// One of: host, ollama_exe, mode, no_proxy_auto, unsafe, retries
        key: String,
        value: String,
    },
}

#[tracing::instrument(skip(runtime, loaded, overrides, out))]
pub fn run<R: Runtime, W: Write>(
    runtime: &R,
    loaded: &LoadedConfig,
    overrides: &Overrides,
    command: &ConfigCommand,
    out: &mut W,
) -> Result<()> {
    let path = &loaded.primary_path;
    match command {
        ConfigCommand::Path => writeln!(out, "{}", path.display())?,
        ConfigCommand::Show => {
            let effective = Effective::resolve(overrides, &loaded.config)?;
            show(loaded, &effective, out)?;
        }
        ConfigCommand::Init => {
            if config::init_user_config(runtime, path)? {
                writeln!(out, "Created {}", path.display())?;
            } else {
                writeln!(out, "{} already exists", path.display())?;
            }
        }
        ConfigCommand::Set { key, value } => {
            config::set_user_config(runtime, path, key, value)?;
            writeln!(
                out,
                "Set {} in {}",
                key.trim().to_ascii_lowercase(),
                path.display()
            )?;
        }
    }
    Ok(())
}

fn show<W: Write>(loaded: &LoadedConfig, effective: &Effective, out: &mut W) -> Result<()> {
    let files = if loaded.used_files.is_empty() {
        "(none)".to_string()
    } else {
        loaded
            .used_files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    writeln!(out, "config: {}", loaded.primary_path.display())?;
    writeln!(out, "loaded: {}", files)?;
    writeln!(out, "host: {}", effective.host)?;
    writeln!(
        out,
        "ollama_exe: {}",
        effective.ollama_exe.as_deref().unwrap_or("auto")
    )?;
    writeln!(out, "mode: {}", effective.mode)?;
    writeln!(out, "no_proxy_auto: {}", effective.no_proxy_auto)?;
    writeln!(out, "unsafe: {}", effective.allow_unsafe)?;
    writeln!(out, "retries: {}", effective.retry.max_retries)?;
    Ok(())
}
