use anyhow::{Context, Result};
use log::debug;
use std::io::{Read, Write};
use tokio_util::sync::CancellationToken;

use crate::api::format::{format_ps, format_tags};
use crate::api::types::GenerateRequest;
use crate::api::{ClientOptions, OllamaClient};
use crate::config::Effective;

use super::{ModelCommand, UsageError};

/// Client configured from the effective settings.
pub fn client_for(effective: &Effective) -> Result<OllamaClient> {
    let options = ClientOptions::default()
        .retry(effective.retry.clone())
        .bypass_proxy(effective.no_proxy_auto);
    OllamaClient::new(effective.base_url.clone(), options).context("Failed to create API client")
}

/// Executes a model command against the HTTP API.
///
/// `stdin` is consulted for the `run` prompt only when it is not a terminal.
#[tracing::instrument(skip(client, out, stdin, cancel))]
pub async fn run<W>(
    client: &OllamaClient,
    command: &ModelCommand,
    allow_unsafe: bool,
    out: &mut W,
    stdin: Option<&mut dyn Read>,
    cancel: &CancellationToken,
) -> Result<()>
where
    W: Write + ?Sized,
{
    debug!("Native {:?} against {}", command, client.base_url());

    match command {
        ModelCommand::Version => {
            let version = client
                .version(cancel)
                .await
                .context("Failed to query backend version")?;
            writeln!(out, "{}", version)?;
        }
        ModelCommand::List => {
            let models = client.tags(cancel).await.context("Failed to list models")?;
            write!(out, "{}", format_tags(&models))?;
        }
        ModelCommand::Ps => {
            let models = client
                .ps(cancel)
                .await
                .context("Failed to list running models")?;
            write!(out, "{}", format_ps(&models))?;
        }
        ModelCommand::Show { model } => {
            let info = client
                .show(model, cancel)
                .await
                .with_context(|| format!("Failed to show model {:?}", model))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
        }
        ModelCommand::Run { model, prompt } => {
            let prompt = resolve_prompt(prompt, stdin)?;
            client
                .generate(&GenerateRequest::new(model.as_str(), prompt), out, cancel)
                .await
                .with_context(|| format!("Failed to run model {:?}", model))?;
            writeln!(out)?;
        }
        ModelCommand::Pull { model } => {
            require_unsafe("pull", allow_unsafe)?;
            client
                .pull(model, out, cancel)
                .await
                .with_context(|| format!("Failed to pull model {:?}", model))?;
        }
        ModelCommand::Rm { model } => {
            require_unsafe("rm", allow_unsafe)?;
            client
                .delete(model, cancel)
                .await
                .with_context(|| format!("Failed to remove model {:?}", model))?;
            writeln!(out, "deleted '{}'", model.trim())?;
        }
        ModelCommand::Cp {
            source,
            destination,
        } => {
            client
                .copy(source, destination, cancel)
                .await
                .with_context(|| format!("Failed to copy model {:?}", source))?;
            writeln!(out, "copied '{}' to '{}'", source.trim(), destination.trim())?;
        }
    }
    out.flush()?;
    Ok(())
}

fn require_unsafe(command: &str, allow_unsafe: bool) -> Result<()> {
    if allow_unsafe {
        return Ok(());
    }
    Err(UsageError(format!(
        "{} modifies the backend in native mode; pass --unsafe to allow it",
        command
    ))
    .into())
}

/// Prompt from the trailing words, else from piped stdin.
fn resolve_prompt(words: &[String], stdin: Option<&mut dyn Read>) -> Result<String> {
    let words = match words.split_first() {
        Some((first, rest)) if first == "--" => rest,
        _ => words,
    };
    let prompt = words.join(" ");
    if !prompt.trim().is_empty() {
        return Ok(prompt.trim().to_string());
    }

    if let Some(stdin) = stdin {
        let mut piped = String::new();
        stdin
            .read_to_string(&mut piped)
            .context("Failed to read prompt from stdin")?;
        if !piped.trim().is_empty() {
            return Ok(piped);
        }
    }

    Err(UsageError(
        "run needs a prompt: pass it after the model name or pipe it on stdin".to_string(),
    )
    .into())
}
