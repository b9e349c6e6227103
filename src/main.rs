use anyhow::Result;
use clap::Parser;
use clap::builder::BoolishValueParser;
use ollama_remote::commands::{self, ConfigCommand, ModelCommand};
use ollama_remote::config::{self, Effective, Overrides};
use ollama_remote::runtime::{RealRuntime, Runtime};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// ollama-remote - Ollama model commands against a local or remote backend
///
/// Commands run through the installed `ollama` CLI (wrapper mode) or directly
/// against the backend's HTTP API (native mode). In auto mode the wrapper is
/// used when `ollama` can be found.
///
/// Examples:
///   ollama-remote --host http://gpu-box:11434 list
///   ollama-remote --mode native run llama3 -- why is the sky blue
///   echo "summarize" | ollama-remote --mode native run llama3
#[derive(Parser, Debug)]
#[command(name = "ollama-remote", author, version = env!("OLLAMA_REMOTE_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(clap::Args, Debug, Default)]
struct GlobalArgs {
    /// Backend URL (defaults to http://127.0.0.1:11434)
    #[arg(long, env = "OLLAMA_HOST", value_name = "URL", global = true)]
    host: Option<String>,

    /// Name or path of the ollama executable
    #[arg(long = "ollama-exe", env = "OLLAMA_EXE", value_name = "PATH", global = true)]
    ollama_exe: Option<String>,

    /// Execution mode: auto, wrapper or native
    #[arg(long, env = "OLLAMA_REMOTE_MODE", value_name = "MODE", global = true)]
    mode: Option<String>,

    /// Bypass proxies for the backend host
    #[arg(
        long = "no-proxy-auto",
        env = "OLLAMA_REMOTE_NO_PROXY_AUTO",
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    no_proxy_auto: Option<bool>,

    /// Allow native commands that modify the backend (pull, rm)
    #[arg(
        long = "unsafe",
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    allow_unsafe: Option<bool>,

    /// Retries for transient API failures in native mode
    #[arg(long, value_name = "N", global = true)]
    retries: Option<u32>,

    /// Config file to use instead of the user and project files
    #[arg(long, env = "OLLAMA_REMOTE_CONFIG", value_name = "PATH", global = true)]
    config: Option<PathBuf>,
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            ollama_exe: self.ollama_exe.clone(),
            mode: self.mode.clone(),
            no_proxy_auto: self.no_proxy_auto,
            allow_unsafe: self.allow_unsafe,
            retries: self.retries,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Model(ModelCommand),

    /// Inspect or edit the config file (defaults to show)
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommand>,
    },

    /// Check the configuration, the backend and the ollama CLI
    Doctor,

    /// Any other ollama subcommand, passed through in wrapper mode
    #[command(external_subcommand)]
    External(Vec<String>),
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    match run(cli, &runtime, &cancel).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(commands::exit_code(&err))
        }
    }
}

async fn run<R: Runtime>(cli: Cli, runtime: &R, cancel: &CancellationToken) -> Result<i32> {
    let loaded = config::load(runtime, cli.global.config.as_deref())?;
    let overrides = cli.global.overrides();
    let mut stdout = std::io::stdout();

    match cli.command {
        Commands::Config { command } => {
            let command = command.unwrap_or(ConfigCommand::Show);
            commands::config::run(runtime, &loaded, &overrides, &command, &mut stdout)?;
            Ok(0)
        }
        Commands::Doctor => {
            let effective = Effective::resolve(&overrides, &loaded.config)?;
            commands::doctor::run(runtime, &effective, &mut stdout, cancel).await
        }
        Commands::Model(command) => {
            let effective = Effective::resolve(&overrides, &loaded.config)?;
            commands::run_model(runtime, &effective, &command, cancel).await
        }
        Commands::External(args) => {
            let effective = Effective::resolve(&overrides, &loaded.config)?;
            commands::run_external(runtime, &effective, &args, cancel).await
        }
    }
}
