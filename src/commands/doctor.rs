use anyhow::Result;
use log::debug;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::{ClientOptions, OllamaClient};
use crate::config::{Effective, Mode};
use crate::exec::{self, resolve_executable};
use crate::runtime::Runtime;

/// Upper bound for each probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(7);

/// Reports the effective setup and probes the backend and the wrapped CLI.
///
/// Returns 0 when everything needed for the selected mode works, 1 when the
/// API is unreachable and 127 when wrapper mode has no executable.
#[tracing::instrument(skip(runtime, effective, out, cancel))]
pub async fn run<R: Runtime, W: Write>(
    runtime: &R,
    effective: &Effective,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<i32> {
    let resolved = resolve_executable(runtime, effective.ollama_exe.as_deref());
    let selected = match (effective.mode, &resolved) {
        (Mode::Auto, Ok(_)) => Mode::Wrapper,
        (Mode::Auto, Err(_)) => Mode::Native,
        (mode, _) => mode,
    };

    writeln!(out, "host: {}", effective.host)?;
    writeln!(out, "mode: {}", effective.mode)?;
    writeln!(out, "unsafe: {}", effective.allow_unsafe)?;
    writeln!(out, "selected mode: {}", selected)?;

    let api_ok = match probe_version(effective, cancel).await {
        Ok(version) => {
            writeln!(out, "api version: {}", version)?;
            true
        }
        Err(e) => {
            writeln!(out, "api version: unavailable ({:#})", e)?;
            false
        }
    };

    let exe = match resolved {
        Ok(exe) => exe,
        Err(e) => {
            writeln!(out, "ollama cli: not found")?;
            debug!("{}", e);
            if selected == Mode::Wrapper {
                return Ok(127);
            }
            return Ok(if api_ok { 0 } else { 1 });
        }
    };
    writeln!(out, "ollama cli: {}", exe.display())?;
    out.flush()?;

    let env = exec::child_env(
        runtime,
        &effective.host,
        &effective.base_url,
        effective.ollama_exe.as_deref(),
        effective.no_proxy_auto,
    );
    let args = ["--version".to_string()];
    let smoke = tokio::time::timeout(PROBE_TIMEOUT, exec::run(&exe, &args, &env, cancel)).await;
    match smoke {
        Ok(Ok(0)) => {}
        Ok(Ok(code)) => {
            writeln!(out, "ollama cli: --version exited with {}", code)?;
            return Ok(code);
        }
        Ok(Err(e)) => {
            writeln!(out, "ollama cli: failed ({:#})", e)?;
            return Ok(1);
        }
        Err(_) => {
            writeln!(out, "ollama cli: --version timed out")?;
            return Ok(1);
        }
    }

    Ok(if api_ok { 0 } else { 1 })
}

async fn probe_version(effective: &Effective, cancel: &CancellationToken) -> Result<String> {
    let options = ClientOptions::default().bypass_proxy(effective.no_proxy_auto);
    let client = OllamaClient::new(effective.base_url.clone(), options)?;
    let version = tokio::time::timeout(PROBE_TIMEOUT, client.version(cancel)).await??;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Overrides};
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    fn effective(host: &str, mode: &str) -> Effective {
        let overrides = Overrides {
            host: Some(host.to_string()),
            mode: Some(mode.to_string()),
            no_proxy_auto: Some(true),
            ..Default::default()
        };
        Effective::resolve(&overrides, &Config::default()).unwrap()
    }

    fn runtime_without_ollama() -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq("PATH"))
            .returning(|_| Ok(String::new()));
        runtime
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_native_with_healthy_api() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/version")
            .with_status(200)
            .with_body(r#"{"version":"0.6.2"}"#)
            .create_async()
            .await;

        let mut out = Vec::new();
        let code = run(
            &runtime_without_ollama(),
            &effective(&server.url(), "auto"),
            &mut out,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(code, 0);
        assert!(text.contains("selected mode: native\n"));
        assert!(text.contains("api version: 0.6.2\n"));
        assert!(text.contains("ollama cli: not found\n"));
    }

    #[tokio::test]
    async fn test_unreachable_api() {
        let mut out = Vec::new();
        let code = run(
            &runtime_without_ollama(),
            &effective(&closed_port_url(), "native"),
            &mut out,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(code, 1);
        assert!(
            String::from_utf8(out)
                .unwrap()
                .contains("api version: unavailable")
        );
    }

    #[tokio::test]
    async fn test_wrapper_without_executable() {
        let mut out = Vec::new();
        let code = run(
            &runtime_without_ollama(),
            &effective(&closed_port_url(), "wrapper"),
            &mut out,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(code, 127);
    }
}
