//! Per-request proxy selection.
//!
//! When proxy bypass is enabled, requests to the backend's own host go out
//! directly while every other request keeps following the proxy variables
//! of the environment. The process environment is never modified.

use log::debug;
use reqwest::{NoProxy, Proxy, Url};

use super::base_url::BaseUrl;

/// Outcome of a proxy decision for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyDecision {
    /// Connect to the target without any proxy.
    Direct,
    /// Use whatever the environment's proxy settings say.
    Ambient,
}

/// Decides per request whether to bypass proxies for the backend host.
#[derive(Debug, Clone, Default)]
pub struct ProxySelector {
    backend_host: Option<String>,
}

impl ProxySelector {
    pub fn new(bypass: bool, base: Option<&BaseUrl>) -> Self {
        let backend_host = if bypass {
            base.and_then(BaseUrl::host)
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
        } else {
            None
        };
        Self { backend_host }
    }

    /// True when some requests may be routed differently from the ambient
    /// configuration.
    pub fn is_active(&self) -> bool {
        self.backend_host.is_some()
    }

    pub fn decide(&self, target: &Url) -> ProxyDecision {
        match (&self.backend_host, target.host_str()) {
            (Some(backend), Some(host)) if !host.is_empty() && host.eq_ignore_ascii_case(backend) => {
                ProxyDecision::Direct
            }
            _ => ProxyDecision::Ambient,
        }
    }

    /// Proxies to install on the client, or `None` when reqwest's own
    /// environment proxy handling should stay in charge.
    ///
    /// The ambient proxies are rebuilt with the backend host appended to
    /// their `NO_PROXY` list. Matching of that list (domains, IPs, CIDR
    /// ranges, `*`) is left to reqwest.
    pub fn proxies(&self, ambient: &AmbientProxy) -> Option<Vec<Proxy>> {
        let backend = self.backend_host.as_deref()?;
        let backend = backend.trim_start_matches('[').trim_end_matches(']');
        let no_proxy = match ambient.no_proxy.as_deref() {
            Some(list) => format!("{},{}", list, backend),
            None => backend.to_string(),
        };

        let configured = [
            ("HTTP_PROXY", ambient.http.as_deref()),
            ("HTTPS_PROXY", ambient.https.as_deref()),
            ("ALL_PROXY", ambient.all.as_deref()),
        ];
        let proxies = configured
            .into_iter()
            .filter_map(|(name, value)| {
                let value = value?;
                match ambient_proxy(name, value) {
                    Ok(proxy) => Some(proxy.no_proxy(NoProxy::from_string(&no_proxy))),
                    Err(e) => {
                        debug!("Ignoring invalid {} {:?}: {}", name, value, e);
                        None
                    }
                }
            })
            .collect();
        Some(proxies)
    }
}

fn ambient_proxy(name: &str, value: &str) -> reqwest::Result<Proxy> {
    match name {
        "HTTP_PROXY" => Proxy::http(value),
        "HTTPS_PROXY" => Proxy::https(value),
        _ => Proxy::all(value),
    }
}

/// Snapshot of the proxy environment variables
/// (`HTTP_PROXY`, `HTTPS_PROXY`, `ALL_PROXY`, `NO_PROXY`, upper or lower case).
#[derive(Debug, Clone, Default)]
pub struct AmbientProxy {
    http: Option<String>,
    https: Option<String>,
    all: Option<String>,
    no_proxy: Option<String>,
}

impl AmbientProxy {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .or_else(|| lookup(&name.to_ascii_lowercase()))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            http: var("HTTP_PROXY"),
            https: var("HTTPS_PROXY"),
            all: var("ALL_PROXY"),
            no_proxy: var("NO_PROXY"),
        }
    }
}
