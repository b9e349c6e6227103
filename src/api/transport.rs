//! Connection settings for the backend HTTP client.

use log::debug;
use reqwest::Client;
use std::time::Duration;

use super::base_url::BaseUrl;
use super::error::{Error, Result};
use super::proxy::{AmbientProxy, ProxySelector};
use super::retry::RetryPolicy;

/// Timeout for establishing a connection, TLS handshake included.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
/// TCP keep-alive interval for pooled connections.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);
/// How long an idle pooled connection is kept.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// Upper bound on idle pooled connections per host.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 5;

/// Client construction options.
///
/// No overall request timeout is set; generate and pull responses stream
/// until the backend finishes.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub dial_timeout: Duration,
    pub keepalive: Duration,
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
    pub retry: RetryPolicy,
    pub bypass_proxy: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            retry: RetryPolicy::none(),
            bypass_proxy: false,
        }
    }
}

impl ClientOptions {
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Skip proxies for requests addressed to the backend host.
    pub fn bypass_proxy(mut self, bypass: bool) -> Self {
        self.bypass_proxy = bypass;
        self
    }
}

/// Builds the pooled reqwest client for `base`.
pub(crate) fn build_http_client(base: &BaseUrl, options: &ClientOptions) -> Result<Client> {
    build_http_client_with(base, options, &AmbientProxy::from_env())
}

fn build_http_client_with(
    base: &BaseUrl,
    options: &ClientOptions,
    ambient: &AmbientProxy,
) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(concat!("ollama-remote/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(options.dial_timeout)
        .tcp_keepalive(options.keepalive)
        .pool_idle_timeout(options.idle_timeout)
        .pool_max_idle_per_host(options.max_idle_per_host);

    let selector = ProxySelector::new(options.bypass_proxy, Some(base));
    if let Some(proxies) = selector.proxies(ambient) {
        debug!(
            "Proxy bypass for {}: {:?}",
            base,
            selector.decide(base.as_url())
        );
        if proxies.is_empty() {
            builder = builder.no_proxy();
        }
        for proxy in proxies {
            builder = builder.proxy(proxy);
        }
    }

    builder
        .build()
        .map_err(|e| Error::transport("build http client", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.dial_timeout, Duration::from_secs(10));
        assert_eq!(options.idle_timeout, Duration::from_secs(90));
        assert_eq!(options.max_idle_per_host, 5);
        assert_eq!(options.retry.max_retries, 0);
        assert!(!options.bypass_proxy);
    }

    #[test]
    fn test_builder_setters() {
        let options = ClientOptions::default()
            .dial_timeout(Duration::from_secs(1))
            .idle_timeout(Duration::from_secs(2))
            .max_idle_per_host(1)
            .retry(RetryPolicy::default())
            .bypass_proxy(true);
        assert_eq!(options.dial_timeout, Duration::from_secs(1));
        assert_eq!(options.idle_timeout, Duration::from_secs(2));
        assert_eq!(options.max_idle_per_host, 1);
        assert_eq!(options.retry.max_retries, 3);
        assert!(options.bypass_proxy);
    }

    #[test]
    fn test_build_http_client_with_bypass() {
        let base = BaseUrl::parse("http://localhost:11434").unwrap();
        let options = ClientOptions::default().bypass_proxy(true);
        assert!(build_http_client(&base, &options).is_ok());
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn ambient(http_proxy: &str, no_proxy: &str) -> AmbientProxy {
        let (http_proxy, no_proxy) = (http_proxy.to_string(), no_proxy.to_string());
        AmbientProxy::from_lookup(move |key| match key {
            "HTTP_PROXY" => Some(http_proxy.clone()),
            "NO_PROXY" => Some(no_proxy.clone()),
            _ => None,
        })
    }

    fn bypassing_client(ambient: &AmbientProxy) -> Client {
        let base = BaseUrl::parse("http://backend.invalid:11434").unwrap();
        let options = ClientOptions::default().bypass_proxy(true);
        build_http_client_with(&base, &options, ambient).unwrap()
    }

    #[tokio::test]
    async fn test_bypass_keeps_no_proxy_cidr_ranges() {
        let mut target = mockito::Server::new_async().await;
        let mock = target
            .mock("GET", "/api/version")
            .with_status(200)
            .create_async()
            .await;

        // The proxy is unreachable, so only a direct connection succeeds.
        let client = bypassing_client(&ambient(&closed_port_url(), "10.0.0.0/8,127.0.0.0/8"));
        let response = client
            .get(format!("{}/api/version", target.url()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bypass_no_proxy_entry_with_other_port_still_proxies() {
        let mut proxy = mockito::Server::new_async().await;
        let mock = proxy
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body("via proxy")
            .expect(1)
            .create_async()
            .await;

        let client = bypassing_client(&ambient(&proxy.url(), "127.0.0.1:1"));
        let response = client
            .get(format!("{}/api/version", closed_port_url()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.text().await.unwrap(), "via proxy");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bypass_backend_host_goes_direct() {
        let mut backend = mockito::Server::new_async().await;
        let mock = backend
            .mock("GET", "/api/version")
            .with_status(200)
            .create_async()
            .await;

        let base = BaseUrl::parse(&backend.url()).unwrap();
        let options = ClientOptions::default().bypass_proxy(true);
        let client =
            build_http_client_with(&base, &options, &ambient(&closed_port_url(), "")).unwrap();
        let response = client.get(base.endpoint("/api/version")).send().await.unwrap();

        assert_eq!(response.status(), 200);
        mock.assert_async().await;
    }
}
