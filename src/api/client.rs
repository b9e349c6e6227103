//! Backend API client with built-in retry logic and streaming support.

use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use tokio_util::sync::CancellationToken;

use super::base_url::BaseUrl;
use super::error::{ApiError, Error, Result};
use super::retry::{RetryPolicy, with_retry};
use super::stream::{GENERATE_ENDPOINT, PULL_ENDPOINT, decode_generate, decode_pull};
use super::transport::{ClientOptions, build_http_client};
use super::types::{
    CopyRequest, DeleteRequest, GenerateRequest, PsModel, PsResponse, PullRequest, ShowRequest,
    TagModel, TagsResponse, VersionResponse,
};

const VERSION_ENDPOINT: &str = "/api/version";
const TAGS_ENDPOINT: &str = "/api/tags";
const PS_ENDPOINT: &str = "/api/ps";
const SHOW_ENDPOINT: &str = "/api/show";
const DELETE_ENDPOINT: &str = "/api/delete";
const COPY_ENDPOINT: &str = "/api/copy";

/// Client for the backend's JSON HTTP API.
///
/// Holds one pooled connection set for its lifetime; clone it to share the
/// pool between tasks.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base: BaseUrl,
    http: Client,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn new(base: BaseUrl, options: ClientOptions) -> Result<Self> {
        let http = build_http_client(&base, &options)?;
        Ok(Self {
            base,
            http,
            retry: options.retry,
        })
    }

    pub fn base_url(&self) -> &BaseUrl {
        &self.base
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Backend version string.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn version(&self, cancel: &CancellationToken) -> Result<String> {
        let resp: VersionResponse = self
            .do_json(Method::GET, VERSION_ENDPOINT, None::<&()>, cancel)
            .await?;
        let version = resp.version.trim();
        if version.is_empty() {
            return Err(Error::validation("backend reported an empty version"));
        }
        Ok(version.to_string())
    }

    /// Locally available models.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn tags(&self, cancel: &CancellationToken) -> Result<Vec<TagModel>> {
        let resp: TagsResponse = self
            .do_json(Method::GET, TAGS_ENDPOINT, None::<&()>, cancel)
            .await?;
        Ok(resp.models)
    }

    /// Models currently loaded in memory.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn ps(&self, cancel: &CancellationToken) -> Result<Vec<PsModel>> {
        let resp: PsResponse = self
            .do_json(Method::GET, PS_ENDPOINT, None::<&()>, cancel)
            .await?;
        Ok(resp.models)
    }

    /// Model details as returned by the backend.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn show(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let name = required("model name", name)?;
        self.do_json(Method::POST, SHOW_ENDPOINT, Some(&ShowRequest { name }), cancel)
            .await
    }

    /// Streams generated text for `req` into `sink`.
    ///
    /// Not retried: output may already have reached the sink when a failure
    /// occurs.
    #[tracing::instrument(skip(self, req, sink, cancel), fields(model = %req.model))]
    pub async fn generate<W>(
        &self,
        req: &GenerateRequest,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        W: Write + ?Sized,
    {
        let model = required("model", &req.model)?;
        if req.prompt.trim().is_empty() {
            return Err(Error::validation("empty prompt"));
        }
        let req = GenerateRequest {
            model: model.to_string(),
            prompt: req.prompt.clone(),
            stream: true,
        };

        let response = self.do_stream(GENERATE_ENDPOINT, &req, cancel).await?;
        decode_generate(Box::pin(response.bytes_stream()), sink, cancel).await
    }

    /// Pulls a model, writing one progress line per update into `sink`.
    #[tracing::instrument(skip(self, sink, cancel))]
    pub async fn pull<W>(&self, name: &str, sink: &mut W, cancel: &CancellationToken) -> Result<()>
    where
        W: Write + ?Sized,
    {
        let name = required("model name", name)?;
        let req = PullRequest { name, stream: true };

        let response = self.do_stream(PULL_ENDPOINT, &req, cancel).await?;
        decode_pull(Box::pin(response.bytes_stream()), sink, cancel).await
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let name = required("model name", name)?;
        self.do_call(
            Method::DELETE,
            DELETE_ENDPOINT,
            Some(&DeleteRequest { name }),
            cancel,
        )
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn copy(
        &self,
        source: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let source = required("source model", source)?;
        let destination = required("destination model", destination)?;
        self.do_call(
            Method::POST,
            COPY_ENDPOINT,
            Some(&CopyRequest {
                source,
                destination,
            }),
            cancel,
        )
        .await?;
        Ok(())
    }

    /// Performs a request and decodes the JSON response.
    /// Automatically retries on transient errors.
    async fn do_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let bytes = self.do_call(method, path, body, cancel).await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::decode("decode response", e))
    }

    /// Performs a request and returns the raw response body.
    /// Automatically retries on transient errors.
    async fn do_call<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>
    where
        B: Serialize + ?Sized,
    {
        debug!("{} {}...", method, path);
        let operation = format!("{} {}", method, path);

        with_retry(&operation, &self.retry, cancel, || {
            let request = self.request(method.clone(), path, body);
            async move {
                let response = send(request?, cancel).await?;
                let response = check_status(response, path, cancel).await?;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    bytes = response.bytes() => bytes
                        .map(|b| b.to_vec())
                        .map_err(|e| Error::transport("read response", e)),
                }
            }
        })
        .await
    }

    /// Opens a streaming POST. Single attempt; the caller drains the body.
    async fn do_stream<B>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        debug!("POST {} (stream)...", path);
        let response = send(self.request(Method::POST, path, Some(body))?, cancel).await?;
        check_status(response, path, cancel).await
    }

    fn request<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<RequestBuilder>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.http.request(method, self.base.endpoint(path));
        if let Some(body) = body {
            let payload = serde_json::to_vec(body).map_err(|e| Error::decode("encode request", e))?;
            request = request.header(CONTENT_TYPE, "application/json").body(payload);
        }
        Ok(request)
    }
}

fn required<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation(format!("empty {}", what)));
    }
    Ok(value)
}

async fn send(request: RequestBuilder, cancel: &CancellationToken) -> Result<Response> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        response = request.send() => response.map_err(|e| Error::transport("send request", e)),
    }
}

/// Passes 2xx responses through; anything else becomes an [`ApiError`].
async fn check_status(
    response: Response,
    endpoint: &str,
    cancel: &CancellationToken,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        body = response.bytes() => body.unwrap_or_default(),
    };
    let err = decode_api_error(status, &body, endpoint);
    debug!("{}", err);
    Err(err.into())
}

/// Builds an [`ApiError`] from a failed response, taking the message from a
/// JSON `{"error": ...}` body when there is one.
fn decode_api_error(status: StatusCode, body: &[u8], endpoint: &str) -> ApiError {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: String,
    }

    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.error.trim().to_string())
        .unwrap_or_default();

    ApiError {
        status_code: status.as_u16(),
        status_text: status.to_string(),
        message,
        endpoint: endpoint.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn client(url: &str, retry: RetryPolicy) -> OllamaClient {
        let base = BaseUrl::parse(url).unwrap();
        let options = ClientOptions::default().retry(retry).bypass_proxy(true);
        OllamaClient::new(base, options).unwrap()
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_version_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/version")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"version":"0.5.7"}"#)
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        let version = client.version(&CancellationToken::new()).await.unwrap();

        assert_eq!(version, "0.5.7");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_version_empty_is_validation_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/version")
            .with_status(200)
            .with_body(r#"{"version":""}"#)
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        let err = client.version(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_tags_decodes_models() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(
                r#"{"models":[{"name":"llama3:8b","digest":"sha256:abc","size":4661224676,"modified_at":"2026-03-01T10:00:00Z"}]}"#,
            )
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        let models = client.tags(&CancellationToken::new()).await.unwrap();

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "llama3:8b");
        assert_eq!(models[0].size, 4661224676);
        assert!(models[0].modified_at.is_some());
    }

    #[tokio::test]
    async fn test_ps_decodes_models() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/ps")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"qwen","model":"qwen","size":10,"expires_at":"2026-03-01T10:05:00Z","details":{"family":"qwen2"}}]}"#)
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        let models = client.ps(&CancellationToken::new()).await.unwrap();

        assert_eq!(models[0].name, "qwen");
        assert_eq!(models[0].details["family"], "qwen2");
        assert!(models[0].expires_at.is_some());
    }

    #[tokio::test]
    async fn test_show_posts_trimmed_name() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/show")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"name": "llama3"})))
            .with_status(200)
            .with_body(r#"{"modelfile":"FROM llama3","parameters":"stop \"<|eot|>\""}"#)
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        let info = client
            .show("  llama3 ", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(info["modelfile"], "FROM llama3");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_names_rejected_without_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", Matcher::Any).expect(0).create_async().await;

        let client = client(&server.url(), RetryPolicy::none());
        let cancel = CancellationToken::new();
        let mut out = Vec::new();

        assert!(client.show(" ", &cancel).await.unwrap_err().is_validation());
        assert!(client.delete("", &cancel).await.unwrap_err().is_validation());
        assert!(client.copy("a", " ", &cancel).await.unwrap_err().is_validation());
        assert!(
            client
                .pull("", &mut out, &cancel)
                .await
                .unwrap_err()
                .is_validation()
        );
        assert!(
            client
                .generate(&GenerateRequest::new("llama3", "   "), &mut out, &cancel)
                .await
                .unwrap_err()
                .is_validation()
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_streams_to_sink() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .match_body(Matcher::Json(
                json!({"model": "llama3", "prompt": "Say hi", "stream": true}),
            ))
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body("{\"response\":\"Hi\",\"done\":false}\n{\"response\":\"!\",\"done\":true}\n")
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        let mut out = Vec::new();
        client
            .generate(
                &GenerateRequest::new(" llama3 ", "Say hi"),
                &mut out,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Hi!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_not_found_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(404)
            .with_body(r#"{"error":" model \"nope\" not found "}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client(&server.url(), fast_retry(3));
        let mut out = Vec::new();
        let err = client
            .generate(
                &GenerateRequest::new("nope", "hi"),
                &mut out,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let api = err.api_error().unwrap();
        assert_eq!(api.status_code, 404);
        assert_eq!(api.message, "model \"nope\" not found");
        assert_eq!(api.endpoint, "/api/generate");
        assert!(out.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_server_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let client = client(&server.url(), fast_retry(3));
        let mut out = Vec::new();
        let err = client
            .generate(
                &GenerateRequest::new("llama3", "hi"),
                &mut out,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(503));
        mock.assert_async().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_server_error_retried_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(503)
            .with_body(r#"{"error":"loading"}"#)
            .expect(3)
            .create_async()
            .await;

        let client = client(&server.url(), fast_retry(2));
        let err = client.tags(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.status_code(), Some(503));
        assert!(err.to_string().contains("loading"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/show")
            .with_status(400)
            .with_body("not json")
            .expect(1)
            .create_async()
            .await;

        let client = client(&server.url(), fast_retry(3));
        let err = client
            .show("llama3", &CancellationToken::new())
            .await
            .unwrap_err();

        let api = err.api_error().unwrap();
        assert_eq!(api.status_code, 400);
        assert!(api.message.is_empty());
        assert_eq!(err.to_string(), "ollama api /api/show: 400 Bad Request");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_response_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body("{not json")
            .expect(1)
            .create_async()
            .await;

        let client = client(&server.url(), fast_retry(3));
        let err = client.tags(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::Decode { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_sends_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api/delete")
            .match_body(Matcher::Json(json!({"name": "llama3"})))
            .with_status(200)
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        client
            .delete("llama3", &CancellationToken::new())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_copy_sends_both_names() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/copy")
            .match_body(Matcher::Json(
                json!({"source": "llama3", "destination": "llama3-backup"}),
            ))
            .with_status(200)
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        client
            .copy("llama3", "llama3-backup", &CancellationToken::new())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pull_renders_progress() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/pull")
            .match_body(Matcher::Json(json!({"name": "llama3", "stream": true})))
            .with_status(200)
            .with_body(concat!(
                "{\"status\":\"pulling manifest\"}\n",
                "{\"status\":\"downloading\",\"digest\":\"sha256:abc123\",\"total\":1000,\"completed\":500}\n",
                "{\"status\":\"success\"}\n"
            ))
            .create_async()
            .await;

        let client = client(&server.url(), RetryPolicy::none());
        let mut out = Vec::new();
        client
            .pull("llama3", &mut out, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "pulling manifest\ndownloading sha256:abc123 500/1000\nsuccess\n"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/api/version").expect(0).create_async().await;

        let client = client(&server.url(), fast_retry(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.version(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(&format!("http://{}", addr), fast_retry(1));
        let err = client.ps(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[test]
    fn test_decode_api_error_falls_back_to_status_text() {
        let err = decode_api_error(StatusCode::BAD_GATEWAY, b"<html>", "/api/tags");
        assert_eq!(err.status_code, 502);
        assert_eq!(err.status_text, "502 Bad Gateway");
        assert!(err.message.is_empty());
    }
}
