use reqwest::Url;
use std::fmt;
use std::str::FromStr;

use super::error::{Error, Result};

/// A validated backend endpoint: absolute http(s) URL with a host and no
/// user-info, query, fragment or path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrl(Url);

impl BaseUrl {
    pub fn parse(host: &str) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::validation("empty host"));
        }
        let url = Url::parse(host)
            .map_err(|e| Error::validation(format!("invalid host {:?}: {}", host, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::validation(format!(
                "invalid host scheme: {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::validation("invalid host: missing host"));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(Error::validation("invalid host: userinfo not allowed"));
        }
        if url.fragment().is_some_and(|f| !f.is_empty()) {
            return Err(Error::validation("invalid host: fragment not allowed"));
        }
        if url.query().is_some_and(|q| !q.is_empty()) {
            return Err(Error::validation("invalid host: query not allowed"));
        }
        if !url.path().is_empty() && url.path() != "/" {
            return Err(Error::validation("invalid host: path not allowed"));
        }

        let mut url = url;
        url.set_query(None);
        url.set_fragment(None);
        url.set_path("");
        Ok(Self(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Lower-cased host name, without port.
    pub fn host(&self) -> Option<String> {
        self.0.host_str().map(|h| h.to_ascii_lowercase())
    }

    /// Absolute URL of an API path such as `/api/tags`.
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.0.clone();
        url.set_path(path);
        url
    }
}

impl FromStr for BaseUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str().trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_plain_http_host() {
        let base = BaseUrl::parse("http://127.0.0.1:11434").unwrap();
        assert_eq!(base.host().as_deref(), Some("127.0.0.1"));
        assert_eq!(base.to_string(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_parse_accepts_root_path_and_whitespace() {
        let base = BaseUrl::parse("  https://Example.com/  ").unwrap();
        assert_eq!(base.host().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_parse_rejects_missing_scheme() {
        let err = BaseUrl::parse("127.0.0.1:11434").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_parse_rejects_non_root_path() {
        let err = BaseUrl::parse("https://example.com/path").unwrap_err();
        assert!(err.to_string().contains("path not allowed"));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(BaseUrl::parse("ftp://example.com").is_err());
        assert!(BaseUrl::parse("localhost:11434").is_err());
    }

    #[test]
    fn test_parse_rejects_userinfo_query_fragment() {
        assert!(BaseUrl::parse("http://user:pw@example.com").is_err());
        assert!(BaseUrl::parse("http://example.com/?a=1").is_err());
        assert!(BaseUrl::parse("http://example.com/#frag").is_err());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(BaseUrl::parse("   ").is_err());
    }

    #[test]
    fn test_endpoint_joins_api_path() {
        let base: BaseUrl = "http://localhost:11434".parse().unwrap();
        assert_eq!(
            base.endpoint("/api/tags").as_str(),
            "http://localhost:11434/api/tags"
        );
    }
}
