use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionResponse {
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagModel {
    pub name: String,
    pub digest: String,
    pub size: i64,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PsResponse {
    #[serde(default)]
    pub models: Vec<PsModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsModel {
    pub name: String,
    pub model: String,
    pub digest: String,
    pub size: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

impl GenerateRequest {
    /// A streaming generate request.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: true,
        }
    }
}

/// One line of a `/api/generate` stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerateChunk {
    pub response: String,
    pub done: bool,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullRequest<'a> {
    pub name: &'a str,
    pub stream: bool,
}

/// One line of a `/api/pull` stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullChunk {
    pub status: String,
    pub digest: String,
    pub total: i64,
    pub completed: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyRequest<'a> {
    pub source: &'a str,
    pub destination: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_model_with_timestamp() {
        let json = r#"{"name":"llama3:8b","digest":"abc","size":42,"modified_at":"2026-01-01T00:00:00Z"}"#;
        let model: TagModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.name, "llama3:8b");
        assert_eq!(model.size, 42);
        assert_eq!(
            model.modified_at.unwrap().to_rfc3339(),
            "2026-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_ps_model_missing_fields_default() {
        let json = r#"{"name":"llama3:8b","model":"llama3:8b","size":1234}"#;
        let model: PsModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.size, 1234);
        assert!(model.expires_at.is_none());
        assert!(model.details.is_null());
    }

    #[test]
    fn test_generate_request_serializes_stream_flag() {
        let req = GenerateRequest::new("llama3", "hi");
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"model": "llama3", "prompt": "hi", "stream": true})
        );
    }

    #[test]
    fn test_pull_chunk_partial_fields() {
        let chunk: PullChunk = serde_json::from_str(r#"{"status":"done"}"#).unwrap();
        assert_eq!(chunk.status, "done");
        assert_eq!(chunk.total, 0);
        assert!(chunk.error.is_empty());
    }
}
