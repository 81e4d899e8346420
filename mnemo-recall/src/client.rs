//! Typed client for the SiYuan note-store HTTP API.
//!
//! Every call POSTs JSON and receives the `{code, msg, data}` envelope; a
//! non-zero code becomes `RecallError::Remote`. Response `data` shapes vary
//! across store versions, so the write-side id payload goes through a
//! normalizer before anything downstream sees it.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use mnemo_core::SiyuanSettings;

use crate::errors::{RecallError, RecallResult};
use crate::models::{HealthStatus, Notebook, RemoteBlock};

/// SiYuan API client.
#[derive(Debug, Clone)]
pub struct SiyuanClient {
    http_client: reqwest::Client,
    base_url: String,
}

/// Envelope wrapping every note-store response.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

/// Block metadata from `getBlockInfo`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    #[serde(default, alias = "hPath", alias = "h_path")]
    pub hpath: Option<String>,
    #[serde(default, alias = "updated_at")]
    pub updated: Option<String>,
    #[serde(default, alias = "rootID")]
    pub root_id: Option<String>,
    #[serde(default, alias = "rootTitle")]
    pub root_title: Option<String>,
    #[serde(default, alias = "box")]
    pub notebook_id: Option<String>,
}

/// Kramdown source of a block.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockKramdown {
    pub id: String,
    #[serde(default)]
    pub kramdown: String,
}

/// The id-bearing payload returned by write endpoints, in every spelling the
/// store has used: an object, an array of objects, an `{ids: […]}` bag, or a
/// bare id string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdPayload {
    Bare(String),
    Ids { ids: Vec<String> },
    Obj { id: String },
    List(Vec<IdPayload>),
}

/// A created/updated block id, normalized from `IdPayload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedId {
    pub id: String,
}

pub(crate) fn normalize_id(data: Value) -> RecallResult<CreatedId> {
    let payload: IdPayload = serde_json::from_value(data.clone())
        .map_err(|_| RecallError::Protocol(format!("unrecognized id payload: {data}")))?;
    flatten_id(payload)
        .map(|id| CreatedId { id })
        .ok_or_else(|| RecallError::Protocol(format!("empty id payload: {data}")))
}

fn flatten_id(payload: IdPayload) -> Option<String> {
    match payload {
        IdPayload::Bare(id) => (!id.is_empty()).then_some(id),
        IdPayload::Ids { ids } => ids.into_iter().find(|id| !id.is_empty()),
        IdPayload::Obj { id } => (!id.is_empty()).then_some(id),
        IdPayload::List(items) => items.into_iter().find_map(flatten_id),
    }
}

impl SiyuanClient {
    pub fn new(settings: &SiyuanSettings) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !settings.api_token.is_empty() {
            let value = format!("Token {}", settings.api_token);
            if let Ok(header) = HeaderValue::from_str(&value) {
                headers.insert(AUTHORIZATION, header);
            }
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http_client,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> RecallResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(path, "note store call");

        let response = self.http_client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RecallError::Protocol(format!("HTTP {status} from {path}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| RecallError::Protocol(format!("invalid envelope from {path}: {e}")))?;

        if envelope.code != 0 {
            return Err(RecallError::Remote {
                code: envelope.code,
                msg: envelope.msg,
            });
        }

        Ok(envelope.data)
    }

    /// Probe the store; maps every failure into `available = false`.
    pub async fn health_check(&self) -> HealthStatus {
        match self.post("/api/system/version", json!({})).await {
            Ok(data) => {
                let version = match data {
                    Value::String(v) => Some(v),
                    Value::Object(map) => map
                        .get("version")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                };
                HealthStatus {
                    available: true,
                    version,
                    error: None,
                }
            }
            Err(err) => HealthStatus {
                available: false,
                version: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Forward a read-only SQL statement.
    pub async fn sql(&self, stmt: &str) -> RecallResult<Vec<Value>> {
        let data = self.post("/api/query/sql", json!({"stmt": stmt})).await?;
        match data {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(RecallError::Protocol(format!(
                "sql returned non-array data: {other}"
            ))),
        }
    }

    /// Remote full-text search; returns `data.blocks`.
    pub async fn search_full_text(
        &self,
        query: &str,
        page: usize,
        size: usize,
        sort: Option<i64>,
        method: Option<i64>,
    ) -> RecallResult<Vec<RemoteBlock>> {
        let mut body = json!({"query": query, "page": page, "size": size});
        if let Some(sort) = sort {
            body["sort"] = json!(sort);
        }
        if let Some(method) = method {
            body["method"] = json!(method);
        }

        let data = self.post("/api/search/fullTextSearchBlock", body).await?;
        let blocks = data
            .get("blocks")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        match blocks {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(RecallError::Protocol(format!(
                "fullTextSearchBlock returned non-array blocks: {other}"
            ))),
        }
    }

    pub async fn get_block_info(&self, id: &str) -> RecallResult<BlockInfo> {
        let data = self.post("/api/block/getBlockInfo", json!({"id": id})).await?;
        if data.is_null() {
            return Err(RecallError::NotFound(id.to_string()));
        }
        Ok(serde_json::from_value(data)?)
    }

    pub async fn get_block_kramdown(&self, id: &str) -> RecallResult<BlockKramdown> {
        let data = self
            .post("/api/block/getBlockKramdown", json!({"id": id}))
            .await?;
        if data.is_null() {
            return Err(RecallError::NotFound(id.to_string()));
        }
        Ok(serde_json::from_value(data)?)
    }

    pub async fn ls_notebooks(&self) -> RecallResult<Vec<Notebook>> {
        let data = self.post("/api/notebook/lsNotebooks", json!({})).await?;
        let notebooks = data
            .get("notebooks")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(notebooks)?)
    }

    // Write-side endpoints. The recall core never calls these; they exist for
    // the conversation writer that shares this client.

    pub async fn append_block(&self, parent_id: &str, markdown: &str) -> RecallResult<CreatedId> {
        let data = self
            .post(
                "/api/block/appendBlock",
                json!({"dataType": "markdown", "parentID": parent_id, "data": markdown}),
            )
            .await?;
        normalize_id(data)
    }

    pub async fn update_block(&self, id: &str, markdown: &str) -> RecallResult<CreatedId> {
        let data = self
            .post(
                "/api/block/updateBlock",
                json!({"dataType": "markdown", "id": id, "data": markdown}),
            )
            .await?;
        normalize_id(data)
    }

    pub async fn create_doc_with_markdown(
        &self,
        notebook: &str,
        path: &str,
        markdown: &str,
    ) -> RecallResult<CreatedId> {
        let data = self
            .post(
                "/api/filetree/createDocWithMd",
                json!({"notebook": notebook, "path": path, "markdown": markdown}),
            )
            .await?;
        normalize_id(data)
    }

    pub async fn set_block_attrs(&self, id: &str, attrs: &Value) -> RecallResult<()> {
        self.post(
            "/api/attr/setBlockAttrs",
            json!({"id": id, "attrs": attrs}),
        )
        .await?;
        Ok(())
    }

    pub async fn get_doc_by_path(&self, notebook: &str, path: &str) -> RecallResult<Value> {
        self.post(
            "/api/filetree/getDocByPath",
            json!({"notebook": notebook, "path": path}),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_id_string() {
        let id = normalize_id(json!("20240101120000-abcdefg")).unwrap();
        assert_eq!(id.id, "20240101120000-abcdefg");
    }

    #[test]
    fn normalizes_object() {
        let id = normalize_id(json!({"id": "x1"})).unwrap();
        assert_eq!(id.id, "x1");
    }

    #[test]
    fn normalizes_ids_bag() {
        let id = normalize_id(json!({"ids": ["x1", "x2"]})).unwrap();
        assert_eq!(id.id, "x1");
    }

    #[test]
    fn normalizes_array_of_objects() {
        let id = normalize_id(json!([{"id": "x1"}, {"id": "x2"}])).unwrap();
        assert_eq!(id.id, "x1");
    }

    #[test]
    fn nested_operation_lists_flatten() {
        let id = normalize_id(json!([[{"id": "x9"}]])).unwrap();
        assert_eq!(id.id, "x9");
    }

    #[test]
    fn unknown_shape_is_a_protocol_error() {
        let err = normalize_id(json!({"something": 1})).unwrap_err();
        assert!(matches!(err, RecallError::Protocol(_)));

        let err = normalize_id(json!(42)).unwrap_err();
        assert!(matches!(err, RecallError::Protocol(_)));
    }

    #[test]
    fn empty_ids_bag_is_a_protocol_error() {
        let err = normalize_id(json!({"ids": []})).unwrap_err();
        assert!(matches!(err, RecallError::Protocol(_)));
    }
}
