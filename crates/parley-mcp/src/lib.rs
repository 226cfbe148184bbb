use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use parley_core::{ParleyError, ParleyResult, QueryEngine};

pub mod params;

use params::{parse, ChannelsParams, HistoryParams, RepliesParams, SearchParams};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tools served by [`McpHandler`].
pub const TOOLS: &[&str] = &[
    "conversations_history",
    "conversations_replies",
    "conversations_search_messages",
    "channels_list",
    "workspace_info",
    "directory_status",
    "ping",
];

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_field: Option<String>,
}

impl ToolResponse {
    pub fn success(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
            error_kind: None,
            error_field: None,
        }
    }

    pub fn failure(id: Option<String>, err: &ParleyError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            error_field: err.subject().map(str::to_string),
        }
    }

    /// A line that could not be parsed as a request at all.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            id: None,
            ok: false,
            result: None,
            error: Some(message.into()),
            error_kind: Some("invalid_request".to_string()),
            error_field: None,
        }
    }
}

/// Dispatches tool requests onto the engine. Every request runs under its
/// own cancellation token, a child of the handler's root token.
pub struct McpHandler {
    engine: Arc<QueryEngine>,
    root: CancellationToken,
    timeout: Duration,
}

impl McpHandler {
    pub fn new(engine: Arc<QueryEngine>, root: CancellationToken) -> Self {
        Self {
            engine,
            root,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(skip_all, fields(id = ?request.id))]
    pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
        let tool = request.tool.clone().or(request.method.clone());
        let id = request.id.clone();
        let Some(tool) = tool else {
            return ToolResponse::malformed("request names no tool");
        };
        debug!("tool call: {}", tool);

        let cancel = self.root.child_token();
        let outcome = self.with_deadline(&cancel, self.dispatch(&tool, request.params, &cancel)).await;
        match outcome {
            Ok(result) => ToolResponse::success(id, result),
            Err(err) => {
                if matches!(err, ParleyError::Auth { .. } | ParleyError::Configuration(_)) {
                    warn!("{} failed: {}", tool, err);
                } else {
                    info!("{} failed: {}", tool, err);
                }
                ToolResponse::failure(id, &err)
            }
        }
    }

    async fn with_deadline<F>(&self, cancel: &CancellationToken, work: F) -> ParleyResult<Value>
    where
        F: Future<Output = ParleyResult<Value>>,
    {
        match tokio::time::timeout(self.timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                warn!("tool call timed out after {}s", self.timeout.as_secs());
                Err(ParleyError::Cancelled)
            }
        }
    }

    async fn dispatch(&self, tool: &str, params: Value, cancel: &CancellationToken) -> ParleyResult<Value> {
        let rendered = match tool {
            "ping" => return Ok(serde_json::json!({"pong": true, "tools": TOOLS})),
            "conversations_history" => {
                let query = parse::<HistoryParams>(params)?.into_query();
                self.engine.history(&query, cancel).await?.render()
            }
            "conversations_replies" => {
                let params = parse::<RepliesParams>(params)?;
                let thread_ts = params.thread_ts;
                let query = params.history.into_query();
                self.engine.replies(&query, &thread_ts, cancel).await?.render()
            }
            "conversations_search_messages" => {
                let query = parse::<SearchParams>(params)?.into_query()?;
                self.engine.search(&query, cancel).await?.render()
            }
            "channels_list" => {
                let query = parse::<ChannelsParams>(params)?.into_query()?;
                self.engine.channels_list(&query).await?.render()
            }
            "workspace_info" => self.engine.workspace_info(cancel).await?.render(),
            "directory_status" => self.engine.directory_status().await.render(),
            other => {
                return Err(ParleyError::validation(
                    "tool",
                    format!("unknown tool `{}`", other),
                ))
            }
        };
        Ok(Value::String(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_auth_bridge::testing::ScriptedApi;
    use parley_auth_bridge::{ApiMethod, WorkspaceApi};
    use parley_core::QuerySettings;
    use parley_directory::{Collection, MetadataCache, SnapshotPaths};
    use serde_json::json;

    struct Harness {
        api: Arc<ScriptedApi>,
        cache: Arc<MetadataCache>,
        handler: McpHandler,
        root: CancellationToken,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        api.respond(
            &ApiMethod::CONVERSATIONS_LIST,
            json!({"ok": true, "channels": [
                {"id": "C0123ABCD", "name": "general", "num_members": 40}
            ]}),
        )
        .respond(&ApiMethod::USERS_LIST, json!({"ok": true, "members": []}))
        .respond(
            &ApiMethod::CONVERSATIONS_HISTORY,
            json!({"ok": true, "messages": [
                {"ts": "1700000000.000100", "user": "U0123ABCD", "text": "hello"}
            ], "has_more": false}),
        );
        let shared: Arc<dyn WorkspaceApi> = api.clone();
        let cache = Arc::new(MetadataCache::new(shared.clone(), SnapshotPaths::in_dir(dir.path())));
        let engine = Arc::new(QueryEngine::new(shared, cache.clone(), QuerySettings::default()));
        let root = CancellationToken::new();
        Harness {
            api,
            cache,
            handler: McpHandler::new(engine, root.clone()),
            root,
            _dir: dir,
        }
    }

    fn request(tool: &str, params: Value) -> ToolRequest {
        ToolRequest {
            id: Some("1".to_string()),
            tool: Some(tool.to_string()),
            method: None,
            params,
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let h = harness();
        let response = h.handler.handle(request("ping", Value::Null)).await;
        assert!(response.ok);
        assert_eq!(response.result.unwrap()["pong"], json!(true));
        assert_eq!(h.api.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let h = harness();
        let response = h.handler.handle(request("post_message", json!({}))).await;
        assert!(!response.ok);
        assert_eq!(response.error_kind.as_deref(), Some("validation"));
        assert_eq!(response.error_field.as_deref(), Some("tool"));
    }

    #[tokio::test]
    async fn test_method_alias_and_missing_tool() {
        let h = harness();
        let aliased = ToolRequest {
            id: None,
            tool: None,
            method: Some("ping".to_string()),
            params: Value::Null,
        };
        assert!(h.handler.handle(aliased).await.ok);

        let empty = ToolRequest {
            id: None,
            tool: None,
            method: None,
            params: Value::Null,
        };
        let response = h.handler.handle(empty).await;
        assert_eq!(response.error_kind.as_deref(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn test_history_by_id_with_default_window() {
        let h = harness();
        let response = h
            .handler
            .handle(request("conversations_history", json!({"channel_id": "C0123ABCD", "fields": "msgID,text"})))
            .await;
        assert!(response.ok, "{:?}", response.error);
        let csv = response.result.unwrap();
        assert_eq!(
            csv.as_str().unwrap(),
            "# Returned in this page: 1\nmsgID,text\n1700000000.000100,hello\n"
        );
        assert!(h.api.last_param(&ApiMethod::CONVERSATIONS_HISTORY, "oldest").is_some());
    }

    #[tokio::test]
    async fn test_history_conflicting_inputs_make_no_calls() {
        let h = harness();
        let response = h
            .handler
            .handle(request(
                "conversations_history",
                json!({"channel_id": "C0123ABCD", "limit": "7d", "cursor": "bmV4dA=="}),
            ))
            .await;
        assert!(!response.ok);
        assert_eq!(response.error_kind.as_deref(), Some("validation"));
        assert_eq!(response.error_field.as_deref(), Some("cursor,limit"));
        assert_eq!(h.api.calls(), 0);
    }

    #[tokio::test]
    async fn test_channel_name_before_directory_is_ready() {
        let h = harness();
        let response = h
            .handler
            .handle(request("conversations_history", json!({"channel_id": "#general"})))
            .await;
        assert_eq!(response.error_kind.as_deref(), Some("not_ready"));
        assert_eq!(response.error_field.as_deref(), Some("channels"));

        h.cache
            .refresh(Collection::Channels, &CancellationToken::new())
            .await
            .unwrap();
        let response = h
            .handler
            .handle(request("conversations_history", json!({"channel_id": "#general", "limit": 10})))
            .await;
        assert!(response.ok, "{:?}", response.error);
        assert_eq!(
            h.api.last_param(&ApiMethod::CONVERSATIONS_HISTORY, "channel").as_deref(),
            Some("C0123ABCD")
        );
        assert_eq!(
            h.api.last_param(&ApiMethod::CONVERSATIONS_HISTORY, "limit").as_deref(),
            Some("10")
        );
    }

    #[tokio::test]
    async fn test_replies_requires_thread_ts() {
        let h = harness();
        let response = h
            .handler
            .handle(request("conversations_replies", json!({"channel_id": "C0123ABCD"})))
            .await;
        assert_eq!(response.error_field.as_deref(), Some("params"));
        assert_eq!(h.api.calls(), 0);
    }

    #[tokio::test]
    async fn test_directory_status_tool() {
        let h = harness();
        let response = h.handler.handle(request("directory_status", json!({}))).await;
        let csv = response.result.unwrap();
        assert!(csv
            .as_str()
            .unwrap()
            .starts_with("collection,ready,stale,source,entries,loadedAt,lastError\nusers,false,"));
    }

    #[tokio::test]
    async fn test_root_cancellation_reaches_requests() {
        let h = harness();
        h.root.cancel();
        let response = h
            .handler
            .handle(request("conversations_history", json!({"channel_id": "C0123ABCD"})))
            .await;
        assert_eq!(response.error_kind.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_failure_envelope_serialization() {
        let err = ParleyError::validation("limit", "bad window");
        let value = serde_json::to_value(ToolResponse::failure(Some("7".to_string()), &err)).unwrap();
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error_kind"], json!("validation"));
        assert_eq!(value["error_field"], json!("limit"));
        assert!(value.get("result").is_none());
    }
}
