//! Conversation query engine.
//!
//! Turns caller selectors (channel name or ID, window spec or cursor, field
//! list) into paginated upstream reads and projects the result onto the
//! requested columns. Each derived column is computed only when requested.

use std::sync::Arc;

use chrono::{Local, SecondsFormat};
use parley_auth_bridge::router::next_cursor;
use parley_auth_bridge::{ApiMethod, ParleyError, Result, WorkspaceApi};
use parley_directory::{MetadataCache, UsersDirectory};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::QuerySettings;
use crate::fields::{Field, FieldSet};
use crate::render::{Table, NO_MORE_PAGES};
use crate::text::render_text;
use crate::window::{from_upstream_ts, WindowSpec};

/// Subtypes that are ordinary messages even though they carry a subtype.
const REGULAR_SUBTYPES: &[&str] = &["bot_message", "thread_broadcast", "me_message", "file_share"];

#[derive(Debug, Clone, Default)]
pub struct ConversationQuery {
    /// Channel ID, `#name` or `@handle` (direct message).
    pub channel: String,
    /// Window spec: a message count or a `d`/`w`/`m` span.
    pub window: Option<String>,
    /// Opaque upstream cursor from a previous page.
    pub cursor: Option<String>,
    /// Comma-separated field list, or `all`.
    pub fields: String,
    /// Keep join/leave and other activity notices.
    pub include_activity: bool,
}

enum Paging {
    Window(WindowSpec),
    Cursor(String),
}

struct Plan {
    fields: FieldSet,
    paging: Paging,
}

impl ConversationQuery {
    /// Validate everything that can be checked without the network.
    fn plan(&self) -> Result<Plan> {
        let window = self.window.as_deref().map(str::trim).filter(|w| !w.is_empty());
        let cursor = self.cursor.as_deref().map(str::trim).filter(|c| !c.is_empty());

        let paging = match (window, cursor) {
            (Some(_), Some(_)) => {
                return Err(ParleyError::validation(
                    "cursor,limit",
                    "`cursor` and `limit` are mutually exclusive; pass a cursor to continue or a window to start",
                ))
            }
            (Some(window), None) => Paging::Window(WindowSpec::parse(window)?),
            (None, Some(cursor)) => Paging::Cursor(cursor.to_string()),
            (None, None) => {
                return Err(ParleyError::validation(
                    "limit",
                    "either a window spec (e.g. 50, 7d) or a cursor is required",
                ))
            }
        };

        Ok(Plan {
            fields: FieldSet::parse(&self.fields)?,
            paging,
        })
    }
}

/// One projected message. Columns that were not requested stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: Option<String>,
    pub author_id: Option<String>,
    pub author_handle: Option<String>,
    pub author_display_name: Option<String>,
    pub channel_id: Option<String>,
    pub thread_root_id: Option<String>,
    pub text: Option<String>,
    pub occurred_at: Option<String>,
    pub reactions: Option<String>,
    pub next_cursor: Option<String>,
}

impl MessageRecord {
    pub fn cell(&self, field: Field) -> &str {
        let value = match field {
            Field::MsgId => &self.id,
            Field::UserId => &self.author_id,
            Field::UserName => &self.author_handle,
            Field::RealName => &self.author_display_name,
            Field::ChannelId => &self.channel_id,
            Field::ThreadTs => &self.thread_root_id,
            Field::Text => &self.text,
            Field::Time => &self.occurred_at,
            Field::Reactions => &self.reactions,
            Field::Cursor => &self.next_cursor,
        };
        value.as_deref().unwrap_or_default()
    }
}

/// One page of projected messages.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<MessageRecord>,
    pub fields: FieldSet,
    /// Continuation cursor; only exposed when the `cursor` field was requested.
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn to_table(&self) -> Table {
        let mut table = message_table(&self.records, &self.fields);
        table.meta("Returned in this page", self.records.len());
        if self.fields.contains(Field::Cursor) {
            table.meta("Next cursor", self.next_cursor.as_deref().unwrap_or(NO_MORE_PAGES));
        }
        table
    }

    pub fn render(&self) -> String {
        self.to_table().render()
    }
}

/// Table of records with columns in the field set's declared order.
pub fn message_table(records: &[MessageRecord], fields: &FieldSet) -> Table {
    let mut table = Table::new(fields.names());
    for record in records {
        table.push_row(
            fields
                .fields()
                .iter()
                .map(|f| record.cell(*f).to_string())
                .collect(),
        );
    }
    table
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawMessage {
    #[serde(default)]
    pub ts: String,
    pub user: Option<String>,
    pub username: Option<String>,
    pub bot_id: Option<String>,
    pub bot_profile: Option<BotProfile>,
    pub subtype: Option<String>,
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub blocks: Vec<Value>,
    #[serde(default)]
    pub reactions: Vec<RawReaction>,
    /// Search results carry their channel as an object; other payloads may
    /// carry a bare ID.
    pub channel: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BotProfile {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawReaction {
    pub name: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub users: Vec<String>,
}

impl RawMessage {
    fn is_activity(&self) -> bool {
        self.subtype
            .as_deref()
            .is_some_and(|s| !REGULAR_SUBTYPES.contains(&s))
    }

    fn channel_id(&self) -> Option<&str> {
        match self.channel.as_ref()? {
            Value::String(id) => Some(id),
            Value::Object(obj) => obj.get("id").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// `name:count:U1,U2`, joined with `|`, in upstream order.
pub fn format_reactions(reactions: &[RawReaction]) -> String {
    reactions
        .iter()
        .map(|r| format!("{}:{}:{}", r.name, r.count, r.users.join(",")))
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Debug, Deserialize)]
struct MessagesPage {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

pub struct QueryEngine {
    pub(crate) api: Arc<dyn WorkspaceApi>,
    pub(crate) cache: Arc<MetadataCache>,
    pub(crate) settings: QuerySettings,
}

impl QueryEngine {
    pub fn new(api: Arc<dyn WorkspaceApi>, cache: Arc<MetadataCache>, settings: QuerySettings) -> Self {
        Self {
            api,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Messages of one channel, newest first as upstream returns them.
    #[instrument(skip_all, fields(channel = %query.channel))]
    pub async fn history(&self, query: &ConversationQuery, cancel: &CancellationToken) -> Result<Page> {
        let plan = query.plan()?;
        let channel_id = self.cache.resolve_channel("channel_id", &query.channel).await?;

        let mut params = vec![("channel", channel_id.clone())];
        self.push_paging(&plan.paging, &mut params)?;

        let body = self.read(&ApiMethod::CONVERSATIONS_HISTORY, &params, cancel).await?;
        self.finish_page(body, &channel_id, plan.fields, query.include_activity)
            .await
    }

    /// Messages of one thread, root first.
    #[instrument(skip_all, fields(channel = %query.channel, thread_ts = %thread_ts))]
    pub async fn replies(
        &self,
        query: &ConversationQuery,
        thread_ts: &str,
        cancel: &CancellationToken,
    ) -> Result<Page> {
        let thread_ts = thread_ts.trim();
        if !is_message_ts(thread_ts) {
            return Err(ParleyError::validation(
                "thread_ts",
                format!("`{}` is not a message timestamp like 1700000000.000100", thread_ts),
            ));
        }
        let plan = query.plan()?;
        let channel_id = self.cache.resolve_channel("channel_id", &query.channel).await?;

        let mut params = vec![("channel", channel_id.clone()), ("ts", thread_ts.to_string())];
        self.push_paging(&plan.paging, &mut params)?;

        let body = self.read(&ApiMethod::CONVERSATIONS_REPLIES, &params, cancel).await?;
        self.finish_page(body, &channel_id, plan.fields, query.include_activity)
            .await
    }

    fn default_page_size(&self) -> u32 {
        self.settings.default_page_size.max(1)
    }

    fn push_paging(&self, paging: &Paging, params: &mut Vec<(&'static str, String)>) -> Result<()> {
        match paging {
            Paging::Window(spec) => {
                params.push((
                    "limit",
                    spec.page_size(self.default_page_size()).to_string(),
                ));
                if let Some(bounds) = spec.bounds(Local::now())? {
                    params.push(("oldest", bounds.oldest_ts()));
                    params.push(("latest", bounds.latest_ts()));
                    params.push(("inclusive", "true".to_string()));
                }
            }
            Paging::Cursor(cursor) => {
                params.push(("limit", self.default_page_size().to_string()));
                params.push(("cursor", cursor.clone()));
            }
        }
        Ok(())
    }

    async fn finish_page(
        &self,
        body: Value,
        channel_id: &str,
        fields: FieldSet,
        include_activity: bool,
    ) -> Result<Page> {
        let upstream_cursor = next_cursor(&body);
        let payload: MessagesPage = serde_json::from_value(body)?;
        debug!(
            "fetched {} messages (more pages: {})",
            payload.messages.len(),
            upstream_cursor.is_some()
        );

        let mut records = self
            .project(payload.messages, Some(channel_id), &fields, include_activity)
            .await;
        let next_cursor = if fields.contains(Field::Cursor) {
            if let Some(last) = records.last_mut() {
                last.next_cursor = upstream_cursor.clone();
            }
            upstream_cursor
        } else {
            None
        };
        Ok(Page {
            records,
            fields,
            next_cursor,
        })
    }

    /// Issue an idempotent read, retrying once on a retryable failure.
    pub(crate) async fn read(
        &self,
        method: &ApiMethod,
        params: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        match self.api.call(method, params, cancel).await {
            Err(err) if err.is_retryable() => {
                warn!("{} failed ({}); retrying once", method.name, err);
                self.api.call(method, params, cancel).await
            }
            other => other,
        }
    }

    /// Filter activity notices and compute the requested columns.
    pub(crate) async fn project(
        &self,
        messages: Vec<RawMessage>,
        channel_id: Option<&str>,
        fields: &FieldSet,
        include_activity: bool,
    ) -> Vec<MessageRecord> {
        let needs_users = fields.needs_author_names() || fields.contains(Field::Text);
        let users = if needs_users {
            let users = self.cache.ready_users().await;
            if users.is_none() && fields.needs_author_names() {
                warn!("users directory not ready; author names fall back to message metadata");
            }
            users
        } else {
            None
        };
        let fallback = UsersDirectory::default();
        let directory = users.as_deref().unwrap_or(&fallback);

        messages
            .into_iter()
            .filter(|m| include_activity || !m.is_activity())
            .map(|m| project_one(m, channel_id, fields, directory, users.is_some()))
            .collect()
    }
}

fn project_one(
    message: RawMessage,
    channel_id: Option<&str>,
    fields: &FieldSet,
    users: &UsersDirectory,
    users_ready: bool,
) -> MessageRecord {
    let mut record = MessageRecord::default();
    let author_id = message.user.clone().or_else(|| message.bot_id.clone());

    if fields.contains(Field::MsgId) {
        record.id = Some(message.ts.clone());
    }
    if fields.contains(Field::UserId) {
        record.author_id = author_id.clone();
    }
    if fields.needs_author_names() {
        let bot_name = message.bot_profile.as_ref().and_then(|b| b.name.as_deref());
        let (handle, display) =
            users.author_names(author_id.as_deref(), message.username.as_deref(), bot_name);
        if fields.contains(Field::UserName) {
            record.author_handle = Some(handle);
        }
        if fields.contains(Field::RealName) {
            record.author_display_name = Some(display);
        }
    }
    if fields.contains(Field::ChannelId) {
        record.channel_id = message
            .channel_id()
            .or(channel_id)
            .map(str::to_string);
    }
    if fields.contains(Field::ThreadTs) {
        record.thread_root_id = message.thread_ts.clone();
    }
    if fields.contains(Field::Text) {
        let directory = users_ready.then_some(users);
        record.text = Some(render_text(&message.text, &message.blocks, directory));
    }
    if fields.contains(Field::Time) {
        record.occurred_at = from_upstream_ts(&message.ts)
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    if fields.contains(Field::Reactions) {
        record.reactions = Some(format_reactions(&message.reactions));
    }
    record
}

fn is_message_ts(ts: &str) -> bool {
    match ts.split_once('.') {
        Some((secs, frac)) => {
            !secs.is_empty()
                && !frac.is_empty()
                && secs.bytes().all(|b| b.is_ascii_digit())
                && frac.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parley_auth_bridge::testing::ScriptedApi;
    use parley_directory::{Collection, SnapshotPaths};
    use serde_json::json;

    pub(crate) struct Fixture {
        pub api: Arc<ScriptedApi>,
        pub cache: Arc<MetadataCache>,
        pub engine: QueryEngine,
        _dir: tempfile::TempDir,
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::new());
        api.respond(
            &ApiMethod::USERS_LIST,
            json!({"ok": true, "members": [
                {"id": "U0123ABCD", "name": "alice", "profile": {"real_name": "Alice Liddell"}},
                {"id": "U0456ABCD", "name": "bob", "profile": {"real_name": "Bob Builder"}}
            ]}),
        )
        .respond(
            &ApiMethod::CONVERSATIONS_LIST,
            json!({"ok": true, "channels": [
                {"id": "C0123ABCD", "name": "general", "num_members": 40,
                 "topic": {"value": "Company-wide"}, "purpose": {"value": "Announcements"}},
                {"id": "C0456ABCD", "name": "random", "num_members": 12},
                {"id": "G0123ABCD", "name": "core-team", "is_private": true, "num_members": 5},
                {"id": "D0123ABCD", "is_im": true, "user": "U0456ABCD"}
            ]}),
        );
        let shared: Arc<dyn WorkspaceApi> = api.clone();
        let cache = Arc::new(MetadataCache::new(shared.clone(), SnapshotPaths::in_dir(dir.path())));
        let engine = QueryEngine::new(shared, cache.clone(), QuerySettings::default());
        Fixture {
            api,
            cache,
            engine,
            _dir: dir,
        }
    }

    impl Fixture {
        pub async fn warm(&self) {
            let cancel = CancellationToken::new();
            self.cache.refresh(Collection::Users, &cancel).await.unwrap();
            self.cache.refresh(Collection::Channels, &cancel).await.unwrap();
        }

        pub fn network_calls(&self) -> usize {
            self.api.calls()
        }

        /// An engine over the same api and cache with other settings.
        pub fn engine_with(&self, settings: QuerySettings) -> QueryEngine {
            let shared: Arc<dyn WorkspaceApi> = self.api.clone();
            QueryEngine::new(shared, self.cache.clone(), settings)
        }
    }

    fn query(channel: &str, window: Option<&str>, cursor: Option<&str>, fields: &str) -> ConversationQuery {
        ConversationQuery {
            channel: channel.to_string(),
            window: window.map(String::from),
            cursor: cursor.map(String::from),
            fields: fields.to_string(),
            include_activity: false,
        }
    }

    fn history_body() -> Value {
        json!({
            "ok": true,
            "messages": [
                {"ts": "1700000300.000300", "user": "U0123ABCD", "text": "shipping <@U0456ABCD>",
                 "reactions": [
                    {"name": "thumbsup", "count": 2, "users": ["U1", "U2"]},
                    {"name": "tada", "count": 1, "users": ["U3"]}
                 ]},
                {"ts": "1700000200.000200", "subtype": "channel_join", "user": "U0456ABCD",
                 "text": "<@U0456ABCD> has joined the channel"},
                {"ts": "1700000100.000100", "subtype": "bot_message", "bot_id": "B0123ABCD",
                 "username": "deploybot", "bot_profile": {"name": "Deploy Bot"}, "text": "deployed",
                 "thread_ts": "1700000100.000100"}
            ],
            "has_more": true,
            "response_metadata": {"next_cursor": "bmV4dA=="}
        })
    }

    #[tokio::test]
    async fn test_general_seven_days_three_columns() {
        let fx = fixture();
        fx.warm().await;
        fx.api.respond(&ApiMethod::CONVERSATIONS_HISTORY, history_body());

        let page = fx
            .engine
            .history(&query("#general", Some("7d"), None, "msgID,text,time"), &CancellationToken::new())
            .await
            .unwrap();
        let out = page.render();
        let lines: Vec<&str> = out.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(lines[0], "msgID,text,time");
        assert!(lines[1..].iter().all(|l| l.split(',').count() == 3));
        assert!(!out.contains("reactions"));
        assert!(!out.contains("userID"));
        assert!(!out.contains("Next cursor"));

        let history = &ApiMethod::CONVERSATIONS_HISTORY;
        assert_eq!(fx.api.last_param(history, "channel").as_deref(), Some("C0123ABCD"));
        assert_eq!(fx.api.last_param(history, "limit").as_deref(), Some("100"));
        let oldest: f64 = fx.api.last_param(history, "oldest").unwrap().parse().unwrap();
        let latest: f64 = fx.api.last_param(history, "latest").unwrap().parse().unwrap();
        assert!(oldest < latest);
        assert!(fx.api.last_param(history, "cursor").is_none());
    }

    #[tokio::test]
    async fn test_cursor_and_window_conflict_without_network() {
        let fx = fixture();
        let err = fx
            .engine
            .history(&query("#general", Some("3d"), Some("abc"), "msgID"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.subject().unwrap().contains("cursor"));
        assert!(err.subject().unwrap().contains("limit"));
        assert_eq!(fx.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_windows_fail_before_network() {
        let fx = fixture();
        for window in ["0d", "d", "5x", ""] {
            let err = fx
                .engine
                .history(&query("C0123ABCD", Some(window), None, "msgID"), &CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "validation", "{window}");
        }
        let err = fx
            .engine
            .history(&query("C0123ABCD", Some("1d"), None, "msgID,bogus"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.subject(), Some("fields"));
        assert_eq!(fx.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_name_selector_before_directory_ready() {
        let fx = fixture();
        let err = fx
            .engine
            .history(&query("#general", Some("1d"), None, "msgID"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_ready");
        assert_eq!(err.subject(), Some("channels"));
        assert_eq!(fx.api.calls_to(&ApiMethod::CONVERSATIONS_HISTORY), 0);
    }

    #[tokio::test]
    async fn test_activity_filtering_and_projection() {
        let fx = fixture();
        fx.warm().await;
        fx.api.respond(&ApiMethod::CONVERSATIONS_HISTORY, history_body());
        let cancel = CancellationToken::new();

        let mut q = query("C0123ABCD", Some("20"), None, "all");
        let page = fx.engine.history(&q, &cancel).await.unwrap();
        assert_eq!(fx.api.last_param(&ApiMethod::CONVERSATIONS_HISTORY, "limit").as_deref(), Some("20"));
        assert!(fx.api.last_param(&ApiMethod::CONVERSATIONS_HISTORY, "oldest").is_none());
        assert_eq!(page.records.len(), 2);

        let first = &page.records[0];
        assert_eq!(first.author_handle.as_deref(), Some("alice"));
        assert_eq!(first.author_display_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(first.text.as_deref(), Some("shipping @bob"));
        assert_eq!(first.reactions.as_deref(), Some("thumbsup:2:U1,U2|tada:1:U3"));
        assert_eq!(first.occurred_at.as_deref(), Some("2023-11-14T22:18:20Z"));
        assert_eq!(first.channel_id.as_deref(), Some("C0123ABCD"));
        assert!(first.next_cursor.is_none());

        let bot = &page.records[1];
        assert_eq!(bot.author_id.as_deref(), Some("B0123ABCD"));
        assert_eq!(bot.author_handle.as_deref(), Some("deploybot"));
        assert_eq!(bot.author_display_name.as_deref(), Some("Deploy Bot"));
        assert_eq!(bot.thread_root_id.as_deref(), Some("1700000100.000100"));
        assert_eq!(bot.next_cursor.as_deref(), Some("bmV4dA=="));
        assert_eq!(page.next_cursor.as_deref(), Some("bmV4dA=="));

        q.include_activity = true;
        let page = fx.engine.history(&q, &cancel).await.unwrap();
        assert_eq!(page.records.len(), 3);
    }

    #[tokio::test]
    async fn test_cursor_column_and_metadata() {
        let fx = fixture();
        fx.api.respond(&ApiMethod::CONVERSATIONS_HISTORY, history_body());

        let page = fx
            .engine
            .history(&query("C0123ABCD", None, Some("bmV4dA=="), "msgID,cursor"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            fx.api.last_param(&ApiMethod::CONVERSATIONS_HISTORY, "cursor").as_deref(),
            Some("bmV4dA==")
        );
        let out = page.render();
        assert!(out.starts_with("# Returned in this page: 2\n# Next cursor: bmV4dA==\nmsgID,cursor\n"));
        assert!(out.contains("1700000300.000300,\n"));
        assert!(out.ends_with("1700000100.000100,bmV4dA==\n"));
    }

    #[tokio::test]
    async fn test_exhausted_pages_render_none() {
        let fx = fixture();
        fx.api.respond(
            &ApiMethod::CONVERSATIONS_HISTORY,
            json!({"ok": true, "messages": [], "has_more": false}),
        );
        let page = fx
            .engine
            .history(&query("C0123ABCD", Some("1d"), None, "msgID,cursor"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.render(), "# Returned in this page: 0\n# Next cursor: none\nmsgID,cursor\n");
    }

    #[tokio::test]
    async fn test_zero_default_page_size_still_requests_one() {
        let fx = fixture();
        fx.api.respond(
            &ApiMethod::CONVERSATIONS_HISTORY,
            json!({"ok": true, "messages": [], "has_more": false}),
        );
        let engine = fx.engine_with(QuerySettings {
            default_page_size: 0,
            ..QuerySettings::default()
        });
        engine
            .history(&query("C0123ABCD", Some("1d"), None, "msgID"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            fx.api.last_param(&ApiMethod::CONVERSATIONS_HISTORY, "limit").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_author_names_degrade_when_users_not_ready() {
        let fx = fixture();
        fx.api.respond(&ApiMethod::CONVERSATIONS_HISTORY, history_body());
        let page = fx
            .engine
            .history(&query("C0123ABCD", Some("5"), None, "userName,text"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.records[0].author_handle.as_deref(), Some("U0123ABCD"));
        assert_eq!(page.records[0].text.as_deref(), Some("shipping @U0456ABCD"));
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried_once() {
        let fx = fixture();
        let upstream = |retryable| ParleyError::Upstream {
            method: "conversations.history".to_string(),
            code: (if retryable { "internal_error" } else { "channel_not_found" }).to_string(),
            retryable,
        };
        fx.api
            .fail_once(&ApiMethod::CONVERSATIONS_HISTORY, upstream(true))
            .respond(&ApiMethod::CONVERSATIONS_HISTORY, history_body());
        let q = query("C0123ABCD", Some("5"), None, "msgID");
        fx.engine.history(&q, &CancellationToken::new()).await.unwrap();
        assert_eq!(fx.api.calls_to(&ApiMethod::CONVERSATIONS_HISTORY), 2);

        fx.api.fail_once(&ApiMethod::CONVERSATIONS_HISTORY, upstream(false));
        let err = fx.engine.history(&q, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "upstream");
        assert_eq!(fx.api.calls_to(&ApiMethod::CONVERSATIONS_HISTORY), 3);
    }

    #[tokio::test]
    async fn test_replies_pass_thread_ts() {
        let fx = fixture();
        fx.warm().await;
        fx.api.respond(
            &ApiMethod::CONVERSATIONS_REPLIES,
            json!({"ok": true, "messages": [
                {"ts": "1700000100.000100", "thread_ts": "1700000100.000100", "user": "U0123ABCD", "text": "root"},
                {"ts": "1700000150.000100", "thread_ts": "1700000100.000100", "user": "U0456ABCD", "text": "reply"}
            ]}),
        );
        let page = fx
            .engine
            .replies(
                &query("@bob", Some("1w"), None, "msgID,userName,text"),
                "1700000100.000100",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let replies = &ApiMethod::CONVERSATIONS_REPLIES;
        assert_eq!(fx.api.last_param(replies, "channel").as_deref(), Some("D0123ABCD"));
        assert_eq!(fx.api.last_param(replies, "ts").as_deref(), Some("1700000100.000100"));
        assert_eq!(page.records[0].text.as_deref(), Some("root"));
        assert_eq!(page.records[1].author_handle.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_replies_reject_malformed_thread_ts() {
        let fx = fixture();
        let err = fx
            .engine
            .replies(&query("C0123ABCD", Some("1d"), None, "msgID"), "yesterday", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.subject(), Some("thread_ts"));
        assert_eq!(fx.network_calls(), 0);
    }

    #[test]
    fn test_reaction_format() {
        let reactions = vec![
            RawReaction {
                name: "thumbsup".to_string(),
                count: 2,
                users: vec!["U1".to_string(), "U2".to_string()],
            },
            RawReaction {
                name: "tada".to_string(),
                count: 1,
                users: vec!["U3".to_string()],
            },
        ];
        assert_eq!(format_reactions(&reactions), "thumbsup:2:U1,U2|tada:1:U3");
        assert_eq!(format_reactions(&[]), "");
    }
}
