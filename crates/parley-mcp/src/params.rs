//! Tool parameter shapes and their conversion into engine queries.

use parley_core::{
    ChannelListQuery, ChannelSort, ConversationQuery, ParleyError, ParleyResult, SearchFilters,
    SearchQuery, SortMode, DEFAULT_FIELDS,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Window applied when a history call names neither a window nor a cursor.
pub const DEFAULT_WINDOW: &str = "1d";

/// `limit` accepts `"50"`, `50` or `"7d"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LimitParam {
    Number(u64),
    Text(String),
}

impl LimitParam {
    fn into_window(self) -> String {
        match self {
            LimitParam::Number(n) => n.to_string(),
            LimitParam::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub channel_id: String,
    #[serde(default)]
    pub limit: Option<LimitParam>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub fields: Option<String>,
    #[serde(default)]
    pub include_activity_messages: bool,
}

impl HistoryParams {
    pub fn into_query(self) -> ConversationQuery {
        let cursor = self.cursor.filter(|c| !c.trim().is_empty());
        let window = match (self.limit, &cursor) {
            (Some(limit), _) => Some(limit.into_window()),
            (None, None) => Some(DEFAULT_WINDOW.to_string()),
            (None, Some(_)) => None,
        };
        ConversationQuery {
            channel: self.channel_id,
            window,
            cursor,
            fields: fields_or_default(self.fields),
            include_activity: self.include_activity_messages,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RepliesParams {
    #[serde(flatten)]
    pub history: HistoryParams,
    pub thread_ts: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub filter_in_channel: Option<String>,
    #[serde(default)]
    pub filter_users_from: Option<String>,
    #[serde(default)]
    pub filter_users_with: Option<String>,
    #[serde(default)]
    pub filter_date_before: Option<String>,
    #[serde(default)]
    pub filter_date_after: Option<String>,
    #[serde(default)]
    pub filter_date_on: Option<String>,
    #[serde(default)]
    pub filter_date_during: Option<String>,
    #[serde(default)]
    pub filter_threads_only: bool,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub fields: Option<String>,
}

impl SearchParams {
    pub fn into_query(self) -> ParleyResult<SearchQuery> {
        let sort = match self.sort.as_deref() {
            Some(raw) => SortMode::parse(raw)?,
            None => SortMode::default(),
        };
        Ok(SearchQuery {
            query: self.search_query,
            filters: SearchFilters {
                in_channel: non_empty(self.filter_in_channel),
                from_user: non_empty(self.filter_users_from),
                with_user: non_empty(self.filter_users_with),
                before: non_empty(self.filter_date_before),
                after: non_empty(self.filter_date_after),
                on: non_empty(self.filter_date_on),
                during: non_empty(self.filter_date_during),
                threads_only: self.filter_threads_only,
            },
            sort,
            cursor: non_empty(self.cursor),
            limit: self.limit,
            fields: fields_or_default(self.fields),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelsParams {
    #[serde(default)]
    pub channel_types: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
}

impl ChannelsParams {
    pub fn into_query(self) -> ParleyResult<ChannelListQuery> {
        Ok(ChannelListQuery {
            kinds: match self.channel_types.as_deref() {
                Some(raw) => ChannelListQuery::parse_kinds(raw)?,
                None => Vec::new(),
            },
            sort: match self.sort.as_deref() {
                Some(raw) => ChannelSort::parse(raw)?,
                None => ChannelSort::default(),
            },
            limit: self.limit,
            cursor: non_empty(self.cursor),
        })
    }
}

/// Deserialize tool params; `null` counts as an empty object.
pub fn parse<T: DeserializeOwned>(params: Value) -> ParleyResult<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|err| ParleyError::validation("params", err.to_string()))
}

fn fields_or_default(fields: Option<String>) -> String {
    non_empty(fields).unwrap_or_else(|| DEFAULT_FIELDS.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
