//! Message search: free text plus filters compiled to upstream modifiers.

use chrono::{Datelike, Days, Local, NaiveDate};
use parley_auth_bridge::{ApiMethod, ParleyError, Result};
use parley_directory::looks_like_channel_id;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cursor::{decode_page, encode_page};
use crate::engine::{Page, QueryEngine, RawMessage};
use crate::fields::{Field, FieldSet};
use crate::render::{Table, NO_MORE_PAGES};

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    Relevance,
    Newest,
    Oldest,
}

impl SortMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "relevance" | "score" => Ok(SortMode::Relevance),
            "newest" | "newest_first" | "desc" => Ok(SortMode::Newest),
            "oldest" | "oldest_first" | "asc" => Ok(SortMode::Oldest),
            other => Err(ParleyError::validation(
                "sort",
                format!("unknown sort `{}`; expected relevance, newest or oldest", other),
            )),
        }
    }

    fn params(&self) -> [(&'static str, String); 2] {
        match self {
            SortMode::Relevance => [("sort", "score".to_string()), ("sort_dir", "desc".to_string())],
            SortMode::Newest => [("sort", "timestamp".to_string()), ("sort_dir", "desc".to_string())],
            SortMode::Oldest => [("sort", "timestamp".to_string()), ("sort_dir", "asc".to_string())],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Channel ID, `#name` or `@handle`.
    pub in_channel: Option<String>,
    /// Author: user ID or `@handle`.
    pub from_user: Option<String>,
    /// Conversations with this user: user ID or `@handle`.
    pub with_user: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub on: Option<String>,
    /// A date, `YYYY-MM`, `YYYY` or a month name.
    pub during: Option<String>,
    pub threads_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub filters: SearchFilters,
    pub sort: SortMode,
    /// Cursor from a previous search page.
    pub cursor: Option<String>,
    /// Results per page.
    pub limit: Option<u32>,
    pub fields: String,
}

/// A search result page with its position in the whole result set.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub page: Page,
    pub total: u64,
    pub pages: u32,
    pub page_number: u32,
    pub first: u64,
    pub last: u64,
}

impl SearchPage {
    pub fn to_table(&self) -> Table {
        let mut table = crate::engine::message_table(&self.page.records, &self.page.fields);
        table
            .meta("Total", self.total)
            .meta("Pages", self.pages)
            .meta("Page", self.page_number)
            .meta("Items", format!("{}-{}", self.first, self.last))
            .meta("Returned in this page", self.page.records.len());
        if self.page.fields.contains(Field::Cursor) {
            table.meta(
                "Next cursor",
                self.page.next_cursor.as_deref().unwrap_or(NO_MORE_PAGES),
            );
        }
        table
    }

    pub fn render(&self) -> String {
        self.to_table().render()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    messages: SearchMessages,
}

#[derive(Debug, Default, Deserialize)]
struct SearchMessages {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    matches: Vec<RawMessage>,
    pagination: Option<Pagination>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total_count: Option<u64>,
    page: Option<u32>,
    page_count: Option<u32>,
    first: Option<u64>,
    last: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    pages: Option<u32>,
}

impl QueryEngine {
    #[instrument(skip_all)]
    pub async fn search(&self, query: &SearchQuery, cancel: &CancellationToken) -> Result<SearchPage> {
        let fields = FieldSet::parse(&query.fields)?;
        let count = self.search_page_size(query.limit)?;
        let page = match query.cursor.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(cursor) => decode_page(cursor)?,
            None => 1,
        };
        let compiled = self.compile_search(query, Local::now().date_naive()).await?;
        debug!("search query: {}", compiled);

        let mut params = vec![
            ("query", compiled),
            ("count", count.to_string()),
            ("page", page.to_string()),
            ("highlight", "false".to_string()),
        ];
        params.extend(query.sort.params());

        let body = self.read(&ApiMethod::SEARCH_MESSAGES, &params, cancel).await?;
        let response: SearchResponse = serde_json::from_value(body)?;
        let messages = response.messages;

        let pagination = messages.pagination.as_ref();
        let total = pagination.and_then(|p| p.total_count).unwrap_or(messages.total);
        let pages = pagination
            .and_then(|p| p.page_count)
            .or_else(|| messages.paging.as_ref().and_then(|p| p.pages))
            .unwrap_or_else(|| u32::try_from(total.div_ceil(u64::from(count))).unwrap_or(u32::MAX));
        let page_number = pagination.and_then(|p| p.page).unwrap_or(page);
        let returned = messages.matches.len() as u64;
        let (first, last) = match pagination.and_then(|p| p.first.zip(p.last)) {
            Some(range) => range,
            None if returned == 0 => (0, 0),
            None => {
                let first = u64::from(page_number.saturating_sub(1)) * u64::from(count) + 1;
                (first, first + returned - 1)
            }
        };

        let upstream_next = (page_number < pages).then(|| encode_page(page_number + 1));
        let mut records = self.project(messages.matches, None, &fields, true).await;
        let next_cursor = if fields.contains(Field::Cursor) {
            if let Some(tail) = records.last_mut() {
                tail.next_cursor = upstream_next.clone();
            }
            upstream_next
        } else {
            None
        };

        Ok(SearchPage {
            page: Page {
                records,
                fields,
                next_cursor,
            },
            total,
            pages,
            page_number,
            first,
            last,
        })
    }

    fn search_page_size(&self, limit: Option<u32>) -> Result<u32> {
        let max = self.settings.max_search_page_size.max(1);
        match limit {
            None => Ok(self.settings.default_search_page_size.clamp(1, max)),
            Some(n) if (1..=max).contains(&n) => Ok(n),
            Some(n) => Err(ParleyError::validation(
                "limit",
                format!("search page size {} must be between 1 and {}", n, max),
            )),
        }
    }

    /// Build the upstream query string. `today` anchors relative dates.
    pub(crate) async fn compile_search(&self, query: &SearchQuery, today: NaiveDate) -> Result<String> {
        let filters = &query.filters;
        let mut terms: Vec<String> = Vec::new();
        let text = query.query.trim();
        if !text.is_empty() {
            terms.push(text.to_string());
        }

        if let Some(selector) = non_empty(&filters.in_channel) {
            terms.push(self.channel_modifier(selector).await?);
        }
        if let Some(selector) = non_empty(&filters.from_user) {
            terms.push(self.user_modifier("from", selector).await?);
        }
        if let Some(selector) = non_empty(&filters.with_user) {
            terms.push(self.user_modifier("with", selector).await?);
        }
        for (key, value) in [
            ("before", &filters.before),
            ("after", &filters.after),
            ("on", &filters.on),
        ] {
            if let Some(raw) = non_empty(value) {
                terms.push(format!("{}:{}", key, parse_date(key, raw, today)?));
            }
        }
        if let Some(raw) = non_empty(&filters.during) {
            terms.push(format!("during:{}", parse_during(raw, today)?));
        }
        if filters.threads_only {
            terms.push("is:thread".to_string());
        }

        if terms.is_empty() {
            return Err(ParleyError::validation(
                "query",
                "search needs free text or at least one filter",
            ));
        }
        Ok(terms.join(" "))
    }

    async fn channel_modifier(&self, selector: &str) -> Result<String> {
        if looks_like_channel_id(selector) {
            return Ok(format!("in:<#{}>", selector));
        }
        match self.cache.resolve_channel("in", selector).await {
            Ok(id) => Ok(format!("in:<#{}>", id)),
            Err(ParleyError::NotReady { .. }) => {
                warn!("channels directory not ready; searching in:{} by name", selector);
                Ok(format!("in:{}", selector))
            }
            Err(err) => Err(err),
        }
    }

    async fn user_modifier(&self, key: &str, selector: &str) -> Result<String> {
        match self.cache.resolve_user(key, selector).await {
            Ok(id) => Ok(format!("{}:<@{}>", key, id)),
            Err(ParleyError::NotReady { .. }) => {
                warn!("users directory not ready; searching {}:{} by handle", key, selector);
                Ok(format!("{}:{}", key, selector))
            }
            Err(err) => Err(err),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `YYYY-MM-DD`, `today` or `yesterday`.
fn parse_date(field: &str, raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    match raw.to_ascii_lowercase().as_str() {
        "today" => Ok(today),
        "yesterday" => today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| ParleyError::validation(field, "date out of range")),
        other => NaiveDate::parse_from_str(other, "%Y-%m-%d").map_err(|_| {
            ParleyError::validation(
                field,
                format!("`{}` is not a date; use YYYY-MM-DD, today or yesterday", raw),
            )
        }),
    }
}

/// A date, `YYYY-MM`, `YYYY` or a month name (full or three letters).
fn parse_during(raw: &str, today: NaiveDate) -> Result<String> {
    let lower = raw.to_ascii_lowercase();
    if let Ok(date) = parse_date("during", &lower, today) {
        return Ok(date.format("%Y-%m-%d").to_string());
    }
    if let Some(month) = MONTHS
        .iter()
        .find(|m| **m == lower || (lower.len() == 3 && m.starts_with(lower.as_str())))
    {
        return Ok(month.to_string());
    }
    if lower.len() == 7 && NaiveDate::parse_from_str(&format!("{}-01", lower), "%Y-%m-%d").is_ok() {
        return Ok(lower);
    }
    if lower.len() == 4 {
        if let Ok(year) = lower.parse::<i32>() {
            if year >= 2000 && year <= today.year() + 1 {
                return Ok(lower);
            }
        }
    }
    Err(ParleyError::validation(
        "during",
        format!("`{}` is not a date, month (YYYY-MM or name) or year", raw),
    ))
}
