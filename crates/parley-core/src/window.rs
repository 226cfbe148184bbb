//! Window specs: `50` (message count) or `3d` / `2w` / `1m` (relative span).

use chrono::{DateTime, Days, Months, TimeZone, Utc};
use parley_auth_bridge::{ParleyError, Result};

/// Upper bound on a count window.
pub const MAX_COUNT: u32 = 1000;

const FIELD: &str = "limit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanUnit {
    Days,
    Weeks,
    Months,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSpec {
    /// Fixed number of messages, used as the upstream page size.
    Count(u32),
    Span { amount: u32, unit: SpanUnit },
}

/// Absolute time range derived from a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub oldest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl TimeBounds {
    pub fn oldest_ts(&self) -> String {
        to_upstream_ts(&self.oldest)
    }

    pub fn latest_ts(&self) -> String {
        to_upstream_ts(&self.latest)
    }
}

/// Upstream timestamps are `<seconds>.<microseconds>`.
pub fn to_upstream_ts(at: &DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

/// Parse an upstream timestamp back into a UTC instant.
pub fn from_upstream_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = if frac.is_empty() {
        0
    } else if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    } else {
        format!("{:0<6}", &frac[..frac.len().min(6)]).parse().ok()?
    };
    Utc.timestamp_opt(secs, micros * 1000).single()
}

impl WindowSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ParleyError::validation(FIELD, "window spec is empty"));
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(WindowSpec::Count(parse_amount(raw)?));
        }
        if raw.len() < 2 {
            return Err(ParleyError::validation(
                FIELD,
                format!("`{}` is too short; use a count like 50 or a span like 7d", raw),
            ));
        }

        let (idx, suffix) = raw
            .char_indices()
            .last()
            .ok_or_else(|| ParleyError::validation(FIELD, "window spec is empty"))?;
        let amount = &raw[..idx];
        let unit = match suffix.to_ascii_lowercase() {
            'd' => SpanUnit::Days,
            'w' => SpanUnit::Weeks,
            'm' => SpanUnit::Months,
            _ => {
                return Err(ParleyError::validation(
                    FIELD,
                    format!("unknown suffix in `{}`; expected d, w or m", raw),
                ))
            }
        };
        if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParleyError::validation(
                FIELD,
                format!("`{}` must start with a positive number", raw),
            ));
        }
        Ok(WindowSpec::Span {
            amount: parse_amount(amount)?,
            unit,
        })
    }

    /// Time range for a span, anchored at local midnight `amount` units
    /// before today and ending at `now`. Count windows have no bounds.
    pub fn bounds<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Result<Option<TimeBounds>> {
        let WindowSpec::Span { amount, unit } = *self else {
            return Ok(None);
        };
        let today = now.date_naive();
        let start = match unit {
            SpanUnit::Days => today.checked_sub_days(Days::new(amount.into())),
            SpanUnit::Weeks => today.checked_sub_days(Days::new(u64::from(amount) * 7)),
            SpanUnit::Months => today.checked_sub_months(Months::new(amount)),
        }
        .ok_or_else(|| ParleyError::validation(FIELD, "window reaches too far back"))?;

        let midnight = start.and_time(chrono::NaiveTime::MIN);
        let oldest = now
            .timezone()
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight));

        Ok(Some(TimeBounds {
            oldest,
            latest: now.with_timezone(&Utc),
        }))
    }

    /// Page size to request upstream for this window.
    pub fn page_size(&self, default: u32) -> u32 {
        match self {
            WindowSpec::Count(n) => *n,
            WindowSpec::Span { .. } => default,
        }
    }
}

fn parse_amount(digits: &str) -> Result<u32> {
    let n: u32 = digits
        .parse()
        .map_err(|_| ParleyError::validation(FIELD, format!("`{}` is out of range", digits)))?;
    if n == 0 {
        return Err(ParleyError::validation(FIELD, "window must be positive"));
    }
    if n > MAX_COUNT {
        return Err(ParleyError::validation(
            FIELD,
            format!("{} exceeds the maximum of {}", n, MAX_COUNT),
        ));
    }
    Ok(n)
}
