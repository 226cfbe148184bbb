//! Locally minted cursors for results the upstream pages by number
//! (search) or that are paged out of the cache (channel listing).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parley_auth_bridge::{ParleyError, Result};

const PAGE: &str = "page";
const OFFSET: &str = "offset";

pub fn encode_page(page: u32) -> String {
    encode(PAGE, page as usize)
}

pub fn decode_page(cursor: &str) -> Result<u32> {
    let page = decode(PAGE, cursor)?;
    u32::try_from(page)
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| invalid(cursor))
}

pub fn encode_offset(offset: usize) -> String {
    encode(OFFSET, offset)
}

pub fn decode_offset(cursor: &str) -> Result<usize> {
    decode(OFFSET, cursor)
}

fn encode(kind: &str, n: usize) -> String {
    STANDARD.encode(format!("{}:{}", kind, n))
}

fn decode(kind: &str, cursor: &str) -> Result<usize> {
    let raw = STANDARD
        .decode(cursor.trim())
        .map_err(|_| invalid(cursor))?;
    let text = String::from_utf8(raw).map_err(|_| invalid(cursor))?;
    text.strip_prefix(kind)
        .and_then(|rest| rest.strip_prefix(':'))
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| invalid(cursor))
}

fn invalid(cursor: &str) -> ParleyError {
    ParleyError::validation("cursor", format!("`{}` is not a cursor issued by this server", cursor))
}
