//! Message text normalization.
//!
//! Prefers the structured `rich_text` blocks when present; otherwise cleans up
//! the mrkdwn `text` field. Output is always a single line.

use once_cell::sync::Lazy;
use parley_directory::UsersDirectory;
use regex::{Captures, Regex};
use serde_json::Value;

static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@([UWB][A-Z0-9]+)(?:\|([^>]*))?>").expect("valid regex"));
static CHANNEL_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<#([CGD][A-Z0-9]+)(?:\|([^>]*))?>").expect("valid regex"));
static SPECIAL_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!([a-z]+)(?:\^[^|>]*)?(?:\|([^>]*))?>").expect("valid regex"));
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^@#!<>|][^<>|]*)(?:\|([^<>]*))?>").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Render a message's text as one line.
pub fn render_text(text: &str, blocks: &[Value], users: Option<&UsersDirectory>) -> String {
    let flattened = flatten_blocks(blocks, users);
    let raw = if flattened.trim().is_empty() {
        clean_mrkdwn(text, users)
    } else {
        flattened
    };
    collapse_whitespace(&raw)
}

/// Replace mrkdwn markup with readable text.
pub fn clean_mrkdwn(text: &str, users: Option<&UsersDirectory>) -> String {
    let text = USER_MENTION.replace_all(text, |caps: &Captures| {
        let id = &caps[1];
        match (users.and_then(|u| u.get(id)), caps.get(2)) {
            (Some(user), _) => format!("@{}", user.handle),
            (None, Some(label)) if !label.as_str().is_empty() => format!("@{}", label.as_str()),
            _ => format!("@{}", id),
        }
    });
    let text = CHANNEL_MENTION.replace_all(&text, |caps: &Captures| match caps.get(2) {
        Some(name) if !name.as_str().is_empty() => format!("#{}", name.as_str()),
        _ => format!("#{}", &caps[1]),
    });
    let text = SPECIAL_MENTION.replace_all(&text, |caps: &Captures| match caps.get(2) {
        Some(label) if !label.as_str().is_empty() => label.as_str().to_string(),
        _ => format!("@{}", &caps[1]),
    });
    let text = LINK.replace_all(&text, |caps: &Captures| match caps.get(2) {
        Some(label) if !label.as_str().is_empty() && label.as_str() != &caps[1] => {
            format!("{} ({})", label.as_str(), &caps[1])
        }
        _ => caps[1].to_string(),
    });
    unescape(&text)
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Flatten every `rich_text` block into plain text.
pub fn flatten_blocks(blocks: &[Value], users: Option<&UsersDirectory>) -> String {
    let mut out = String::new();
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("rich_text") {
            continue;
        }
        for element in children(block) {
            push_separator(&mut out);
            flatten_container(element, users, &mut out);
        }
    }
    out
}

fn children(node: &Value) -> &[Value] {
    node.get("elements")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn push_separator(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
}

fn flatten_container(node: &Value, users: Option<&UsersDirectory>, out: &mut String) {
    match node.get("type").and_then(Value::as_str) {
        Some("rich_text_list") => {
            let ordered = node.get("style").and_then(Value::as_str) == Some("ordered");
            for (idx, item) in children(node).iter().enumerate() {
                push_separator(out);
                if ordered {
                    out.push_str(&format!("{}. ", idx + 1));
                } else {
                    out.push_str("- ");
                }
                flatten_container(item, users, out);
            }
        }
        Some("rich_text_quote") => {
            push_separator(out);
            out.push_str("> ");
            flatten_inline(children(node), users, out);
        }
        Some("rich_text_section") | Some("rich_text_preformatted") => {
            flatten_inline(children(node), users, out);
        }
        _ => flatten_inline(std::slice::from_ref(node), users, out),
    }
}

fn flatten_inline(elements: &[Value], users: Option<&UsersDirectory>, out: &mut String) {
    for element in elements {
        let str_field = |key: &str| element.get(key).and_then(Value::as_str).unwrap_or_default();
        match str_field("type") {
            "text" => out.push_str(str_field("text")),
            "link" => {
                let url = str_field("url");
                match element.get("text").and_then(Value::as_str) {
                    Some(label) if !label.is_empty() && label != url => {
                        out.push_str(&format!("{} ({})", label, url))
                    }
                    _ => out.push_str(url),
                }
            }
            "user" => {
                let id = str_field("user_id");
                let handle = users
                    .and_then(|u| u.get(id))
                    .map(|u| u.handle.as_str())
                    .unwrap_or(id);
                out.push('@');
                out.push_str(handle);
            }
            "channel" => {
                out.push('#');
                out.push_str(str_field("channel_id"));
            }
            "usergroup" => {
                out.push('@');
                out.push_str(str_field("usergroup_id"));
            }
            "emoji" => {
                out.push(':');
                out.push_str(str_field("name"));
                out.push(':');
            }
            "broadcast" => {
                out.push('@');
                out.push_str(str_field("range"));
            }
            _ => {}
        }
    }
}
