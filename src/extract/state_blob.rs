//! Locating the embedded application state in a page
//!
//! Sites built as single-page applications ship the data they render as JSON
//! inside the delivered HTML. Three carriers are recognised, in order:
//! - `<script id="__NEXT_DATA__">` documents
//! - `<script type="application/json" data-state>` documents
//! - `window.__INITIAL_STATE__ = {...}` style assignments inside inline scripts

use scraper::{Html, Selector};
use serde_json::Value;

const STATE_ASSIGNMENTS: &[&str] = &[
    "window.__INITIAL_STATE__",
    "window.__PRELOADED_STATE__",
    "window.__STATE__",
];

/// Returns the first embedded state blob that parses as a JSON object
pub fn locate(document: &Html) -> Option<Value> {
    script_json(document, "script#__NEXT_DATA__")
        .or_else(|| script_json(document, "script[type='application/json'][data-state]"))
        .or_else(|| assigned_state(document))
}

fn script_json(document: &Html, selector: &str) -> Option<Value> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).find_map(|script| {
        let text = script.text().collect::<String>();
        parse_object(text.trim())
    })
}

fn assigned_state(document: &Html) -> Option<Value> {
    let selector = Selector::parse("script").ok()?;
    document.select(&selector).find_map(|script| {
        let text = script.text().collect::<String>();
        STATE_ASSIGNMENTS
            .iter()
            .find_map(|marker| state_after_marker(&text, marker))
    })
}

fn state_after_marker(script: &str, marker: &str) -> Option<Value> {
    let after_marker = &script[script.find(marker)? + marker.len()..];
    let after_eq = after_marker.trim_start().strip_prefix('=')?;
    let start = after_eq.find('{')?;
    // Only whitespace may sit between `=` and the opening brace
    if !after_eq[..start].trim().is_empty() {
        return None;
    }
    parse_object(balanced_object(&after_eq[start..])?)
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// Returns the prefix of `text` spanning one balanced `{...}` object
///
/// Braces inside string literals are ignored. `text` must start with `{`.
pub fn balanced_object(text: &str) -> Option<&str> {
    if !text.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }

    None
}
