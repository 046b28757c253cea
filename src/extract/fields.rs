//! Failure-isolated field lookups
//!
//! Every lookup tries a list of JSON pointers in order and yields `None` when
//! nothing usable is found. A missing or malformed value never affects any
//! other field.

use scraper::{Html, Selector};
use serde_json::Value;

/// First non-empty string at any of `pointers`
///
/// Numbers are accepted and rendered as text.
pub fn first_str(root: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| root.pointer(p))
        .find_map(value_as_text)
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First value at any of `pointers` that reads as a non-negative integer
///
/// Strings are reduced to their digits first (`"41 500 $"` → `41500`).
pub fn first_u32(root: &Value, pointers: &[&str]) -> Option<u32> {
    pointers
        .iter()
        .filter_map(|p| root.pointer(p))
        .find_map(value_as_u32)
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                u32::try_from(v).ok()
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u32::MAX as f64)
                    .map(|f| f.round() as u32)
            }
        }
        Value::String(s) => digits_only(s),
        _ => None,
    }
}

/// Parses the digits of `text`, ignoring everything else
pub fn digits_only(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Odometer values below 1000 are given in thousands
pub fn odometer_value(raw: u32) -> u32 {
    if raw < 1000 {
        raw.saturating_mul(1000)
    } else {
        raw
    }
}

/// Length of the first array found at any of `pointers`
pub fn first_array_len(root: &Value, pointers: &[&str]) -> Option<u32> {
    pointers
        .iter()
        .filter_map(|p| root.pointer(p))
        .find_map(|v| v.as_array())
        .and_then(|items| u32::try_from(items.len()).ok())
}

/// Returns the upper-cased VIN if `raw` is a well-formed 17-character VIN
///
/// I, O and Q never occur in a VIN.
pub fn valid_vin(raw: &str) -> Option<String> {
    let vin = raw.trim().to_ascii_uppercase();
    let well_formed = vin.len() == 17
        && vin
            .chars()
            .all(|c| c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q')));
    well_formed.then_some(vin)
}

/// Trimmed text of the first element matching `selector`
pub fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty())
}

/// First non-empty value of any of `attrs` on the first element matching `selector`
pub fn select_attr(document: &Html, selector: &str, attrs: &[&str]) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    attrs
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Number of elements matching `selector`
pub fn select_count(document: &Html, selector: &str) -> usize {
    match Selector::parse(selector) {
        Ok(selector) => document.select(&selector).count(),
        Err(_) => 0,
    }
}
