//! Listing page extraction: detail URLs and the next listing page

use crate::extract::fields::first_u32;
use crate::extract::ExtractResult;
use crate::url::{resolve_link, with_page_param};
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Where the listing's item array may live in the state blob
const ITEM_ARRAYS: &[&str] = &[
    "/props/pageProps/listing/items",
    "/props/pageProps/search/items",
    "/props/pageProps/items",
    "/listing/items",
    "/search/items",
    "/search/result/items",
    "/items",
];

/// Keys of an item object that carry its detail URL
const ITEM_URL_KEYS: &[&str] = &["/url", "/linkToView", "/href", "/link"];

const PAGINATION: &[&str] = &[
    "/props/pageProps/pagination",
    "/props/pageProps/search/pagination",
    "/pagination",
    "/search/pagination",
    "/listing/pagination",
];

/// Detail anchors in the server-rendered listing markup
const LISTING_ANCHORS: &str = "a.address[href]";

pub fn extract_listing(document: &Html, blob: Option<&Value>, page_url: &Url) -> ExtractResult {
    let mut hrefs = blob.map(blob_item_hrefs).unwrap_or_default();

    if hrefs.is_empty() {
        hrefs = markup_hrefs(document);
        if blob.is_none() && hrefs.is_empty() {
            // Past the last page of a paginated walk
            if page_number(page_url) > 1 {
                return ExtractResult::Listing {
                    urls: Vec::new(),
                    next_page: None,
                };
            }
            return ExtractResult::Unparseable {
                reason: "no embedded state and no listing anchors".to_string(),
            };
        }
    }

    let mut seen = HashSet::new();
    let urls: Vec<String> = hrefs
        .iter()
        .filter_map(|href| resolve_link(href, page_url))
        .map(String::from)
        .filter(|url| seen.insert(url.clone()))
        .collect();

    let next_page = if urls.is_empty() {
        None
    } else {
        next_page(blob, page_url)
    };

    ExtractResult::Listing { urls, next_page }
}

fn blob_item_hrefs(blob: &Value) -> Vec<String> {
    let Some(items) = ITEM_ARRAYS
        .iter()
        .filter_map(|p| blob.pointer(p))
        .find_map(Value::as_array)
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(href) => Some(href.clone()),
            Value::Object(_) => ITEM_URL_KEYS
                .iter()
                .filter_map(|key| item.pointer(key))
                .find_map(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

fn markup_hrefs(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse(LISTING_ANCHORS) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// URL of the following listing page
///
/// An explicit `next` link wins; otherwise the current page number and the
/// page count are turned into a `page` query parameter. Without usable
/// pagination data the `page` parameter of the page URL is incremented, and
/// the walk ends at the first listing page without links.
fn next_page(blob: Option<&Value>, page_url: &Url) -> Option<String> {
    let pagination = blob.and_then(|blob| {
        PAGINATION
            .iter()
            .filter_map(|p| blob.pointer(p))
            .find(|v| v.is_object())
    });

    if let Some(pagination) = pagination {
        if let Some(next) = pagination.get("next").and_then(Value::as_str) {
            return resolve_link(next, page_url).map(String::from);
        }

        let current = first_u32(pagination, &["/page", "/current", "/currentPage"]);
        let total = first_u32(pagination, &["/pages", "/totalPages", "/lastPage"]);
        if let (Some(current), Some(total)) = (current, total) {
            return (current < total).then(|| with_page_param(page_url, current + 1).to_string());
        }
    }

    Some(with_page_param(page_url, page_number(page_url).saturating_add(1)).to_string())
}

/// The `page` query parameter of a listing URL, 1 when absent
fn page_number(page_url: &Url) -> u32 {
    page_url
        .query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse::<u32>().ok())
        .unwrap_or(1)
}
