//! Page extraction
//!
//! Turns a fetched page body into either the detail URLs of a listing page or
//! the record of a detail page. Extraction is a pure function of its inputs:
//! the discovery timestamp is supplied by the caller.
//!
//! The embedded state blob is the primary source. Its schema drifts, so every
//! lookup tries several known locations and missing keys only leave the
//! corresponding value absent.

mod detail;
mod fields;
mod listing;
mod state_blob;

pub use fields::{digits_only, odometer_value, valid_vin};
pub use state_blob::balanced_object;

use crate::storage::Record;
use chrono::{DateTime, Utc};
use scraper::Html;
use url::Url;

/// What kind of page a URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Listing,
    Detail,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Detail => "detail",
        }
    }
}

/// Result of extracting one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractResult {
    /// Detail URLs found on a listing page, absolute and in page order
    Listing {
        urls: Vec<String>,
        next_page: Option<String>,
    },

    /// The record of a detail page
    Detail { record: Record },

    /// The page did not have the expected structure
    Unparseable { reason: String },
}

/// Extracts a fetched page
///
/// # Arguments
///
/// * `page_url` - URL the page was requested under; detail records are keyed on it
/// * `body` - Page body
/// * `kind` - Whether the page is a listing or a detail page
/// * `found_at` - Timestamp stamped on a detail record
pub fn extract(page_url: &Url, body: &str, kind: PageKind, found_at: DateTime<Utc>) -> ExtractResult {
    let document = Html::parse_document(body);
    let blob = state_blob::locate(&document);

    match kind {
        PageKind::Listing => listing::extract_listing(&document, blob.as_ref(), page_url),
        PageKind::Detail => detail::extract_detail(&document, blob.as_ref(), page_url, found_at),
    }
}
