//! URL handling module
//!
//! This module provides URL normalization (the dedup key and stored form of
//! every record URL), link resolution against the page a link was found on,
//! and listing pagination helpers.

mod normalize;
mod resolve;

// Re-export main functions
pub use normalize::normalize_url;
pub use resolve::{resolve_link, with_page_param};
