//! Detail page extraction: one record per page
//!
//! Each field is looked up on its own, first in the state blob and then in
//! the rendered markup. A field that cannot be read is left absent.

use crate::extract::fields::{
    digits_only, first_array_len, first_str, first_u32, odometer_value, select_attr,
    select_count, select_text, valid_vin,
};
use crate::extract::ExtractResult;
use crate::storage::Record;
use crate::url::resolve_link;
use chrono::{DateTime, Utc};
use scraper::Html;
use serde_json::Value;
use url::Url;

/// Where the advert object may live in the state blob
const ADVERT_ROOTS: &[&str] = &[
    "/props/pageProps/advert",
    "/props/pageProps/auto",
    "/advert",
    "/auto",
    "/car",
];

const TITLE: &[&str] = &["/title", "/name", "/autoData/title"];
const PRICE_USD: &[&str] = &["/price/usd", "/priceUSD", "/USD", "/price/value"];
const ODOMETER: &[&str] = &["/odometer", "/mileage", "/autoData/raceInt", "/race"];
const USERNAME: &[&str] = &["/seller/name", "/userName", "/user/name", "/owner/name"];
const PHONE: &[&str] = &[
    "/seller/phone",
    "/phone",
    "/phones/0/phoneFormatted",
    "/phones/0/phone",
];
const IMAGE_URL: &[&str] = &["/photos/0/url", "/photos/0/src", "/mainPhoto", "/image"];
const IMAGE_LISTS: &[&str] = &["/photos", "/images", "/gallery"];
const IMAGE_COUNTS: &[&str] = &["/photosCount", "/photoCount"];
const CAR_NUMBER: &[&str] = &["/plateNumber", "/carNumber", "/stateNumber"];
const VIN: &[&str] = &["/vin", "/VIN", "/autoData/vin"];

/// Markup selectors of the server-rendered detail page
mod markup {
    pub const TITLE: &str = "h1";
    pub const PRICE: &[&str] = &["#sidePrice strong", ".price_value strong"];
    pub const ODOMETER: &str = "#basicInfoTableMainInfo0 span";
    pub const USERNAME: &str = "#sellerInfoUserName span";
    pub const PHONE: &str = ".button-main.mt-16 span";
    pub const IMAGE: &str = "span.picture img";
    pub const GALLERY: &str = ".preview-gallery img";
    pub const CAR_NUMBER: &str = ".car-number.ua span";
    pub const VIN: &str = "#badgesVin span";
}

pub fn extract_detail(
    document: &Html,
    blob: Option<&Value>,
    page_url: &Url,
    found_at: DateTime<Utc>,
) -> ExtractResult {
    let advert = blob.map(|blob| {
        ADVERT_ROOTS
            .iter()
            .filter_map(|p| blob.pointer(p))
            .find(|v| v.is_object())
            .unwrap_or(blob)
    });

    let title = blob_str(advert, TITLE).or_else(|| select_text(document, markup::TITLE));

    if blob.is_none() && title.is_none() {
        return ExtractResult::Unparseable {
            reason: "no embedded state and no title".to_string(),
        };
    }

    let mut record = Record::new(page_url.as_str(), found_at);
    record.title = title;

    record.price_usd = advert
        .and_then(|v| first_u32(v, PRICE_USD))
        .or_else(|| {
            markup::PRICE
                .iter()
                .filter_map(|sel| select_text(document, sel))
                .find_map(|text| digits_only(&text))
        });

    record.odometer = advert
        .and_then(|v| first_u32(v, ODOMETER))
        .or_else(|| select_text(document, markup::ODOMETER).and_then(|t| digits_only(&t)))
        .map(odometer_value);

    record.username = blob_str(advert, USERNAME)
        .or_else(|| select_text(document, markup::USERNAME));

    record.phone_number =
        blob_str(advert, PHONE).or_else(|| select_text(document, markup::PHONE));

    record.image_url = blob_str(advert, IMAGE_URL)
        .or_else(|| select_attr(document, markup::IMAGE, &["data-src", "src"]))
        .and_then(|href| resolve_link(&href, page_url))
        .map(String::from);

    record.images_count = advert
        .and_then(|v| first_array_len(v, IMAGE_LISTS).or_else(|| first_u32(v, IMAGE_COUNTS)))
        .filter(|count| *count > 0)
        .unwrap_or_else(|| select_count(document, markup::GALLERY) as u32);

    record.car_number = blob_str(advert, CAR_NUMBER)
        .or_else(|| select_text(document, markup::CAR_NUMBER));

    record.car_vin = blob_str(advert, VIN)
        .or_else(|| select_text(document, markup::VIN))
        .and_then(|raw| valid_vin(&raw));

    ExtractResult::Detail { record }
}

fn blob_str(advert: Option<&Value>, pointers: &[&str]) -> Option<String> {
    advert.and_then(|v| first_str(v, pointers))
}
