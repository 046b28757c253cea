use crate::UrlError;
use url::Url;

/// List of tracking query parameters to remove during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// Normalizes a URL into the form used as its dedup key and stored `url`
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed (dot segments are resolved here)
/// 2. Reject anything that is not http or https
/// 3. Reject URLs without a host
/// 4. Remove fragment (everything after #)
/// 5. Remove tracking query parameters
/// 6. Sort remaining query parameters by key (stable, so repeated keys keep their order)
/// 7. Remove empty query string (trailing ?)
///
/// Scheme, host and path are otherwise left alone so the normalized URL is
/// still the URL the site serves.
///
/// # Examples
///
/// ```
/// use listing_harvester::url::normalize_url;
///
/// let url = normalize_url("https://auto.example.com/car_1.html?utm_source=x#photos").unwrap();
/// assert_eq!(url.as_str(), "https://auto.example.com/car_1.html");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));

    params
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_url_unchanged() {
        let url = normalize_url("https://auto.example.com/uk/auto_bmw_x5_35012345.html").unwrap();
        assert_eq!(url.as_str(), "https://auto.example.com/uk/auto_bmw_x5_35012345.html");
    }

    #[test]
    fn test_gallery_anchor_dropped() {
        let url = normalize_url("https://auto.example.com/uk/auto_1.html#photo-3").unwrap();
        assert_eq!(url.as_str(), "https://auto.example.com/uk/auto_1.html");
    }

    #[test]
    fn test_campaign_params_dropped() {
        let url = normalize_url(
            "https://auto.example.com/uk/auto_1.html?utm_source=viber&utm_medium=share&fbclid=x1",
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://auto.example.com/uk/auto_1.html");

        let custom = normalize_url("https://auto.example.com/uk/auto_1.html?utm_banner=top").unwrap();
        assert_eq!(custom.as_str(), "https://auto.example.com/uk/auto_1.html");
    }

    #[test]
    fn test_listing_filters_sorted_and_kept() {
        let url = normalize_url(
            "https://auto.example.com/uk/car/used/?page=3&categories.main.id=1&utm_source=home",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://auto.example.com/uk/car/used/?categories.main.id=1&page=3"
        );
    }

    #[test]
    fn test_filter_keys_named_like_trackers_kept() {
        let by_dealer = normalize_url("https://auto.example.com/search?source=dealer").unwrap();
        let by_owner = normalize_url("https://auto.example.com/search?source=owner").unwrap();
        assert_ne!(by_dealer, by_owner);

        let url = normalize_url("https://auto.example.com/search?ref=42&brand=9").unwrap();
        assert_eq!(url.as_str(), "https://auto.example.com/search?brand=9&ref=42");
    }

    #[test]
    fn test_repeated_keys_keep_their_order() {
        let url = normalize_url("https://auto.example.com/search?brand=9&year=2019&brand=6").unwrap();
        assert_eq!(url.as_str(), "https://auto.example.com/search?brand=9&brand=6&year=2019");
    }

    #[test]
    fn test_query_values_stay_encoded() {
        let url = normalize_url("https://auto.example.com/search?q=a%20b%26c&page=2").unwrap();
        assert_eq!(url.as_str(), "https://auto.example.com/search?page=2&q=a+b%26c");
    }

    #[test]
    fn test_host_lowercased_path_case_kept() {
        let url = normalize_url("  https://AUTO.Example.COM/uk/Auto_1.HTML ").unwrap();
        assert_eq!(url.as_str(), "https://auto.example.com/uk/Auto_1.HTML");
    }

    #[test]
    fn test_dot_segments_resolved() {
        let url = normalize_url("https://auto.example.com/uk/car/../auto_1.html").unwrap();
        assert_eq!(url.as_str(), "https://auto.example.com/uk/auto_1.html");
    }

    #[test]
    fn test_port_kept() {
        let url = normalize_url("http://127.0.0.1:8080/list?page=2").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/list?page=2");
    }

    #[test]
    fn test_same_listing_normalizes_to_same_key() {
        let a = normalize_url("https://auto.example.com/auto_1.html?utm_source=feed#gallery").unwrap();
        let b = normalize_url("https://auto.example.com/auto_1.html").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_non_http() {
        assert!(matches!(
            normalize_url("javascript:void(0)").unwrap_err(),
            UrlError::InvalidScheme(_)
        ));
        assert!(matches!(
            normalize_url("mailto:dealer@example.com").unwrap_err(),
            UrlError::InvalidScheme(_)
        ));
        assert!(normalize_url("/uk/auto_1.html").is_err());
    }
}
