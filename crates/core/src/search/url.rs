//! URL normalization for deduplication.
//!
//! Two URLs that differ only in host casing, a trailing slash, a
//! fragment, tracking parameters, or query-parameter order are the same
//! page for research purposes. Normalization is idempotent.

use url::Url;

/// Tracking parameters stripped during normalization.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "gclsrc", "dclid", "msclkid", "mc_cid", "mc_eid", "ref", "affiliate",
    "campaign_id", "ad_id", "zanpid", "_ga", "_gid", "_gl", "yclid", "_openstat", "wbraid",
    "gbraid",
];

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Normalize a URL for comparison. Unparseable input is returned
/// unchanged so callers can still dedup on the raw string.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };

    // Host and scheme are lowercased by the parser already.
    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if params.is_empty() {
        url.set_query(None);
    } else {
        params.sort();
        let query = params
            .iter()
            .map(|(name, value)| {
                if value.is_empty() {
                    urlencoding::encode(name).into_owned()
                } else {
                    format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    url.to_string()
}
