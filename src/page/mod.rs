//! # Módulo de Página
//!
//! Identidade estável de página a partir da URL da aba.

use once_cell::sync::Lazy;
use regex::Regex;

static ABSOLUTE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://([^/?#]*)([^?#]*)").expect("valid url regex")
});

/// Page key for a URL: `scheme://host` + decoded path, query and fragment dropped.
///
/// `https://Example.com/a/b/?x=1#top` and `https://example.com/a/b` map to the
/// same key, so a reload or anchor jump is not treated as a page change.
pub fn page_key(url: &str) -> String {
    let url = url.trim();

    match ABSOLUTE_URL_RE.captures(url) {
        Some(caps) => {
            let scheme = caps[1].to_ascii_lowercase();
            let host = caps[2].to_ascii_lowercase();
            format!("{}://{}{}", scheme, host, normalize_path(&caps[3]))
        }
        None => {
            let end = url.find(['?', '#']).unwrap_or(url.len());
            normalize_path(&url[..end])
        }
    }
}

fn normalize_path(path: &str) -> String {
    let decoded = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());
    let trimmed = decoded.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether `url` is a different page than the last known URL.
///
/// With no known URL there is nothing to compare against, so the answer is `false`.
pub fn is_different_page(known_url: Option<&str>, url: &str) -> bool {
    match known_url {
        Some(known) => page_key(known) != page_key(url),
        None => false,
    }
}
