// src/utils/url.rs

//! URL validation utilities for monitored sites.

use url::Url;

use crate::error::{AppError, Result};

/// Validate and canonicalize a site URL.
///
/// Only absolute `http`/`https` URLs with a host are accepted. Fragments are
/// dropped since they never reach the server.
///
/// # Examples
/// ```
/// use webwatch::utils::url::normalize_site_url;
///
/// assert_eq!(
///     normalize_site_url(" https://Example.com/news#top ").unwrap(),
///     "https://example.com/news"
/// );
/// ```
pub fn normalize_site_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::validation(format!(
            "unsupported URL scheme '{}' (expected http or https)",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::validation(format!("URL has no host: {raw}")));
    }

    url.set_fragment(None);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keeps_path_and_query() {
        assert_eq!(
            normalize_site_url("https://example.com/a?b=1").unwrap(),
            "https://example.com/a?b=1"
        );
    }

    #[test]
    fn test_normalize_adds_root_path() {
        assert_eq!(
            normalize_site_url("http://example.com").unwrap(),
            "http://example.com/"
        );
    }

    #[test]
    fn test_normalize_rejects_other_schemes() {
        assert!(normalize_site_url("ftp://example.com/file").is_err());
        assert!(normalize_site_url("not a url").is_err());
    }
}
