use url::Url;

/// Schemes that are never tracked: internal browser surfaces, local files,
/// and extension pages.
const BLOCKED_SCHEMES: &[&str] = &[
    "about",
    "chrome",
    "edge",
    "brave",
    "opera",
    "vivaldi",
    "devtools",
    "view-source",
    "chrome-extension",
    "moz-extension",
    "safari-web-extension",
    "file",
    "data",
    "blob",
    "javascript",
];

/// Maps a raw URL to its tracking domain, or `None` for untracked contexts.
///
/// Malformed URLs and blocked schemes normalize to `None`; this never
/// propagates an error to the caller. Accepted hosts are lowercased and a
/// single leading `www.` label is stripped.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    if BLOCKED_SCHEMES.contains(&parsed.scheme()) {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Returns the path component of a URL, defaulting to `/`.
///
/// Query string and fragment are always discarded. That loses routes which
/// single-page apps encode in the fragment, and that is intentional: the
/// path buckets must never contain query or fragment data.
pub fn normalize_path(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(parsed) => {
            let path = parsed.path();
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        }
        Err(_) => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_schemes_are_untracked() {
        assert_eq!(normalize_domain("chrome://settings"), None);
        assert_eq!(normalize_domain("about:blank"), None);
        assert_eq!(normalize_domain("file:///home/user/doc.pdf"), None);
        assert_eq!(normalize_domain("chrome-extension://abcdef/popup.html"), None);
        assert_eq!(normalize_domain("moz-extension://abcdef/options.html"), None);
        assert_eq!(normalize_domain("view-source:https://example.com"), None);
    }

    #[test]
    fn test_malformed_urls_fail_soft() {
        assert_eq!(normalize_domain(""), None);
        assert_eq!(normalize_domain("not a url"), None);
        assert_eq!(normalize_domain("http://"), None);
    }

    #[test]
    fn test_domain_is_lowercased_and_www_stripped() {
        assert_eq!(
            normalize_domain("https://WWW.Example.COM/page"),
            Some("example.com".to_string())
        );
        assert_eq!(
            normalize_domain("https://docs.example.com/a"),
            Some("docs.example.com".to_string())
        );
        // Only a single leading label is stripped.
        assert_eq!(
            normalize_domain("https://www.www.example.com"),
            Some("www.example.com".to_string())
        );
    }

    #[test]
    fn test_path_defaults_to_root() {
        assert_eq!(normalize_path("https://example.com"), "/");
        assert_eq!(normalize_path("https://example.com/a/b"), "/a/b");
        assert_eq!(normalize_path("garbage"), "/");
    }

    #[test]
    fn test_query_and_fragment_are_discarded() {
        assert_eq!(
            normalize_path("https://example.com/search?q=secret#section"),
            "/search"
        );
        assert_eq!(normalize_path("https://app.example.com/#/inbox/42"), "/");
    }
}
