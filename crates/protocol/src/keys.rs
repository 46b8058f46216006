//! Page and site identifiers derived from a URL.

use url::Url;

/// Cache key for a page: the URL without its fragment. Unparsable input is
/// used verbatim (trimmed) so callers still get a stable key.
pub fn page_key(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Site key for a page: its lower-cased host. `None` when the URL has no host
/// (e.g. `about:blank`, `file:` URLs) or does not parse.
pub fn site_key(raw: &str) -> Option<String> {
    Url::parse(raw.trim())
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_key_drops_fragment() {
        assert_eq!(
            page_key("https://example.com/post?id=3#comments"),
            "https://example.com/post?id=3"
        );
        assert_eq!(page_key("  not a url "), "not a url");
    }

    #[test]
    fn site_key_is_host() {
        assert_eq!(
            site_key("https://News.Example.com/a/b").as_deref(),
            Some("news.example.com")
        );
        assert_eq!(site_key("about:blank"), None);
        assert_eq!(site_key("garbage"), None);
    }
}
