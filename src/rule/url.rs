//! `{{placeholder}}` URL templates.

use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid"));

/// Characters escaped in query values: everything but alphanumerics and `-_.~`.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Values available to a template expansion.
#[derive(Debug, Clone, Copy)]
pub struct UrlParams<'a> {
    pub base_url: &'a str,
    /// 1-based page number.
    pub page: u32,
    pub key: Option<&'a str>,
}

impl<'a> UrlParams<'a> {
    pub fn new(base_url: &'a str) -> Self {
        Self {
            base_url,
            page: 1,
            key: None,
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn key(mut self, key: &'a str) -> Self {
        self.key = Some(key);
        self
    }
}

/// Expand `template` and resolve the result against the base URL.
///
/// Unknown placeholders stay in the output verbatim.
pub fn expand(template: &str, params: &UrlParams<'_>) -> String {
    let base = params.base_url.trim().trim_end_matches('/');
    let encoded_key = params.key.map(encode_query_value);

    let expanded = PLACEHOLDER.replace_all(template.trim(), |caps: &Captures<'_>| {
        let name = &caps[1];
        match name {
            "baseUrl" => base.to_string(),
            "page" => params.page.to_string(),
            "pageIndex" => params.page.saturating_sub(1).to_string(),
            "key" | "keyword" | "searchKey" => match &encoded_key {
                Some(key) => key.clone(),
                None => caps[0].to_string(),
            },
            _ => caps[0].to_string(),
        }
    });

    to_absolute_url(&expanded, base)
}

/// Form-style encoding: spaces become `+`, other reserved bytes are `%XX`.
pub fn encode_query_value(value: &str) -> String {
    value
        .split(' ')
        .map(|part| utf8_percent_encode(part, QUERY_VALUE).to_string())
        .collect::<Vec<_>>()
        .join("+")
}

/// Resolve `url` against `base_url`.
pub fn to_absolute_url(url: &str, base_url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return String::new();
    }

    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return url.to_string();
    }
    if url.starts_with("//") {
        return format!("https:{}", url);
    }

    let base = base_url.trim().trim_end_matches('/');
    if url.starts_with('/') || url.starts_with('?') {
        format!("{}{}", base, url)
    } else {
        format!("{}/{}", base, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_template() {
        let params = UrlParams::new("https://site.test/").page(2).key("a b");
        assert_eq!(
            expand("{{baseUrl}}/search?q={{key}}&page={{page}}", &params),
            "https://site.test/search?q=a+b&page=2"
        );
    }

    #[test]
    fn test_page_and_page_index() {
        let params = UrlParams::new("https://site.test").page(3);
        assert_eq!(expand("/list?p={{page}}&i={{pageIndex}}", &params), "https://site.test/list?p=3&i=2");
    }

    #[test]
    fn test_page_index_never_negative() {
        let params = UrlParams::new("https://site.test").page(0);
        assert_eq!(expand("?i={{pageIndex}}", &params), "https://site.test?i=0");
    }

    #[test]
    fn test_key_aliases_share_encoding() {
        let params = UrlParams::new("https://site.test").key("魔法 & co");
        let url = expand("/s?a={{key}}&b={{keyword}}&c={{searchKey}}", &params);
        let encoded = "%E9%AD%94%E6%B3%95+%26+co";
        assert_eq!(url, format!("https://site.test/s?a={0}&b={0}&c={0}", encoded));
    }

    #[test]
    fn test_unknown_placeholders_left_verbatim() {
        let params = UrlParams::new("https://site.test");
        assert_eq!(
            expand("/s?q={{key}}&x={{other}}", &params),
            "https://site.test/s?q={{key}}&x={{other}}"
        );
    }

    #[test]
    fn test_encoding_keeps_unreserved() {
        assert_eq!(encode_query_value("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(encode_query_value("x/y?z"), "x%2Fy%3Fz");
    }

    #[test]
    fn test_to_absolute_url() {
        let base = "https://site.test/";
        assert_eq!(to_absolute_url("https://other.test/a", base), "https://other.test/a");
        assert_eq!(to_absolute_url("//cdn.test/img.png", base), "https://cdn.test/img.png");
        assert_eq!(to_absolute_url("/novel/x", base), "https://site.test/novel/x");
        assert_eq!(to_absolute_url("?page=2", base), "https://site.test?page=2");
        assert_eq!(to_absolute_url("novel/x", base), "https://site.test/novel/x");
        assert_eq!(to_absolute_url("   ", base), "");
    }

    #[test]
    fn test_absolutization_is_idempotent() {
        let base = "https://site.test";
        for url in ["/a/b", "c", "//cdn.test/x", "https://site.test/d", "?q=1"] {
            let once = to_absolute_url(url, base);
            assert_eq!(to_absolute_url(&once, base), once);
        }
    }
}
