use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::app::{CatalogError, Result};
use crate::source::source_id;

/// Version component mixed into user source ids.
pub const USER_SOURCE_VERSION: i64 = 1;

/// A scraping target described entirely by rules.
///
/// Missing keys take their [`Default`] values, so an imported source is
/// enabled unless it says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSource {
    pub source_name: String,
    pub source_url: String,
    pub source_group: String,
    pub lang: String,
    pub comment: String,
    pub enabled: bool,
    /// Fetch pages through the browser engine.
    pub enabled_browser: bool,
    /// JSON object of extra request headers.
    pub header: String,
    pub search_url: String,
    /// Listing template used for popular and latest.
    pub explore_url: String,
    pub search: SearchRule,
    pub book_info: BookInfoRule,
    pub toc: TocRule,
    pub content: ContentRule,
}

impl Default for UserSource {
    fn default() -> Self {
        Self {
            source_name: String::new(),
            source_url: String::new(),
            source_group: String::new(),
            lang: String::new(),
            comment: String::new(),
            enabled: true,
            enabled_browser: false,
            header: String::new(),
            search_url: String::new(),
            explore_url: String::new(),
            search: SearchRule::default(),
            book_info: BookInfoRule::default(),
            toc: TocRule::default(),
            content: ContentRule::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRule {
    pub book_list: String,
    pub name: String,
    pub author: String,
    pub intro: String,
    pub kind: String,
    pub last_chapter: String,
    pub book_url: String,
    pub cover_url: String,
    pub word_count: String,
    /// Selector whose presence means another page exists.
    pub next_page: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookInfoRule {
    pub name: String,
    pub author: String,
    pub intro: String,
    pub kind: String,
    pub cover_url: String,
    /// Link to a separate chapter list page.
    pub toc_url: String,
    pub status: String,
    pub last_chapter: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TocRule {
    pub chapter_list: String,
    pub chapter_name: String,
    pub chapter_url: String,
    pub update_time: String,
    pub next_toc_url: String,
    pub reverse: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentRule {
    pub content: String,
    pub title: String,
    pub next_content_url: String,
    /// Elements removed before text is collected.
    pub purify: String,
    /// `pattern##replacement` applied to each paragraph.
    pub replace_regex: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<UserSource>),
    One(Box<UserSource>),
}

impl UserSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            source_name: name.into(),
            source_url: url.into(),
            lang: lang.into(),
            ..Default::default()
        }
    }

    pub fn id(&self) -> i64 {
        source_id(&self.source_name, &self.lang, USER_SOURCE_VERSION)
    }

    pub fn base_url(&self) -> &str {
        self.source_url.trim().trim_end_matches('/')
    }

    /// Parse the `header` JSON; an unparseable value yields no headers.
    pub fn headers(&self) -> BTreeMap<String, String> {
        if self.header.trim().is_empty() {
            return BTreeMap::new();
        }
        match serde_json::from_str::<BTreeMap<String, String>>(&self.header) {
            Ok(headers) => headers,
            Err(e) => {
                tracing::warn!(source = %self.source_name, error = %e, "Ignoring malformed header JSON");
                BTreeMap::new()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_name.trim().is_empty() {
            return Err(CatalogError::Parse("user source has no name".into()));
        }
        let url = self.source_url.trim();
        if url.is_empty() {
            return Err(CatalogError::Parse(format!("user source '{}' has no URL", self.source_name)));
        }
        url::Url::parse(url)?;
        Ok(())
    }

    /// Import one source or an array of sources, validating each.
    pub fn from_json(json: &str) -> Result<Vec<UserSource>> {
        let sources = match serde_json::from_str::<OneOrMany>(json.trim())? {
            OneOrMany::Many(sources) => sources,
            OneOrMany::One(source) => vec![*source],
        };
        for source in &sources {
            source.validate()?;
        }
        Ok(sources)
    }

    pub fn export_json(sources: &[UserSource]) -> Result<String> {
        Ok(serde_json::to_string_pretty(sources)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &str = r#"{
        "sourceName": "Site",
        "sourceUrl": "https://site.test/",
        "lang": "en",
        "enabled": true,
        "searchUrl": "{{baseUrl}}/?s={{key}}",
        "search": { "bookList": "div.item", "name": "h3 a", "bookUrl": "h3 a@href" },
        "toc": { "chapterList": "li.chapter", "reverse": true }
    }"#;

    #[test]
    fn test_import_single_object() {
        let sources = UserSource::from_json(SINGLE).unwrap();
        assert_eq!(sources.len(), 1);
        let source = &sources[0];
        assert_eq!(source.source_name, "Site");
        assert_eq!(source.search.book_list, "div.item");
        assert!(source.toc.reverse);
        assert_eq!(source.content.content, "");
        assert_eq!(source.base_url(), "https://site.test");
    }

    #[test]
    fn test_import_without_enabled_key_is_enabled() {
        let sources = UserSource::from_json(r#"{"sourceName": "Bare", "sourceUrl": "https://bare.test"}"#).unwrap();
        assert!(sources[0].enabled);
        assert!(!sources[0].enabled_browser);

        let off = UserSource::from_json(r#"{"sourceName": "Off", "sourceUrl": "https://off.test", "enabled": false}"#).unwrap();
        assert!(!off[0].enabled);
    }

    #[test]
    fn test_import_array_and_export() {
        let json = format!("[{}, {}]", SINGLE, SINGLE.replace("\"Site\"", "\"Other\""));
        let sources = UserSource::from_json(&json).unwrap();
        assert_eq!(sources.len(), 2);

        let exported = UserSource::export_json(&sources).unwrap();
        assert!(exported.trim_start().starts_with('['));
        assert!(exported.contains("\"sourceName\": \"Other\""));
        assert_eq!(UserSource::from_json(&exported).unwrap(), sources);
    }

    #[test]
    fn test_validation_rejects_blank_name_or_url() {
        assert!(UserSource::from_json(r#"{"sourceUrl": "https://x.test"}"#).is_err());
        assert!(UserSource::from_json(r#"{"sourceName": "x"}"#).is_err());
        assert!(UserSource::from_json(r#"{"sourceName": "x", "sourceUrl": "not a url"}"#).is_err());
        assert!(UserSource::from_json("not json").is_err());
    }

    #[test]
    fn test_id_depends_on_name_and_lang() {
        let a = UserSource::new("Site", "https://site.test", "en");
        let b = UserSource::new("site", "https://elsewhere.test", "en");
        let c = UserSource::new("Site", "https://site.test", "fr");
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert!(a.id() >= 0);
    }

    #[test]
    fn test_headers() {
        let mut source = UserSource::new("Site", "https://site.test", "en");
        source.header = r#"{"Referer": "https://site.test/"}"#.into();
        assert_eq!(source.headers().get("Referer").map(String::as_str), Some("https://site.test/"));

        source.header = "{broken".into();
        assert!(source.headers().is_empty());
    }
}
