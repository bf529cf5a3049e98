use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CHAPTER_NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:chapter|chap|ch\.?|episode|ep\.?|第|제)\s*(\d+(?:\.\d+)?)")
        .expect("chapter number regex is valid")
});

static FIRST_NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("number regex is valid"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub key: String,
    pub name: String,
    /// Upload time in milliseconds since the epoch, 0 when unknown.
    pub date_upload: i64,
    /// Chapter number, -1 when unknown.
    pub number: f32,
    pub scanlator: String,
}

impl ChapterInfo {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let number = extract_chapter_number(&name).unwrap_or(-1.0);
        Self {
            key: key.into(),
            name,
            date_upload: 0,
            number,
            scanlator: String::new(),
        }
    }
}

/// A page of chapters plus whether more remain unfetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaptersPage {
    pub chapters: Vec<ChapterInfo>,
    pub has_next_page: bool,
}

impl ChaptersPage {
    pub fn new(chapters: Vec<ChapterInfo>, has_next_page: bool) -> Self {
        Self {
            chapters,
            has_next_page,
        }
    }
}

/// Pull the chapter number out of a chapter title.
pub fn extract_chapter_number(text: &str) -> Option<f32> {
    CHAPTER_NUMBER_REGEX
        .captures(text)
        .or_else(|| FIRST_NUMBER_REGEX.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
}
