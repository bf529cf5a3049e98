use serde::{Deserialize, Serialize};

/// Publication status of a book, with the numeric codes sources exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MangaStatus {
    #[default]
    Unknown,
    Ongoing,
    Completed,
    Licensed,
    PublishingFinished,
    Cancelled,
    OnHiatus,
}

impl MangaStatus {
    pub fn code(self) -> i64 {
        match self {
            MangaStatus::Unknown => 0,
            MangaStatus::Ongoing => 1,
            MangaStatus::Completed => 2,
            MangaStatus::Licensed => 3,
            MangaStatus::PublishingFinished => 4,
            MangaStatus::Cancelled => 5,
            MangaStatus::OnHiatus => 6,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MangaStatus::Ongoing,
            2 => MangaStatus::Completed,
            3 => MangaStatus::Licensed,
            4 => MangaStatus::PublishingFinished,
            5 => MangaStatus::Cancelled,
            6 => MangaStatus::OnHiatus,
            _ => MangaStatus::Unknown,
        }
    }

    /// Map the free-form status text sites print to a status.
    pub fn parse(text: &str) -> Self {
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return MangaStatus::Unknown;
        }

        const HIATUS: &[&str] = &["hiatus", "paused", "暂停", "休刊"];
        const CANCELLED: &[&str] = &["cancel", "dropped", "discontinued", "断更", "太监"];
        const FINISHED: &[&str] = &["publishing finished", "finished publishing"];
        const COMPLETED: &[&str] = &["complete", "finished", "完结", "完本", "已完结", "완결"];
        const ONGOING: &[&str] = &["ongoing", "on going", "updating", "连载", "連載", "연재"];
        const LICENSED: &[&str] = &["licensed", "license"];

        let matches = |words: &[&str]| words.iter().any(|w| text.contains(w));

        if matches(HIATUS) {
            MangaStatus::OnHiatus
        } else if matches(CANCELLED) {
            MangaStatus::Cancelled
        } else if matches(FINISHED) {
            MangaStatus::PublishingFinished
        } else if matches(ONGOING) {
            MangaStatus::Ongoing
        } else if matches(COMPLETED) {
            MangaStatus::Completed
        } else if matches(LICENSED) {
            MangaStatus::Licensed
        } else {
            MangaStatus::Unknown
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MangaInfo {
    /// Absolute URL (or source-specific key) identifying the book.
    pub key: String,
    pub title: String,
    pub artist: String,
    pub author: String,
    pub description: String,
    pub genres: Vec<String>,
    pub status: MangaStatus,
    pub cover: String,
}

impl MangaInfo {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Fill blank fields of `self` from `previous`, keeping the key of `previous`.
    pub fn merged_over(mut self, previous: &MangaInfo) -> Self {
        fn keep(field: &mut String, old: &str) {
            if field.trim().is_empty() {
                *field = old.to_string();
            }
        }

        self.key = previous.key.clone();
        keep(&mut self.title, &previous.title);
        keep(&mut self.artist, &previous.artist);
        keep(&mut self.author, &previous.author);
        keep(&mut self.description, &previous.description);
        keep(&mut self.cover, &previous.cover);
        if self.genres.is_empty() {
            self.genres = previous.genres.clone();
        }
        if self.status == MangaStatus::Unknown {
            self.status = previous.status;
        }
        self
    }
}

/// One page of book listing results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BooksPage {
    pub items: Vec<MangaInfo>,
    pub has_next_page: bool,
}

impl BooksPage {
    pub fn new(items: Vec<MangaInfo>, has_next_page: bool) -> Self {
        Self {
            items,
            has_next_page,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}
