use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;

use crate::app::{CatalogError, Result};
use crate::domain::filter::query_of;
use crate::domain::{BooksPage, ChapterInfo, ChaptersPage, Filter, MangaInfo, Page};
use crate::rule::{element_text, get_strings, parse_document};
use crate::source::parse::off_thread;
use crate::source::{CatalogSource, Source};

pub const LOCAL_SOURCE_ID: i64 = 0;
pub const LOCAL_SOURCE_NAME: &str = "Local source";

const BOOKS_PER_PAGE: usize = 20;
const CHAPTER_EXTENSIONS: &[&str] = &["txt", "html", "htm"];
const COVER_NAMES: &[&str] = &["cover.jpg", "cover.jpeg", "cover.png", "cover.webp"];

/// Offline books read from a library directory.
///
/// Every sub-directory is a book and every text or HTML file inside it is a
/// chapter. Keys are paths relative to the library root.
pub struct LocalSource {
    root: PathBuf,
}

struct BookDir {
    name: String,
    modified: SystemTime,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path inside the library, rejecting anything that escapes it.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim());
        let valid = !key.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(CatalogError::Parse(format!("invalid local key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    async fn book_dirs(&self) -> Result<Vec<BookDir>> {
        let mut books = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(books),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    books.push(BookDir {
                        name: name.to_string(),
                        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }

        books.sort_by(|a, b| natural_cmp(&a.name, &b.name));
        Ok(books)
    }

    async fn book_info(&self, name: &str) -> Result<MangaInfo> {
        let dir = self.resolve(name)?;
        let mut book = MangaInfo::new(name, name);

        match fs::read_to_string(dir.join("description.txt")).await {
            Ok(description) => book.description = description.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        for cover in COVER_NAMES {
            let path = dir.join(cover);
            if fs::try_exists(&path).await.unwrap_or(false) {
                book.cover = format!("file://{}", path.display());
                break;
            }
        }

        Ok(book)
    }

    async fn page_of(&self, books: Vec<BookDir>, page: u32) -> Result<BooksPage> {
        let start = (page.max(1) as usize - 1) * BOOKS_PER_PAGE;
        let has_next_page = books.len() > start + BOOKS_PER_PAGE;

        let mut items = Vec::new();
        for book in books.iter().skip(start).take(BOOKS_PER_PAGE) {
            items.push(self.book_info(&book.name).await?);
        }
        Ok(BooksPage::new(items, has_next_page))
    }
}

impl Source for LocalSource {
    fn id(&self) -> i64 {
        LOCAL_SOURCE_ID
    }

    fn name(&self) -> &str {
        LOCAL_SOURCE_NAME
    }

    fn lang(&self) -> &str {
        "other"
    }

    fn supports_latest(&self) -> bool {
        true
    }
}

#[async_trait]
impl CatalogSource for LocalSource {
    async fn fetch_latest_updates(&self, page: u32) -> Result<BooksPage> {
        let mut books = self.book_dirs().await?;
        books.sort_by(|a, b| b.modified.cmp(&a.modified));
        self.page_of(books, page).await
    }

    async fn fetch_popular(&self, page: u32) -> Result<BooksPage> {
        let books = self.book_dirs().await?;
        self.page_of(books, page).await
    }

    async fn search(&self, filters: &[Filter], page: u32) -> Result<BooksPage> {
        let query = query_of(filters).ok_or(CatalogError::EmptyQuery)?.to_lowercase();
        let books = self
            .book_dirs()
            .await?
            .into_iter()
            .filter(|book| book.name.to_lowercase().contains(&query))
            .collect();
        self.page_of(books, page).await
    }

    async fn get_book_details(&self, book: &MangaInfo) -> Result<MangaInfo> {
        Ok(self.book_info(&book.key).await?.merged_over(book))
    }

    async fn get_chapter_list(&self, book: &MangaInfo) -> Result<ChaptersPage> {
        let dir = self.resolve(&book.key)?;
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_chapter = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| CHAPTER_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_chapter {
                if let Some(file_name) = entry.file_name().to_str() {
                    files.push(file_name.to_string());
                }
            }
        }
        files.sort_by(|a, b| natural_cmp(a, b));

        let chapters = files
            .into_iter()
            .map(|file| {
                let stem = Path::new(&file)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(&file)
                    .to_string();
                ChapterInfo::new(format!("{}/{}", book.key.trim(), file), stem)
            })
            .collect();

        Ok(ChaptersPage::new(chapters, false))
    }

    async fn get_page_list(&self, chapter: &ChapterInfo) -> Result<Vec<Page>> {
        let path = self.resolve(&chapter.key)?;
        let text = fs::read_to_string(&path).await?;

        let is_html = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
            .unwrap_or(false);

        if is_html {
            return off_thread(move || html_pages(&text)).await;
        }

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Page::text)
            .collect())
    }
}

fn html_pages(html: &str) -> Vec<Page> {
    let document = parse_document(html);
    let root = document.root_element();
    let paragraphs = get_strings(root, "p");
    if paragraphs.is_empty() {
        let text = element_text(root);
        return if text.is_empty() { Vec::new() } else { vec![Page::text(text)] };
    }
    paragraphs.into_iter().map(Page::text).collect()
}

/// Compare names treating digit runs as numbers, so "2" sorts before "10".
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();

    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut x_num = String::new();
                while let Some(c) = a_chars.peek().copied().filter(char::is_ascii_digit) {
                    x_num.push(c);
                    a_chars.next();
                }
                let mut y_num = String::new();
                while let Some(c) = b_chars.peek().copied().filter(char::is_ascii_digit) {
                    y_num.push(c);
                    b_chars.next();
                }
                let x_trimmed = x_num.trim_start_matches('0');
                let y_trimmed = y_num.trim_start_matches('0');
                let ordering = x_trimmed
                    .len()
                    .cmp(&y_trimmed.len())
                    .then_with(|| x_trimmed.cmp(y_trimmed));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.to_lowercase().cmp(y.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                a_chars.next();
                b_chars.next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library() -> TempDir {
        let dir = TempDir::new().unwrap();
        let book = dir.path().join("Dune");
        std::fs::create_dir(&book).unwrap();
        std::fs::write(book.join("description.txt"), "  Spice.  ").unwrap();
        std::fs::write(book.join("cover.png"), b"png").unwrap();
        std::fs::write(book.join("Chapter 10.txt"), "Ten").unwrap();
        std::fs::write(book.join("Chapter 2.txt"), "Line a\n\nLine b\n").unwrap();
        std::fs::write(book.join("Chapter 1.html"), "<p>One</p><p>Uno</p>").unwrap();
        std::fs::write(book.join("notes.md"), "ignored").unwrap();

        std::fs::create_dir(dir.path().join("Emma")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), "not a book").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_lists_book_directories() {
        let dir = library();
        let source = LocalSource::new(dir.path());

        let page = source.fetch_popular(1).await.unwrap();
        let titles: Vec<&str> = page.items.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Dune", "Emma"]);
        assert!(!page.has_next_page);
        assert_eq!(page.items[0].description, "Spice.");
        assert!(page.items[0].cover.starts_with("file://"));
    }

    #[tokio::test]
    async fn test_paginates_by_twenty() {
        let dir = TempDir::new().unwrap();
        for i in 0..25 {
            std::fs::create_dir(dir.path().join(format!("Book {}", i))).unwrap();
        }
        let source = LocalSource::new(dir.path());

        let first = source.fetch_popular(1).await.unwrap();
        assert_eq!(first.items.len(), 20);
        assert!(first.has_next_page);
        assert_eq!(first.items[2].title, "Book 2");

        let second = source.fetch_popular(2).await.unwrap();
        assert_eq!(second.items.len(), 5);
        assert!(!second.has_next_page);
    }

    #[tokio::test]
    async fn test_search_filters_by_name() {
        let dir = library();
        let source = LocalSource::new(dir.path());
        let page = source.search(&[Filter::Title("dun".into())], 1).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(source.search(&[], 1).await.is_err());
    }

    #[tokio::test]
    async fn test_chapters_in_natural_order_and_content() {
        let dir = library();
        let source = LocalSource::new(dir.path());
        let book = MangaInfo::new("Dune", "Dune");

        let chapters = source.get_chapter_list(&book).await.unwrap().chapters;
        let names: Vec<&str> = chapters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Chapter 1", "Chapter 2", "Chapter 10"]);
        assert_eq!(chapters[2].number, 10.0);

        let html = source.get_page_list(&chapters[0]).await.unwrap();
        assert_eq!(html, vec![Page::text("One"), Page::text("Uno")]);

        let text = source.get_page_list(&chapters[1]).await.unwrap();
        assert_eq!(text, vec![Page::text("Line a"), Page::text("Line b")]);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = library();
        let source = LocalSource::new(dir.path().join("Dune"));
        let escape = ChapterInfo::new("../stray.txt", "x");
        assert!(source.get_page_list(&escape).await.is_err());
        let absolute = MangaInfo::new("/etc", "x");
        assert!(source.get_chapter_list(&absolute).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_library_is_empty() {
        let dir = TempDir::new().unwrap();
        let source = LocalSource::new(dir.path().join("nope"));
        assert!(source.fetch_popular(1).await.unwrap().items.is_empty());
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("a2", "a10"), Ordering::Less);
        assert_eq!(natural_cmp("a010", "a10"), Ordering::Equal);
        assert_eq!(natural_cmp("B", "a"), Ordering::Greater);
    }
}
