//! Native sources assembled from declarative fetcher definitions.

use async_trait::async_trait;
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::{CatalogError, Result};
use crate::domain::filter::{query_of, sort_of};
use crate::domain::{BooksPage, ChapterInfo, ChaptersPage, Filter, MangaInfo, MangaStatus, Page};
use crate::rule::{encode_query_value, get_elements, get_string, get_strings, parse_document, to_absolute_url};
use crate::source::http::{FetchMode, HttpSource};
use crate::source::parse::{off_thread, parse_date_millis, split_genres};
use crate::source::{CatalogSource, Dependencies, Source, source_id};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    Search,
    Latest,
    #[default]
    Others,
}

/// One listing endpoint: popular, latest, search, or a sort order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExploreFetcher {
    pub key: String,
    /// Path with `{page}` and `{query}` placeholders.
    pub endpoint: String,
    pub selector: String,
    pub kind: FetcherKind,
    pub name_selector: String,
    pub name_att: String,
    pub link_selector: String,
    pub link_att: String,
    pub cover_selector: String,
    pub cover_att: String,
    pub next_page_selector: String,
    pub next_page_att: String,
    pub next_page_value: Option<String>,
    /// Last page number, -1 when unbounded.
    pub max_page: i32,
    pub infinite_page: bool,
}

impl Default for ExploreFetcher {
    fn default() -> Self {
        Self {
            key: String::new(),
            endpoint: String::new(),
            selector: String::new(),
            kind: FetcherKind::Others,
            name_selector: String::new(),
            name_att: String::new(),
            link_selector: String::new(),
            link_att: "href".to_string(),
            cover_selector: String::new(),
            cover_att: "src".to_string(),
            next_page_selector: String::new(),
            next_page_att: String::new(),
            next_page_value: None,
            max_page: -1,
            infinite_page: false,
        }
    }
}

impl ExploreFetcher {
    fn has_next_page(&self, root: ElementRef<'_>, page: u32) -> bool {
        if self.infinite_page {
            return true;
        }
        if self.max_page != -1 {
            return i64::from(page) < i64::from(self.max_page);
        }
        if self.next_page_selector.trim().is_empty() {
            return false;
        }

        let text = get_string(root, &rule(&self.next_page_selector, &self.next_page_att));
        match &self.next_page_value {
            Some(expected) => text == expected.trim(),
            None => !text.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetailFetcher {
    pub name_selector: String,
    pub name_att: String,
    pub cover_selector: String,
    pub cover_att: String,
    pub description_selector: String,
    pub description_att: String,
    pub author_selector: String,
    pub author_att: String,
    pub category_selector: String,
    pub category_att: String,
    pub status_selector: String,
    pub status_att: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterFetcher {
    pub selector: String,
    pub reverse_chapter_list: bool,
    pub link_selector: String,
    pub link_att: String,
    pub name_selector: String,
    pub name_att: String,
    pub number_selector: String,
    pub number_att: String,
    pub upload_date_selector: String,
    pub upload_date_att: String,
    pub translator_selector: String,
    pub translator_att: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentFetcher {
    pub page_title_selector: String,
    pub page_title_att: String,
    pub page_content_selector: String,
    pub page_content_att: String,
}

/// Serializable description of a [`FactorySource`], stored as `factory.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FactoryDefinition {
    pub name: String,
    pub lang: String,
    pub base_url: String,
    pub version_id: i64,
    pub explore_fetchers: Vec<ExploreFetcher>,
    pub detail: DetailFetcher,
    pub chapters: ChapterFetcher,
    pub content: ContentFetcher,
}

impl Default for FactoryDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            lang: "en".to_string(),
            base_url: String::new(),
            version_id: 1,
            explore_fetchers: Vec::new(),
            detail: DetailFetcher::default(),
            chapters: ChapterFetcher::default(),
            content: ContentFetcher::default(),
        }
    }
}

/// Join a selector with an optional attribute into a rule string.
fn rule(selector: &str, att: &str) -> String {
    let (selector, att) = (selector.trim(), att.trim());
    if att.is_empty() {
        selector.to_string()
    } else {
        format!("{}@{}", selector, att)
    }
}

pub struct FactorySource {
    id: i64,
    definition: FactoryDefinition,
    http: HttpSource,
}

impl FactorySource {
    pub fn new(definition: FactoryDefinition, deps: &Dependencies) -> Self {
        let http = HttpSource::new(definition.base_url.clone(), deps);
        Self {
            id: source_id(&definition.name, &definition.lang, definition.version_id),
            definition,
            http,
        }
    }

    pub fn from_json(json: &str, deps: &Dependencies) -> Result<Self> {
        let definition: FactoryDefinition = serde_json::from_str(json)?;
        if definition.name.trim().is_empty() || definition.base_url.trim().is_empty() {
            return Err(CatalogError::Parse("factory definition needs a name and base URL".into()));
        }
        Ok(Self::new(definition, deps))
    }

    pub fn definition(&self) -> &FactoryDefinition {
        &self.definition
    }

    fn listing_fetchers(&self) -> impl Iterator<Item = &ExploreFetcher> {
        self.definition
            .explore_fetchers
            .iter()
            .filter(|f| f.kind != FetcherKind::Search)
    }

    async fn get_lists(&self, fetcher: &ExploreFetcher, page: u32, query: &str) -> Result<BooksPage> {
        if fetcher.selector.trim().is_empty() {
            return Ok(BooksPage::empty());
        }

        let endpoint = fetcher
            .endpoint
            .replace("{page}", &page.to_string())
            .replace("{query}", &encode_query_value(query));
        let url = to_absolute_url(&endpoint, self.http.base_url());

        let body = self.http.fetch_text(&url, &FetchMode::Http).await?;
        let fetcher = fetcher.clone();
        let base = self.http.base_url().to_string();
        off_thread(move || parse_listing(&body, &fetcher, &base, page)).await
    }
}

fn parse_listing(html: &str, fetcher: &ExploreFetcher, base: &str, page: u32) -> BooksPage {
    let document = parse_document(html);
    let root = document.root_element();

    let name_rule = rule(&fetcher.name_selector, &fetcher.name_att);
    let link_rule = rule(&fetcher.link_selector, &fetcher.link_att);
    let cover_rule = rule(&fetcher.cover_selector, &fetcher.cover_att);

    let items: Vec<MangaInfo> = get_elements(root, &fetcher.selector)
        .into_iter()
        .filter_map(|element| {
            let title = get_string(element, &name_rule);
            let link = get_string(element, &link_rule);
            if title.is_empty() || link.is_empty() {
                debug!(fetcher = %fetcher.key, "Skipping book without key or title");
                return None;
            }
            let mut book = MangaInfo::new(to_absolute_url(&link, base), title);
            let cover = get_string(element, &cover_rule);
            if !cover.is_empty() {
                book.cover = to_absolute_url(&cover, base);
            }
            Some(book)
        })
        .collect();

    if items.is_empty() {
        return BooksPage::empty();
    }
    BooksPage::new(items, fetcher.has_next_page(root, page))
}

fn parse_detail(html: &str, fetcher: &DetailFetcher, base: &str) -> MangaInfo {
    let document = parse_document(html);
    let root = document.root_element();

    let cover = get_string(root, &rule(&fetcher.cover_selector, &fetcher.cover_att));
    MangaInfo {
        title: get_string(root, &rule(&fetcher.name_selector, &fetcher.name_att)),
        author: get_string(root, &rule(&fetcher.author_selector, &fetcher.author_att)),
        description: get_strings(root, &rule(&fetcher.description_selector, &fetcher.description_att)).join("\n"),
        genres: split_genres(get_strings(root, &rule(&fetcher.category_selector, &fetcher.category_att))),
        status: MangaStatus::parse(&get_string(root, &rule(&fetcher.status_selector, &fetcher.status_att))),
        cover: if cover.is_empty() { cover } else { to_absolute_url(&cover, base) },
        ..Default::default()
    }
}

fn parse_chapters(html: &str, fetcher: &ChapterFetcher, base: &str) -> Vec<ChapterInfo> {
    if fetcher.selector.trim().is_empty() {
        return Vec::new();
    }

    let document = parse_document(html);
    let root = document.root_element();

    let link_rule = rule(&fetcher.link_selector, &fetcher.link_att);
    let name_rule = rule(&fetcher.name_selector, &fetcher.name_att);

    let mut chapters: Vec<ChapterInfo> = get_elements(root, &fetcher.selector)
        .into_iter()
        .filter_map(|element| {
            let link = get_string(element, &link_rule);
            let name = get_string(element, &name_rule);
            if link.is_empty() || name.is_empty() {
                debug!("Skipping chapter without link or name");
                return None;
            }

            let mut chapter = ChapterInfo::new(to_absolute_url(&link, base), name);
            if let Ok(number) = get_string(element, &rule(&fetcher.number_selector, &fetcher.number_att)).parse() {
                chapter.number = number;
            }
            chapter.date_upload =
                parse_date_millis(&get_string(element, &rule(&fetcher.upload_date_selector, &fetcher.upload_date_att)));
            chapter.scanlator = get_string(element, &rule(&fetcher.translator_selector, &fetcher.translator_att));
            Some(chapter)
        })
        .collect();

    if fetcher.reverse_chapter_list {
        chapters.reverse();
    }
    chapters
}

fn parse_content(html: &str, fetcher: &ContentFetcher) -> Vec<Page> {
    let document = parse_document(html);
    let root = document.root_element();

    let title = get_string(root, &rule(&fetcher.page_title_selector, &fetcher.page_title_att));
    let paragraphs = get_strings(root, &rule(&fetcher.page_content_selector, &fetcher.page_content_att));

    let mut pages = Vec::with_capacity(paragraphs.len() + 1);
    if !title.is_empty() {
        pages.push(Page::text(title));
    }
    pages.extend(paragraphs.into_iter().map(Page::text));
    pages
}

impl Source for FactorySource {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.definition.name
    }

    fn lang(&self) -> &str {
        &self.definition.lang
    }

    fn supports_latest(&self) -> bool {
        self.definition
            .explore_fetchers
            .iter()
            .any(|f| f.kind == FetcherKind::Latest)
    }
}

#[async_trait]
impl CatalogSource for FactorySource {
    async fn fetch_latest_updates(&self, page: u32) -> Result<BooksPage> {
        let latest = self
            .definition
            .explore_fetchers
            .iter()
            .find(|f| f.kind == FetcherKind::Latest);
        match latest {
            Some(fetcher) => self.get_lists(fetcher, page, "").await,
            None => Ok(BooksPage::empty()),
        }
    }

    async fn fetch_popular(&self, page: u32) -> Result<BooksPage> {
        match self.listing_fetchers().next() {
            Some(fetcher) => self.get_lists(fetcher, page, "").await,
            None => Ok(BooksPage::empty()),
        }
    }

    async fn search(&self, filters: &[Filter], page: u32) -> Result<BooksPage> {
        if let Some(query) = query_of(filters) {
            let search = self
                .definition
                .explore_fetchers
                .iter()
                .find(|f| f.kind == FetcherKind::Search);
            return match search {
                Some(fetcher) => self.get_lists(fetcher, page, query).await,
                None => Ok(BooksPage::empty()),
            };
        }

        match sort_of(filters) {
            Some(index) => match self.listing_fetchers().nth(index) {
                Some(fetcher) => self.get_lists(fetcher, page, "").await,
                None => Ok(BooksPage::empty()),
            },
            None => Err(CatalogError::EmptyQuery),
        }
    }

    async fn get_book_details(&self, book: &MangaInfo) -> Result<MangaInfo> {
        let body = self.http.fetch_text(&book.key, &FetchMode::Http).await?;
        let fetcher = self.definition.detail.clone();
        let base = self.http.base_url().to_string();
        let details = off_thread(move || parse_detail(&body, &fetcher, &base)).await?;
        Ok(details.merged_over(book))
    }

    async fn get_chapter_list(&self, book: &MangaInfo) -> Result<ChaptersPage> {
        let body = self.http.fetch_text(&book.key, &FetchMode::Http).await?;
        let fetcher = self.definition.chapters.clone();
        let base = self.http.base_url().to_string();
        let chapters = off_thread(move || parse_chapters(&body, &fetcher, &base)).await?;
        Ok(ChaptersPage::new(chapters, false))
    }

    async fn get_page_list(&self, chapter: &ChapterInfo) -> Result<Vec<Page>> {
        let body = self.http.fetch_text(&chapter.key, &FetchMode::Http).await?;
        let fetcher = self.definition.content.clone();
        off_thread(move || parse_content(&body, &fetcher)).await
    }
}
