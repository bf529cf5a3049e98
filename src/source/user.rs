use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Selector};
use tracing::{debug, warn};

use crate::app::{CatalogError, Result};
use crate::domain::filter::query_of;
use crate::domain::{BooksPage, ChapterInfo, ChaptersPage, Filter, MangaInfo, MangaStatus, Page};
use crate::rule::{
    UrlParams, collapse_whitespace, element_text, expand, get_elements, get_string, get_strings, parse_document,
    to_absolute_url,
};
use crate::source::http::{FetchMode, HttpSource};
use crate::source::parse::{off_thread, parse_date_millis, split_genres};
use crate::source::{CatalogSource, Dependencies, Source};
use crate::usersource::{BookInfoRule, ContentRule, SearchRule, TocRule, UserSource};

const MAX_TOC_PAGES: usize = 50;
const MAX_CONTENT_PAGES: usize = 20;

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "blockquote", "pre", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
];

/// Runs a [`UserSource`] definition against its site.
pub struct UserSourceRuntime {
    id: i64,
    definition: UserSource,
    http: HttpSource,
}

impl UserSourceRuntime {
    pub fn new(definition: UserSource, deps: &Dependencies) -> Self {
        let http = HttpSource::new(definition.base_url(), deps).with_headers(definition.headers());
        Self {
            id: definition.id(),
            definition,
            http,
        }
    }

    pub fn definition(&self) -> &UserSource {
        &self.definition
    }

    fn mode(&self, wait_rule: &str) -> FetchMode {
        if self.definition.enabled_browser {
            FetchMode::Browser {
                wait_for: wait_selector(wait_rule),
            }
        } else {
            FetchMode::Http
        }
    }

    async fn fetch(&self, url: &str, wait_rule: &str) -> Result<String> {
        self.http.fetch_text(url, &self.mode(wait_rule)).await
    }

    async fn fetch_listing(&self, template: &str, page: u32, key: Option<&str>) -> Result<BooksPage> {
        if template.trim().is_empty() {
            return Ok(BooksPage::empty());
        }

        let mut params = UrlParams::new(self.http.base_url()).page(page);
        if let Some(key) = key {
            params = params.key(key);
        }
        let url = expand(template, &params);
        let paged = template.contains("{{page}}") || template.contains("{{pageIndex}}");

        let body = self.fetch(&url, &self.definition.search.book_list).await?;
        let rule = self.definition.search.clone();
        let base = self.http.base_url().to_string();
        off_thread(move || parse_book_list(&body, &rule, &base, paged)).await
    }

    async fn fetch_toc(&self, first_url: String) -> Result<Vec<ChapterInfo>> {
        let mut chapters = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(first_url);

        while let Some(url) = next.take() {
            if visited.len() >= MAX_TOC_PAGES || !visited.insert(url.clone()) {
                break;
            }

            let body = self.fetch(&url, &self.definition.toc.chapter_list).await?;
            let rule = self.definition.toc.clone();
            let base = self.http.base_url().to_string();
            let (batch, next_url) = off_thread(move || parse_toc_page(&body, &rule, &base)).await?;

            debug!(url = %url, count = batch.len(), "Parsed chapter list page");
            chapters.extend(batch);
            next = next_url;
        }

        if self.definition.toc.reverse {
            chapters.reverse();
        }
        Ok(chapters)
    }
}

impl Source for UserSourceRuntime {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.definition.source_name
    }

    fn lang(&self) -> &str {
        &self.definition.lang
    }

    fn supports_latest(&self) -> bool {
        !self.definition.explore_url.trim().is_empty()
    }
}

#[async_trait]
impl CatalogSource for UserSourceRuntime {
    async fn fetch_latest_updates(&self, page: u32) -> Result<BooksPage> {
        self.fetch_listing(&self.definition.explore_url, page, None).await
    }

    async fn fetch_popular(&self, page: u32) -> Result<BooksPage> {
        self.fetch_listing(&self.definition.explore_url, page, None).await
    }

    async fn search(&self, filters: &[Filter], page: u32) -> Result<BooksPage> {
        let query = query_of(filters).ok_or(CatalogError::EmptyQuery)?;
        self.fetch_listing(&self.definition.search_url, page, Some(query)).await
    }

    async fn get_book_details(&self, book: &MangaInfo) -> Result<MangaInfo> {
        let body = self.fetch(&book.key, &self.definition.book_info.name).await?;
        let rule = self.definition.book_info.clone();
        let base = self.http.base_url().to_string();
        let (details, _) = off_thread(move || parse_book_details(&body, &rule, &base)).await?;
        Ok(details.merged_over(book))
    }

    async fn get_chapter_list(&self, book: &MangaInfo) -> Result<ChaptersPage> {
        let toc_url = if self.definition.book_info.toc_url.trim().is_empty() {
            book.key.clone()
        } else {
            let body = self.fetch(&book.key, &self.definition.book_info.toc_url).await?;
            let rule = self.definition.book_info.clone();
            let base = self.http.base_url().to_string();
            let (_, toc_url) = off_thread(move || parse_book_details(&body, &rule, &base)).await?;
            toc_url.unwrap_or_else(|| book.key.clone())
        };

        let chapters = self.fetch_toc(toc_url).await?;
        Ok(ChaptersPage::new(chapters, false))
    }

    async fn get_page_list(&self, chapter: &ChapterInfo) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        let mut title = String::new();
        let mut visited = HashSet::new();
        let mut next = Some(chapter.key.clone());

        while let Some(url) = next.take() {
            if visited.len() >= MAX_CONTENT_PAGES || !visited.insert(url.clone()) {
                break;
            }

            let body = self.fetch(&url, &self.definition.content.content).await?;
            let rule = self.definition.content.clone();
            let base = self.http.base_url().to_string();
            let parsed = off_thread(move || parse_content_page(&body, &rule, &base)).await?;

            if title.is_empty() {
                title = parsed.title;
            }
            pages.extend(parsed.pages);
            next = parsed.next_url;
        }

        let mut pages = apply_replace_regex(pages, &self.definition.content.replace_regex);
        if !title.is_empty() {
            pages.insert(0, Page::text(title));
        }
        Ok(pages)
    }
}

/// The first alternative of `rule`, if it is a usable CSS selector.
fn wait_selector(rule: &str) -> Option<String> {
    let first = rule.split("||").next()?.split("##").next()?.trim();
    let first = first.strip_prefix('-').unwrap_or(first);
    let css = match first.rsplit_once('@') {
        Some((css, _)) if !first.starts_with('[') => css,
        _ => first,
    }
    .trim();

    if css.is_empty() || Selector::parse(css).is_err() {
        return None;
    }
    Some(css.to_string())
}

fn absolute_or_empty(value: String, base: &str) -> String {
    if value.is_empty() {
        value
    } else {
        to_absolute_url(&value, base)
    }
}

fn parse_book_list(html: &str, rule: &SearchRule, base: &str, paged: bool) -> BooksPage {
    if rule.book_list.trim().is_empty() {
        return BooksPage::empty();
    }

    let document = parse_document(html);
    let root = document.root_element();

    let mut items = Vec::new();
    for element in get_elements(root, &rule.book_list) {
        match parse_book_item(element, rule, base) {
            Some(item) => items.push(item),
            None => debug!("Skipping list item without title or link"),
        }
    }

    if items.is_empty() {
        return BooksPage::empty();
    }

    let has_next_page = if rule.next_page.trim().is_empty() {
        paged
    } else {
        !get_string(root, &rule.next_page).is_empty()
    };

    BooksPage::new(items, has_next_page)
}

fn parse_book_item(element: ElementRef<'_>, rule: &SearchRule, base: &str) -> Option<MangaInfo> {
    let title = get_string(element, &rule.name);
    let link = get_string(element, &rule.book_url);
    if title.is_empty() || link.is_empty() {
        return None;
    }

    Some(MangaInfo {
        key: to_absolute_url(&link, base),
        title,
        author: get_string(element, &rule.author),
        description: get_string(element, &rule.intro),
        genres: split_genres(get_strings(element, &rule.kind)),
        cover: absolute_or_empty(get_string(element, &rule.cover_url), base),
        ..Default::default()
    })
}

fn parse_book_details(html: &str, rule: &BookInfoRule, base: &str) -> (MangaInfo, Option<String>) {
    let document = parse_document(html);
    let root = document.root_element();

    let info = MangaInfo {
        title: get_string(root, &rule.name),
        author: get_string(root, &rule.author),
        description: get_strings(root, &rule.intro).join("\n"),
        genres: split_genres(get_strings(root, &rule.kind)),
        status: MangaStatus::parse(&get_string(root, &rule.status)),
        cover: absolute_or_empty(get_string(root, &rule.cover_url), base),
        ..Default::default()
    };

    let toc_url = Some(get_string(root, &rule.toc_url))
        .filter(|url| !url.is_empty())
        .map(|url| to_absolute_url(&url, base));

    (info, toc_url)
}

fn parse_toc_page(html: &str, rule: &TocRule, base: &str) -> (Vec<ChapterInfo>, Option<String>) {
    let document = parse_document(html);
    let root = document.root_element();

    let mut chapters = Vec::new();
    if !rule.chapter_list.trim().is_empty() {
        for element in get_elements(root, &rule.chapter_list) {
            let name = if rule.chapter_name.trim().is_empty() {
                element_text(element)
            } else {
                get_string(element, &rule.chapter_name)
            };
            let link = if rule.chapter_url.trim().is_empty() {
                get_string(element, "@href")
            } else {
                get_string(element, &rule.chapter_url)
            };
            if name.is_empty() || link.is_empty() {
                debug!("Skipping chapter without name or link");
                continue;
            }

            let mut chapter = ChapterInfo::new(to_absolute_url(&link, base), name);
            chapter.date_upload = parse_date_millis(&get_string(element, &rule.update_time));
            chapters.push(chapter);
        }
    }

    let next = Some(get_string(root, &rule.next_toc_url))
        .filter(|url| !url.is_empty())
        .map(|url| to_absolute_url(&url, base));

    (chapters, next)
}

struct ContentPage {
    pages: Vec<Page>,
    title: String,
    next_url: Option<String>,
}

fn parse_content_page(html: &str, rule: &ContentRule, base: &str) -> ContentPage {
    let document = parse_document(html);
    let root = document.root_element();

    let mut pages = Vec::new();
    if !rule.content.trim().is_empty() {
        for container in get_elements(root, &rule.content) {
            let skip = purified_elements(container, &rule.purify);
            let mut walker = ContentWalker {
                skip: &skip,
                base,
                pages: &mut pages,
                buffer: String::new(),
            };
            walker.walk(container);
            walker.flush();
        }
    }

    ContentPage {
        pages,
        title: get_string(root, &rule.title),
        next_url: Some(get_string(root, &rule.next_content_url))
            .filter(|url| !url.is_empty())
            .map(|url| to_absolute_url(&url, base)),
    }
}

/// Every element matched by any `||` alternative of the purify rule.
///
/// Commas stay inside an alternative, so CSS selector lists and `:is(..)` work.
fn purified_elements<'a>(container: ElementRef<'a>, purify: &str) -> Vec<ElementRef<'a>> {
    purify
        .split("||")
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .flat_map(|alt| get_elements(container, alt))
        .filter(|el| *el != container)
        .collect()
}

struct ContentWalker<'a, 'p> {
    skip: &'p [ElementRef<'a>],
    base: &'p str,
    pages: &'p mut Vec<Page>,
    buffer: String,
}

impl<'a, 'p> ContentWalker<'a, 'p> {
    fn walk(&mut self, element: ElementRef<'a>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.buffer.push_str(text),
                Node::Element(_) => {
                    let Some(child) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if self.skip.contains(&child) {
                        continue;
                    }

                    match child.value().name() {
                        "script" | "style" | "noscript" | "iframe" => {}
                        "img" => {
                            self.flush();
                            let src = ["data-src", "data-lazy-src", "src"]
                                .iter()
                                .find_map(|attr| child.value().attr(attr).filter(|v| !v.trim().is_empty()));
                            if let Some(src) = src {
                                self.pages.push(Page::image(to_absolute_url(src, self.base)));
                            }
                        }
                        "br" => self.flush(),
                        name if BLOCK_TAGS.contains(&name) => {
                            self.flush();
                            self.walk(child);
                            self.flush();
                        }
                        _ => self.walk(child),
                    }
                }
                _ => {}
            }
        }
    }

    fn flush(&mut self) {
        let text = collapse_whitespace(&self.buffer);
        self.buffer.clear();
        if !text.is_empty() {
            self.pages.push(Page::text(text));
        }
    }
}

/// Apply a `pattern##replacement` rule to every text page, dropping emptied ones.
fn apply_replace_regex(pages: Vec<Page>, rule: &str) -> Vec<Page> {
    if rule.trim().is_empty() {
        return pages;
    }

    let (pattern, replacement) = rule.split_once("##").unwrap_or((rule, ""));
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => {
            warn!(pattern, error = %e, "Invalid content replace regex, leaving text untouched");
            return pages;
        }
    };

    pages
        .into_iter()
        .filter_map(|page| match page {
            Page::Text { text } => {
                let replaced = regex.replace_all(&text, replacement);
                let replaced = replaced.trim();
                if replaced.is_empty() {
                    None
                } else {
                    Some(Page::text(replaced))
                }
            }
            other => Some(other),
        })
        .collect()
}
