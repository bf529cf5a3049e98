use crate::app::{CatalogError, Result};
use crate::usersource::model::{BookInfoRule, ContentRule, SearchRule, TocRule, UserSource};

/// A starting point for a new user source.
#[derive(Debug, Clone)]
pub struct SourceTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    prototype: UserSource,
}

impl SourceTemplate {
    pub fn prototype(&self) -> &UserSource {
        &self.prototype
    }
}

/// Built-in site layouts users can instantiate without writing rules.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: Vec<SourceTemplate>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateRegistry {
    pub fn builtin() -> Self {
        Self {
            templates: vec![madara(), wordpress(), generic(), chinese(), korean()],
        }
    }

    pub fn list(&self) -> &[SourceTemplate] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Option<&SourceTemplate> {
        self.templates.iter().find(|t| t.id.eq_ignore_ascii_case(id))
    }

    /// Build a user source from template `id` for a concrete site.
    pub fn instantiate(&self, id: &str, name: &str, base_url: &str, lang: Option<&str>) -> Result<UserSource> {
        let template = self
            .get(id)
            .ok_or_else(|| CatalogError::Other(format!("unknown template '{}'", id)))?;

        let mut source = template.prototype.clone();
        source.source_name = name.trim().to_string();
        source.source_url = base_url.trim().trim_end_matches('/').to_string();
        if let Some(lang) = lang.filter(|l| !l.trim().is_empty()) {
            source.lang = lang.trim().to_string();
        }
        source.validate()?;
        Ok(source)
    }
}

fn madara() -> SourceTemplate {
    SourceTemplate {
        id: "madara",
        name: "Madara",
        description: "WordPress sites running the Madara manga/novel theme",
        prototype: UserSource {
            lang: "en".into(),
            enabled: true,
            source_group: "Madara".into(),
            search_url: "{{baseUrl}}/page/{{page}}/?s={{key}}&post_type=wp-manga".into(),
            explore_url: "{{baseUrl}}/novel/page/{{page}}/?m_orderby=views".into(),
            search: SearchRule {
                book_list: "div.c-tabs-item__content||div.page-item-detail".into(),
                name: "div.post-title h3 a||div.post-title h3".into(),
                book_url: "div.post-title h3 a@href||div.post-title a@href".into(),
                cover_url: "img@data-src||img@src".into(),
                author: "div.mg_author a||div.author-content a".into(),
                next_page: "a.nextpostslink||div.nav-previous a".into(),
                ..Default::default()
            },
            book_info: BookInfoRule {
                name: "div.post-title h1".into(),
                author: "div.author-content a".into(),
                intro: "div.summary__content||div.description-summary".into(),
                kind: "div.genres-content a".into(),
                cover_url: "div.summary_image img@data-src||div.summary_image img@src".into(),
                status: "div.post-status div.summary-content.-1".into(),
                ..Default::default()
            },
            toc: TocRule {
                chapter_list: "li.wp-manga-chapter".into(),
                chapter_name: "a".into(),
                chapter_url: "a@href".into(),
                update_time: "span.chapter-release-date".into(),
                reverse: true,
                ..Default::default()
            },
            content: ContentRule {
                content: "div.reading-content||div.text-left".into(),
                title: "li.active".into(),
                purify: "script||div.ads||ins".into(),
                ..Default::default()
            },
            ..Default::default()
        },
    }
}

fn wordpress() -> SourceTemplate {
    SourceTemplate {
        id: "wordpress",
        name: "WordPress",
        description: "Plain WordPress blogs publishing chapters as posts",
        prototype: UserSource {
            lang: "en".into(),
            enabled: true,
            source_group: "WordPress".into(),
            search_url: "{{baseUrl}}/page/{{page}}/?s={{key}}".into(),
            explore_url: "{{baseUrl}}/page/{{page}}/".into(),
            search: SearchRule {
                book_list: "article.post||div.post".into(),
                name: "h2.entry-title a||h2 a".into(),
                book_url: "h2.entry-title a@href||h2 a@href".into(),
                cover_url: "img@src".into(),
                intro: "div.entry-summary||div.entry-content p".into(),
                next_page: "a.next||div.nav-previous a".into(),
                ..Default::default()
            },
            book_info: BookInfoRule {
                name: "h1.entry-title".into(),
                intro: "div.entry-content p".into(),
                cover_url: "div.entry-content img@src".into(),
                ..Default::default()
            },
            toc: TocRule {
                chapter_list: "div.entry-content a".into(),
                chapter_name: "@text".into(),
                chapter_url: "@href".into(),
                ..Default::default()
            },
            content: ContentRule {
                content: "div.entry-content".into(),
                title: "h1.entry-title".into(),
                purify: "script||div.sharedaddy||div.wpcnt".into(),
                next_content_url: "a[rel=next]@href".into(),
                ..Default::default()
            },
            ..Default::default()
        },
    }
}

fn generic() -> SourceTemplate {
    SourceTemplate {
        id: "generic",
        name: "Generic",
        description: "Common class names shared by many novel sites",
        prototype: UserSource {
            lang: "en".into(),
            enabled: true,
            search_url: "{{baseUrl}}/search?keyword={{key}}&page={{page}}".into(),
            search: SearchRule {
                book_list: "div.book-item||div.novel-item||ul.book-list li".into(),
                name: "h3 a||a.title||div.title a".into(),
                book_url: "h3 a@href||a.title@href||a@href".into(),
                cover_url: "img@data-src||img@src".into(),
                author: "span.author||div.author".into(),
                ..Default::default()
            },
            book_info: BookInfoRule {
                name: "h1||h1.title".into(),
                author: "span.author||a.author||div.author".into(),
                intro: "div.description||div.summary||div.intro".into(),
                cover_url: "div.cover img@src||img.book-cover@src".into(),
                status: "span.status||div.status".into(),
                ..Default::default()
            },
            toc: TocRule {
                chapter_list: "ul.chapter-list li||div.chapter-list a||ul.list-chapter li".into(),
                chapter_name: "a||".into(),
                chapter_url: "a@href||@href".into(),
                ..Default::default()
            },
            content: ContentRule {
                content: "div.chapter-content||div#content||div.content".into(),
                title: "h1||h2".into(),
                purify: "script||div.ads".into(),
                ..Default::default()
            },
            ..Default::default()
        },
    }
}

fn chinese() -> SourceTemplate {
    SourceTemplate {
        id: "chinese",
        name: "Chinese biquge-style",
        description: "Biquge-style Chinese novel sites with dl/dd chapter lists",
        prototype: UserSource {
            lang: "zh".into(),
            enabled: true,
            search_url: "{{baseUrl}}/search.php?keyword={{key}}&page={{page}}".into(),
            search: SearchRule {
                book_list: "div.result-item||ul.search-list li".into(),
                name: "h3 a||a.result-game-item-title-link".into(),
                book_url: "h3 a@href||a.result-game-item-title-link@href".into(),
                cover_url: "img@src".into(),
                author: "p.result-game-item-info-tag span.-1||span.author".into(),
                ..Default::default()
            },
            book_info: BookInfoRule {
                name: "div#info h1".into(),
                author: "div#info p##作\\s*者[:：]\\s*(.*)".into(),
                intro: "div#intro".into(),
                cover_url: "div#fmimg img@src".into(),
                status: "div#info p.1".into(),
                ..Default::default()
            },
            toc: TocRule {
                chapter_list: "div#list dd".into(),
                chapter_name: "a".into(),
                chapter_url: "a@href".into(),
                ..Default::default()
            },
            content: ContentRule {
                content: "div#content".into(),
                title: "div.bookname h1".into(),
                purify: "script||div#content p.content_detail".into(),
                replace_regex: "(?:请收藏本站|天才一秒记住).*##".into(),
                ..Default::default()
            },
            ..Default::default()
        },
    }
}

fn korean() -> SourceTemplate {
    SourceTemplate {
        id: "korean",
        name: "Korean web novel",
        description: "Korean web novel portals with list-style chapter tables",
        prototype: UserSource {
            lang: "ko".into(),
            enabled: true,
            search_url: "{{baseUrl}}/search?q={{key}}&page={{page}}".into(),
            search: SearchRule {
                book_list: "ul.list-item li||div.novel-item".into(),
                name: "a.title||div.title".into(),
                book_url: "a@href".into(),
                cover_url: "img@data-src||img@src".into(),
                ..Default::default()
            },
            book_info: BookInfoRule {
                name: "h1||div.view-title".into(),
                author: "span.author||div.author".into(),
                intro: "div.synopsis||div.view-content".into(),
                cover_url: "div.view-img img@src".into(),
                ..Default::default()
            },
            toc: TocRule {
                chapter_list: "ul.list-body li||table.episode-list tr".into(),
                chapter_name: "a".into(),
                chapter_url: "a@href".into(),
                reverse: true,
                ..Default::default()
            },
            content: ContentRule {
                content: "div#novel_content||div.view-content".into(),
                title: "div.toon-title||h1".into(),
                purify: "script||div.ad".into(),
                ..Default::default()
            },
            ..Default::default()
        },
    }
}
