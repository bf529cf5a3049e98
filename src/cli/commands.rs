use std::path::Path;

use futures::StreamExt;

use crate::app::{AppContext, CancellationFlag, CatalogError, Result};
use crate::catalog::SyncOutcome;
use crate::domain::{BooksPage, CatalogRemote, ChapterInfo, Filter, InstallStep, MangaInfo, Page};
use crate::download::DownloadJob;
use crate::source::{collect_pages, CatalogSource, Source};
use crate::store::CatalogRepository;
use crate::usersource::UserSource;

/// Page limit for `popular --all`.
const MAX_LISTING_PAGES: u32 = 20;

pub fn list_sources(ctx: &AppContext) -> Result<()> {
    let catalogs = ctx.manager.catalogs();
    let user_sources = ctx.manager.user_sources();

    if catalogs.is_empty() && user_sources.is_empty() {
        println!("No sources");
        return Ok(());
    }

    for catalog in catalogs {
        println!(
            "{:>20}  {} [{}] v{} ({})",
            catalog.source_id(),
            catalog.name,
            catalog.lang(),
            catalog.version_name,
            catalog.origin.label()
        );
    }
    for source in user_sources {
        let definition = source.definition();
        println!(
            "{:>20}  {} [{}] (user) {}",
            definition.id(),
            definition.source_name,
            definition.lang,
            definition.base_url()
        );
    }

    Ok(())
}

pub async fn list_remote(ctx: &AppContext, force: bool) -> Result<()> {
    match ctx.sync.refresh(force).await {
        Ok(SyncOutcome::Refreshed(count)) => println!("Synced {} catalogs", count),
        Ok(SyncOutcome::Skipped) => {}
        Err(e) => eprintln!("Sync failed, showing cached index: {}", e),
    }

    let remote = ctx.sync.cached()?;
    if remote.is_empty() {
        println!("No catalogs available");
        return Ok(());
    }

    for catalog in &remote {
        let marker = match ctx.manager.catalog(&catalog.pkg_name) {
            Some(installed) if installed.version_code < catalog.version_code => "^",
            Some(_) => "*",
            None => " ",
        };
        let nsfw = if catalog.nsfw { " (nsfw)" } else { "" };
        println!(
            "{} {} [{}] v{}{}\n    {}",
            marker, catalog.name, catalog.lang, catalog.version_name, nsfw, catalog.pkg_name
        );
    }

    Ok(())
}

pub async fn install(ctx: &AppContext, pkg: &str) -> Result<()> {
    let mut remote = ctx.sync.cached()?;
    if !remote.iter().any(|c| c.pkg_name == pkg) {
        ctx.sync.refresh(false).await?;
        remote = ctx.sync.cached()?;
    }
    let catalog = remote
        .into_iter()
        .find(|c| c.pkg_name == pkg)
        .ok_or_else(|| CatalogError::CatalogNotFound(pkg.to_string()))?;

    let cancel = CancellationFlag::new();
    let steps = ctx.installer.install(&catalog, &cancel);
    futures::pin_mut!(steps);

    let mut last = None;
    while let Some(step) = steps.next().await {
        println!("  {}", step);
        last = Some(step);
    }

    println!("{}", install_summary(&catalog, last.as_ref())?);
    Ok(())
}

/// Final line for an install, from its terminal step.
fn install_summary(catalog: &CatalogRemote, last: Option<&InstallStep>) -> Result<String> {
    match last {
        Some(InstallStep::Success) => Ok(format!("Installed {} v{}", catalog.name, catalog.version_name)),
        Some(InstallStep::Aborted) => Ok(format!("Install of {} cancelled", catalog.pkg_name)),
        Some(step) if step.is_error() => Err(CatalogError::Other(format!(
            "Failed to install {}: {}",
            catalog.pkg_name, step
        ))),
        _ => Err(CatalogError::Other(format!(
            "Install of {} ended without a result",
            catalog.pkg_name
        ))),
    }
}

pub async fn uninstall(ctx: &AppContext, pkg: &str) -> Result<()> {
    let step = ctx.installer.uninstall(pkg).await;
    if step.is_error() {
        return Err(CatalogError::Other(format!("Failed to uninstall {}: {}", pkg, step)));
    }
    println!("Uninstalled {}", pkg);
    Ok(())
}

pub async fn search(ctx: &AppContext, source_id: i64, query: &str, page: u32) -> Result<()> {
    let source = ctx.manager.get(source_id)?;
    let filters = vec![Filter::Title(query.to_string())];
    let result = source.search(&filters, page).await?;
    print_books(&result.items, result.has_next_page);
    Ok(())
}

pub async fn popular(ctx: &AppContext, source_id: i64, page: u32, all: bool) -> Result<()> {
    let source = ctx.manager.get(source_id)?;
    if all {
        let books = collect_pages::<BooksPage, _, _>(|page| source.fetch_popular(page), MAX_LISTING_PAGES).await?;
        print_books(&books, false);
    } else {
        let result = source.fetch_popular(page).await?;
        print_books(&result.items, result.has_next_page);
    }
    Ok(())
}

pub async fn latest(ctx: &AppContext, source_id: i64, page: u32) -> Result<()> {
    let source = ctx.manager.get(source_id)?;
    if !source.supports_latest() {
        println!("{} has no latest listing", source.name());
        return Ok(());
    }
    let result = source.fetch_latest_updates(page).await?;
    print_books(&result.items, result.has_next_page);
    Ok(())
}

pub async fn details(ctx: &AppContext, source_id: i64, url: &str) -> Result<()> {
    let source = ctx.manager.get(source_id)?;
    let book = source.get_book_details(&MangaInfo::new(url, "")).await?;

    println!("{}", book.title);
    if !book.author.is_empty() {
        println!("Author: {}", book.author);
    }
    if !book.artist.is_empty() && book.artist != book.author {
        println!("Artist: {}", book.artist);
    }
    println!("Status: {:?}", book.status);
    if !book.genres.is_empty() {
        println!("Genres: {}", book.genres.join(", "));
    }
    if !book.cover.is_empty() {
        println!("Cover: {}", book.cover);
    }
    if !book.description.is_empty() {
        println!("\n{}", book.description);
    }
    Ok(())
}

pub async fn chapters(ctx: &AppContext, source_id: i64, url: &str) -> Result<()> {
    let source = ctx.manager.get(source_id)?;
    let list = source.get_chapter_list(&MangaInfo::new(url, "")).await?;

    if list.chapters.is_empty() {
        println!("No chapters");
        return Ok(());
    }

    let source_id = source.id();
    for chapter in &list.chapters {
        let stored = ctx.store.is_chapter_downloaded(source_id, &chapter.key)?;
        let marker = if stored { "*" } else { " " };
        println!("{} {}\n    {}", marker, chapter.name, chapter.key);
    }
    println!("{} chapters", list.chapters.len());
    Ok(())
}

pub async fn read(ctx: &AppContext, source_id: i64, url: &str) -> Result<()> {
    let source = ctx.manager.get(source_id)?;
    let pages = match ctx.store.get_chapter_content(source.id(), url)? {
        Some(pages) => pages,
        None => source.get_page_list(&ChapterInfo::new(url, "")).await?,
    };

    if pages.is_empty() {
        println!("No content");
        return Ok(());
    }

    for page in &pages {
        match page {
            Page::Text { text } => println!("{}\n", text),
            Page::ImageUrl { url } | Page::PageUrl { url } => println!("[image] {}", url),
            Page::ImageBase64 { data } => println!("[inline image, {} bytes]", data.len()),
        }
    }
    Ok(())
}

pub async fn download(ctx: &AppContext, source_id: i64, book_url: &str) -> Result<()> {
    let source = ctx.manager.get(source_id)?;
    let list = source.get_chapter_list(&MangaInfo::new(book_url, "")).await?;
    if list.chapters.is_empty() {
        println!("No chapters to download");
        return Ok(());
    }

    println!("Downloading {} chapters...", list.chapters.len());

    let job = DownloadJob::new(source, list.chapters);
    let on_interrupt = job.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let worker = ctx.spawn_downloads();
    let report = worker
        .queue(job)
        .await?
        .await
        .map_err(|_| CatalogError::Other("download worker stopped before reporting".into()))?;
    worker.shutdown().await;
    interrupt.abort();

    for (key, reason) in &report.failed {
        eprintln!("  ! {} - {}", key, reason);
    }
    println!(
        "Download {}: {} downloaded, {} already stored, {} failed",
        if report.cancelled { "cancelled" } else { "complete" },
        report.downloaded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(())
}

/// Import user sources from a JSON file holding one source or an array.
pub fn import_sources(ctx: &AppContext, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let sources = UserSource::from_json(&content)?;

    if sources.is_empty() {
        println!("No sources found in {}", path.display());
        return Ok(());
    }

    let mut added = 0;
    let mut errors = 0;
    for source in &sources {
        match ctx.manager.add_user_source(source) {
            Ok(id) => {
                println!("  + {} ({})", source.source_name, id);
                added += 1;
            }
            Err(e) => {
                eprintln!("  ! {} - {}", source.source_name, e);
                errors += 1;
            }
        }
    }

    println!("\nImport complete: {} added, {} errors", added, errors);
    Ok(())
}

pub fn export_source(ctx: &AppContext, source_id: i64, path: Option<&Path>) -> Result<()> {
    let source = ctx
        .store
        .get_user_source(source_id)?
        .ok_or(CatalogError::SourceNotFound(source_id))?;
    let json = UserSource::export_json(std::slice::from_ref(&source))?;

    match path {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("Exported {} to {}", source.source_name, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub fn list_templates(ctx: &AppContext) -> Result<()> {
    for template in ctx.templates.list() {
        println!("{:<10} {}\n    {}", template.id, template.name, template.description);
    }
    Ok(())
}

pub fn new_source(ctx: &AppContext, template: &str, name: &str, base_url: &str, lang: Option<&str>) -> Result<()> {
    let source = ctx.templates.instantiate(template, name, base_url, lang)?;
    let id = ctx.manager.add_user_source(&source)?;
    println!("Created {} [{}] from template {} ({})", source.source_name, source.lang, template, id);
    Ok(())
}

fn print_books(books: &[MangaInfo], has_next_page: bool) {
    if books.is_empty() {
        println!("No results");
        return;
    }
    for book in books {
        println!("{}\n    {}", book.title, book.key);
    }
    if has_next_page {
        println!("(more results on the next page)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::source::http::testing::FakeHttp;
    use crate::store::SqliteStore;

    const MADARA_SOURCE: &str = r#"{
        "sourceName": "Novel Place",
        "sourceUrl": "https://novel.place",
        "lang": "en",
        "enabled": true
    }"#;

    async fn context(dir: &Path) -> AppContext {
        let ctx = AppContext::with_parts(
            Config::default(),
            dir.to_path_buf(),
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(FakeHttp::new()),
        )
        .unwrap();
        ctx.manager.init().await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_import_then_export() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let input = dir.path().join("in.json");
        std::fs::write(&input, MADARA_SOURCE).unwrap();

        import_sources(&ctx, &input).unwrap();
        let id = UserSource::new("Novel Place", "https://novel.place", "en").id();
        assert!(ctx.manager.get(id).is_ok());

        let output = dir.path().join("out.json");
        export_source(&ctx, id, Some(&output)).unwrap();
        let exported = UserSource::from_json(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].source_name, "Novel Place");
    }

    #[tokio::test]
    async fn test_import_without_enabled_key_loads_source() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let input = dir.path().join("in.json");
        std::fs::write(&input, r#"[{"sourceName": "Bare Site", "sourceUrl": "https://bare.site"}]"#).unwrap();

        import_sources(&ctx, &input).unwrap();
        let id = UserSource::new("Bare Site", "https://bare.site", "").id();
        assert!(ctx.manager.get(id).is_ok());
        assert_eq!(ctx.manager.user_sources().len(), 1);
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let input = dir.path().join("bad.json");
        std::fs::write(&input, r#"{"sourceName": "", "sourceUrl": "https://x.test"}"#).unwrap();

        assert!(import_sources(&ctx, &input).is_err());
        assert!(ctx.manager.user_sources().is_empty());
    }

    #[tokio::test]
    async fn test_export_unknown_source() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        let err = export_source(&ctx, 12345, None).unwrap_err();
        assert!(matches!(err, CatalogError::SourceNotFound(12345)));
    }

    #[tokio::test]
    async fn test_new_source_from_template() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        new_source(&ctx, "madara", "My Site", "https://my.site/", Some("fr")).unwrap();

        let sources = ctx.manager.user_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].definition().lang, "fr");
        assert_eq!(sources[0].definition().base_url(), "https://my.site");
    }

    #[tokio::test]
    async fn test_new_source_unknown_template() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        assert!(new_source(&ctx, "nope", "My Site", "https://my.site", None).is_err());
    }

    #[test]
    fn test_install_summary_by_terminal_step() {
        let catalog = CatalogRemote {
            source_id: 1,
            name: "Sample".into(),
            description: String::new(),
            pkg_name: "ireader.sample.en".into(),
            version_name: "2.0".into(),
            version_code: 4,
            lang: "en".into(),
            pkg_url: "https://repo.test/apk/ireader.sample.en.json".into(),
            icon_url: String::new(),
            nsfw: false,
        };

        let done = install_summary(&catalog, Some(&InstallStep::Success)).unwrap();
        assert_eq!(done, "Installed Sample v2.0");

        let cancelled = install_summary(&catalog, Some(&InstallStep::Aborted)).unwrap();
        assert_eq!(cancelled, "Install of ireader.sample.en cancelled");

        assert!(install_summary(&catalog, Some(&InstallStep::Error("boom".into()))).is_err());
        assert!(install_summary(&catalog, None).is_err());
    }

    #[tokio::test]
    async fn test_install_unknown_package() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        // Index fetch 404s, so the refresh fails before the lookup.
        assert!(install(&ctx, "ireader.missing.en").await.is_err());
    }

    #[tokio::test]
    async fn test_search_unknown_source() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        let err = search(&ctx, 777, "query", 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::SourceNotFound(777)));
    }
}
