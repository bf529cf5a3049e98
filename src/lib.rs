//! # IReader Sources
//!
//! A pluggable source system for reading books from web sites.
//!
//! ## Architecture
//!
//! Sources come from three places and end up behind one trait:
//!
//! ```text
//! Repository index → Installer → Loader → SourceManager → CatalogSource
//!                                            ↑
//!                              user-defined rule sources
//! ```
//!
//! - [`catalog`]: Catalog packages: sync, install, validate, load, track
//! - [`source`]: The [`CatalogSource`](source::CatalogSource) contract and its implementations
//! - [`rule`]: Selector rule language that user sources are written in
//! - [`store`]: SQLite persistence and scoped preferences
//!
//! ## Quick Start
//!
//! ```bash
//! # Sync the repository index and list installable catalogs
//! ireader-sources remote
//!
//! # Install one
//! ireader-sources install ireader.booktoki.ko
//!
//! # List loaded sources with their ids
//! ireader-sources sources
//!
//! # Search a source
//! ireader-sources search 4812738194773405123 "solo leveling"
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`browser`]: Headless browser rendering
//! - [`catalog`]: Catalog lifecycle
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: TOML configuration
//! - [`daemon`]: Periodic index sync
//! - [`domain`]: Core domain models
//! - [`download`]: Batch chapter downloads
//! - [`rule`]: Rule language
//! - [`source`]: Source contract and implementations
//! - [`store`]: Database persistence
//! - [`usersource`]: User-defined source definitions and templates

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, HTTP client, loader, manager, installer, index sync.
pub mod app;

/// Headless browser rendering via chromiumoxide.
///
/// - [`BrowserEngine`](browser::BrowserEngine): Async trait for page rendering
/// - [`ChromeEngine`](browser::ChromeEngine): Chrome-backed implementation
pub mod browser;

/// Catalog lifecycle.
///
/// - [`RemoteCatalogSync`](catalog::RemoteCatalogSync): Repository index cache
/// - [`CatalogInstaller`](catalog::CatalogInstaller): Install and uninstall with progress steps
/// - [`CatalogLoader`](catalog::CatalogLoader): Validate and instantiate installed packages
/// - [`SourceManager`](catalog::SourceManager): The live set of sources
pub mod catalog;

/// Command-line interface using clap.
///
/// - `sources` - List loaded sources
/// - `remote [--force]` - Sync and list installable catalogs
/// - `install <pkg>` / `uninstall <pkg>` - Manage catalogs
/// - `search`, `popular`, `latest`, `details`, `chapters`, `read` - Call a source
/// - `download <source-id> <book-url>` - Store every chapter locally
/// - `import`, `export`, `templates`, `new-source` - Manage user sources
/// - `daemon` - Periodic index sync
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/ireader-sources/config.toml`.
pub mod config;

/// Background daemon for periodic repository index sync.
pub mod daemon;

/// Core domain models.
///
/// - [`MangaInfo`](domain::MangaInfo) and [`ChapterInfo`](domain::ChapterInfo): What sources return
/// - [`Page`](domain::Page): Chapter content
/// - [`CatalogLocal`](domain::CatalogLocal) and [`CatalogRemote`](domain::CatalogRemote): Catalogs
/// - [`InstallStep`](domain::InstallStep): Installer progress
pub mod domain;

/// Sequential chapter downloads with cooperative cancellation.
pub mod download;

/// Selector rule language.
///
/// Rules like `div.title@text` or `a@href##\s+##-` are parsed once and
/// evaluated against HTML documents.
pub mod rule;

/// The source contract and its implementations.
///
/// - [`HttpSource`](source::HttpSource): Shared HTTP plumbing
/// - [`UserSourceRuntime`](source::UserSourceRuntime): Rule-driven sources
/// - [`FactorySource`](source::FactorySource): Declarative native sources
/// - [`LocalSource`](source::LocalSource): Books on disk
pub mod source;

/// SQLite persistence layer.
///
/// - [`CatalogRepository`](store::CatalogRepository): Trait defining storage operations
/// - [`PreferenceStore`](store::PreferenceStore): Key/value preferences
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation of both
pub mod store;

/// User-defined source definitions and built-in templates.
pub mod usersource;
