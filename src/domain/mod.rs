pub mod catalog;
pub mod chapter;
pub mod filter;
pub mod install;
pub mod manga;
pub mod page;

pub use catalog::{CatalogLocal, CatalogOrigin, CatalogRemote, InstalledCatalog};
pub use chapter::{ChapterInfo, ChaptersPage};
pub use filter::{Filter, FilterList};
pub use install::{ChangeKind, ChangeTrigger, InstallStep, InstallationChange};
pub use manga::{BooksPage, MangaInfo, MangaStatus};
pub use page::Page;
