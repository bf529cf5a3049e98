pub mod model;
pub mod templates;

pub use model::{BookInfoRule, ContentRule, SearchRule, TocRule, UserSource};
pub use templates::{SourceTemplate, TemplateRegistry};
