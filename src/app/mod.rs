pub mod cancel;
pub mod context;
pub mod error;

pub use cancel::CancellationFlag;
pub use context::AppContext;
pub use error::{CatalogError, Result};
