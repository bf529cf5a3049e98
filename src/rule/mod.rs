pub mod parser;
pub mod url;

pub use parser::{collapse_whitespace, element_text, get_elements, get_string, get_strings, parse_document};
pub use self::url::{UrlParams, encode_query_value, expand, to_absolute_url};
