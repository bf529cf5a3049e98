use serde::{Deserialize, Serialize};

/// One unit of fetched chapter content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Page {
    /// A page that must be fetched again to resolve its image.
    PageUrl { url: String },
    ImageUrl { url: String },
    ImageBase64 { data: String },
    Text { text: String },
}

impl Page {
    pub fn text(text: impl Into<String>) -> Self {
        Page::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Page::ImageUrl { url: url.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Page::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape_is_tagged() {
        let json = serde_json::to_string(&Page::text("hello")).unwrap();
        assert_eq!(json, r#"{"type":"text","text":"hello"}"#);

        let page: Page = serde_json::from_str(r#"{"type":"image_url","url":"https://x/1.png"}"#).unwrap();
        assert_eq!(page, Page::image("https://x/1.png"));
    }

    #[test]
    fn test_as_text() {
        assert_eq!(Page::text("a").as_text(), Some("a"));
        assert_eq!(Page::image("b").as_text(), None);
    }
}
