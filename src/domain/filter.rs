use serde::{Deserialize, Serialize};

/// Listing filters a caller passes to a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Title(String),
    Sort { index: usize, ascending: bool },
}

pub type FilterList = Vec<Filter>;

/// The search text among `filters`, if any non-blank title filter is present.
pub fn query_of(filters: &[Filter]) -> Option<&str> {
    filters.iter().find_map(|f| match f {
        Filter::Title(text) if !text.trim().is_empty() => Some(text.trim()),
        _ => None,
    })
}

pub fn sort_of(filters: &[Filter]) -> Option<usize> {
    filters.iter().find_map(|f| match f {
        Filter::Sort { index, .. } => Some(*index),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_skips_blank_titles() {
        let filters = vec![Filter::Title("   ".into()), Filter::Title(" dune ".into())];
        assert_eq!(query_of(&filters), Some("dune"));
        assert_eq!(query_of(&[]), None);
    }

    #[test]
    fn test_sort_index() {
        let filters = vec![Filter::Sort {
            index: 2,
            ascending: false,
        }];
        assert_eq!(sort_of(&filters), Some(2));
        assert_eq!(query_of(&filters), None);
    }
}
