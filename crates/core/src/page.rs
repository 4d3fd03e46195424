//! Offset paging for list operations.

use serde::{Deserialize, Serialize};

/// Upper bound applied to any requested page size.
pub const MAX_PAGE_SIZE: usize = 500;

/// Skip/limit window over an ordered listing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "Page::default_limit")]
    pub limit: usize,
}

impl Page {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit: limit.min(MAX_PAGE_SIZE),
        }
    }

    fn default_limit() -> usize {
        100
    }

    /// Apply the window to an already ordered iterator.
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.skip)
            .take(self.limit.min(MAX_PAGE_SIZE))
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: Self::default_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_skip_and_limit() {
        let page = Page::new(2, 3);
        assert_eq!(page.apply(0..10), vec![2, 3, 4]);
    }

    #[test]
    fn clamps_oversized_limit() {
        assert_eq!(Page::new(0, 10_000).limit, MAX_PAGE_SIZE);
    }

    #[test]
    fn deserializes_with_defaults() {
        let page: Page = serde_json::from_str("{}").unwrap();
        assert_eq!(page, Page::default());
    }
}
