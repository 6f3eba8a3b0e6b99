use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkItem {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LinkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            icon: None,
            description: None,
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.url.to_lowercase().contains(needle)
    }
}

/// A titled group of links, rendered as one card on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub links: Vec<LinkItem>,
}

impl Category {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            icon: None,
            links: Vec::new(),
        }
    }
}

/// Filter categories down to links whose title or url contains `query`,
/// ignoring case. Categories left without links are dropped; an empty query
/// keeps everything.
pub fn filter_categories(categories: &[Category], query: &str) -> Vec<Category> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return categories.to_vec();
    }

    categories
        .iter()
        .filter_map(|category| {
            let links: Vec<LinkItem> = category
                .links
                .iter()
                .filter(|link| link.matches(&needle))
                .cloned()
                .collect();
            if links.is_empty() {
                None
            } else {
                Some(Category {
                    links,
                    ..category.clone()
                })
            }
        })
        .collect()
}
