use serde::{Deserialize, Serialize};

use super::category::{Category, LinkItem};
use super::note::Note;
use super::settings::SiteSettings;
use super::todo::Todo;

/// The whole start page: settings, link groups and the two widget lists.
///
/// Values are replaced wholesale; the `with_*` helpers build the next
/// document rather than mutating the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSchema {
    pub settings: SiteSettings,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Default for DataSchema {
    fn default() -> Self {
        let mut favorites = Category::new("c1", "Favorites");
        favorites.icon = Some("FolderOpen".to_string());

        let mut google = LinkItem::new("l1", "Google", "https://google.com");
        google.icon = Some("Search".to_string());
        let mut github = LinkItem::new("l2", "GitHub", "https://github.com");
        github.icon = Some("Github".to_string());
        favorites.links = vec![google, github];

        Self {
            settings: SiteSettings::default(),
            categories: vec![favorites],
            todos: Vec::new(),
            notes: Vec::new(),
        }
    }
}

impl DataSchema {
    pub fn with_settings(&self, settings: SiteSettings) -> Self {
        Self {
            settings,
            ..self.clone()
        }
    }

    pub fn with_categories(&self, categories: Vec<Category>) -> Self {
        Self {
            categories,
            ..self.clone()
        }
    }

    pub fn with_todos(&self, todos: Vec<Todo>) -> Self {
        Self {
            todos,
            ..self.clone()
        }
    }

    pub fn with_notes(&self, notes: Vec<Note>) -> Self {
        Self {
            notes,
            ..self.clone()
        }
    }

    /// Keep only settings and categories, the shape of a deployed read-only
    /// document.
    pub fn into_layout(self) -> Self {
        Self {
            todos: Vec::new(),
            notes: Vec::new(),
            ..self
        }
    }

    /// Replace the wallpaper candidates with the deployment's bundled set.
    /// A no-op when nothing is bundled.
    pub fn splice_wallpapers(&mut self, bundled: &[String]) {
        if !bundled.is_empty() {
            self.settings.wallpaper_list = bundled.to_vec();
        }
    }

    /// Fill an empty candidate list from the bundle, leaving a populated one alone.
    pub fn fill_wallpapers(&mut self, bundled: &[String]) {
        if self.settings.wallpaper_list.is_empty() {
            self.splice_wallpapers(bundled);
        }
    }
}
