use serde::{Deserialize, Serialize};

/// How the background image is derived from the settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WallpaperType {
    Custom,
    #[default]
    Local,
    Bing,
    Url,
}

impl WallpaperType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Local => "local",
            Self::Bing => "bing",
            Self::Url => "url",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "custom" => Some(Self::Custom),
            "local" => Some(Self::Local),
            "bing" => Some(Self::Bing),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlurLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl BlurLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSettings {
    pub title: String,
    #[serde(default)]
    pub wallpaper: String,
    #[serde(default)]
    pub wallpaper_type: WallpaperType,
    /// Candidate images for `local` wallpapers. Rebuilt from the deployment
    /// bundle whenever one is present.
    #[serde(default)]
    pub wallpaper_list: Vec<String>,
    #[serde(default)]
    pub blur_level: BlurLevel,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            title: "Clean Nav".to_string(),
            wallpaper: String::new(),
            wallpaper_type: WallpaperType::Local,
            wallpaper_list: Vec::new(),
            blur_level: BlurLevel::Medium,
        }
    }
}
