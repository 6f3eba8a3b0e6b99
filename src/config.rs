use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::LocalStore;
use crate::wallpaper::MAX_WALLPAPERS;

pub const APP_ID: &str = "clean-nav";
const CONFIG_FILE: &str = "config.json";

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join(APP_ID)
}

fn default_max_wallpapers() -> usize {
    MAX_WALLPAPERS
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct NavConfig {
    /// Directory holding the local mirror slots.
    pub data_dir: PathBuf,
    /// Extra wallpapers to bundle instead of the embedded ones.
    pub wallpaper_dir: Option<PathBuf>,
    #[serde(default = "default_max_wallpapers")]
    pub max_wallpapers: usize,
    pub debug_logging: bool,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            wallpaper_dir: None,
            max_wallpapers: MAX_WALLPAPERS,
            debug_logging: false,
        }
    }
}

impl NavConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_ID).join(CONFIG_FILE))
    }

    /// Load from the user config dir, falling back to defaults on any problem.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::default_path()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no config directory"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn store(&self) -> LocalStore {
        LocalStore::new(self.data_dir.clone())
    }
}
