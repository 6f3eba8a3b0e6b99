use rust_embed::RustEmbed;
use std::path::Path;
use std::sync::Arc;

use crate::core::DataSchema;
use crate::wallpaper;

const DEFAULT_DOCUMENT: &str = "data.json";
const WALLPAPER_PREFIX: &str = "wallpapers/";

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

/// Deployment-time inputs: the read-only fallback document and the
/// wallpaper candidates packed with this build.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub wallpapers: Arc<[String]>,
    pub default_document: Option<DataSchema>,
}

impl Bundle {
    pub fn new(wallpapers: Vec<String>, default_document: Option<DataSchema>) -> Self {
        Self {
            wallpapers: Arc::from(wallpapers),
            default_document,
        }
    }

    /// Everything compiled into the binary, with wallpapers taken from
    /// `wallpaper_dir` instead when that directory has any images.
    pub fn load(wallpaper_dir: Option<&Path>, max_wallpapers: usize) -> Self {
        let from_dir = wallpaper_dir
            .map(|dir| wallpaper::load_wallpaper_dir(dir, max_wallpapers))
            .unwrap_or_default();
        let wallpapers = if from_dir.is_empty() {
            embedded_wallpapers(max_wallpapers)
        } else {
            from_dir
        };
        Self::new(wallpapers, embedded_default_document())
    }
}

pub fn embedded_default_document() -> Option<DataSchema> {
    let file = Assets::get(DEFAULT_DOCUMENT)?;
    match serde_json::from_slice::<DataSchema>(&file.data) {
        Ok(doc) => Some(doc.into_layout()),
        Err(e) => {
            log::warn!("Bundled {} is not a valid document: {}", DEFAULT_DOCUMENT, e);
            None
        }
    }
}

pub fn embedded_wallpapers(max: usize) -> Vec<String> {
    let files: Vec<(String, Vec<u8>)> = Assets::iter()
        .filter_map(|path| {
            let name = path.strip_prefix(WALLPAPER_PREFIX)?.to_string();
            let file = Assets::get(&path)?;
            Some((name, file.data.into_owned()))
        })
        .collect();
    wallpaper::pack_wallpapers(files, max)
}
