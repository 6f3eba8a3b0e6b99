use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use crate::core::{SiteSettings, WallpaperType};

pub const BING_WALLPAPER_URL: &str = "https://bing.img.run/1920x1080.php";

/// Upper bound on images packed into one deployment.
pub const MAX_WALLPAPERS: usize = 10;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "svg"];

/// Daily Bing image, with a timestamp so browsers and proxies don't serve a stale copy.
pub fn bing_url(now: DateTime<Utc>) -> String {
    format!("{}?t={}", BING_WALLPAPER_URL, now.timestamp_millis())
}

/// Pick the image to display for `settings`.
///
/// `local` draws from the bundled images, or from the document's own list
/// when nothing is bundled. Returns `None` when there is nothing to show.
pub fn select_wallpaper<R: Rng + ?Sized>(
    settings: &SiteSettings,
    bundled: &[String],
    rng: &mut R,
    now: DateTime<Utc>,
) -> Option<String> {
    match settings.wallpaper_type {
        WallpaperType::Local => {
            let list = if bundled.is_empty() {
                settings.wallpaper_list.as_slice()
            } else {
                bundled
            };
            list.choose(rng).cloned()
        }
        WallpaperType::Bing => Some(bing_url(now)),
        WallpaperType::Custom | WallpaperType::Url => {
            if settings.wallpaper.is_empty() {
                None
            } else {
                Some(settings.wallpaper.clone())
            }
        }
    }
}

/// Deterministic first image, shown before the first random draw.
pub fn initial_wallpaper(settings: &SiteSettings, bundled: &[String]) -> Option<String> {
    match settings.wallpaper_type {
        WallpaperType::Local => bundled.first().cloned(),
        _ if !settings.wallpaper.is_empty() => Some(settings.wallpaper.clone()),
        _ => None,
    }
}

pub fn wallpaper_changed(old: &SiteSettings, new: &SiteSettings) -> bool {
    old.wallpaper_type != new.wallpaper_type || old.wallpaper != new.wallpaper
}

/// Encode an image file as a `data:` URI, or `None` for unsupported extensions.
pub fn data_uri(filename: &str, bytes: &[u8]) -> Option<String> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let mime = if ext == "svg" {
        "image/svg+xml".to_string()
    } else {
        format!("image/{}", ext)
    };
    Some(format!("data:{};base64,{}", mime, BASE64.encode(bytes)))
}

/// Shuffle candidate images, keep at most `max`, and encode them.
pub fn pack_wallpapers(files: Vec<(String, Vec<u8>)>, max: usize) -> Vec<String> {
    let mut images: Vec<(String, Vec<u8>)> = files
        .into_iter()
        .filter(|(name, _)| data_uri(name, &[]).is_some())
        .collect();
    images.shuffle(&mut rand::rng());
    images
        .iter()
        .take(max)
        .filter_map(|(name, bytes)| data_uri(name, bytes))
        .collect()
}

/// Read and pack the images in `dir`. A missing or unreadable directory yields nothing.
pub fn load_wallpaper_dir(dir: &Path, max: usize) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Failed to read wallpaper directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if data_uri(&name, &[]).is_none() {
            continue;
        }
        match std::fs::read(&path) {
            Ok(bytes) => files.push((name, bytes)),
            Err(e) => log::warn!("Skipping wallpaper {}: {}", path.display(), e),
        }
    }

    let packed = pack_wallpapers(files, max);
    log::info!("Packed {} wallpapers from {}", packed.len(), dir.display());
    packed
}

/// Holds the image currently on screen and re-rolls it on request.
pub struct WallpaperSelector {
    bundled: Arc<[String]>,
    current: watch::Sender<Option<String>>,
}

impl WallpaperSelector {
    pub fn new(bundled: Arc<[String]>, settings: &SiteSettings) -> Self {
        let initial = initial_wallpaper(settings, &bundled);
        Self {
            bundled,
            current: watch::Sender::new(initial),
        }
    }

    pub fn refresh(&self, settings: &SiteSettings) -> Option<String> {
        let next = select_wallpaper(settings, &self.bundled, &mut rand::rng(), Utc::now());
        log::debug!(
            "Wallpaper refreshed ({}): {}",
            settings.wallpaper_type.as_str(),
            next.as_deref().map(preview).unwrap_or("none")
        );
        self.current.send_replace(next.clone());
        next
    }

    pub fn current(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }
}

// Data URIs are huge; log only the head.
fn preview(s: &str) -> &str {
    match s.char_indices().nth(48) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
