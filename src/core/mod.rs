pub mod category;
pub mod document;
pub mod note;
pub mod settings;
pub mod todo;

pub use category::{Category, LinkItem, filter_categories};
pub use document::DataSchema;
pub use note::Note;
pub use settings::{BlurLevel, SiteSettings, WallpaperType};
pub use todo::Todo;
