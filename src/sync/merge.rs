use crate::core::DataSchema;

/// Result of reconciling a freshly loaded remote document with the local one.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub merged: DataSchema,
    /// `merged` differs from the local document and should replace it.
    pub changed: bool,
    /// Local todos or notes were kept over the remote lists, so the remote
    /// copy is behind.
    pub local_won: bool,
}

/// Merge a remote document into the local one.
///
/// Settings and categories come from the remote. Todos and notes come from
/// the remote unless its list is empty, in which case the local list is
/// kept: an empty remote list means "never synced", not "cleared".
/// Bundled wallpapers, when present, always replace `wallpaperList`.
pub fn merge_documents(local: &DataSchema, remote: &DataSchema, bundled_wallpapers: &[String]) -> MergeOutcome {
    let todos = if remote.todos.is_empty() {
        local.todos.clone()
    } else {
        remote.todos.clone()
    };
    let notes = if remote.notes.is_empty() {
        local.notes.clone()
    } else {
        remote.notes.clone()
    };

    let local_won = todos != remote.todos || notes != remote.notes;

    let mut merged = DataSchema {
        settings: remote.settings.clone(),
        categories: remote.categories.clone(),
        todos,
        notes,
    };
    merged.splice_wallpapers(bundled_wallpapers);

    let changed = merged != *local;

    MergeOutcome {
        merged,
        changed,
        local_won,
    }
}
