use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use super::RemoteStore;
use super::github::GithubConfig;
use super::merge::merge_documents;
use crate::bundle::Bundle;
use crate::core::{Category, DataSchema, Note, SiteSettings, Todo};
use crate::notify::{Notice, Notifier};
use crate::store::LocalStore;
use crate::wallpaper::{WallpaperSelector, wallpaper_changed};

const UNSYNCED_NOTICE: &str = "Some changes are not on GitHub yet, save to push them";
const SAVED_LOCALLY_NOTICE: &str = "Saved locally (GitHub sync not set up)";
const SYNCED_NOTICE: &str = "Synced to GitHub";
const SYNC_FAILED_NOTICE: &str = "Sync failed, changes are kept locally";
const UNEXPECTED_NOTICE: &str = "Something went wrong, see the log for details";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Uninitialized,
    Resolving,
    Ready,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub phase: Phase,
    /// The document has diverged from the last confirmed remote copy.
    pub dirty: bool,
    pub saving: bool,
    pub loaded_from_local: bool,
    /// The post-startup remote step has finished, whatever its result.
    pub reconciled: bool,
    /// The remote answered that step, with a document or a confirmed absence.
    pub remote_reached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No usable remote config; the local mirror is the only copy.
    LocalOnly,
    Synced,
    /// The remote write failed. The local mirror holds the document and the
    /// dirty flag stays set.
    Failed,
    /// A newer save started before this one finished; its result was dropped.
    Superseded,
}

/// Everything the engine needs, handed over once at construction.
pub struct EngineContext {
    pub store: LocalStore,
    pub remote: Arc<dyn RemoteStore>,
    pub github: Option<GithubConfig>,
    pub bundle: Bundle,
    pub notifier: Arc<dyn Notifier>,
}

/// Owns the single in-memory document and keeps it in step with the local
/// mirror and the remote store.
///
/// Front ends read snapshots (`document`, `subscribe`) and change the
/// document only through the mutation methods and `save`. Cloning the
/// engine yields another handle to the same state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

// Lock order: `document` before `status`. The local mirror is written while
// `document` is held so it never lags a newer replacement. `revision` only
// moves while `document` is held.
struct Inner {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    github: RwLock<Option<GithubConfig>>,
    bundle: Bundle,
    notifier: Arc<dyn Notifier>,
    wallpaper: WallpaperSelector,
    document: watch::Sender<DataSchema>,
    status: watch::Sender<EngineStatus>,
    save_generation: AtomicU64,
    revision: AtomicU64,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl SyncEngine {
    pub fn new(ctx: EngineContext) -> Self {
        let mut initial = DataSchema::default();
        initial.splice_wallpapers(&ctx.bundle.wallpapers);
        let wallpaper = WallpaperSelector::new(Arc::clone(&ctx.bundle.wallpapers), &initial.settings);

        Self {
            inner: Arc::new(Inner {
                store: ctx.store,
                remote: ctx.remote,
                github: RwLock::new(ctx.github),
                bundle: ctx.bundle,
                notifier: ctx.notifier,
                wallpaper,
                document: watch::Sender::new(initial),
                status: watch::Sender::new(EngineStatus::default()),
                save_generation: AtomicU64::new(0),
                revision: AtomicU64::new(0),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Resolve the startup document and kick off remote reconciliation.
    ///
    /// Local resolution finishes, and the engine is `Ready`, before this
    /// returns. The remote step runs on the returned task and may replace the
    /// document again. Returns `None` if the engine was already started.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let mut first = false;
        self.inner.status.send_if_modified(|s| {
            if s.phase != Phase::Uninitialized {
                return false;
            }
            s.phase = Phase::Resolving;
            first = true;
            true
        });
        if !first {
            log::warn!("Sync engine already started");
            return None;
        }

        let loaded_from_local = self.resolve_local();
        let engine = self.clone();
        Some(tokio::spawn(async move {
            engine.reconcile(loaded_from_local).await;
        }))
    }

    fn resolve_local(&self) -> bool {
        let bundled = &self.inner.bundle.wallpapers;
        let mut document = DataSchema::default();
        document.splice_wallpapers(bundled);

        let loaded = match self.inner.store.read_document() {
            Some(mut local) => {
                // Documents saved before images were bundled have an empty list.
                local.fill_wallpapers(bundled);
                document = local;
                true
            }
            None => false,
        };

        log::info!(
            "Resolved startup document from {} ({} categories, {} todos, {} notes)",
            if loaded { "local store" } else { "defaults" },
            document.categories.len(),
            document.todos.len(),
            document.notes.len()
        );

        let settings = document.settings.clone();
        self.inner.document.send_replace(document);
        self.inner.wallpaper.refresh(&settings);
        self.inner.status.send_modify(|s| {
            s.phase = Phase::Ready;
            s.loaded_from_local = loaded;
        });
        loaded
    }

    async fn reconcile(&self, loaded_from_local: bool) {
        match self.remote_config() {
            Some(config) if config.has_token() => {
                let slug = config.slug();
                let remote = Arc::clone(&self.inner.remote);
                let task = tokio::spawn(async move { remote.load(&config).await });
                match task.await {
                    Ok(Ok(Some(document))) => {
                        self.inner.status.send_modify(|s| s.remote_reached = true);
                        self.apply_remote(document);
                    }
                    Ok(Ok(None)) => {
                        self.inner.status.send_modify(|s| s.remote_reached = true);
                        log::info!("No remote document in {}, keeping local state", slug);
                    }
                    Ok(Err(e)) => log::warn!("Remote load from {} failed, keeping local state: {}", slug, e),
                    Err(e) => self.unexpected("remote load", e),
                }
            }
            Some(config) => {
                log::info!("GitHub config for {} has no token, staying local", config.slug());
            }
            None if !loaded_from_local => self.apply_bundled_default(),
            None => log::debug!("No remote configured"),
        }
        self.inner.status.send_modify(|s| s.reconciled = true);
    }

    /// Merge a loaded remote document into whatever the document is *now*,
    /// so edits made while the load was in flight survive.
    fn apply_remote(&self, remote: DataSchema) {
        let store = &self.inner.store;
        let status = &self.inner.status;
        let revision = &self.inner.revision;
        let bundled = &self.inner.bundle.wallpapers;
        let mut outcome = None;
        let mut previous_settings = None;

        self.inner.document.send_if_modified(|current| {
            let result = merge_documents(current, &remote, bundled);
            let changed = result.changed;
            if changed {
                revision.fetch_add(1, Ordering::SeqCst);
                store.write_document(&result.merged);
                previous_settings = Some(std::mem::replace(current, result.merged.clone()).settings);
            }
            if result.local_won {
                status.send_modify(|s| s.dirty = true);
            }
            outcome = Some(result);
            changed
        });

        let Some(outcome) = outcome else {
            return;
        };

        match previous_settings {
            Some(previous) => {
                log::info!(
                    "Applied remote document ({} categories, {} todos, {} notes)",
                    outcome.merged.categories.len(),
                    outcome.merged.todos.len(),
                    outcome.merged.notes.len()
                );
                self.refresh_wallpaper_if_changed(&previous, &outcome.merged.settings);
            }
            None => log::info!("Remote document matches local state"),
        }

        if outcome.local_won {
            log::info!("Local todos or notes are ahead of the remote copy");
            self.inner.notifier.notify(Notice::info(UNSYNCED_NOTICE));
        }
    }

    fn apply_bundled_default(&self) {
        let Some(fallback) = self.inner.bundle.default_document.clone() else {
            log::debug!("No bundled default document");
            return;
        };
        let mut fallback = fallback.into_layout();
        fallback.splice_wallpapers(&self.inner.bundle.wallpapers);

        let revision = &self.inner.revision;
        let mut previous_settings = None;
        self.inner.document.send_if_modified(|current| {
            // Any edit or save since startup means the user owns the document.
            if revision.load(Ordering::SeqCst) != 0 {
                return false;
            }
            previous_settings = Some(std::mem::replace(current, fallback.clone()).settings);
            true
        });

        match previous_settings {
            Some(previous) => {
                log::info!("Using bundled default document");
                self.refresh_wallpaper_if_changed(&previous, &fallback.settings);
            }
            None => log::info!("Skipping bundled default document, local edits exist"),
        }
    }

    /// Replace the site settings, re-rolling the wallpaper if its source changed.
    pub fn update_settings(&self, settings: SiteSettings) {
        let next = settings.clone();
        let mut previous = None;
        self.apply_edit(|doc| {
            previous = Some(doc.settings.clone());
            doc.with_settings(settings)
        });
        if let Some(previous) = previous {
            self.refresh_wallpaper_if_changed(&previous, &next);
        }
    }

    pub fn update_categories(&self, categories: Vec<Category>) {
        self.apply_edit(|doc| doc.with_categories(categories));
    }

    pub fn update_todos(&self, todos: Vec<Todo>) {
        self.apply_edit(|doc| doc.with_todos(todos));
    }

    pub fn update_notes(&self, notes: Vec<Note>) {
        self.apply_edit(|doc| doc.with_notes(notes));
    }

    fn apply_edit(&self, edit: impl FnOnce(&DataSchema) -> DataSchema) {
        let store = &self.inner.store;
        let status = &self.inner.status;
        let revision = &self.inner.revision;
        self.inner.document.send_modify(|current| {
            let next = edit(current);
            revision.fetch_add(1, Ordering::SeqCst);
            store.write_document(&next);
            *current = next;
            status.send_modify(|s| s.dirty = true);
        });
    }

    /// Replace the document, mirror it locally, and push it to the remote
    /// store if one is configured.
    ///
    /// The local copy is never rolled back: a failed push leaves the mirror
    /// and the dirty flag in place for the next attempt.
    pub async fn save(&self, document: DataSchema) -> SaveOutcome {
        let generation = self.inner.save_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let store = &self.inner.store;
        let status = &self.inner.status;
        let revision = &self.inner.revision;
        let mut saved_revision = 0;
        let mut previous_settings = document.settings.clone();
        self.inner.document.send_modify(|current| {
            saved_revision = revision.fetch_add(1, Ordering::SeqCst) + 1;
            store.write_document(&document);
            previous_settings = std::mem::replace(current, document.clone()).settings;
            status.send_modify(|s| {
                s.dirty = true;
                s.saving = true;
            });
        });
        self.refresh_wallpaper_if_changed(&previous_settings, &document.settings);

        let outcome = self.push(generation, saved_revision, document).await;
        if self.is_current_save(generation) {
            self.inner.status.send_modify(|s| s.saving = false);
        }
        log::info!("Save #{} finished: {:?}", generation, outcome);
        outcome
    }

    async fn push(&self, generation: u64, saved_revision: u64, document: DataSchema) -> SaveOutcome {
        let config = match self.remote_config() {
            Some(config) if config.has_token() => config,
            _ => {
                let older = self.lock_in_flight().take();
                if let Some(older) = older {
                    log::debug!("Save #{} is local only, aborting an in-flight push", generation);
                    older.abort();
                }
                self.clear_dirty_unless_edited(saved_revision);
                self.inner.notifier.notify(Notice::success(SAVED_LOCALLY_NOTICE));
                return SaveOutcome::LocalOnly;
            }
        };

        let remote = Arc::clone(&self.inner.remote);
        let task = tokio::spawn(async move { remote.save(&config, &document).await });
        let superseded = self.lock_in_flight().replace(task.abort_handle());
        if let Some(older) = superseded {
            log::debug!("Save #{} supersedes an in-flight push", generation);
            older.abort();
        }

        let result = task.await;
        if !self.is_current_save(generation) {
            log::debug!("Discarding result of superseded save #{}", generation);
            return SaveOutcome::Superseded;
        }
        self.lock_in_flight().take();

        match result {
            Ok(Ok(())) => {
                if !self.clear_dirty_unless_edited(saved_revision) {
                    log::info!("Document changed while save #{} was in flight, still unsynced", generation);
                }
                self.inner.notifier.notify(Notice::success(SYNCED_NOTICE));
                SaveOutcome::Synced
            }
            Ok(Err(e)) => {
                log::warn!("Remote save failed, local copy kept: {}", e);
                self.inner.notifier.notify(Notice::error(SYNC_FAILED_NOTICE));
                SaveOutcome::Failed
            }
            Err(e) if e.is_cancelled() => SaveOutcome::Superseded,
            Err(e) => {
                self.unexpected("remote save", e);
                SaveOutcome::Failed
            }
        }
    }

    /// Clear dirty if nothing replaced the document after `saved_revision`.
    /// Check and clear both happen under the document lock.
    fn clear_dirty_unless_edited(&self, saved_revision: u64) -> bool {
        let status = &self.inner.status;
        let revision = &self.inner.revision;
        let mut cleared = false;
        self.inner.document.send_if_modified(|_| {
            if revision.load(Ordering::SeqCst) == saved_revision {
                status.send_modify(|s| s.dirty = false);
                cleared = true;
            }
            false
        });
        cleared
    }

    fn is_current_save(&self, generation: u64) -> bool {
        self.inner.save_generation.load(Ordering::SeqCst) == generation
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unexpected(&self, what: &str, e: JoinError) {
        log::error!("Unexpected failure during {}: {}", what, e);
        self.inner.notifier.notify(Notice::error(UNEXPECTED_NOTICE));
    }

    fn refresh_wallpaper_if_changed(&self, old: &SiteSettings, new: &SiteSettings) {
        if wallpaper_changed(old, new) {
            self.inner.wallpaper.refresh(new);
        }
    }

    /// Re-roll the background for the current settings.
    pub fn refresh_wallpaper(&self) -> Option<String> {
        let settings = self.inner.document.borrow().settings.clone();
        self.inner.wallpaper.refresh(&settings)
    }

    pub fn wallpaper(&self) -> Option<String> {
        self.inner.wallpaper.current()
    }

    pub fn subscribe_wallpaper(&self) -> watch::Receiver<Option<String>> {
        self.inner.wallpaper.subscribe()
    }

    pub fn document(&self) -> DataSchema {
        self.inner.document.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DataSchema> {
        self.inner.document.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.status().phase == Phase::Ready
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.status().dirty
    }

    pub fn is_saving(&self) -> bool {
        self.status().saving
    }

    pub fn remote_config(&self) -> Option<GithubConfig> {
        self.inner
            .github
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the remote config used by later saves, persisting it as given.
    pub fn set_remote_config(&self, config: Option<GithubConfig>) {
        match &config {
            Some(config) => self.inner.store.write_github_config(config),
            None => self.inner.store.clear_github_config(),
        }
        *self.inner.github.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoticeLevel;
    use crate::sync::RemoteError;
    use crate::wallpaper::BING_WALLPAPER_URL;
    use crate::core::WallpaperType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeRemote {
        document: Mutex<Option<DataSchema>>,
        fail_load: bool,
        fail_save: AtomicBool,
        panic_load: bool,
        panic_save: bool,
        load_gate: Option<Arc<Notify>>,
        save_gate: Mutex<Option<Arc<Notify>>>,
        loads: AtomicUsize,
        saves: AtomicUsize,
    }

    impl FakeRemote {
        fn with_document(document: DataSchema) -> Self {
            Self {
                document: Mutex::new(Some(document)),
                ..Self::default()
            }
        }

        fn stored(&self) -> Option<DataSchema> {
            self.document.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn load(&self, _config: &GithubConfig) -> Result<Option<DataSchema>, RemoteError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.load_gate {
                gate.notified().await;
            }
            if self.panic_load {
                panic!("remote load blew up");
            }
            if self.fail_load {
                return Err(RemoteError::Status {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            Ok(self.stored())
        }

        async fn save(&self, _config: &GithubConfig, document: &DataSchema) -> Result<(), RemoteError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let gate = self.save_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.panic_save {
                panic!("remote save blew up");
            }
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(RemoteError::Status {
                    status: 409,
                    body: "conflict".to_string(),
                });
            }
            *self.document.lock().unwrap() = Some(document.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingNotifier {
        fn notices(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    struct Harness {
        engine: SyncEngine,
        remote: Arc<FakeRemote>,
        notifier: Arc<RecordingNotifier>,
        store: LocalStore,
        _dir: TempDir,
    }

    fn harness(remote: FakeRemote, github: Option<GithubConfig>, bundle: Bundle, local: Option<&DataSchema>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        if let Some(local) = local {
            store.write_document(local);
        }
        let remote = Arc::new(remote);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = SyncEngine::new(EngineContext {
            store: store.clone(),
            remote: remote.clone(),
            github,
            bundle,
            notifier: notifier.clone(),
        });
        Harness {
            engine,
            remote,
            notifier,
            store,
            _dir: dir,
        }
    }

    async fn started(h: &Harness) {
        h.engine.start().expect("first start").await.unwrap();
    }

    fn token_config() -> GithubConfig {
        GithubConfig::new("octo", "nav").with_token("ghp_test")
    }

    fn wallpapers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("data:image/png;base64,{}", i)).collect()
    }

    fn todo(id: &str) -> Todo {
        Todo {
            created_at: None,
            ..Todo::new(id, id)
        }
    }

    fn note(id: &str) -> Note {
        Note {
            updated_at: None,
            ..Note::new(id, id)
        }
    }

    #[tokio::test]
    async fn fresh_install_uses_defaults_and_bundled_wallpapers() {
        let h = harness(FakeRemote::default(), None, Bundle::new(wallpapers(3), None), None);
        started(&h).await;

        let doc = h.engine.document();
        assert!(h.engine.is_ready());
        assert_eq!(doc.categories, DataSchema::default().categories);
        assert!(doc.todos.is_empty());
        assert!(doc.notes.is_empty());
        assert_eq!(doc.settings.wallpaper_list.len(), 3);
        assert!(!h.engine.has_unsaved_changes());
        assert!(h.notifier.notices().is_empty());
        assert!(wallpapers(3).contains(&h.engine.wallpaper().unwrap()));
    }

    #[tokio::test]
    async fn bundled_document_is_the_last_resort() {
        let mut deployed = DataSchema::default().with_categories(vec![Category::new("c9", "Deployed")]);
        deployed.todos = vec![todo("ignored")];
        let h = harness(
            FakeRemote::default(),
            None,
            Bundle::new(wallpapers(2), Some(deployed)),
            None,
        );
        started(&h).await;

        let doc = h.engine.document();
        assert_eq!(doc.categories[0].id, "c9");
        assert!(doc.todos.is_empty());
        assert_eq!(doc.settings.wallpaper_list, wallpapers(2));
        assert!(!h.engine.has_unsaved_changes());
        assert!(h.store.read_document().is_none());
    }

    #[tokio::test]
    async fn bundled_document_skipped_when_local_exists() {
        let local = DataSchema::default().with_todos(vec![todo("t1")]);
        let deployed = DataSchema::default().with_categories(vec![Category::new("c9", "Deployed")]);
        let h = harness(FakeRemote::default(), None, Bundle::new(vec![], Some(deployed)), Some(&local));
        started(&h).await;

        assert_eq!(h.engine.document(), local);
        assert!(h.engine.status().loaded_from_local);
    }

    #[tokio::test]
    async fn local_document_gets_bundled_wallpapers_only_when_empty() {
        let h = harness(FakeRemote::default(), None, Bundle::new(wallpapers(2), None), Some(&DataSchema::default()));
        started(&h).await;
        assert_eq!(h.engine.document().settings.wallpaper_list, wallpapers(2));

        let mut kept = DataSchema::default();
        kept.settings.wallpaper_list = vec!["mine".to_string()];
        let h = harness(FakeRemote::default(), None, Bundle::new(wallpapers(2), None), Some(&kept));
        started(&h).await;
        assert_eq!(h.engine.document().settings.wallpaper_list, vec!["mine".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_local_document_is_ignored() {
        let h = harness(FakeRemote::default(), None, Bundle::default(), None);
        h.store.set_item(crate::store::LOCAL_DATA_KEY, "{not json").unwrap();
        started(&h).await;

        assert!(h.engine.is_ready());
        assert!(!h.engine.status().loaded_from_local);
        assert_eq!(h.engine.document(), DataSchema::default());
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn ready_before_remote_answers() {
        let gate = Arc::new(Notify::new());
        let remote = FakeRemote {
            load_gate: Some(gate.clone()),
            ..FakeRemote::with_document(DataSchema::default().with_notes(vec![note("n1")]))
        };
        let h = harness(remote, Some(token_config()), Bundle::default(), None);

        let handle = h.engine.start().unwrap();
        let status = h.engine.status();
        assert_eq!(status.phase, Phase::Ready);
        assert!(!status.reconciled);

        gate.notify_one();
        handle.await.unwrap();
        assert!(h.engine.status().reconciled);
        assert_eq!(h.engine.document().notes, vec![note("n1")]);
    }

    #[tokio::test]
    async fn merge_keeps_local_todos_and_takes_remote_notes() {
        let local = DataSchema::default().with_todos(vec![todo("t1")]);
        let remote = DataSchema::default().with_notes(vec![note("n1")]);
        let h = harness(FakeRemote::with_document(remote), Some(token_config()), Bundle::default(), Some(&local));
        started(&h).await;

        let doc = h.engine.document();
        assert_eq!(doc.todos, vec![todo("t1")]);
        assert_eq!(doc.notes, vec![note("n1")]);
        assert!(h.engine.has_unsaved_changes());
        assert_eq!(h.store.read_document(), Some(doc));

        let notices = h.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Info);
    }

    #[tokio::test]
    async fn identical_remote_changes_nothing() {
        let doc = DataSchema::default()
            .with_todos(vec![todo("t1")])
            .with_notes(vec![note("n1")]);
        let h = harness(FakeRemote::with_document(doc.clone()), Some(token_config()), Bundle::default(), Some(&doc));
        started(&h).await;

        assert_eq!(h.engine.document(), doc);
        assert!(!h.engine.has_unsaved_changes());
        assert!(h.notifier.notices().is_empty());
        assert_eq!(h.remote.loads.load(Ordering::SeqCst), 1);
        assert!(h.engine.status().remote_reached);
    }

    #[tokio::test]
    async fn remote_settings_replace_local_without_dirtying() {
        let local = DataSchema::default();
        let mut remote = DataSchema::default().with_categories(vec![Category::new("c2", "Work")]);
        remote.settings.title = "Remote".to_string();
        let h = harness(FakeRemote::with_document(remote.clone()), Some(token_config()), Bundle::default(), Some(&local));
        started(&h).await;

        assert_eq!(h.engine.document(), remote);
        assert_eq!(h.store.read_document(), Some(remote));
        assert!(!h.engine.has_unsaved_changes());
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn edit_during_remote_load_is_folded_in() {
        let gate = Arc::new(Notify::new());
        let remote = FakeRemote {
            load_gate: Some(gate.clone()),
            ..FakeRemote::with_document(DataSchema::default().with_notes(vec![note("n1")]))
        };
        let h = harness(remote, Some(token_config()), Bundle::default(), Some(&DataSchema::default()));

        let handle = h.engine.start().unwrap();
        while h.remote.loads.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        h.engine.update_todos(vec![todo("typed-while-loading")]);
        gate.notify_one();
        handle.await.unwrap();

        let doc = h.engine.document();
        assert_eq!(doc.todos, vec![todo("typed-while-loading")]);
        assert_eq!(doc.notes, vec![note("n1")]);
        assert!(h.engine.has_unsaved_changes());
        assert_eq!(h.store.read_document(), Some(doc));
    }

    #[tokio::test]
    async fn failed_remote_load_keeps_local_silently() {
        let local = DataSchema::default().with_todos(vec![todo("t1")]);
        let remote = FakeRemote {
            fail_load: true,
            ..FakeRemote::default()
        };
        let h = harness(remote, Some(token_config()), Bundle::default(), Some(&local));
        started(&h).await;

        assert_eq!(h.engine.document(), local);
        assert!(!h.engine.has_unsaved_changes());
        assert!(h.notifier.notices().is_empty());
        assert!(h.engine.status().reconciled);
        assert!(!h.engine.status().remote_reached);
    }

    #[tokio::test]
    async fn token_less_config_never_loads() {
        let deployed = DataSchema::default().with_categories(vec![Category::new("c9", "Deployed")]);
        let h = harness(
            FakeRemote::with_document(DataSchema::default()),
            Some(GithubConfig::new("octo", "nav")),
            Bundle::new(vec![], Some(deployed)),
            None,
        );
        started(&h).await;

        assert_eq!(h.remote.loads.load(Ordering::SeqCst), 0);
        // A config record exists, so the deployed document is not used either.
        assert_eq!(h.engine.document(), DataSchema::default());
    }

    #[tokio::test]
    async fn edits_mirror_locally_and_mark_dirty() {
        let h = harness(FakeRemote::default(), Some(token_config()), Bundle::default(), None);
        started(&h).await;
        assert!(!h.engine.has_unsaved_changes());

        h.engine.update_categories(vec![Category::new("c5", "Reading")]);
        h.engine.update_notes(vec![note("n1")]);

        let doc = h.engine.document();
        assert_eq!(doc.categories[0].id, "c5");
        assert_eq!(doc.notes, vec![note("n1")]);
        assert_eq!(h.store.read_document(), Some(doc));
        assert!(h.engine.has_unsaved_changes());
        assert_eq!(h.remote.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn settings_edit_refreshes_wallpaper() {
        let h = harness(FakeRemote::default(), None, Bundle::new(wallpapers(1), None), None);
        started(&h).await;

        let mut settings = h.engine.document().settings;
        settings.wallpaper_type = WallpaperType::Url;
        settings.wallpaper = "https://img.example/a.jpg".to_string();
        h.engine.update_settings(settings.clone());

        assert_eq!(h.engine.document().settings, settings);
        assert_eq!(h.engine.wallpaper().as_deref(), Some("https://img.example/a.jpg"));
        assert!(h.engine.has_unsaved_changes());
        assert_eq!(h.store.read_document().map(|d| d.settings), Some(settings));
    }

    #[tokio::test]
    async fn subscribers_see_each_replacement() {
        let h = harness(FakeRemote::default(), None, Bundle::default(), None);
        started(&h).await;
        let mut rx = h.engine.subscribe();
        rx.borrow_and_update();

        h.engine.update_todos(vec![todo("t1")]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().todos, vec![todo("t1")]);
    }

    #[tokio::test]
    async fn save_without_token_is_local_only() {
        let h = harness(FakeRemote::default(), Some(GithubConfig::new("octo", "nav")), Bundle::default(), None);
        started(&h).await;
        let doc = DataSchema::default().with_todos(vec![todo("t1")]);

        assert_eq!(h.engine.save(doc.clone()).await, SaveOutcome::LocalOnly);
        assert_eq!(h.store.read_document(), Some(doc.clone()));
        assert_eq!(h.engine.document(), doc);
        assert!(!h.engine.has_unsaved_changes());
        assert!(!h.engine.is_saving());
        assert_eq!(h.remote.saves.load(Ordering::SeqCst), 0);
        assert_eq!(h.notifier.notices(), vec![Notice::success(SAVED_LOCALLY_NOTICE)]);
    }

    #[tokio::test]
    async fn save_without_config_is_local_only() {
        let h = harness(FakeRemote::default(), None, Bundle::default(), None);
        started(&h).await;
        h.engine.update_todos(vec![todo("t1")]);

        assert_eq!(h.engine.save(h.engine.document()).await, SaveOutcome::LocalOnly);
        assert!(!h.engine.has_unsaved_changes());
    }

    #[tokio::test]
    async fn failed_save_keeps_local_copy_and_dirty_flag() {
        let remote = FakeRemote {
            fail_save: AtomicBool::new(true),
            ..FakeRemote::default()
        };
        let h = harness(remote, Some(token_config()), Bundle::default(), None);
        started(&h).await;
        let doc = DataSchema::default().with_notes(vec![note("n1")]);

        assert_eq!(h.engine.save(doc.clone()).await, SaveOutcome::Failed);
        assert_eq!(h.store.read_document(), Some(doc.clone()));
        assert_eq!(h.engine.document(), doc);
        assert!(h.engine.has_unsaved_changes());
        assert!(!h.engine.is_saving());
        assert_eq!(h.notifier.notices(), vec![Notice::error(SYNC_FAILED_NOTICE)]);

        // A later successful save clears it.
        h.remote.fail_save.store(false, Ordering::SeqCst);
        assert_eq!(h.engine.save(doc.clone()).await, SaveOutcome::Synced);
        assert!(!h.engine.has_unsaved_changes());
        assert_eq!(h.remote.stored(), Some(doc));
    }

    #[tokio::test]
    async fn successful_save_clears_dirty_flag() {
        let h = harness(FakeRemote::default(), Some(token_config()), Bundle::default(), None);
        started(&h).await;
        h.engine.update_todos(vec![todo("t1")]);
        assert!(h.engine.has_unsaved_changes());

        let doc = h.engine.document();
        assert_eq!(h.engine.save(doc.clone()).await, SaveOutcome::Synced);
        assert!(!h.engine.has_unsaved_changes());
        assert_eq!(h.remote.stored(), Some(doc));
        assert_eq!(h.notifier.notices(), vec![Notice::success(SYNCED_NOTICE)]);
    }

    #[tokio::test]
    async fn newer_save_supersedes_in_flight_one() {
        let remote = FakeRemote::default();
        *remote.save_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
        let h = harness(remote, Some(token_config()), Bundle::default(), None);
        started(&h).await;

        let older = DataSchema::default().with_todos(vec![todo("older")]);
        let newer = DataSchema::default().with_todos(vec![todo("newer")]);

        let first = tokio::spawn({
            let engine = h.engine.clone();
            let doc = older.clone();
            async move { engine.save(doc).await }
        });
        while h.remote.saves.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.engine.save(newer.clone()).await, SaveOutcome::Synced);
        assert_eq!(first.await.unwrap(), SaveOutcome::Superseded);

        assert_eq!(h.remote.stored(), Some(newer.clone()));
        assert_eq!(h.engine.document(), newer.clone());
        assert_eq!(h.store.read_document(), Some(newer));
        assert!(!h.engine.has_unsaved_changes());
        assert!(!h.engine.is_saving());
        assert_eq!(h.notifier.notices(), vec![Notice::success(SYNCED_NOTICE)]);
    }

    #[tokio::test]
    async fn wallpaper_change_on_save_refreshes_selection() {
        let h = harness(FakeRemote::default(), None, Bundle::new(wallpapers(1), None), None);
        started(&h).await;
        assert_eq!(h.engine.wallpaper(), Some(wallpapers(1)[0].clone()));

        let mut doc = h.engine.document();
        doc.settings.wallpaper_type = WallpaperType::Bing;
        h.engine.save(doc).await;
        assert!(h.engine.wallpaper().unwrap().starts_with(BING_WALLPAPER_URL));

        let mut doc = h.engine.document();
        doc.settings.wallpaper_type = WallpaperType::Url;
        doc.settings.wallpaper = "https://img.example/bg.jpg".to_string();
        h.engine.save(doc).await;
        assert_eq!(h.engine.wallpaper().as_deref(), Some("https://img.example/bg.jpg"));
        assert_eq!(h.engine.refresh_wallpaper().as_deref(), Some("https://img.example/bg.jpg"));
    }

    #[tokio::test]
    async fn save_during_startup_keeps_bundled_document_out() {
        let deployed = DataSchema::default().with_categories(vec![Category::new("c9", "Deployed")]);
        let h = harness(FakeRemote::default(), None, Bundle::new(vec![], Some(deployed)), None);
        let mine = DataSchema::default().with_todos(vec![todo("mine")]);

        let handle = h.engine.start().unwrap();
        assert_eq!(h.engine.save(mine.clone()).await, SaveOutcome::LocalOnly);
        handle.await.unwrap();

        assert_eq!(h.engine.document(), mine);
        assert_eq!(h.store.read_document(), Some(mine.clone()));

        h.engine.update_notes(vec![note("n1")]);
        assert_eq!(h.store.read_document().map(|d| d.todos), Some(mine.todos));
    }

    #[tokio::test]
    async fn edit_during_push_stays_dirty() {
        let remote = FakeRemote::default();
        let gate = Arc::new(Notify::new());
        *remote.save_gate.lock().unwrap() = Some(gate.clone());
        let h = harness(remote, Some(token_config()), Bundle::default(), None);
        started(&h).await;

        let pushed = DataSchema::default().with_todos(vec![todo("a")]);
        let pending = tokio::spawn({
            let engine = h.engine.clone();
            let doc = pushed.clone();
            async move { engine.save(doc).await }
        });
        while h.remote.saves.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        h.engine.update_todos(vec![todo("a"), todo("b")]);
        gate.notify_one();

        assert_eq!(pending.await.unwrap(), SaveOutcome::Synced);
        assert_eq!(h.remote.stored(), Some(pushed));
        assert_eq!(h.engine.document().todos, vec![todo("a"), todo("b")]);
        assert!(h.engine.has_unsaved_changes());
        assert!(!h.engine.is_saving());

        assert_eq!(h.engine.save(h.engine.document()).await, SaveOutcome::Synced);
        assert!(!h.engine.has_unsaved_changes());
    }

    #[tokio::test]
    async fn local_only_save_cancels_in_flight_push() {
        let remote = FakeRemote::default();
        *remote.save_gate.lock().unwrap() = Some(Arc::new(Notify::new()));
        let h = harness(remote, Some(token_config()), Bundle::default(), None);
        started(&h).await;

        let first = tokio::spawn({
            let engine = h.engine.clone();
            let doc = DataSchema::default().with_todos(vec![todo("old")]);
            async move { engine.save(doc).await }
        });
        while h.remote.saves.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        h.engine.set_remote_config(None);
        let local = DataSchema::default().with_todos(vec![todo("new")]);
        assert_eq!(h.engine.save(local.clone()).await, SaveOutcome::LocalOnly);
        assert_eq!(first.await.unwrap(), SaveOutcome::Superseded);

        assert_eq!(h.remote.stored(), None);
        assert_eq!(h.store.read_document(), Some(local));
        assert!(!h.engine.has_unsaved_changes());
        assert!(!h.engine.is_saving());
    }

    #[tokio::test]
    async fn panicking_load_raises_one_error_notice() {
        let local = DataSchema::default().with_todos(vec![todo("t1")]);
        let remote = FakeRemote {
            panic_load: true,
            ..FakeRemote::with_document(DataSchema::default())
        };
        let h = harness(remote, Some(token_config()), Bundle::default(), Some(&local));
        started(&h).await;

        let status = h.engine.status();
        assert_eq!(status.phase, Phase::Ready);
        assert!(status.reconciled);
        assert!(!status.remote_reached);
        assert_eq!(h.engine.document(), local);
        assert_eq!(h.notifier.notices(), vec![Notice::error(UNEXPECTED_NOTICE)]);
    }

    #[tokio::test]
    async fn panicking_save_reports_failure() {
        let remote = FakeRemote {
            panic_save: true,
            ..FakeRemote::default()
        };
        let h = harness(remote, Some(token_config()), Bundle::default(), None);
        started(&h).await;
        let doc = DataSchema::default().with_notes(vec![note("n1")]);

        assert_eq!(h.engine.save(doc.clone()).await, SaveOutcome::Failed);
        assert!(h.engine.has_unsaved_changes());
        assert!(!h.engine.is_saving());
        assert!(h.engine.is_ready());
        assert_eq!(h.store.read_document(), Some(doc));
        assert_eq!(h.notifier.notices(), vec![Notice::error(UNEXPECTED_NOTICE)]);
    }

    #[tokio::test]
    async fn start_runs_once() {
        let h = harness(FakeRemote::default(), None, Bundle::default(), None);
        started(&h).await;
        assert!(h.engine.start().is_none());
        assert!(h.engine.is_ready());
    }

    #[tokio::test]
    async fn remote_config_is_persisted_and_used_by_later_saves() {
        let h = harness(FakeRemote::default(), None, Bundle::default(), None);
        started(&h).await;

        h.engine.set_remote_config(Some(token_config()));
        assert_eq!(h.store.read_github_config(), Some(token_config()));
        assert_eq!(h.engine.save(h.engine.document()).await, SaveOutcome::Synced);

        h.engine.set_remote_config(None);
        assert!(h.store.read_github_config().is_none());
        assert_eq!(h.engine.save(h.engine.document()).await, SaveOutcome::LocalOnly);
        assert_eq!(h.remote.saves.load(Ordering::SeqCst), 1);
    }
}
