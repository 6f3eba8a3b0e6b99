use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::sync::Arc;

use clean_nav::bundle::Bundle;
use clean_nav::config::NavConfig;
use clean_nav::core::{Category, DataSchema, LinkItem, Note, Todo, WallpaperType, filter_categories};
use clean_nav::notify::LogNotifier;
use clean_nav::sync::github::{GithubClient, GithubConfig};
use clean_nav::sync::{EngineContext, SaveOutcome, SyncEngine, keyring};

#[derive(Debug, Parser)]
#[command(about, version, subcommand_help_heading = "Commands")]
struct Cli {
    /// Log at debug level for this run.
    #[arg(long, global = true)]
    debug: bool,

    /// Keep edits local instead of pushing them to GitHub.
    #[arg(long, global = true)]
    no_push: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the current document.
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Reconcile with GitHub and report the result.
    Sync,
    /// Push the current document to GitHub.
    Save,
    #[command(subcommand)]
    Todo(TodoCommand),
    #[command(subcommand)]
    Note(NoteCommand),
    #[command(subcommand)]
    Link(LinkCommand),
    #[command(subcommand)]
    Github(GithubCommand),
    /// Read a GitHub token from stdin and store it in the keyring.
    Login,
    /// Remove the stored GitHub token.
    Logout,
    /// Print the background image, optionally switching its source first.
    Wallpaper {
        #[arg(long)]
        refresh: bool,
        /// One of local, bing, url, custom.
        #[arg(long)]
        kind: Option<String>,
        /// Image url for the url and custom kinds.
        #[arg(long)]
        value: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum TodoCommand {
    List,
    Add { text: String },
    /// Toggle a todo between open and done.
    Done { id: String },
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
enum NoteCommand {
    List,
    Add {
        title: String,
        #[arg(long, default_value = "")]
        content: String,
    },
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
enum LinkCommand {
    /// Show links whose title or url contains the query.
    Search { query: String },
    Add {
        category: String,
        title: String,
        url: String,
    },
}

#[derive(Debug, Subcommand)]
enum GithubCommand {
    /// Point sync at an owner/repo.
    Set {
        repo: String,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        api_base: Option<String>,
    },
    Show,
    Clear,
}

fn init_logging(config: &NavConfig, debug: bool) {
    // Wrapper filters: clean_nav targets at info/debug, everything else at warn.
    struct FilteredJournal {
        inner: systemd_journal_logger::JournalLog,
    }

    impl log::Log for FilteredJournal {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            if metadata.target().starts_with("clean_nav") {
                let max = if clean_nav::debug_logging() { log::LevelFilter::Debug } else { log::LevelFilter::Info };
                metadata.level() <= max
            } else {
                metadata.level() <= log::LevelFilter::Warn
            }
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.inner.log(record);
            }
        }
        fn flush(&self) {
            self.inner.flush();
        }
    }

    clean_nav::set_debug_logging(config.debug_logging || debug);

    let journal = match systemd_journal_logger::JournalLog::new() {
        Ok(journal) => journal.with_syslog_identifier("clean-nav".to_string()),
        Err(e) => {
            eprintln!("warning: journal unavailable, logging disabled: {}", e);
            return;
        }
    };
    if log::set_boxed_logger(Box::new(FilteredJournal { inner: journal })).is_ok() {
        log::set_max_level(log::LevelFilter::Debug);
    }
}

async fn build_engine(config: &NavConfig) -> Result<SyncEngine, Box<dyn std::error::Error>> {
    let store = config.store();
    let github = match store.read_github_config() {
        Some(github) => Some(keyring::resolve_token(github).await),
        None => None,
    };
    let bundle = Bundle::load(config.wallpaper_dir.as_deref(), config.max_wallpapers);
    log::debug!("Bundled {} wallpapers", bundle.wallpapers.len());

    Ok(SyncEngine::new(EngineContext {
        store,
        remote: Arc::new(GithubClient::new()?),
        github,
        bundle,
        notifier: Arc::new(LogNotifier),
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = NavConfig::load();
    init_logging(&config, cli.debug);

    let engine = build_engine(&config).await?;
    if let Some(handle) = engine.start() {
        handle.await?;
    }

    match cli.command {
        Command::Show { json } => show(&engine.document(), json)?,
        Command::Sync => {
            let status = engine.status();
            match engine.remote_config() {
                Some(github) if github.has_token() && status.remote_reached => {
                    println!("Reconciled with {}", github.slug())
                }
                Some(github) if github.has_token() => {
                    println!("Could not load from {}, kept local state (see the journal)", github.slug())
                }
                Some(github) => println!("No token for {}, run `clean-nav login`", github.slug()),
                None => println!("GitHub sync not configured"),
            }
            if status.dirty {
                println!("Local changes are not on GitHub yet, run `clean-nav save`");
            }
        }
        Command::Save => report(engine.save(engine.document()).await),
        Command::Todo(cmd) => run_todo(&engine, cmd, !cli.no_push).await?,
        Command::Note(cmd) => run_note(&engine, cmd, !cli.no_push).await?,
        Command::Link(cmd) => run_link(&engine, cmd, !cli.no_push).await?,
        Command::Github(cmd) => run_github(&engine, cmd)?,
        Command::Login => {
            let github = engine.remote_config().ok_or("run `clean-nav github set <owner/repo>` first")?;
            eprint!("GitHub token for {}: ", github.slug());
            let mut token = String::new();
            std::io::stdin().lock().read_line(&mut token)?;
            let token = token.trim();
            if token.is_empty() {
                return Err("empty token".into());
            }
            keyring::store_token(&github.slug(), token).await?;
            println!("Token stored for {}", github.slug());
        }
        Command::Logout => {
            let github = engine.remote_config().ok_or("GitHub sync not configured")?;
            keyring::delete_token(&github.slug()).await?;
            println!("Token removed for {}", github.slug());
        }
        Command::Wallpaper { refresh, kind, value } => {
            if kind.is_some() || value.is_some() {
                let mut doc = engine.document();
                if let Some(kind) = kind {
                    doc.settings.wallpaper_type =
                        WallpaperType::from_name(&kind).ok_or_else(|| format!("unknown wallpaper kind {}", kind))?;
                }
                if let Some(value) = value {
                    doc.settings.wallpaper = value;
                }
                if cli.no_push {
                    engine.update_settings(doc.settings);
                } else {
                    report(engine.save(doc).await);
                }
            }
            let current = if refresh { engine.refresh_wallpaper() } else { engine.wallpaper() };
            match current {
                Some(w) if w.starts_with("data:") => println!("{}…", &w[..w.len().min(64)]),
                Some(w) => println!("{}", w),
                None => println!("No wallpaper available"),
            }
        }
    }

    Ok(())
}

fn show(doc: &DataSchema, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(doc)?);
        return Ok(());
    }
    println!("{}", doc.settings.title);
    println!(
        "wallpaper: {} ({} in list), blur {}",
        doc.settings.wallpaper_type.as_str(),
        doc.settings.wallpaper_list.len(),
        doc.settings.blur_level.as_str()
    );
    print_categories(&doc.categories);
    print_todos(&doc.todos);
    print_notes(&doc.notes);
    Ok(())
}

fn print_categories(categories: &[Category]) {
    for category in categories {
        println!("\n[{}] {}", category.id, category.title);
        for link in &category.links {
            println!("  {:<10} {:<20} {}", link.id, link.title, link.url);
        }
    }
}

fn print_todos(todos: &[Todo]) {
    if todos.is_empty() {
        return;
    }
    println!("\nTodos:");
    for todo in todos {
        println!("  [{}] {}  {}", if todo.completed { "x" } else { " " }, todo.id, todo.text);
    }
}

fn print_notes(notes: &[Note]) {
    if notes.is_empty() {
        return;
    }
    println!("\nNotes:");
    for note in notes {
        println!("  {}  {}", note.id, note.title);
    }
}

fn report(outcome: SaveOutcome) {
    match outcome {
        SaveOutcome::LocalOnly => println!("Saved locally (GitHub sync not set up)"),
        SaveOutcome::Synced => println!("Synced to GitHub"),
        SaveOutcome::Failed => println!("Sync failed, changes are kept locally"),
        SaveOutcome::Superseded => println!("Save superseded by a newer one"),
    }
}

async fn finish_edit(engine: &SyncEngine, push: bool) {
    if push {
        report(engine.save(engine.document()).await);
    } else {
        println!("Saved locally");
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn run_todo(engine: &SyncEngine, cmd: TodoCommand, push: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut todos = engine.document().todos;
    match cmd {
        TodoCommand::List => {
            print_todos(&todos);
            return Ok(());
        }
        TodoCommand::Add { text } => todos.push(Todo::new(new_id(), text)),
        TodoCommand::Done { id } => {
            let todo = todos
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| format!("no todo with id {}", id))?;
            todo.completed = !todo.completed;
        }
        TodoCommand::Remove { id } => {
            let before = todos.len();
            todos.retain(|t| t.id != id);
            if todos.len() == before {
                return Err(format!("no todo with id {}", id).into());
            }
        }
    }
    engine.update_todos(todos);
    finish_edit(engine, push).await;
    Ok(())
}

async fn run_note(engine: &SyncEngine, cmd: NoteCommand, push: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut notes = engine.document().notes;
    match cmd {
        NoteCommand::List => {
            print_notes(&notes);
            return Ok(());
        }
        NoteCommand::Add { title, content } => {
            notes.push(Note {
                content,
                ..Note::new(new_id(), title)
            });
        }
        NoteCommand::Remove { id } => {
            let before = notes.len();
            notes.retain(|n| n.id != id);
            if notes.len() == before {
                return Err(format!("no note with id {}", id).into());
            }
        }
    }
    engine.update_notes(notes);
    finish_edit(engine, push).await;
    Ok(())
}

async fn run_link(engine: &SyncEngine, cmd: LinkCommand, push: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut categories = engine.document().categories;
    match cmd {
        LinkCommand::Search { query } => {
            let found = filter_categories(&categories, &query);
            if found.is_empty() {
                println!("No links match \"{}\"", query);
            }
            print_categories(&found);
            Ok(())
        }
        LinkCommand::Add { category, title, url } => {
            let target = categories
                .iter_mut()
                .find(|c| c.id == category)
                .ok_or_else(|| format!("no category with id {}", category))?;
            target.links.push(LinkItem::new(new_id(), title, url));
            engine.update_categories(categories);
            finish_edit(engine, push).await;
            Ok(())
        }
    }
}

fn run_github(engine: &SyncEngine, cmd: GithubCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        GithubCommand::Set {
            repo,
            branch,
            path,
            api_base,
        } => {
            let mut github = GithubConfig::from_slug(&repo)?;
            if let Some(branch) = branch {
                github.branch = branch;
            }
            if let Some(path) = path {
                github.path = path;
            }
            github.api_base = api_base;
            println!("Syncing with {} ({} on {})", github.slug(), github.path, github.branch);
            engine.set_remote_config(Some(github));
        }
        GithubCommand::Show => match engine.remote_config() {
            Some(github) => {
                println!("repo:   {}", github.slug());
                println!("branch: {}", github.branch);
                println!("path:   {}", github.path);
                println!("token:  {}", if github.has_token() { "set" } else { "missing" });
            }
            None => println!("GitHub sync not configured"),
        },
        GithubCommand::Clear => {
            engine.set_remote_config(None);
            println!("GitHub sync disabled");
        }
    }
    Ok(())
}
