use std::collections::HashSet;

use clean_nav::bundle::Bundle;
use clean_nav::config::NavConfig;
use clean_nav::core::DataSchema;
use clean_nav::sync::github::GithubClient;
use clean_nav::sync::{RemoteStore, keyring, merge_documents};

fn ids<'a>(items: impl Iterator<Item = &'a str>) -> HashSet<&'a str> {
    items.collect()
}

fn compare(label: &str, local: HashSet<&str>, remote: HashSet<&str>) {
    let mut local_only: Vec<_> = local.difference(&remote).collect();
    let mut remote_only: Vec<_> = remote.difference(&local).collect();
    local_only.sort();
    remote_only.sort();

    println!("  {}: {} local, {} remote", label, local.len(), remote.len());
    for id in local_only {
        println!("    local only:  {}", id);
    }
    for id in remote_only {
        println!("    remote only: {}", id);
    }
}

#[tokio::main]
async fn main() {
    match systemd_journal_logger::JournalLog::new() {
        Ok(journal) => {
            if let Err(e) = journal
                .with_syslog_identifier("clean-nav-sync-check".to_string())
                .install()
            {
                eprintln!("warning: could not install journal logger: {}", e);
            }
        }
        Err(e) => eprintln!("warning: journal unavailable, logging disabled: {}", e),
    }
    log::set_max_level(log::LevelFilter::Info);

    let config = NavConfig::load();
    let store = config.store();

    println!("=== Local vs GitHub Comparison ===\n");

    let local = store.read_document();
    match &local {
        Some(doc) => println!(
            "Local: {} categories, {} todos, {} notes",
            doc.categories.len(),
            doc.todos.len(),
            doc.notes.len()
        ),
        None => println!("Local: no document stored in {}", store.dir().display()),
    }
    let local = local.unwrap_or_default();

    let Some(github) = store.read_github_config() else {
        println!("No GitHub config stored.");
        return;
    };
    let github = keyring::resolve_token(github).await;
    println!("--- GitHub: {} ({} on {}) ---", github.slug(), github.path, github.branch);
    if !github.has_token() {
        println!("  No token found");
        return;
    }

    let client = match GithubClient::new() {
        Ok(c) => c,
        Err(e) => {
            println!("  Client error: {}", e);
            return;
        }
    };

    let remote: DataSchema = match client.load(&github).await {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            println!("  Remote has no document yet; the next save creates it");
            return;
        }
        Err(e) => {
            println!("  Load error: {}", e);
            return;
        }
    };

    compare(
        "categories",
        ids(local.categories.iter().map(|c| c.id.as_str())),
        ids(remote.categories.iter().map(|c| c.id.as_str())),
    );
    compare(
        "todos",
        ids(local.todos.iter().map(|t| t.id.as_str())),
        ids(remote.todos.iter().map(|t| t.id.as_str())),
    );
    compare(
        "notes",
        ids(local.notes.iter().map(|n| n.id.as_str())),
        ids(remote.notes.iter().map(|n| n.id.as_str())),
    );
    if local.settings != remote.settings {
        println!("  settings differ (remote wins on merge)");
    }

    let bundle = Bundle::load(config.wallpaper_dir.as_deref(), config.max_wallpapers);
    let outcome = merge_documents(&local, &remote, &bundle.wallpapers);

    println!("\n--- Dry-run merge ---");
    println!("  would replace local document: {}", outcome.changed);
    println!("  local ahead of remote:        {}", outcome.local_won);
    println!(
        "  result: {} categories, {} todos, {} notes",
        outcome.merged.categories.len(),
        outcome.merged.todos.len(),
        outcome.merged.notes.len()
    );
}
