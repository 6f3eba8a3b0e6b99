use std::collections::HashMap;

use super::github::GithubConfig;

pub(crate) const SERVICE_NAME: &str = "clean-nav";

fn attributes(repo: &str) -> HashMap<&str, &str> {
    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("repo", repo);
    attrs
}

/// Store a GitHub token for `repo` (an `owner/repo` slug) in the system keyring.
pub async fn store_token(repo: &str, token: &str) -> Result<(), String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    keyring
        .create_item(
            &format!("Clean Nav GitHub token ({})", repo),
            &attributes(repo),
            token.as_bytes(),
            true, // replace existing
        )
        .await
        .map_err(|e| format!("Failed to store token: {}", e))?;

    Ok(())
}

pub async fn load_token(repo: &str) -> Result<Option<String>, String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    let items = keyring
        .search_items(&attributes(repo))
        .await
        .map_err(|e| format!("Failed to search keyring: {}", e))?;

    if let Some(item) = items.first() {
        let secret = item
            .secret()
            .await
            .map_err(|e| format!("Failed to read secret: {}", e))?;
        let token = String::from_utf8(secret.to_vec())
            .map_err(|e| format!("Invalid UTF-8 in secret: {}", e))?;
        return Ok(Some(token));
    }

    Ok(None)
}

pub async fn delete_token(repo: &str) -> Result<(), String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    let items = keyring
        .search_items(&attributes(repo))
        .await
        .map_err(|e| format!("Failed to search keyring: {}", e))?;

    for item in items {
        item.delete()
            .await
            .map_err(|e| format!("Failed to delete token: {}", e))?;
    }

    Ok(())
}

/// Fill in a missing token from the keyring. Configs that already carry a
/// token, or repos with nothing stored, come back unchanged.
pub async fn resolve_token(config: GithubConfig) -> GithubConfig {
    if config.has_token() {
        return config;
    }
    match load_token(&config.slug()).await {
        Ok(Some(token)) => config.with_token(token),
        Ok(None) => config,
        Err(e) => {
            log::warn!("Keyring lookup for {} failed: {}", config.slug(), e);
            config
        }
    }
}
