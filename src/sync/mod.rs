pub mod engine;
pub mod github;
pub mod keyring;
pub mod merge;

use async_trait::async_trait;

use crate::core::DataSchema;
use github::GithubConfig;

pub use engine::{EngineContext, EngineStatus, Phase, SaveOutcome, SyncEngine};
pub use merge::{MergeOutcome, merge_documents};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("no access token configured")]
    MissingToken,
    #[error("invalid repository `{0}`, expected owner/repo")]
    InvalidRepo(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote document is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// A user-owned remote copy of the document.
///
/// `load` returns `Ok(None)` when the remote has no document yet. The engine
/// treats every error as "absent" on load and "failed" on save; nothing
/// here is allowed to block the page.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn load(&self, config: &GithubConfig) -> Result<Option<DataSchema>, RemoteError>;

    async fn save(&self, config: &GithubConfig, document: &DataSchema) -> Result<(), RemoteError>;
}
