use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

use super::{RemoteError, RemoteStore};
use crate::core::DataSchema;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("clean-nav/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static REPO_SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)/([A-Za-z0-9._-]+)$").unwrap());

fn default_branch() -> String {
    "main".to_string()
}

fn default_path() -> String {
    "data.json".to_string()
}

/// Where the document lives on GitHub, and the token to reach it.
///
/// A config without a token is kept around (the user may be half way
/// through setting it up) but never triggers remote sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl GithubConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            token: None,
            owner: owner.into(),
            repo: repo.into(),
            branch: default_branch(),
            path: default_path(),
            api_base: None,
        }
    }

    /// Build a config from an `owner/repo` slug.
    pub fn from_slug(slug: &str) -> Result<Self, RemoteError> {
        let caps = REPO_SLUG_RE
            .captures(slug.trim())
            .ok_or_else(|| RemoteError::InvalidRepo(slug.to_string()))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn contents_url(&self) -> String {
        let base = self
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!(
            "{}/repos/{}/{}/contents/{}",
            base,
            self.owner,
            self.repo,
            self.path.trim_start_matches('/')
        )
    }
}

/// Metadata half of a contents-API response; only the blob sha is needed to update.
#[derive(Debug, Deserialize)]
struct ContentsEntry {
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

pub fn encode_document(document: &DataSchema) -> Result<String, RemoteError> {
    let json = serde_json::to_vec_pretty(document)?;
    Ok(BASE64.encode(json))
}

pub fn decode_document(bytes: &[u8]) -> Result<DataSchema, RemoteError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn commit_message() -> String {
    format!(
        "Update navigation data ({})",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

/// Reads and writes the document as a single file through the GitHub contents API.
#[derive(Clone)]
pub struct GithubClient {
    http: Client,
}

impl GithubClient {
    pub fn new() -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    fn request(&self, config: &GithubConfig, builder: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(RemoteError::MissingToken)?;
        Ok(builder
            .header(AUTHORIZATION, format!("Bearer {}", token.trim()))
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    /// Current blob sha of the document file, `None` if it does not exist yet.
    async fn current_sha(&self, config: &GithubConfig) -> Result<Option<String>, RemoteError> {
        let resp = self
            .request(config, self.http.get(config.contents_url()))?
            .query(&[("ref", config.branch.as_str())])
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let entry: ContentsEntry = resp.json().await?;
                Ok(Some(entry.sha))
            }
            s => Err(RemoteError::Status {
                status: s.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl RemoteStore for GithubClient {
    async fn load(&self, config: &GithubConfig) -> Result<Option<DataSchema>, RemoteError> {
        let resp = self
            .request(config, self.http.get(config.contents_url()))?
            .query(&[("ref", config.branch.as_str())])
            .header(ACCEPT, "application/vnd.github.raw+json")
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => {
                log::info!("{} has no {} on {} yet", config.slug(), config.path, config.branch);
                Ok(None)
            }
            s if s.is_success() => {
                let bytes = resp.bytes().await?;
                decode_document(&bytes).map(Some)
            }
            s => Err(RemoteError::Status {
                status: s.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn save(&self, config: &GithubConfig, document: &DataSchema) -> Result<(), RemoteError> {
        let sha = self.current_sha(config).await?;
        let body = PutContents {
            message: commit_message(),
            content: encode_document(document)?,
            branch: &config.branch,
            sha,
        };

        let resp = self
            .request(config, self.http.put(config.contents_url()))?
            .header(ACCEPT, "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            log::info!("Pushed {} to {}@{}", config.path, config.slug(), config.branch);
            Ok(())
        } else {
            Err(RemoteError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }
}
