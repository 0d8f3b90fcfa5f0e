use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{self, KeyValueStore, Scope};

pub const SERVER_KEY: &str = "mealieServer";
pub const TOKEN_KEY: &str = "mealieApiToken";
pub const USERNAME_KEY: &str = "mealieUsername";
pub const CREATE_MODE_KEY: &str = "recipeCreateMode";
/// One-shot flag set by the submission gate and consumed by the interactive
/// surface the next time it reads the mode.
pub const SUGGEST_HTML_MODE_KEY: &str = "suggestHtmlMode";

/// User-selected recipe submission strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateMode {
    #[default]
    Url,
    Html,
}

impl CreateMode {
    /// Tolerant parse of the stored value; anything unrecognized is `None`
    /// and callers fall back to the default.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "url" => Some(Self::Url),
            "html" => Some(Self::Html),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Html => "html",
        }
    }
}

/// Server URL plus API token, both required before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub server: String,
    pub token: String,
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: Option<String>,
    pub token: Option<String>,
    pub username: Option<String>,
    pub create_mode: CreateMode,
}

impl Settings {
    pub async fn load(store: &dyn KeyValueStore) -> anyhow::Result<Self> {
        let server: Option<String> = storage::get_json(store, Scope::Sync, SERVER_KEY)
            .await
            .context("load server url")?;
        let token: Option<String> = storage::get_json(store, Scope::Sync, TOKEN_KEY)
            .await
            .context("load api token")?;
        let username: Option<String> = storage::get_json(store, Scope::Sync, USERNAME_KEY)
            .await
            .context("load username")?;
        // Any non-string or unrecognized mode value falls back to the default.
        let create_mode: Option<Value> = storage::get_json(store, Scope::Sync, CREATE_MODE_KEY)
            .await
            .context("load create mode")?;

        Ok(Self {
            server: server.filter(|s| !s.trim().is_empty()),
            token: token.filter(|s| !s.trim().is_empty()),
            username,
            create_mode: create_mode
                .as_ref()
                .and_then(Value::as_str)
                .and_then(CreateMode::parse)
                .unwrap_or_default(),
        })
    }

    /// Both halves of the credential pair, or `None` when either is missing.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.server, &self.token) {
            (Some(server), Some(token)) => Some(Credentials {
                server: server.trim_end_matches('/').to_string(),
                token: token.clone(),
            }),
            _ => None,
        }
    }
}

pub async fn store_credentials(
    store: &dyn KeyValueStore,
    server: &str,
    token: &str,
) -> anyhow::Result<()> {
    storage::set_json(store, Scope::Sync, SERVER_KEY, &server)
        .await
        .context("store server url")?;
    storage::set_json(store, Scope::Sync, TOKEN_KEY, &token)
        .await
        .context("store api token")?;
    Ok(())
}

pub async fn store_username(store: &dyn KeyValueStore, username: &str) -> anyhow::Result<()> {
    storage::set_json(store, Scope::Sync, USERNAME_KEY, &username)
        .await
        .context("store username")
}

pub async fn store_create_mode(store: &dyn KeyValueStore, mode: CreateMode) -> anyhow::Result<()> {
    storage::set_json(store, Scope::Sync, CREATE_MODE_KEY, &mode.as_str())
        .await
        .context("store create mode")
}
