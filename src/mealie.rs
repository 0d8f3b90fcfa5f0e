use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::duplicates::RecipeSummary;
use crate::settings::Credentials;

pub const REQUEST_TIMEOUT_SECS: u64 = 15;
const SEARCH_PAGE_SIZE: &str = "10";

/// Errors raised by the recipe server client. Completed-but-unsuccessful
/// recipe creations are not errors; they surface as [`CreateOutcome::Failure`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,
    #[error("{}", http_error_text(.status, .message))]
    Http { status: u16, message: Option<String> },
    #[error("network error: {0}")]
    Transport(String),
    #[error("malformed server response: {0}")]
    Decode(String),
}

fn http_error_text(status: &u16, message: &Option<String>) -> String {
    match message {
        Some(message) => format!("server returned HTTP {status}: {message}"),
        None => format!("server returned HTTP {status}"),
    }
}

impl ApiError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MealieUser {
    pub username: String,
    #[serde(default, rename = "fullName")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Async client surface for the recipe server. The orchestrator and CLI talk
/// to this trait; tests substitute scripted doubles.
#[async_trait]
pub trait RecipeApi: Send + Sync {
    async fn create_from_url(
        &self,
        url: &Url,
        credentials: &Credentials,
    ) -> Result<CreateOutcome, ApiError>;

    async fn create_from_html(
        &self,
        html: &str,
        credentials: &Credentials,
        origin: Option<&Url>,
    ) -> Result<CreateOutcome, ApiError>;

    async fn get_user(&self, credentials: &Credentials) -> Result<MealieUser, ApiError>;

    /// Probe only: asks the server whether it can scrape the URL without
    /// creating anything.
    async fn test_scrape_url(&self, url: &Url, credentials: &Credentials)
    -> Result<bool, ApiError>;

    async fn search_recipes(
        &self,
        query: &str,
        credentials: &Credentials,
    ) -> Result<Vec<RecipeSummary>, ApiError>;
}

/// HTTP client for a Mealie instance.
pub struct MealieClient {
    http: reqwest::Client,
}

impl MealieClient {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("build http client")?;
        Ok(Self { http })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(u16, String), ApiError> {
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(ApiError::from_reqwest)?;
        Ok((status, body))
    }
}

fn endpoint(server: &str, path: &str) -> String {
    let server = server.trim_end_matches('/');
    format!("{server}{path}")
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Pulls Mealie's `detail` field out of an error body when there is one.
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<RecipeSummary>,
}

#[async_trait]
impl RecipeApi for MealieClient {
    async fn create_from_url(
        &self,
        url: &Url,
        credentials: &Credentials,
    ) -> Result<CreateOutcome, ApiError> {
        let endpoint = endpoint(&credentials.server, "/api/recipes/create/url");
        let body = serde_json::json!({ "url": url.as_str() });
        let (status, raw) = self
            .send(
                self.http
                    .post(&endpoint)
                    .bearer_auth(&credentials.token)
                    .json(&body),
            )
            .await?;

        if is_success(status) {
            Ok(CreateOutcome::Success)
        } else {
            tracing::debug!(status, detail = error_detail(&raw), "create from url rejected");
            Ok(CreateOutcome::Failure)
        }
    }

    async fn create_from_html(
        &self,
        html: &str,
        credentials: &Credentials,
        origin: Option<&Url>,
    ) -> Result<CreateOutcome, ApiError> {
        let endpoint = endpoint(&credentials.server, "/api/recipes/create/html");
        let mut body = serde_json::json!({ "data": html });
        if let Some(origin) = origin
            && let Some(map) = body.as_object_mut()
        {
            map.insert("url".to_owned(), serde_json::json!(origin.as_str()));
        }
        let (status, raw) = self
            .send(
                self.http
                    .post(&endpoint)
                    .bearer_auth(&credentials.token)
                    .json(&body),
            )
            .await?;

        if is_success(status) {
            Ok(CreateOutcome::Success)
        } else {
            tracing::debug!(status, detail = error_detail(&raw), "create from html rejected");
            Ok(CreateOutcome::Failure)
        }
    }

    async fn get_user(&self, credentials: &Credentials) -> Result<MealieUser, ApiError> {
        let endpoint = endpoint(&credentials.server, "/api/users/self");
        let (status, raw) = self
            .send(self.http.get(&endpoint).bearer_auth(&credentials.token))
            .await?;

        if !is_success(status) {
            return Err(ApiError::Http {
                status,
                message: error_detail(&raw),
            });
        }
        serde_json::from_str(&raw).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn test_scrape_url(
        &self,
        url: &Url,
        credentials: &Credentials,
    ) -> Result<bool, ApiError> {
        let endpoint = endpoint(&credentials.server, "/api/recipes/test-scrape-url");
        let body = serde_json::json!({ "url": url.as_str() });
        let (status, raw) = self
            .send(
                self.http
                    .post(&endpoint)
                    .bearer_auth(&credentials.token)
                    .json(&body),
            )
            .await?;

        match status {
            status if is_success(status) => Ok(true),
            // The scraper reports an unusable page with a client error;
            // that is a negative probe result, not a broken server.
            400 | 404 | 422 => Ok(false),
            status => Err(ApiError::Http {
                status,
                message: error_detail(&raw),
            }),
        }
    }

    async fn search_recipes(
        &self,
        query: &str,
        credentials: &Credentials,
    ) -> Result<Vec<RecipeSummary>, ApiError> {
        let endpoint = endpoint(&credentials.server, "/api/recipes");
        let (status, raw) = self
            .send(
                self.http
                    .get(&endpoint)
                    .query(&[("search", query), ("perPage", SEARCH_PAGE_SIZE)])
                    .bearer_auth(&credentials.token),
            )
            .await?;

        if !is_success(status) {
            return Err(ApiError::Http {
                status,
                message: error_detail(&raw),
            });
        }
        let page: SearchPage =
            serde_json::from_str(&raw).map_err(|err| ApiError::Decode(err.to_string()))?;
        Ok(page.items)
    }
}
