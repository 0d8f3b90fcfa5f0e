use std::sync::Arc;

use anyhow::Context as _;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::activity::ActivityTracker;
use crate::capture::{PageCapture, TabRef};
use crate::detection::{DetectionCache, DetectionCacheEntry, DetectionOutcome};
use crate::duplicates::{self, DuplicateMatches};
use crate::event_log::{EventLog, Feature, Level, LogEvent, OperationSpec, Phase};
use crate::mealie::{CreateOutcome, MealieUser, RecipeApi};
use crate::menu::MenuController;
use crate::settings::{self, CreateMode, Credentials, Settings};
use crate::storage::{self, KeyValueStore, Scope, StorageChange};
use crate::surface::{ExtensionSurface, ResultBadge};

/// Detection outcomes that make a URL-mode submission pointless enough to
/// steer the user toward HTML capture instead. A policy knob rather than a
/// hard rule.
#[derive(Debug, Clone)]
pub struct SuggestionPolicy {
    pub trigger_outcomes: Vec<DetectionOutcome>,
}

impl Default for SuggestionPolicy {
    fn default() -> Self {
        Self {
            trigger_outcomes: vec![
                DetectionOutcome::NotRecipe,
                DetectionOutcome::Timeout,
                DetectionOutcome::HttpError,
            ],
        }
    }
}

impl SuggestionPolicy {
    pub fn should_suggest(&self, outcome: DetectionOutcome) -> bool {
        self.trigger_outcomes.contains(&outcome)
    }
}

/// How one "create recipe" invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// The server accepted the recipe.
    Created,
    /// The server completed the request but could not build a recipe.
    Rejected,
    /// The attempt died on the way: capture failed or the network broke.
    Failed,
    /// Submission was suppressed in favor of suggesting HTML mode.
    SuggestedHtmlMode,
    MissingConfig,
    InvalidTab,
}

const SUBMIT_LABEL: &str = "Adding recipe to Mealie";

/// Composition root of the background context. Owns the detection cache,
/// event log, menu controller, and activity tracker, and orchestrates every
/// user-triggered operation across them.
pub struct Background {
    store: Arc<dyn KeyValueStore>,
    surface: Arc<dyn ExtensionSurface>,
    api: Arc<dyn RecipeApi>,
    capture: Arc<dyn PageCapture>,
    cache: Arc<DetectionCache>,
    log: EventLog,
    menu: Arc<MenuController>,
    tracker: ActivityTracker,
    suggestion_policy: SuggestionPolicy,
}

impl Background {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        surface: Arc<dyn ExtensionSurface>,
        api: Arc<dyn RecipeApi>,
        capture: Arc<dyn PageCapture>,
    ) -> Self {
        let cache = Arc::new(DetectionCache::new());
        let menu = Arc::new(MenuController::new(
            store.clone(),
            cache.clone(),
            surface.clone(),
        ));
        let tracker = ActivityTracker::new(store.clone(), surface.clone(), menu.clone());
        let log = EventLog::new(store.clone());
        Self {
            store,
            surface,
            api,
            capture,
            cache,
            log,
            menu,
            tracker,
            suggestion_policy: SuggestionPolicy::default(),
        }
    }

    pub fn with_suggestion_policy(mut self, policy: SuggestionPolicy) -> Self {
        self.suggestion_policy = policy;
        self
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn detection_cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Probes the page the user landed on, refreshes the detection cache and
    /// duplicate scan, and re-derives the menu. Returns the cached entry, or
    /// `None` when the visit could not be probed (no URL, no credentials).
    pub async fn handle_page_visit(
        &self,
        tab: &TabRef,
    ) -> anyhow::Result<Option<DetectionCacheEntry>> {
        let Some(page_url) = tab.url.clone() else {
            self.menu.set_current_page(None).await;
            self.refresh_menu().await;
            return Ok(None);
        };
        self.menu.set_current_page(Some(page_url.clone())).await;
        self.menu.set_duplicates(DuplicateMatches::None).await;

        let settings = Settings::load(self.store.as_ref()).await?;
        let Some(credentials) = settings.credentials() else {
            self.refresh_menu().await;
            return Ok(None);
        };

        let spec = OperationSpec::new(
            Feature::RecipeDetect,
            "probe-page",
            "Checking page for recipe",
        );
        let entry = self
            .log
            .with_operation_judged(
                spec,
                |entry: &DetectionCacheEntry| {
                    matches!(
                        entry.outcome,
                        DetectionOutcome::Recipe | DetectionOutcome::NotRecipe
                    )
                },
                |op_id| {
                    let page_url = page_url.clone();
                    let credentials = credentials.clone();
                    async move {
                        let result = self.api.test_scrape_url(&page_url, &credentials).await;
                        let entry = DetectionCacheEntry::from_probe(&result);
                        self.log
                            .log_event(
                                LogEvent::new(
                                    Level::Debug,
                                    Feature::RecipeDetect,
                                    "probe-result",
                                    format!("probe outcome: {}", entry.outcome.as_str()),
                                )
                                .with_phase(Phase::Progress)
                                .with_op_id(op_id)
                                .with_data(json!({
                                    "url": page_url.as_str(),
                                    "outcome": entry.outcome.as_str(),
                                    "status": entry.status,
                                })),
                            )
                            .await;
                        Ok(entry)
                    }
                },
            )
            .await?;

        self.cache.set(&page_url, entry.clone()).await;

        if entry.outcome == DetectionOutcome::Recipe {
            let duplicates = self
                .scan_duplicates(&page_url, tab.title.as_deref(), &credentials)
                .await;
            self.menu.set_duplicates(duplicates).await;
        }

        self.refresh_menu().await;
        Ok(Some(entry))
    }

    /// Looks for recipes the library may already have for this page. Any
    /// failure degrades to "no duplicates"; the scan is advisory.
    async fn scan_duplicates(
        &self,
        page_url: &Url,
        title: Option<&str>,
        credentials: &Credentials,
    ) -> DuplicateMatches {
        let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) else {
            return DuplicateMatches::None;
        };

        let spec = OperationSpec::new(
            Feature::DuplicateDetect,
            "scan-duplicates",
            "Scanning library for duplicates",
        );
        let result = self
            .log
            .with_operation(spec, |_op_id| async move {
                self.api
                    .search_recipes(title, credentials)
                    .await
                    .context("search recipes")
            })
            .await;

        match result {
            Ok(candidates) => duplicates::classify(page_url, candidates),
            Err(err) => {
                tracing::debug!(?err, "duplicate scan failed");
                DuplicateMatches::None
            }
        }
    }

    /// One user-triggered submission, end to end: precondition checks, the
    /// HTML-mode suggestion gate, then the instrumented attempt bracketed by
    /// activity begin/end. Capture and network failures are absorbed into
    /// the returned [`SubmitResult`]; only storage plumbing errors propagate.
    pub async fn create_recipe(&self, tab: &TabRef) -> anyhow::Result<SubmitResult> {
        let settings = Settings::load(self.store.as_ref()).await?;
        let Some(credentials) = settings.credentials() else {
            self.log
                .log(
                    Level::Warn,
                    Feature::RecipeCreate,
                    "missing-config",
                    "server or token not configured",
                )
                .await;
            self.tracker.flash(ResultBadge::Failure).await;
            self.surface
                .set_tooltip("Configure the Mealie server and token first")
                .await;
            return Ok(SubmitResult::MissingConfig);
        };

        let page_url = match (tab.id, tab.url.clone()) {
            (Some(_), Some(url)) => url,
            _ => {
                self.log
                    .log(
                        Level::Warn,
                        Feature::RecipeCreate,
                        "invalid-tab",
                        "tab has no id or no url",
                    )
                    .await;
                self.tracker.flash(ResultBadge::Failure).await;
                return Ok(SubmitResult::InvalidTab);
            }
        };

        if settings.create_mode == CreateMode::Url
            && let Some(entry) = self.cache.get(&page_url).await
            && self.suggestion_policy.should_suggest(entry.outcome)
        {
            storage::set_json(
                self.store.as_ref(),
                Scope::Local,
                settings::SUGGEST_HTML_MODE_KEY,
                &true,
            )
            .await?;
            self.log
                .log_event(
                    LogEvent::new(
                        Level::Info,
                        Feature::RecipeCreate,
                        "suggest-html-mode",
                        format!(
                            "url submission unlikely to work ({}); suggesting html capture",
                            entry.outcome.as_str()
                        ),
                    )
                    .with_data(json!({
                        "url": page_url.as_str(),
                        "outcome": entry.outcome.as_str(),
                    })),
                )
                .await;
            if let Err(err) = self.surface.open_popup().await {
                tracing::debug!(?err, "open popup failed");
            }
            return Ok(SubmitResult::SuggestedHtmlMode);
        }

        let spec = OperationSpec::new(Feature::RecipeCreate, "create-recipe", SUBMIT_LABEL);
        let outcome = self
            .log
            .with_operation_judged(
                spec,
                |outcome: &CreateOutcome| *outcome == CreateOutcome::Success,
                |op_id| {
                    let page_url = page_url.clone();
                    let credentials = credentials.clone();
                    async move {
                        self.tracker.begin(SUBMIT_LABEL, Some(op_id.clone())).await;
                        let result = self
                            .submit(settings.create_mode, &page_url, tab, &credentials, &op_id)
                            .await;
                        match &result {
                            Ok(CreateOutcome::Success) => {
                                self.cache.invalidate(&page_url).await;
                                self.tracker
                                    .end(Some(ResultBadge::Success), Some("Recipe added to Mealie"))
                                    .await;
                            }
                            Ok(CreateOutcome::Failure) => {
                                self.tracker
                                    .end(
                                        Some(ResultBadge::Failure),
                                        Some("Mealie could not add this recipe"),
                                    )
                                    .await;
                            }
                            Err(_) => {
                                self.tracker
                                    .end(Some(ResultBadge::Failure), Some("Failed to add recipe"))
                                    .await;
                            }
                        }
                        result
                    }
                },
            )
            .await;

        match outcome {
            Ok(CreateOutcome::Success) => Ok(SubmitResult::Created),
            Ok(CreateOutcome::Failure) => Ok(SubmitResult::Rejected),
            Err(err) => {
                tracing::debug!(err = format!("{err:#}"), "submission failed");
                Ok(SubmitResult::Failed)
            }
        }
    }

    async fn submit(
        &self,
        mode: CreateMode,
        page_url: &Url,
        tab: &TabRef,
        credentials: &Credentials,
        op_id: &str,
    ) -> anyhow::Result<CreateOutcome> {
        match mode {
            CreateMode::Url => self
                .api
                .create_from_url(page_url, credentials)
                .await
                .context("create recipe from url"),
            CreateMode::Html => {
                let html = self
                    .capture
                    .capture(tab)
                    .await
                    .context("capture page markup")?;
                let html = match html {
                    Some(html) if !html.trim().is_empty() => html,
                    _ => {
                        self.log
                            .log_event(
                                LogEvent::new(
                                    Level::Warn,
                                    Feature::HtmlCapture,
                                    "capture-page",
                                    "page markup unavailable",
                                )
                                .with_op_id(op_id),
                            )
                            .await;
                        anyhow::bail!("page markup unavailable");
                    }
                };
                self.log
                    .log_event(
                        LogEvent::new(
                            Level::Debug,
                            Feature::HtmlCapture,
                            "capture-page",
                            format!("captured {} bytes of markup", html.len()),
                        )
                        .with_op_id(op_id),
                    )
                    .await;
                self.api
                    .create_from_html(&html, credentials, Some(page_url))
                    .await
                    .context("create recipe from html")
            }
        }
    }

    /// Validates and stores the server/token pair, then verifies it against
    /// the live server. Bad credentials stay stored; the user sees the
    /// verification failure and can correct them.
    pub async fn connect(&self, server: &str, token: &str) -> anyhow::Result<MealieUser> {
        let server = server.trim();
        let parsed = Url::parse(server).context("parse server url")?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("server url must be http or https: {parsed}");
        }

        settings::store_credentials(self.store.as_ref(), server, token).await?;
        let credentials = Credentials {
            server: server.trim_end_matches('/').to_string(),
            token: token.to_string(),
        };

        let spec = OperationSpec::new(Feature::Auth, "verify-token", "Verifying Mealie credentials");
        let user = self
            .log
            .with_operation(spec, |_op_id| async {
                self.api
                    .get_user(&credentials)
                    .await
                    .context("get current user")
            })
            .await?;

        settings::store_username(self.store.as_ref(), &user.username).await?;
        self.refresh_menu().await;
        Ok(user)
    }

    /// Reads the one-shot HTML-mode suggestion flag, clearing it when set.
    pub async fn take_html_suggestion(&self) -> anyhow::Result<bool> {
        let suggested = storage::get_json::<bool>(
            self.store.as_ref(),
            Scope::Local,
            settings::SUGGEST_HTML_MODE_KEY,
        )
        .await?
        .unwrap_or(false);
        if suggested {
            self.store
                .remove(Scope::Local, settings::SUGGEST_HTML_MODE_KEY)
                .await?;
        }
        Ok(suggested)
    }

    /// Re-derives the menu and badge from whatever is true right now.
    pub async fn refresh_menu(&self) {
        match self.tracker.busy_label().await {
            Some(label) => self.menu.show_busy(&label).await,
            None => self.menu.show_idle().await,
        }
    }

    /// Watches the settings scope and re-derives the menu when the server,
    /// token, or mode changes. Cancel the returned token to stop.
    pub fn spawn_change_listener(self: &Arc<Self>) -> (CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let background = self.clone();
        let mut changes = background.store.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) => background.on_storage_change(change).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "storage change feed lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        (cancel, task)
    }

    async fn on_storage_change(&self, change: StorageChange) {
        if change.scope != Scope::Sync {
            return;
        }
        let watched = [
            settings::SERVER_KEY,
            settings::TOKEN_KEY,
            settings::CREATE_MODE_KEY,
        ];
        if !watched.contains(&change.key.as_str()) {
            return;
        }
        self.log
            .log(
                Level::Debug,
                Feature::Storage,
                "settings-changed",
                format!("{} changed", change.key),
            )
            .await;
        self.refresh_menu().await;
    }
}
