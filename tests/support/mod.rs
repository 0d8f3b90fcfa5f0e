use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use minimealie::background::Background;
use minimealie::capture::{PageCapture, TabRef};
use minimealie::duplicates::RecipeSummary;
use minimealie::mealie::{ApiError, CreateOutcome, MealieUser, RecipeApi};
use minimealie::settings;
use minimealie::storage::{KeyValueStore, MemoryStore, Scope};
use minimealie::surface::{Badge, ExtensionSurface, MenuItem, MenuUpdate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateFromUrl { url: String },
    CreateFromHtml { origin: Option<String>, html_len: usize },
    GetUser,
    TestScrape { url: String },
    Search { query: String },
}

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum ScrapeScript {
    Recipe,
    NotRecipe,
    Timeout,
    HttpError(u16),
}

/// Recipe server double with scripted answers and a call journal.
pub struct ScriptedApi {
    calls: Mutex<Vec<ApiCall>>,
    create_outcome: CreateOutcome,
    create_delay_ms: u64,
    scrape: ScrapeScript,
    search_items: Vec<RecipeSummary>,
    user: Result<String, u16>,
}

// Each test binary uses its own subset of the fixture surface.
#[allow(dead_code)]
impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            create_outcome: CreateOutcome::Success,
            create_delay_ms: 0,
            scrape: ScrapeScript::Recipe,
            search_items: Vec::new(),
            user: Ok("chef".to_string()),
        }
    }

    pub fn with_create_outcome(mut self, outcome: CreateOutcome) -> Self {
        self.create_outcome = outcome;
        self
    }

    /// Makes create calls take this long on the (test) clock.
    pub fn with_create_delay_ms(mut self, delay_ms: u64) -> Self {
        self.create_delay_ms = delay_ms;
        self
    }

    pub fn with_scrape(mut self, scrape: ScrapeScript) -> Self {
        self.scrape = scrape;
        self
    }

    pub fn with_search_items(mut self, items: Vec<RecipeSummary>) -> Self {
        self.search_items = items;
        self
    }

    pub fn with_user_error(mut self, status: u16) -> Self {
        self.user = Err(status);
        self
    }

    pub async fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().await.clone()
    }

    pub async fn create_calls(&self) -> usize {
        self.calls()
            .await
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    ApiCall::CreateFromUrl { .. } | ApiCall::CreateFromHtml { .. }
                )
            })
            .count()
    }
}

#[async_trait]
impl RecipeApi for ScriptedApi {
    async fn create_from_url(
        &self,
        url: &Url,
        _credentials: &settings::Credentials,
    ) -> Result<CreateOutcome, ApiError> {
        if self.create_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.create_delay_ms)).await;
        }
        self.calls.lock().await.push(ApiCall::CreateFromUrl {
            url: url.to_string(),
        });
        Ok(self.create_outcome)
    }

    async fn create_from_html(
        &self,
        html: &str,
        _credentials: &settings::Credentials,
        origin: Option<&Url>,
    ) -> Result<CreateOutcome, ApiError> {
        if self.create_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.create_delay_ms)).await;
        }
        self.calls.lock().await.push(ApiCall::CreateFromHtml {
            origin: origin.map(Url::to_string),
            html_len: html.len(),
        });
        Ok(self.create_outcome)
    }

    async fn get_user(
        &self,
        _credentials: &settings::Credentials,
    ) -> Result<MealieUser, ApiError> {
        self.calls.lock().await.push(ApiCall::GetUser);
        match &self.user {
            Ok(username) => Ok(MealieUser {
                username: username.clone(),
                full_name: None,
                email: None,
            }),
            Err(status) => Err(ApiError::Http {
                status: *status,
                message: None,
            }),
        }
    }

    async fn test_scrape_url(
        &self,
        url: &Url,
        _credentials: &settings::Credentials,
    ) -> Result<bool, ApiError> {
        self.calls.lock().await.push(ApiCall::TestScrape {
            url: url.to_string(),
        });
        match self.scrape {
            ScrapeScript::Recipe => Ok(true),
            ScrapeScript::NotRecipe => Ok(false),
            ScrapeScript::Timeout => Err(ApiError::Timeout),
            ScrapeScript::HttpError(status) => Err(ApiError::Http {
                status,
                message: None,
            }),
        }
    }

    async fn search_recipes(
        &self,
        query: &str,
        _credentials: &settings::Credentials,
    ) -> Result<Vec<RecipeSummary>, ApiError> {
        self.calls.lock().await.push(ApiCall::Search {
            query: query.to_string(),
        });
        Ok(self.search_items.clone())
    }
}

/// Capture double returning a fixed answer.
pub struct ScriptedCapture {
    html: Option<String>,
    calls: Mutex<usize>,
}

#[allow(dead_code)]
impl ScriptedCapture {
    pub fn returning(html: Option<&str>) -> Self {
        Self {
            html: html.map(str::to_string),
            calls: Mutex::new(0),
        }
    }

    pub async fn call_count(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait]
impl PageCapture for ScriptedCapture {
    async fn capture(&self, _tab: &TabRef) -> anyhow::Result<Option<String>> {
        *self.calls.lock().await += 1;
        Ok(self.html.clone())
    }
}

/// Surface that journals badge/tooltip traffic and maintains a live menu
/// item map, rejecting duplicate ids the way the host would.
pub struct RecordingSurface {
    pub badges: Mutex<Vec<Badge>>,
    pub tooltips: Mutex<Vec<String>>,
    pub popups: Mutex<usize>,
    pub items: Mutex<BTreeMap<String, MenuItem>>,
    pub creates: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            badges: Mutex::new(Vec::new()),
            tooltips: Mutex::new(Vec::new()),
            popups: Mutex::new(0),
            items: Mutex::new(BTreeMap::new()),
            creates: Mutex::new(Vec::new()),
        }
    }

    pub async fn badges(&self) -> Vec<Badge> {
        self.badges.lock().await.clone()
    }

    pub async fn popup_count(&self) -> usize {
        *self.popups.lock().await
    }

    pub async fn menu_ids(&self) -> Vec<String> {
        self.items.lock().await.keys().cloned().collect()
    }

    pub async fn create_count(&self, id: &str) -> usize {
        self.creates
            .lock()
            .await
            .iter()
            .filter(|created| created.as_str() == id)
            .count()
    }
}

#[async_trait]
impl ExtensionSurface for RecordingSurface {
    async fn set_badge(&self, badge: Badge) {
        self.badges.lock().await.push(badge);
    }

    async fn set_tooltip(&self, text: &str) {
        self.tooltips.lock().await.push(text.to_string());
    }

    async fn create_menu_item(&self, item: MenuItem) -> anyhow::Result<()> {
        self.creates.lock().await.push(item.id.clone());
        let mut items = self.items.lock().await;
        if items.contains_key(&item.id) {
            anyhow::bail!("duplicate menu id: {}", item.id);
        }
        items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn update_menu_item(&self, id: &str, update: MenuUpdate) -> anyhow::Result<()> {
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("unknown menu id: {id}"))?;
        if let Some(title) = update.title {
            item.title = title;
        }
        if let Some(enabled) = update.enabled {
            item.enabled = enabled;
        }
        Ok(())
    }

    async fn remove_menu_item(&self, id: &str) -> anyhow::Result<()> {
        self.items.lock().await.remove(id);
        Ok(())
    }

    async fn open_popup(&self) -> anyhow::Result<()> {
        *self.popups.lock().await += 1;
        Ok(())
    }
}

#[allow(dead_code)]
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub api: Arc<ScriptedApi>,
    pub surface: Arc<RecordingSurface>,
    pub capture: Arc<ScriptedCapture>,
    pub background: Arc<Background>,
}

pub fn harness(api: ScriptedApi, capture: ScriptedCapture) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(api);
    let surface = Arc::new(RecordingSurface::new());
    let capture = Arc::new(capture);
    let background = Arc::new(Background::new(
        store.clone(),
        surface.clone(),
        api.clone(),
        capture.clone(),
    ));
    Harness {
        store,
        api,
        surface,
        capture,
        background,
    }
}

pub async fn configure_server(store: &MemoryStore) {
    store
        .set(Scope::Sync, settings::SERVER_KEY, json!("https://mealie.test"))
        .await
        .unwrap();
    store
        .set(Scope::Sync, settings::TOKEN_KEY, json!("tok-123"))
        .await
        .unwrap();
}
