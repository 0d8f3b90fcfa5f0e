use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use crate::detection::{DetectionCache, DetectionOutcome};
use crate::duplicates::DuplicateMatches;
use crate::settings::Settings;
use crate::storage::KeyValueStore;
use crate::surface::{Badge, ExtensionSurface, MenuItem, MenuUpdate, ResultBadge};

pub const MAIN_MENU_ID: &str = "runCreateRecipe";
pub const DUPLICATE_URL_MENU_ID: &str = "viewDuplicateByUrl";
pub const DUPLICATE_NAME_PARENT_ID: &str = "viewDuplicatesByName";

pub const TITLE_DETECTED: &str = "Recipe Detected - Add Recipe to Mealie";
pub const TITLE_NOT_DETECTED: &str = "No Recipe Detected - Attempt to Add Recipe";

pub fn duplicate_name_child_id(slug: &str) -> String {
    format!("{DUPLICATE_NAME_PARENT_ID}:{slug}")
}

/// Everything the menu/badge derivation looks at.
#[derive(Debug, Clone)]
pub struct MenuInputs {
    pub busy_label: Option<String>,
    pub credentials_present: bool,
    pub detected_recipe: bool,
    pub duplicates: DuplicateMatches,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainMenuEntry {
    pub title: String,
    pub enabled: bool,
}

/// Desired surface state. `None` badge means leave the badge alone (the
/// spinner or a result flash owns it); `None` main means remove the item;
/// `None` duplicates means keep whatever duplicate entries exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuPlan {
    pub badge: Option<Badge>,
    pub main: Option<MainMenuEntry>,
    pub duplicates: Option<Vec<MenuItem>>,
}

/// Pure derivation from inputs to the plan in §-free terms: busy wins, then
/// missing credentials, then the idle title plus duplicate entries.
pub fn derive(inputs: &MenuInputs) -> MenuPlan {
    if let Some(label) = &inputs.busy_label {
        return MenuPlan {
            badge: None,
            main: Some(MainMenuEntry {
                title: format!("{label}…"),
                enabled: false,
            }),
            duplicates: None,
        };
    }

    if !inputs.credentials_present {
        return MenuPlan {
            badge: Some(Badge::Result(ResultBadge::Failure)),
            main: None,
            duplicates: Some(Vec::new()),
        };
    }

    let title = if inputs.detected_recipe {
        TITLE_DETECTED
    } else {
        TITLE_NOT_DETECTED
    };

    MenuPlan {
        badge: Some(Badge::Cleared),
        main: Some(MainMenuEntry {
            title: title.to_string(),
            enabled: true,
        }),
        duplicates: Some(duplicate_menu_items(&inputs.duplicates)),
    }
}

fn duplicate_menu_items(duplicates: &DuplicateMatches) -> Vec<MenuItem> {
    match duplicates {
        DuplicateMatches::None => Vec::new(),
        DuplicateMatches::Url(found) => {
            vec![MenuItem::new(DUPLICATE_URL_MENU_ID, found.name.clone())]
        }
        DuplicateMatches::Name(matches) => {
            let title = if matches.len() == 1 {
                "1 possible duplicate found".to_string()
            } else {
                format!("{} possible duplicates found", matches.len())
            };
            let mut items = vec![MenuItem::new(DUPLICATE_NAME_PARENT_ID, title)];
            for found in matches {
                items.push(
                    MenuItem::new(duplicate_name_child_id(&found.slug), found.name.clone())
                        .with_parent(DUPLICATE_NAME_PARENT_ID),
                );
            }
            items
        }
    }
}

struct MenuState {
    current_page: Option<Url>,
    duplicates: DuplicateMatches,
    duplicate_ids: Vec<String>,
    main_present: bool,
}

/// Applies menu plans to the surface and remembers which item ids exist, so
/// re-deriving with unchanged inputs never piles up duplicate entries. Host
/// menu errors are traced and dropped.
pub struct MenuController {
    store: Arc<dyn KeyValueStore>,
    cache: Arc<DetectionCache>,
    surface: Arc<dyn ExtensionSurface>,
    state: Mutex<MenuState>,
}

impl MenuController {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cache: Arc<DetectionCache>,
        surface: Arc<dyn ExtensionSurface>,
    ) -> Self {
        Self {
            store,
            cache,
            surface,
            state: Mutex::new(MenuState {
                current_page: None,
                duplicates: DuplicateMatches::None,
                duplicate_ids: Vec::new(),
                main_present: false,
            }),
        }
    }

    pub async fn set_current_page(&self, page: Option<Url>) {
        self.state.lock().await.current_page = page;
    }

    pub async fn set_duplicates(&self, duplicates: DuplicateMatches) {
        self.state.lock().await.duplicates = duplicates;
    }

    /// Switches the menu into its busy shape. The badge is left to the
    /// spinner loop.
    pub async fn show_busy(&self, label: &str) {
        let plan = derive(&MenuInputs {
            busy_label: Some(label.to_string()),
            credentials_present: true,
            detected_recipe: false,
            duplicates: DuplicateMatches::None,
        });
        self.apply(plan).await;
    }

    /// Full idle derivation, badge included.
    pub async fn show_idle(&self) {
        let plan = self.idle_plan().await;
        self.apply(plan).await;
    }

    /// Idle derivation that leaves the badge untouched, for callers that
    /// just flashed a result glyph.
    pub async fn restore_idle_menu(&self) {
        let mut plan = self.idle_plan().await;
        plan.badge = None;
        self.apply(plan).await;
    }

    async fn idle_plan(&self) -> MenuPlan {
        let (current_page, duplicates) = {
            let state = self.state.lock().await;
            (state.current_page.clone(), state.duplicates.clone())
        };

        let credentials_present = match Settings::load(self.store.as_ref()).await {
            Ok(settings) => settings.credentials().is_some(),
            Err(err) => {
                tracing::debug!(?err, "settings unreadable; treating credentials as absent");
                false
            }
        };

        let detected_recipe = match &current_page {
            Some(page) => self
                .cache
                .get(page)
                .await
                .is_some_and(|entry| entry.outcome == DetectionOutcome::Recipe),
            None => false,
        };

        derive(&MenuInputs {
            busy_label: None,
            credentials_present,
            detected_recipe,
            duplicates,
        })
    }

    async fn apply(&self, plan: MenuPlan) {
        let mut state = self.state.lock().await;

        if let Some(badge) = plan.badge {
            self.surface.set_badge(badge).await;
        }

        match plan.main {
            Some(entry) => {
                if state.main_present {
                    let update = MenuUpdate {
                        title: Some(entry.title),
                        enabled: Some(entry.enabled),
                    };
                    if let Err(err) = self.surface.update_menu_item(MAIN_MENU_ID, update).await {
                        tracing::debug!(?err, "menu update failed");
                    }
                } else {
                    let item = MenuItem {
                        id: MAIN_MENU_ID.to_string(),
                        title: entry.title,
                        enabled: entry.enabled,
                        parent_id: None,
                    };
                    if let Err(err) = self.surface.create_menu_item(item).await {
                        tracing::debug!(?err, "menu create failed");
                    }
                    state.main_present = true;
                }
            }
            None => {
                if state.main_present {
                    if let Err(err) = self.surface.remove_menu_item(MAIN_MENU_ID).await {
                        tracing::debug!(?err, "menu remove failed");
                    }
                    state.main_present = false;
                }
            }
        }

        if let Some(items) = plan.duplicates {
            for id in state.duplicate_ids.drain(..) {
                if let Err(err) = self.surface.remove_menu_item(&id).await {
                    tracing::debug!(?err, id, "duplicate entry remove failed");
                }
            }
            for item in items {
                state.duplicate_ids.push(item.id.clone());
                if let Err(err) = self.surface.create_menu_item(item).await {
                    tracing::debug!(?err, "duplicate entry create failed");
                }
            }
        }
    }
}
