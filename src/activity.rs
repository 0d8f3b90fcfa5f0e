use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::menu::MenuController;
use crate::storage::{self, KeyValueStore, Scope};
use crate::surface::{Badge, ExtensionSurface, ResultBadge};

pub const ACTIVITY_KEY: &str = "miniMealie.activity";
pub const SPINNER_FRAME_MS: u64 = 200;
pub const RESULT_BADGE_CLEAR_SECS: u64 = 4;

/// Persisted snapshot of the busy streak, absent while idle. Other surfaces
/// read this through storage; the in-memory tracker is the source of truth
/// within the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityState {
    pub active_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
}

impl ActivityState {
    /// Accepts only values carrying a well-formed `activeCount`; anything
    /// else reads as absent.
    pub fn from_stored(value: &Value) -> Option<Self> {
        value.get("activeCount")?.as_u64()?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// Reads the persisted snapshot, treating corrupt values as absent.
pub async fn stored_state(store: &dyn KeyValueStore) -> anyhow::Result<Option<ActivityState>> {
    let Some(value) = store.get(Scope::Local, ACTIVITY_KEY).await? else {
        return Ok(None);
    };
    Ok(ActivityState::from_stored(&value))
}

struct SpinnerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct TrackerInner {
    count: u32,
    label: Option<String>,
    op_id: Option<String>,
    started_at: Option<i64>,
    spinner: Option<SpinnerHandle>,
}

impl TrackerInner {
    fn snapshot(&self) -> ActivityState {
        ActivityState {
            active_count: self.count,
            label: self.label.clone(),
            op_id: self.op_id.clone(),
            started_at: self.started_at,
        }
    }
}

/// Saturating counter of in-flight operations plus the spinner loop it
/// drives. Overlapping operations share one spinner and one `started_at`;
/// the badge and menu converge to idle exactly once the count returns to 0.
pub struct ActivityTracker {
    store: Arc<dyn KeyValueStore>,
    surface: Arc<dyn ExtensionSurface>,
    menu: Arc<MenuController>,
    inner: Mutex<TrackerInner>,
    badge_epoch: Arc<AtomicU64>,
}

impl ActivityTracker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        surface: Arc<dyn ExtensionSurface>,
        menu: Arc<MenuController>,
    ) -> Self {
        Self {
            store,
            surface,
            menu,
            inner: Mutex::new(TrackerInner {
                count: 0,
                label: None,
                op_id: None,
                started_at: None,
                spinner: None,
            }),
            badge_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Marks one more operation in flight. The latest label and op id win;
    /// `started_at` and the spinner belong to the streak and are set only on
    /// the idle-to-busy transition.
    pub async fn begin(&self, label: &str, op_id: Option<String>) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.count += 1;
            inner.label = Some(label.to_string());
            inner.op_id = op_id;
            if inner.started_at.is_none() {
                inner.started_at = Some(chrono::Utc::now().timestamp_millis());
            }
            if inner.spinner.is_none() {
                inner.spinner = Some(self.spawn_spinner());
            }
            inner.snapshot()
        };

        // Invalidate any pending result-badge clear before the spinner paints.
        self.badge_epoch.fetch_add(1, Ordering::SeqCst);

        self.surface.set_tooltip(label).await;
        self.menu.show_busy(label).await;
        self.persist(snapshot).await;
    }

    /// Marks one operation finished. While others remain in flight only the
    /// persisted snapshot changes; on the last one the spinner stops, the
    /// result glyph (if any) is flashed, the stored snapshot is removed, and
    /// the menu returns to its idle shape.
    pub async fn end(&self, result: Option<ResultBadge>, tooltip: Option<&str>) {
        let mut inner = self.inner.lock().await;
        inner.count = inner.count.saturating_sub(1);

        if inner.count > 0 {
            let snapshot = inner.snapshot();
            drop(inner);
            self.persist(snapshot).await;
            return;
        }

        inner.label = None;
        inner.op_id = None;
        inner.started_at = None;
        let spinner = inner.spinner.take();
        drop(inner);

        if let Some(spinner) = spinner {
            spinner.cancel.cancel();
            if let Err(err) = spinner.task.await {
                tracing::debug!(?err, "spinner task join failed");
            }
        }

        match result {
            Some(badge) => self.flash(badge).await,
            None => {
                self.badge_epoch.fetch_add(1, Ordering::SeqCst);
                self.surface.set_badge(Badge::Cleared).await;
            }
        }
        if let Some(text) = tooltip {
            self.surface.set_tooltip(text).await;
        }
        if let Err(err) = self.store.remove(Scope::Local, ACTIVITY_KEY).await {
            tracing::debug!(?err, "clear persisted activity failed");
        }
        self.menu.restore_idle_menu().await;
    }

    /// Shows a result glyph that clears itself after a few seconds unless
    /// newer badge activity supersedes it. Also used directly for failures
    /// that never start an operation, like missing configuration.
    pub async fn flash(&self, result: ResultBadge) {
        let epoch = self.badge_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.surface.set_badge(Badge::Result(result)).await;

        let surface = self.surface.clone();
        let badge_epoch = self.badge_epoch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(RESULT_BADGE_CLEAR_SECS)).await;
            if badge_epoch.load(Ordering::SeqCst) == epoch {
                surface.set_badge(Badge::Cleared).await;
            }
        });
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.count > 0
    }

    pub async fn busy_label(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        if inner.count > 0 { inner.label.clone() } else { None }
    }

    /// Current in-memory state, regardless of what storage says.
    pub async fn snapshot(&self) -> ActivityState {
        self.inner.lock().await.snapshot()
    }

    fn spawn_spinner(&self) -> SpinnerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let surface = self.surface.clone();
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_millis(SPINNER_FRAME_MS));
            let mut frame = 0usize;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        surface.set_badge(Badge::busy_frame(frame)).await;
                        frame = frame.wrapping_add(1);
                    }
                }
            }
        });
        SpinnerHandle { cancel, task }
    }

    async fn persist(&self, state: ActivityState) {
        if let Err(err) =
            storage::set_json(self.store.as_ref(), Scope::Local, ACTIVITY_KEY, &state).await
        {
            tracing::debug!(?err, "persist activity failed");
        }
    }
}
