use async_trait::async_trait;

/// Frame cycle rendered on the badge while work is in flight.
pub const SPINNER_FRAMES: [&str; 4] = ["◐", "◓", "◑", "◒"];
pub const BUSY_BADGE_COLOR: &str = "#666666";
pub const SUCCESS_BADGE_COLOR: &str = "#2e7d32";
pub const FAILURE_BADGE_COLOR: &str = "#c62828";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultBadge {
    Success,
    Failure,
}

/// What the toolbar badge should show right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Cleared,
    Busy { frame: &'static str },
    Result(ResultBadge),
}

impl Badge {
    pub fn busy_frame(index: usize) -> Self {
        Badge::Busy {
            frame: SPINNER_FRAMES[index % SPINNER_FRAMES.len()],
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Badge::Cleared => "",
            Badge::Busy { frame } => frame,
            Badge::Result(ResultBadge::Success) => "✅",
            Badge::Result(ResultBadge::Failure) => "❌",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Badge::Cleared => BUSY_BADGE_COLOR,
            Badge::Busy { .. } => BUSY_BADGE_COLOR,
            Badge::Result(ResultBadge::Success) => SUCCESS_BADGE_COLOR,
            Badge::Result(ResultBadge::Failure) => FAILURE_BADGE_COLOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub id: String,
    pub title: String,
    pub enabled: bool,
    pub parent_id: Option<String>,
}

impl MenuItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            enabled: true,
            parent_id: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Partial update for an existing menu item; `None` fields stay untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuUpdate {
    pub title: Option<String>,
    pub enabled: Option<bool>,
}

/// The host chrome this crate drives: toolbar badge, tooltip, context menu,
/// and the settings popup. Implementations must tolerate repeated identical
/// calls.
#[async_trait]
pub trait ExtensionSurface: Send + Sync {
    async fn set_badge(&self, badge: Badge);
    async fn set_tooltip(&self, text: &str);
    async fn create_menu_item(&self, item: MenuItem) -> anyhow::Result<()>;
    async fn update_menu_item(&self, id: &str, update: MenuUpdate) -> anyhow::Result<()>;
    async fn remove_menu_item(&self, id: &str) -> anyhow::Result<()>;
    async fn open_popup(&self) -> anyhow::Result<()>;
}

/// Surface that narrates every call through tracing. Stands in for real
/// browser chrome when running from the command line.
pub struct ConsoleSurface;

#[async_trait]
impl ExtensionSurface for ConsoleSurface {
    async fn set_badge(&self, badge: Badge) {
        match badge {
            Badge::Cleared => tracing::debug!("badge cleared"),
            _ => tracing::debug!(text = badge.text(), color = badge.color(), "badge set"),
        }
    }

    async fn set_tooltip(&self, text: &str) {
        tracing::debug!(text, "tooltip set");
    }

    async fn create_menu_item(&self, item: MenuItem) -> anyhow::Result<()> {
        tracing::debug!(
            id = %item.id,
            title = %item.title,
            enabled = item.enabled,
            parent = item.parent_id.as_deref(),
            "menu item created"
        );
        Ok(())
    }

    async fn update_menu_item(&self, id: &str, update: MenuUpdate) -> anyhow::Result<()> {
        tracing::debug!(id, title = update.title.as_deref(), enabled = update.enabled, "menu item updated");
        Ok(())
    }

    async fn remove_menu_item(&self, id: &str) -> anyhow::Result<()> {
        tracing::debug!(id, "menu item removed");
        Ok(())
    }

    async fn open_popup(&self) -> anyhow::Result<()> {
        tracing::info!("open the settings popup to finish configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_frames_wrap_around() {
        assert_eq!(Badge::busy_frame(0), Badge::Busy { frame: "◐" });
        assert_eq!(Badge::busy_frame(3), Badge::Busy { frame: "◒" });
        assert_eq!(Badge::busy_frame(4), Badge::Busy { frame: "◐" });
    }

    #[test]
    fn badge_text_and_color() {
        assert_eq!(Badge::Cleared.text(), "");
        assert_eq!(Badge::Result(ResultBadge::Success).text(), "✅");
        assert_eq!(Badge::Result(ResultBadge::Failure).text(), "❌");
        assert_eq!(Badge::Result(ResultBadge::Failure).color(), FAILURE_BADGE_COLOR);
    }
}
