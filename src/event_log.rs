use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{self, KeyValueStore, Scope};

pub const EVENT_LOG_KEY: &str = "miniMealie.eventLog";
/// Oldest entries are discarded once the stored sequence reaches this size.
pub const MAX_STORED_EVENTS: usize = 300;
const DEFAULT_RECENT_LIMIT: usize = 50;
const MAX_STRING_VALUE_CHARS: usize = 500;
const SENSITIVE_KEY_MARKERS: [&str; 6] =
    ["token", "password", "secret", "auth", "key", "credential"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

/// Subsystem tag carried by every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Auth,
    RecipeCreate,
    RecipeDetect,
    HtmlCapture,
    Network,
    Storage,
    DuplicateDetect,
}

impl Feature {
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::Auth => "auth",
            Feature::RecipeCreate => "recipe-create",
            Feature::RecipeDetect => "recipe-detect",
            Feature::HtmlCapture => "html-capture",
            Feature::Network => "network",
            Feature::Storage => "storage",
            Feature::DuplicateDetect => "duplicate-detect",
        }
    }
}

/// Lifecycle checkpoint; events of one logical operation share an `opId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Progress,
    Success,
    Failure,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Progress => "progress",
            Phase::Success => "success",
            Phase::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub id: String,
    pub ts: i64,
    pub level: Level,
    pub feature: Feature,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl LogEvent {
    pub fn new(
        level: Level,
        feature: Feature,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            ts: 0,
            level,
            feature,
            action: action.into(),
            phase: None,
            op_id: None,
            message: message.into(),
            data: None,
            duration_ms: None,
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_op_id(mut self, op_id: impl Into<String>) -> Self {
        self.op_id = Some(op_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Descriptor for one instrumented operation: subsystem tag, short action
/// name, and the human-readable label used in the emitted messages.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub feature: Feature,
    pub action: String,
    pub label: String,
}

impl OperationSpec {
    pub fn new(feature: Feature, action: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            feature,
            action: action.into(),
            label: label.into(),
        }
    }
}

pub fn new_op_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Append-only diagnostic log persisted as a bounded JSON sequence. Writes
/// are best effort: storage failures are traced and swallowed so logging can
/// never break a user-facing operation.
pub struct EventLog {
    store: Option<Arc<dyn KeyValueStore>>,
}

impl EventLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A log with no persistence backend. Events still get ids and reach the
    /// tracing mirror; nothing is stored.
    pub fn detached() -> Self {
        Self { store: None }
    }

    /// Records one event and returns its id. Assigns id/timestamp when the
    /// caller left them unset and sanitizes the payload before storage.
    pub async fn log_event(&self, mut event: LogEvent) -> String {
        if event.id.is_empty() {
            event.id = new_op_id();
        }
        if event.ts == 0 {
            event.ts = chrono::Utc::now().timestamp_millis();
        }
        event.data = event.data.take().map(sanitize_value);

        mirror_to_tracing(&event);

        let id = event.id.clone();
        if let Some(store) = &self.store
            && let Err(err) = self.append(store.as_ref(), event).await
        {
            tracing::debug!(?err, "event log write failed; event dropped");
        }
        id
    }

    pub async fn log(
        &self,
        level: Level,
        feature: Feature,
        action: &str,
        message: impl Into<String>,
    ) -> String {
        self.log_event(LogEvent::new(level, feature, action, message)).await
    }

    async fn append(&self, store: &dyn KeyValueStore, event: LogEvent) -> anyhow::Result<()> {
        let mut events = match storage::get_json::<Vec<LogEvent>>(store, Scope::Local, EVENT_LOG_KEY)
            .await
        {
            Ok(Some(events)) => events,
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::debug!(?err, "event log unreadable; starting fresh");
                Vec::new()
            }
        };

        events.push(event);
        if events.len() > MAX_STORED_EVENTS {
            let excess = events.len() - MAX_STORED_EVENTS;
            events.drain(..excess);
        }

        storage::set_json(store, Scope::Local, EVENT_LOG_KEY, &events)
            .await
            .context("persist event log")
    }

    /// The most recent events in storage order, oldest first.
    pub async fn recent(&self, limit: Option<usize>) -> anyhow::Result<Vec<LogEvent>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let events = storage::get_json::<Vec<LogEvent>>(store.as_ref(), Scope::Local, EVENT_LOG_KEY)
            .await
            .context("read event log")?
            .unwrap_or_default();

        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT);
        let start = events.len().saturating_sub(limit);
        Ok(events[start..].to_vec())
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        storage::set_json(store.as_ref(), Scope::Local, EVENT_LOG_KEY, &Vec::<LogEvent>::new())
            .await
            .context("clear event log")
    }

    /// Runs `run` bracketed by a `start` event and exactly one terminal
    /// event. The closure receives the shared operation id. A returned error
    /// is logged at error level with its duration and re-raised untouched.
    pub async fn with_operation<T, Fut, F>(&self, spec: OperationSpec, run: F) -> anyhow::Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.with_operation_judged(spec, |_| true, run).await
    }

    /// Like [`EventLog::with_operation`], but an `Ok` value the judge rejects
    /// is recorded as a failure outcome (warn level) while still being
    /// returned to the caller.
    pub async fn with_operation_judged<T, Fut, F, J>(
        &self,
        spec: OperationSpec,
        judge: J,
        run: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        J: FnOnce(&T) -> bool,
    {
        let op_id = new_op_id();
        let started = Instant::now();

        self.log_event(
            LogEvent::new(Level::Info, spec.feature, spec.action.clone(), spec.label.clone())
                .with_phase(Phase::Start)
                .with_op_id(op_id.clone()),
        )
        .await;

        let result = run(op_id.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let terminal = match &result {
            Ok(value) => {
                if judge(value) {
                    LogEvent::new(
                        Level::Info,
                        spec.feature,
                        spec.action.clone(),
                        format!("{} finished", spec.label),
                    )
                    .with_phase(Phase::Success)
                } else {
                    LogEvent::new(
                        Level::Warn,
                        spec.feature,
                        spec.action.clone(),
                        format!("{} did not succeed", spec.label),
                    )
                    .with_phase(Phase::Failure)
                }
            }
            Err(err) => LogEvent::new(
                Level::Error,
                spec.feature,
                spec.action.clone(),
                format!("{} failed: {err:#}", spec.label),
            )
            .with_phase(Phase::Failure),
        };
        self.log_event(terminal.with_op_id(op_id).with_duration(duration_ms))
            .await;

        result
    }
}

/// Severity-keyed mirror into the process diagnostics; errors take the error
/// channel, everything else stays on the ordinary one.
fn mirror_to_tracing(event: &LogEvent) {
    let feature = event.feature.as_str();
    let action = event.action.as_str();
    match event.level {
        Level::Error => tracing::error!(feature, action, "{}", event.message),
        Level::Warn => tracing::warn!(feature, action, "{}", event.message),
        Level::Info => tracing::info!(feature, action, "{}", event.message),
        Level::Debug => tracing::debug!(feature, action, "{}", event.message),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Strips credential-shaped keys and replaces oversized strings with a
/// length-tagged placeholder, recursing through nested payloads.
fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !is_sensitive_key(key))
                .map(|(key, value)| (key, sanitize_value(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::String(s) if s.chars().count() >= MAX_STRING_VALUE_CHARS => {
            Value::String(format!("[string: {} chars]", s.chars().count()))
        }
        other => other,
    }
}
