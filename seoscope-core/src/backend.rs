// Command and event contract of the analysis backend

use crate::classify::{CategoryResultDisplay, Issue};
use crate::model::{CrawlResult, LinkType, Progress, RuleCategory};
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

pub type SiteId = i32;
pub type RunId = i32;

/// A backend command failed; the message is the backend's own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommandError(pub String);

/// Outcome of a backend command as it crosses the process boundary:
/// `{"status": "ok", "data": ...}` or `{"status": "error", "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandResult<T> {
    Ok { data: T },
    Error { error: String },
}

impl<T> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        CommandResult::Ok { data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        CommandResult::Error {
            error: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandResult::Ok { .. })
    }

    pub fn into_result(self) -> Result<T, CommandError> {
        match self {
            CommandResult::Ok { data } => Ok(data),
            CommandResult::Error { error } => Err(CommandError(error)),
        }
    }
}

impl<T, E: fmt::Display> From<Result<T, E>> for CommandResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => CommandResult::ok(data),
            Err(e) => CommandResult::error(e.to_string()),
        }
    }
}

// ============================================================================
// Persisted sites and runs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteRunStatus {
    Pending,
    Running,
    Finished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRun {
    pub id: RunId,
    pub site_id: SiteId,
    pub status: SiteRunStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteWithRuns {
    pub site: Site,
    #[serde(default)]
    pub last_site_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub site_runs: Vec<SiteRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCount {
    pub link_type: LinkType,
    pub count: u32,
}

/// Category totals of one past run of a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryHistoryEntry {
    pub site_run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub result: CategoryResultDisplay,
}

pub type CategoryDetail = IndexMap<RuleCategory, Vec<Issue>>;

/// Commands the analysis backend answers.
#[allow(async_fn_in_trait)]
pub trait Backend {
    async fn get_config(&self) -> CommandResult<Settings>;

    async fn set_config(&self, settings: Settings) -> CommandResult<()>;

    async fn get_sites(&self) -> CommandResult<Vec<SiteWithRuns>>;

    async fn get_site_by_id(&self, id: SiteId) -> CommandResult<Site>;

    async fn get_site_run_by_id(&self, id: RunId) -> CommandResult<SiteRun>;

    /// Analyze one URL.
    async fn analyze_url_seo(&self, url: &str) -> CommandResult<CrawlResult>;

    /// Crawl the configured base URL.
    async fn crawl_seo(&self) -> CommandResult<CrawlResult>;

    /// `passed` filters rule results; `None` keeps all of them.
    async fn get_category_result(
        &self,
        run: RunId,
        passed: Option<bool>,
    ) -> CommandResult<CategoryResultDisplay>;

    async fn get_category_result_detail(
        &self,
        run: RunId,
        passed: Option<bool>,
    ) -> CommandResult<CategoryDetail>;

    async fn get_site_run_link_counts(&self, run: RunId) -> CommandResult<Vec<LinkCount>>;

    async fn get_site_category_history(
        &self,
        site: SiteId,
    ) -> CommandResult<Vec<CategoryHistoryEntry>>;
}

// ============================================================================
// Push events
// ============================================================================

/// Events the backend pushes while a crawl runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum BackendEvent {
    AnalysisProgress(Progress),
    SiteRunIdSet {
        site_run_id: RunId,
    },
    AnalysisFinished {
        site_run_id: RunId,
        #[serde(default)]
        result: Option<CrawlResult>,
    },
}

impl BackendEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BackendEvent::AnalysisProgress(_) => "analysis_progress",
            BackendEvent::SiteRunIdSet { .. } => "site_run_id_set",
            BackendEvent::AnalysisFinished { .. } => "analysis_finished",
        }
    }
}

/// Fan-out of backend events to every listening view.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BackendEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many listeners received the event.
    pub fn emit(&self, event: BackendEvent) -> usize {
        trace!(event = event.name(), "emit");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.tx.subscribe()
    }
}
