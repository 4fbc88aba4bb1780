// Crawl state: the result cell, its classifications and the run lifecycle

use crate::backend::{Backend, BackendEvent, CommandResult, RunId};
use crate::classify::{
    self, CategoryGroups, CategoryResultDisplay, Issue, LinkGroups, RuleSummary,
};
use crate::model::{CrawlResult, PageResult, Progress, RuleCategory, Severity, SiteIssue};
use crate::notify::Notifier;
use crate::query::QueryCache;
use indexmap::IndexMap;
use seoscope_graph::{Cell, Derived, Graph, Lens, path};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the current crawl is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Running { run_id: Option<RunId> },
    Finished { run_id: Option<RunId> },
}

impl RunPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, RunPhase::Running { .. })
    }

    pub fn run_id(&self) -> Option<RunId> {
        match self {
            RunPhase::Idle => None,
            RunPhase::Running { run_id } | RunPhase::Finished { run_id } => *run_id,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Running { run_id: None } => write!(f, "running"),
            RunPhase::Running { run_id: Some(id) } => write!(f, "running (run {})", id),
            RunPhase::Finished { run_id: None } => write!(f, "finished"),
            RunPhase::Finished { run_id: Some(id) } => write!(f, "finished (run {})", id),
        }
    }
}

/// Cells holding one crawl result and everything derived from it.
#[derive(Clone)]
pub struct CrawlState {
    result: Cell<CrawlResult>,
    page_results: Lens<CrawlResult, Vec<PageResult>>,
    site_result: Lens<CrawlResult, Vec<SiteIssue>>,
    total_pages: Lens<CrawlResult, u32>,
    links: Derived<LinkGroups>,
    site_issues: Derived<Vec<Issue>>,
    issues: Derived<Vec<Issue>>,
    categories: Derived<CategoryGroups>,
    category_detail: Derived<IndexMap<RuleCategory, Vec<RuleSummary>>>,
    category_counts: Derived<CategoryResultDisplay>,
    severities: Derived<IndexMap<Severity, Vec<Issue>>>,
    progress: Cell<Option<Progress>>,
    phase: Cell<RunPhase>,
}

impl CrawlState {
    pub fn new(graph: &Graph) -> Self {
        let result = graph.cell(CrawlResult::default());
        let page_results = result.lens(path!(CrawlResult => page_results));
        let site_result = result.lens(path!(CrawlResult => site_result));
        let total_pages = result.lens(path!(CrawlResult => total_pages));

        let pages = page_results.clone();
        let links = graph.derive(move |g| classify::group_links(&g.get(&pages)));

        let site = site_result.clone();
        let site_issues = graph.derive(move |g| classify::site_issues(&g.get(&site)));

        let (pages, site) = (page_results.clone(), site_issues.clone());
        let issues = graph.derive(move |g| {
            let mut issues = classify::page_issues(&g.get(&pages));
            issues.extend(g.get(&site));
            issues
        });

        let all = issues.clone();
        let categories = graph.derive(move |g| classify::group_by_category(&g.get(&all)));

        let groups = categories.clone();
        let category_detail = graph.derive(move |g| classify::category_detail(&g.get(&groups)));

        let all = issues.clone();
        let category_counts = graph.derive(move |g| classify::category_counts(&g.get(&all)));

        let all = issues.clone();
        let severities = graph.derive(move |g| classify::group_by_severity(&g.get(&all)));

        Self {
            result,
            page_results,
            site_result,
            total_pages,
            links,
            site_issues,
            issues,
            categories,
            category_detail,
            category_counts,
            severities,
            progress: graph.cell(None),
            phase: graph.cell(RunPhase::Idle),
        }
    }

    pub fn result(&self) -> &Cell<CrawlResult> {
        &self.result
    }

    pub fn page_results(&self) -> &Lens<CrawlResult, Vec<PageResult>> {
        &self.page_results
    }

    pub fn site_result(&self) -> &Lens<CrawlResult, Vec<SiteIssue>> {
        &self.site_result
    }

    pub fn total_pages(&self) -> &Lens<CrawlResult, u32> {
        &self.total_pages
    }

    /// Pages grouped by link type, plus the `"Total"` group.
    pub fn links(&self) -> &Derived<LinkGroups> {
        &self.links
    }

    /// Site-level issues, one per URL their context names.
    pub fn site_issues(&self) -> &Derived<Vec<Issue>> {
        &self.site_issues
    }

    /// Page issues followed by site issues.
    pub fn issues(&self) -> &Derived<Vec<Issue>> {
        &self.issues
    }

    pub fn categories(&self) -> &Derived<CategoryGroups> {
        &self.categories
    }

    pub fn category_detail(&self) -> &Derived<IndexMap<RuleCategory, Vec<RuleSummary>>> {
        &self.category_detail
    }

    pub fn category_counts(&self) -> &Derived<CategoryResultDisplay> {
        &self.category_counts
    }

    pub fn severities(&self) -> &Derived<IndexMap<Severity, Vec<Issue>>> {
        &self.severities
    }

    pub fn progress(&self) -> &Cell<Option<Progress>> {
        &self.progress
    }

    pub fn phase(&self) -> &Cell<RunPhase> {
        &self.phase
    }

    /// Replace the result wholesale.
    pub fn load(&self, result: CrawlResult) -> bool {
        self.result.set(result)
    }
}

/// Drives [`CrawlState`] from backend commands and push events.
pub struct CrawlConsumer<B> {
    backend: Rc<B>,
    state: CrawlState,
    queries: QueryCache,
    notifier: Notifier,
}

impl<B: Backend> CrawlConsumer<B> {
    pub fn new(backend: Rc<B>, state: CrawlState, queries: QueryCache, notifier: Notifier) -> Self {
        Self {
            backend,
            state,
            queries,
            notifier,
        }
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn queries(&self) -> &QueryCache {
        &self.queries
    }

    /// Analyze a single URL. Returns whether a result was applied.
    pub async fn analyze_url(&self, url: &str) -> bool {
        info!("Analyzing {}", url);
        self.run_command(self.backend.analyze_url_seo(url)).await
    }

    /// Crawl the configured site. Returns whether a result was applied.
    pub async fn crawl(&self) -> bool {
        info!("Starting crawl");
        self.run_command(self.backend.crawl_seo()).await
    }

    async fn run_command(&self, command: impl Future<Output = CommandResult<CrawlResult>>) -> bool {
        let previous = self.state.phase.get();
        let previous_progress = self.state.progress.get();
        self.start_run(None);

        match command.await.into_result() {
            Ok(result) => {
                self.state.load(result);
                self.finish_run(self.state.phase.get().run_id());
                true
            }
            Err(e) => {
                self.notifier.error(format!("Analysis failed: {}", e));
                self.state.progress.set(previous_progress);
                self.state.phase.set(previous);
                false
            }
        }
    }

    fn start_run(&self, run_id: Option<RunId>) {
        self.state.progress.set(None);
        self.state.phase.set(RunPhase::Running { run_id });
    }

    fn finish_run(&self, run_id: Option<RunId>) {
        self.state.phase.set(RunPhase::Finished { run_id });
        self.queries.invalidate_run(run_id);
    }

    /// Apply one push event. Returns whether it changed the run.
    pub fn handle_event(&self, event: BackendEvent) -> bool {
        let phase = self.state.phase.get();
        match event {
            BackendEvent::AnalysisProgress(progress) => {
                if !phase.is_running() {
                    debug!("Ignoring progress while {}", phase);
                    return false;
                }
                self.state.progress.set(Some(progress));
                true
            }
            BackendEvent::SiteRunIdSet { site_run_id } => match phase {
                RunPhase::Running { run_id: None } => {
                    self.state.phase.set(RunPhase::Running {
                        run_id: Some(site_run_id),
                    });
                    true
                }
                RunPhase::Running { run_id: Some(current) } => {
                    if current != site_run_id {
                        warn!("Run id changed from {} to {} mid-run", current, site_run_id);
                    }
                    self.state.phase.set(RunPhase::Running {
                        run_id: Some(site_run_id),
                    })
                }
                // A run started from elsewhere.
                RunPhase::Idle | RunPhase::Finished { .. } => {
                    self.start_run(Some(site_run_id));
                    true
                }
            },
            BackendEvent::AnalysisFinished {
                site_run_id,
                result,
            } => {
                let ours = match phase {
                    RunPhase::Running { run_id } => run_id.is_none_or(|id| id == site_run_id),
                    _ => false,
                };
                if !ours {
                    debug!("Run {} finished while {}", site_run_id, phase);
                    self.queries.invalidate_run(Some(site_run_id));
                    return false;
                }
                if let Some(result) = result {
                    self.state.load(result);
                }
                self.finish_run(Some(site_run_id));
                true
            }
        }
    }

    /// Apply events until `cancel` fires or the sender goes away. Nothing
    /// received after cancellation is applied.
    pub async fn listen(
        &self,
        mut events: broadcast::Receiver<BackendEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        self.handle_event(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} backend events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Stopped listening for backend events");
    }
}
